use std::collections::HashMap;
use std::path::Path;
use log::debug;
use serde::Deserialize;
use tokio::process::Command;

use crate::engine::{EngineError, FileCheck};

/// Format tag written on every output, holding the run's flags
pub const REPROCESSED_TAG: &str = "reprocessed";
/// Value of [`REPROCESSED_TAG`] written on originals by tag-original
pub const TAGGED_ORIGINAL_VALUE: &str = "tagged_as_processed";
/// Marker in the `comment` tag written by older releases
pub const LEGACY_COMMENT: &str = "PROCESSED_BY_VIDREPROCESS";

/// Subset of `ffprobe -show_format` output
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeData {
    #[serde(default)]
    pub format: ProbeFormat,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeFormat {
    pub format_name: Option<String>,
    pub duration: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl ProbeFormat {
    /// Look up a tag ignoring case, since muxers differ on tag key case
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Classify a file from its format tags
///
/// An output of an earlier run carries the flags in `reprocessed` and is
/// never picked up again. An original marked by tag-original, or a file
/// carrying the legacy comment, needs the user's confirmation.
pub fn classify(format: &ProbeFormat) -> FileCheck {
    match format.tag(REPROCESSED_TAG) {
        Some(TAGGED_ORIGINAL_VALUE) => return FileCheck::NeedsConfirmation,
        Some(_) => return FileCheck::Processed,
        None => {}
    }
    if format
        .tag("comment")
        .is_some_and(|c| c.contains(LEGACY_COMMENT))
    {
        return FileCheck::NeedsConfirmation;
    }
    FileCheck::NotProcessed
}

pub fn parse_probe(json: &str) -> Result<ProbeData, EngineError> {
    serde_json::from_str(json).map_err(|e| EngineError::Failed(format!("Failed to parse ffprobe JSON: {}", e)))
}

/// Run ffprobe on `file_path` and read its format tags
pub async fn probe_file(ffprobe_bin: &Path, file_path: &Path) -> Result<ProbeData, EngineError> {
    if !file_path.exists() {
        return Err(EngineError::InvalidPath(file_path.display().to_string()));
    }

    debug!("ffprobe: probing {}", file_path.display());
    let output = Command::new(ffprobe_bin)
        .arg("-v")
        .arg("quiet")
        .arg("-print_format")
        .arg("json")
        .arg("-show_format")
        .arg(file_path)
        .output()
        .await
        .map_err(|source| EngineError::Spawn {
            program: ffprobe_bin.display().to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(EngineError::Failed(format!(
            "ffprobe failed (exit code {}) for {}",
            output.status.code().unwrap_or(-1),
            file_path.display()
        )));
    }

    parse_probe(&String::from_utf8_lossy(&output.stdout))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format_with(tags: &[(&str, &str)]) -> ProbeFormat {
        ProbeFormat {
            tags: tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_untagged_file_is_not_processed() {
        assert_eq!(classify(&format_with(&[])), FileCheck::NotProcessed);
        assert_eq!(
            classify(&format_with(&[("comment", "holiday 2019")])),
            FileCheck::NotProcessed
        );
    }

    #[test]
    fn test_output_flags_mean_processed() {
        let format = format_with(&[("reprocessed", "quality=23; codec=libx264; preset=medium")]);
        assert_eq!(classify(&format), FileCheck::Processed);
    }

    #[test]
    fn test_tagged_original_and_legacy_comment_need_confirmation() {
        let tagged = format_with(&[("REPROCESSED", "tagged_as_processed")]);
        assert_eq!(classify(&tagged), FileCheck::NeedsConfirmation);

        let legacy = format_with(&[("comment", "PROCESSED_BY_VIDREPROCESS")]);
        assert_eq!(classify(&legacy), FileCheck::NeedsConfirmation);
    }

    #[test]
    fn test_parse_probe_output() {
        let json = r#"{
            "format": {
                "filename": "/v/a.mp4",
                "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
                "duration": "12.480000",
                "tags": {
                    "major_brand": "isom",
                    "reprocessed": "quality=28; codec=hevc; preset=slow",
                    "comment": "PROCESSED_BY_VIDREPROCESS"
                }
            }
        }"#;
        let data = parse_probe(json).unwrap();
        assert_eq!(data.format.duration.as_deref(), Some("12.480000"));
        assert_eq!(classify(&data.format), FileCheck::Processed);

        let bare = parse_probe(r#"{"format": {"format_name": "matroska,webm"}}"#).unwrap();
        assert!(bare.format.tags.is_empty());
        assert!(parse_probe("not json").is_err());
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let err = probe_file(Path::new("ffprobe"), Path::new("/nonexistent/clip.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidPath(_)));
    }
}
