use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Video codec handed to ffmpeg as `-codec:v`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Libx264,
    H264,
    Hevc,
    Av1,
    Vp9,
    Mpeg4,
}

/// Encoder speed/size tradeoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
}

/// Hardware decode acceleration passed as `-hwaccel`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HwAccel {
    None,
    Auto,
    Cuda,
    Vaapi,
    Qsv,
    Videotoolbox,
}

macro_rules! name_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.to_ascii_lowercase().as_str() {
                    $($name => Ok($ty::$variant),)+
                    other => anyhow::bail!("Unknown {}: {}", $kind, other),
                }
            }
        }
    };
}

name_enum!(Codec, "codec", {
    Libx264 => "libx264",
    H264 => "h264",
    Hevc => "hevc",
    Av1 => "av1",
    Vp9 => "vp9",
    Mpeg4 => "mpeg4",
});

name_enum!(Preset, "preset", {
    Ultrafast => "ultrafast",
    Superfast => "superfast",
    Veryfast => "veryfast",
    Faster => "faster",
    Fast => "fast",
    Medium => "medium",
    Slow => "slow",
    Slower => "slower",
    Veryslow => "veryslow",
});

name_enum!(HwAccel, "hwaccel", {
    None => "none",
    Auto => "auto",
    Cuda => "cuda",
    Vaapi => "vaapi",
    Qsv => "qsv",
    Videotoolbox => "videotoolbox",
});

/// Transcode options applied to every job of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsConfig {
    /// Selected filter short names, in selection order
    pub filters: Vec<String>,
    /// Selected modifiers as (short name, parameter value)
    pub modifiers: Vec<(String, String)>,
    /// Upper quantizer bound (lower = better quality, larger file)
    pub quality: u8,
    pub codec: Codec,
    pub preset: Preset,
    pub hwaccel: HwAccel,
    /// Re-tag the original as processed after a successful encode
    pub tag_original: bool,
    /// Run the two-pass vidstab stabilization
    pub stabilize: bool,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        OptionsConfig {
            filters: Vec::new(),
            modifiers: Vec::new(),
            quality: 23,
            codec: Codec::Libx264,
            preset: Preset::Medium,
            hwaccel: HwAccel::None,
            tag_original: false,
            stabilize: false,
        }
    }
}

/// Partial update of [`OptionsConfig`]; `None` leaves a field as is
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsUpdate {
    pub filters: Option<Vec<String>>,
    pub modifiers: Option<Vec<(String, String)>>,
    pub quality: Option<u8>,
    pub codec: Option<Codec>,
    pub preset: Option<Preset>,
    pub hwaccel: Option<HwAccel>,
    pub tag_original: Option<bool>,
    pub stabilize: Option<bool>,
}

impl OptionsConfig {
    /// Merge a partial update into these options
    pub fn merge(&mut self, update: OptionsUpdate) {
        if let Some(filters) = update.filters {
            self.filters.clear();
            for filter in filters {
                self.toggle_filter_on(filter);
            }
        }
        if let Some(modifiers) = update.modifiers {
            self.modifiers.clear();
            for (name, value) in modifiers {
                self.set_modifier(name, value);
            }
        }
        if let Some(quality) = update.quality {
            self.quality = quality;
        }
        if let Some(codec) = update.codec {
            self.codec = codec;
        }
        if let Some(preset) = update.preset {
            self.preset = preset;
        }
        if let Some(hwaccel) = update.hwaccel {
            self.hwaccel = hwaccel;
        }
        if let Some(tag_original) = update.tag_original {
            self.tag_original = tag_original;
        }
        if let Some(stabilize) = update.stabilize {
            self.stabilize = stabilize;
        }
    }

    fn toggle_filter_on(&mut self, filter: String) {
        if !self.filters.contains(&filter) {
            self.filters.push(filter);
        }
    }

    /// Select or deselect a filter, keeping selection order
    pub fn toggle_filter(&mut self, filter: &str) {
        if let Some(pos) = self.filters.iter().position(|f| f == filter) {
            self.filters.remove(pos);
        } else {
            self.filters.push(filter.to_string());
        }
    }

    /// Set a modifier value, replacing an existing entry in place
    pub fn set_modifier(&mut self, name: String, value: String) {
        match self.modifiers.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.modifiers.push((name, value)),
        }
    }

    pub fn remove_modifier(&mut self, name: &str) {
        self.modifiers.retain(|(n, _)| n != name);
    }

    /// Flags recorded in the `reprocessed` metadata tag of the output
    pub fn flags_description(&self) -> String {
        let mut flags = vec![
            format!("quality={}", self.quality),
            format!("codec={}", self.codec),
            format!("preset={}", self.preset),
        ];
        if self.stabilize {
            flags.push("stabilize=true".to_string());
        }
        if !self.filters.is_empty() {
            flags.push(format!("filters={}", self.filters.join(",")));
        }
        if !self.modifiers.is_empty() {
            let mods: Vec<String> = self
                .modifiers
                .iter()
                .map(|(n, v)| format!("{}:{}", n, v))
                .collect();
            flags.push(format!("modifiers={}", mods.join(",")));
        }
        flags.join("; ")
    }
}

/// Application configuration for the reprocessor binaries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// Directory holding video_filters.tab and video_commands.tab
    pub catalog_dir: PathBuf,
    /// Extensions picked up when a directory is given as input
    pub media_extensions: Vec<String>,
    /// Options used when nothing overrides them
    pub options: OptionsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl AppConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            catalog_dir: default_catalog_dir(),
            media_extensions: ["mp4", "mov", "m4v", "avi"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            options: OptionsConfig::default(),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }
}

fn default_catalog_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(std::env::temp_dir)
        .join("vidreprocess")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defaults_match_front_end() {
        let opts = OptionsConfig::default();
        assert_eq!(opts.quality, 23);
        assert_eq!(opts.codec, Codec::Libx264);
        assert_eq!(opts.preset, Preset::Medium);
        assert_eq!(opts.hwaccel, HwAccel::None);
        assert!(!opts.tag_original);
        assert!(!opts.stabilize);
    }

    #[test]
    fn test_merge_only_touches_given_fields() {
        let mut opts = OptionsConfig::default();
        opts.merge(OptionsUpdate {
            quality: Some(28),
            codec: Some(Codec::Hevc),
            ..Default::default()
        });
        assert_eq!(opts.quality, 28);
        assert_eq!(opts.codec, Codec::Hevc);
        assert_eq!(opts.preset, Preset::Medium);
    }

    #[test]
    fn test_merge_deduplicates_filters_and_modifiers() {
        let mut opts = OptionsConfig::default();
        opts.merge(OptionsUpdate {
            filters: Some(vec!["half".into(), "denoise".into(), "half".into()]),
            modifiers: Some(vec![
                ("ss".into(), "10".into()),
                ("t".into(), "30".into()),
                ("ss".into(), "20".into()),
            ]),
            ..Default::default()
        });
        assert_eq!(opts.filters, vec!["half", "denoise"]);
        assert_eq!(
            opts.modifiers,
            vec![("ss".to_string(), "20".to_string()), ("t".to_string(), "30".to_string())]
        );
    }

    #[test]
    fn test_toggle_filter_and_remove_modifier() {
        let mut opts = OptionsConfig::default();
        opts.toggle_filter("half");
        opts.toggle_filter("sharp");
        opts.toggle_filter("half");
        assert_eq!(opts.filters, vec!["sharp"]);

        opts.set_modifier("crop".into(), "8".into());
        opts.remove_modifier("crop");
        assert!(opts.modifiers.is_empty());
    }

    #[test]
    fn test_flags_description() {
        let mut opts = OptionsConfig::default();
        assert_eq!(opts.flags_description(), "quality=23; codec=libx264; preset=medium");

        opts.stabilize = true;
        opts.filters = vec!["half".into(), "sharp".into()];
        opts.modifiers = vec![("ss".into(), "5".into())];
        assert_eq!(
            opts.flags_description(),
            "quality=23; codec=libx264; preset=medium; stabilize=true; filters=half,sharp; modifiers=ss:5"
        );
    }

    #[test]
    fn test_enum_names_round_trip_through_from_str() {
        for codec in Codec::ALL {
            assert_eq!(codec.as_str().parse::<Codec>().unwrap(), *codec);
        }
        assert_eq!("VAAPI".parse::<HwAccel>().unwrap(), HwAccel::Vaapi);
        assert!("placebo".parse::<Preset>().is_err());
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let cfg = AppConfig::load_config(Some(Path::new("/nonexistent/vidrep.toml"))).unwrap();
        assert_eq!(cfg.ffmpeg_bin, PathBuf::from("ffmpeg"));
        assert_eq!(cfg.options.quality, 23);
    }

    #[test]
    fn test_load_config_partial_toml() {
        let path = std::env::temp_dir().join(format!("vidrep-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "ffmpeg_bin = \"/opt/ffmpeg/bin/ffmpeg\"\n\n[options]\nquality = 26\ncodec = \"hevc\"\n",
        )
        .unwrap();

        let cfg = AppConfig::load_config(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(cfg.ffmpeg_bin, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(cfg.ffprobe_bin, PathBuf::from("ffprobe"));
        assert_eq!(cfg.options.quality, 26);
        assert_eq!(cfg.options.codec, Codec::Hevc);
        assert_eq!(cfg.options.preset, Preset::Medium);
    }

    #[test]
    fn test_load_config_json() {
        let path = std::env::temp_dir().join(format!("vidrep-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{"options": {"hwaccel": "cuda", "stabilize": true}}"#).unwrap();

        let cfg = AppConfig::load_config(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(cfg.options.hwaccel, HwAccel::Cuda);
        assert!(cfg.options.stabilize);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Merging never leaves duplicate filter or modifier names behind
        #[test]
        fn test_merge_keeps_names_unique(
            filters in prop::collection::vec("[a-d]", 0..8),
            modifiers in prop::collection::vec(("[a-d]", "[0-9]{1,2}"), 0..8),
        ) {
            let mut opts = OptionsConfig::default();
            opts.merge(OptionsUpdate {
                filters: Some(filters.clone()),
                modifiers: Some(modifiers.clone()),
                ..Default::default()
            });

            let mut seen = std::collections::HashSet::new();
            prop_assert!(opts.filters.iter().all(|f| seen.insert(f.clone())));
            let mut seen = std::collections::HashSet::new();
            prop_assert!(opts.modifiers.iter().all(|(n, _)| seen.insert(n.clone())));

            // First occurrence decides the position
            if let Some(first) = filters.first() {
                prop_assert_eq!(&opts.filters[0], first);
            }
        }
    }
}
