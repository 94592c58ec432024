use std::path::{Path, PathBuf};
use log::{debug, info, warn};
use walkdir::WalkDir;

/// Whether `path` has one of `extensions`, ignoring case
pub fn is_media_file(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

/// Expand command-line inputs into media file paths
///
/// Files are taken as given, whatever their extension. Directories are
/// walked recursively for media files, sorted by path within each
/// directory. Missing inputs are warned about and dropped.
pub fn expand_inputs<P: AsRef<Path>>(inputs: &[P], extensions: &[String]) -> Vec<String> {
    let mut files = Vec::new();

    for input in inputs {
        let input = input.as_ref();
        if input.is_file() {
            files.push(input.to_string_lossy().to_string());
            continue;
        }
        if !input.is_dir() {
            warn!("Input does not exist: {}", input.display());
            continue;
        }

        info!("Scanning directory: {}", input.display());
        let mut found = 0;
        for entry in WalkDir::new(input).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error reading directory entry: {}", e);
                    continue;
                }
            };

            let path = entry.path();
            if !entry.file_type().is_file() || !is_media_file(path, extensions) {
                continue;
            }
            debug!("Found media file: {}", path.display());
            files.push(path.to_string_lossy().to_string());
            found += 1;
        }
        info!("Found {} media file(s) in {}", found, input.display());
    }

    files
}

/// Absolute form of `path`, left unchanged when it cannot be resolved
pub fn absolutize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exts() -> Vec<String> {
        ["mp4", "mov"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_is_media_file() {
        assert!(is_media_file(Path::new("/v/a.MP4"), &exts()));
        assert!(is_media_file(Path::new("b.mov"), &exts()));
        assert!(!is_media_file(Path::new("c.mkv"), &exts()));
        assert!(!is_media_file(Path::new("noext"), &exts()));
    }

    #[test]
    fn test_expand_walks_directories_in_order() {
        let root = std::env::temp_dir().join(format!("vidrep-scan-{}", uuid::Uuid::new_v4()));
        let nested = root.join("day2");
        std::fs::create_dir_all(&nested).unwrap();
        for name in ["b.mp4", "a.MOV", "notes.txt"] {
            std::fs::write(root.join(name), b"x").unwrap();
        }
        std::fs::write(nested.join("c.mp4"), b"x").unwrap();
        let loose = root.join("notes.txt");

        let files = expand_inputs(&[root.clone(), loose.clone(), root.join("missing.mp4")], &exts());
        let expected = vec![
            root.join("a.MOV").to_string_lossy().to_string(),
            root.join("b.mp4").to_string_lossy().to_string(),
            nested.join("c.mp4").to_string_lossy().to_string(),
            loose.to_string_lossy().to_string(),
        ];
        assert_eq!(files, expected);

        std::fs::remove_dir_all(&root).ok();
    }
}
