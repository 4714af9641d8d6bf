use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context};
use serde_json::Value;

pub const RESULTS_KEY: &str = "url-captures.json";
pub const ERRORS_KEY: &str = "error.json";
pub const IMAGES_DIR: &str = "images";
pub const DEFAULT_OUTPUT_DIR: &str = "/tmp/output";
pub const SCREENSHOT_EXTENSION: &str = "png";
pub const PARTIAL_SUFFIX: &str = ".part";

/// Strips every whitespace character and lower-cases, so `"MY   PAGE"` and
/// `"my page"` land on the same key.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn images_dir(output_dir: &Path) -> PathBuf {
    output_dir.join(IMAGES_DIR)
}

pub fn screenshot_path(output_dir: &Path, sanitized_name: &str) -> PathBuf {
    images_dir(output_dir).join(format!("{}.{}", sanitized_name, SCREENSHOT_EXTENSION))
}

/// A finished screenshot, `.png` included: a blank sanitized name still
/// yields an artifact.
pub fn is_screenshot_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(&format!(".{}", SCREENSHOT_EXTENSION)))
        .unwrap_or(false)
}

/// Leftover of a capture abandoned mid-write.
pub fn is_partial_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(PARTIAL_SUFFIX))
        .unwrap_or(false)
}

/// Storage key for a local artifact: `images/<file name>`.
pub fn artifact_key(local_path: &Path) -> anyhow::Result<String> {
    let file_name = local_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("invalid artifact path {:?}", local_path))?;
    Ok(format!("{}/{}", IMAGES_DIR, file_name))
}

pub fn public_url(base_url: &str, key: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), key)
}

/// Creates `output_dir` and `output_dir/images` if missing.
pub fn ensure_scratch_dirs(output_dir: &Path) -> std::io::Result<PathBuf> {
    let images = images_dir(output_dir);
    fs::create_dir_all(&images)?;
    Ok(images)
}

pub fn read_json_file(path: &Path) -> Option<Vec<Value>> {
    let data = match fs::read_to_string(path) {
        Ok(d) => d,
        Err(_) => return None,
    };
    match serde_json::from_str::<Vec<Value>>(&data) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("{:?} is not a json array, starting over: {}", path, e);
            None
        }
    }
}

/// Concatenates `records` to the array stored at `path` and rewrites the file.
/// Returns the new length.
pub fn append_json_file(path: &Path, records: &[Value]) -> anyhow::Result<usize> {
    let mut existing = read_json_file(path).unwrap_or_default();
    existing.extend_from_slice(records);
    let data = serde_json::to_string_pretty(&existing)?;
    fs::write(path, data).context(format!("could not write json file {:?}", path))?;
    debug!("appended {} records to {:?}", records.len(), path);
    Ok(existing.len())
}


#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn tmp_dir(tag: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!("screencapture-{}-{}", tag, std::process::id()));
        fs::create_dir_all(&p).unwrap();
        p
    }

    #[test]
    fn sanitizes_names() {
        assert_eq!(sanitize_name("My Page"), "mypage");
        assert_eq!(sanitize_name("MY   PAGE"), sanitize_name("my page"));
        assert_eq!(sanitize_name("\tOk\nOne "), "okone");
        assert_eq!(sanitize_name(""), "");
    }

    #[test]
    fn builds_keys_and_urls() {
        let p = screenshot_path(Path::new("/tmp/output"), "okone");
        assert_eq!(p, PathBuf::from("/tmp/output/images/okone.png"));
        assert_eq!(artifact_key(&p).unwrap(), "images/okone.png");
        assert_eq!(
            public_url("https://cdn.example/", "images/okone.png"),
            "https://cdn.example/images/okone.png"
        );
    }

    #[test]
    fn recognises_screenshot_files() {
        assert!(is_screenshot_file(Path::new("/tmp/output/images/okone.png")));
        assert!(is_screenshot_file(Path::new("/tmp/output/images/.png")));
        assert!(!is_screenshot_file(Path::new("/tmp/output/images/okone.png.part")));
        assert!(!is_screenshot_file(Path::new("/tmp/output/images/notes.txt")));
        assert!(is_partial_file(Path::new("/tmp/output/images/okone.png.part")));
        assert!(!is_partial_file(Path::new("/tmp/output/images/okone.png")));
    }

    #[test]
    fn creates_scratch_dirs() {
        let root = tmp_dir("scratch").join("output");
        let images = ensure_scratch_dirs(&root).unwrap();
        assert!(images.is_dir());
        // idempotent
        ensure_scratch_dirs(&root).unwrap();
        fs::remove_dir_all(root.parent().unwrap()).unwrap();
    }

    #[test]
    fn appends_to_json_file() {
        let dir = tmp_dir("append");
        let file = dir.join("records.json");
        assert_eq!(append_json_file(&file, &[json!({"a": 1})]).unwrap(), 1);
        assert_eq!(
            append_json_file(&file, &[json!({"a": 2}), json!({"a": 3})]).unwrap(),
            3
        );
        let stored = read_json_file(&file).unwrap();
        assert_eq!(stored, vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 3})]);
        fs::remove_dir_all(dir).unwrap();
    }
}
