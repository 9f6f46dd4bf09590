//! Deterministic naming for intermediate and final clips.
//!
//! Two inputs sharing a base name produce the same output name. This is
//! accepted and not deduplicated; only the files on disk are kept apart.

use std::path::Path;

/// Default container extension for generated clips.
pub const DEFAULT_OUTPUT_EXT: &str = "mp4";

/// Prefix for preprocessed short clips.
pub const PREPROCESSED_PREFIX: &str = "preprocessed_";

/// File name with its last extension stripped.
pub fn base_name(path: impl AsRef<Path>) -> String {
    path.as_ref()
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `preprocessed_{short}.{ext}`
pub fn preprocessed_file_name(short_base: &str, ext: &str) -> String {
    format!("{PREPROCESSED_PREFIX}{short_base}.{ext}")
}

/// `{short}_{large}.{ext}`
pub fn pairing_file_name(short_base: &str, large_base: &str, ext: &str) -> String {
    format!("{short_base}_{large_base}.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name_strips_last_extension() {
        assert_eq!(base_name("/uploads/a.mp4"), "a");
        assert_eq!(base_name("clip.final.mov"), "clip.final");
        assert_eq!(base_name("noext"), "noext");
    }

    #[test]
    fn test_generated_names() {
        assert_eq!(preprocessed_file_name("a", "mp4"), "preprocessed_a.mp4");
        assert_eq!(pairing_file_name("a", "x", "mp4"), "a_x.mp4");
    }

    #[test]
    fn test_naming_is_deterministic() {
        let first = pairing_file_name(&base_name("s/b.mp4"), &base_name("l/y.mkv"), DEFAULT_OUTPUT_EXT);
        let second = pairing_file_name(&base_name("s/b.mp4"), &base_name("l/y.mkv"), DEFAULT_OUTPUT_EXT);
        assert_eq!(first, second);
        assert_eq!(first, "b_y.mp4");
    }
}
