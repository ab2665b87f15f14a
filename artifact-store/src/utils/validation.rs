use std::sync::LazyLock;

use regex::Regex;

static SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^/\\:\x00-\x1f\x7f]+$").expect("segment pattern compiles"));

/// Whether `segment` may appear as one component of a location.
pub fn is_valid_segment(segment: &str) -> bool {
    segment != "." && segment != ".." && SEGMENT.is_match(segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_repository_names() {
        assert!(is_valid_segment("com"));
        assert!(is_valid_segment("1.2.10"));
        assert!(is_valid_segment("app-1.0.0-SNAPSHOT.jar"));
        assert!(is_valid_segment(".hidden"));
    }

    #[test]
    fn rejects_traversal_and_separators() {
        assert!(!is_valid_segment(".."));
        assert!(!is_valid_segment("."));
        assert!(!is_valid_segment("a/b"));
        assert!(!is_valid_segment("a\\b"));
        assert!(!is_valid_segment("C:"));
        assert!(!is_valid_segment("nul\0byte"));
        assert!(!is_valid_segment(""));
    }
}
