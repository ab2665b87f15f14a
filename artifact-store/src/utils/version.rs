//! Version-aware ordering of entry names.
//!
//! A name is split into alternating runs of ASCII digits and other alphanumeric characters;
//! everything else (`.`, `-`, `_`, ...) only separates tokens. Digit runs compare by numeric value,
//! so `1.2.9 < 1.2.10 < 1.10.0`, and other runs compare lexicographically. A digit run sorts before
//! a word run at the same position, and a name whose tokens are a prefix of another's sorts first.
//! Names that tokenize identically (`1.0` and `1-0`, `01` and `1`) fall back to plain string order,
//! which keeps the ordering total.

use std::cmp::Ordering;

use crate::config::DirectoryOrdering;

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Number(&'a str),
    Word(&'a str),
}

fn tokenize(name: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut start: Option<(usize, bool)> = None;

    for (idx, ch) in name.char_indices() {
        let class = if ch.is_ascii_digit() {
            Some(true)
        } else if ch.is_alphanumeric() {
            Some(false)
        } else {
            None
        };

        match (start, class) {
            (Some((_, numeric)), Some(current)) if numeric == current => {}
            (Some((from, numeric)), _) => {
                tokens.push(token(&name[from..idx], numeric));
                start = class.map(|numeric| (idx, numeric));
            }
            (None, Some(numeric)) => start = Some((idx, numeric)),
            (None, None) => {}
        }
    }
    if let Some((from, numeric)) = start {
        tokens.push(token(&name[from..], numeric));
    }
    tokens
}

fn token(raw: &str, numeric: bool) -> Token<'_> {
    if numeric {
        Token::Number(raw)
    } else {
        Token::Word(raw)
    }
}

// Digit runs may exceed any integer type, so compare them as strings once leading zeros are gone.
fn compare_numbers(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn compare_tokens(a: &Token<'_>, b: &Token<'_>) -> Ordering {
    match (a, b) {
        (Token::Number(a), Token::Number(b)) => compare_numbers(a, b),
        (Token::Word(a), Token::Word(b)) => a.cmp(b),
        (Token::Number(_), Token::Word(_)) => Ordering::Less,
        (Token::Word(_), Token::Number(_)) => Ordering::Greater,
    }
}

/// Total, version-aware ordering over names.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left = tokenize(a);
    let right = tokenize(b);

    left.iter()
        .zip(right.iter())
        .map(|(l, r)| compare_tokens(l, r))
        .find(|ordering| ordering.is_ne())
        .unwrap_or_else(|| left.len().cmp(&right.len()))
        .then_with(|| a.cmp(b))
}

/// Listing order: directories are pinned according to `ordering`, then names compare by version.
pub fn compare_entries(
    ordering: DirectoryOrdering,
    (a_is_dir, a_name): (bool, &str),
    (b_is_dir, b_name): (bool, &str),
) -> Ordering {
    let pinned = match ordering {
        DirectoryOrdering::DirectoriesFirst => b_is_dir.cmp(&a_is_dir),
        DirectoryOrdering::FilesFirst => a_is_dir.cmp(&b_is_dir),
    };
    pinned.then_with(|| compare_versions(a_name, b_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(names: &[&str]) -> Vec<String> {
        let mut names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        names.sort_by(|a, b| compare_versions(a, b));
        names
    }

    #[test]
    fn numeric_segments_compare_by_value() {
        assert_eq!(
            sorted(&["1.10.0", "1.2.10", "1.2.9"]),
            vec!["1.2.9", "1.2.10", "1.10.0"]
        );
        assert_eq!(compare_versions("2", "10"), Ordering::Less);
    }

    #[test]
    fn shorter_prefix_sorts_first() {
        assert_eq!(compare_versions("1.0", "1.0.1"), Ordering::Less);
        assert_eq!(compare_versions("1.0", "1.0-SNAPSHOT"), Ordering::Less);
    }

    #[test]
    fn words_compare_lexicographically_after_numbers() {
        assert_eq!(compare_versions("1.0-alpha", "1.0-beta"), Ordering::Less);
        assert_eq!(compare_versions("1.0.1", "1.0.beta"), Ordering::Less);
        assert_eq!(compare_versions("1.0rc1", "1.0rc2"), Ordering::Less);
    }

    #[test]
    fn ordering_is_total() {
        assert_eq!(compare_versions("1.0", "1.0"), Ordering::Equal);
        assert_ne!(compare_versions("1.0", "1-0"), Ordering::Equal);
        assert_ne!(compare_versions("01", "1"), Ordering::Equal);
        assert_eq!(
            compare_versions("1-0", "1.0"),
            compare_versions("1.0", "1-0").reverse()
        );
    }

    #[test]
    fn huge_numbers_do_not_overflow() {
        assert_eq!(
            compare_versions("99999999999999999999999", "100000000000000000000000"),
            Ordering::Less
        );
    }

    #[test]
    fn directories_pinned_before_files() {
        let dir = (true, "b");
        let file = (false, "a");
        assert_eq!(
            compare_entries(DirectoryOrdering::DirectoriesFirst, dir, file),
            Ordering::Less
        );
        assert_eq!(
            compare_entries(DirectoryOrdering::FilesFirst, dir, file),
            Ordering::Greater
        );
    }
}
