//! Text normalization for reference matching.
//!
//! Two layers, used at different points:
//! - [`normalize_reference`] is the canonical stored form: Unicode NFKC,
//!   lowercase, punctuation stripped, whitespace collapsed. Diacritics are
//!   preserved — "Thịnh" and "Thinh" are different aliases.
//! - [`match_key`] additionally folds diacritics (and đ/Đ) for the
//!   case/diacritic-insensitive containment rule, so "Ngoc Long" still
//!   reaches "Ngọc Long".

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Normalize reference text for storage and exact matching.
///
/// Performs:
/// - Unicode NFKC fold
/// - Lowercase conversion
/// - Strip punctuation (replace with space)
/// - Collapse whitespace
///
/// # Examples
///
/// ```
/// use tabkeeper::resolution::normalize::normalize_reference;
///
/// assert_eq!(normalize_reference("  Ngọc   Long "), "ngọc long");
/// assert_eq!(normalize_reference("Long ú!!"), "long ú");
/// ```
pub fn normalize_reference(s: &str) -> String {
    let folded = s.nfkc().collect::<String>().to_lowercase();

    let stripped: String = folded
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fold diacritics out of an already-normalized string.
///
/// NFD-decomposes and drops combining marks; đ/Đ do not decompose and are
/// mapped by hand. The result is the comparison key for the insensitive
/// containment rule.
pub fn fold_diacritics(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| match c {
            'đ' => 'd',
            'Đ' => 'D',
            other => other,
        })
        .collect::<String>()
        .to_lowercase()
}

/// Case- and diacritic-insensitive comparison key for raw reference text.
pub fn match_key(s: &str) -> String {
    fold_diacritics(&normalize_reference(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace_and_lowercases() {
        assert_eq!(normalize_reference("  Ngọc   LONG  "), "ngọc long");
    }

    #[test]
    fn normalize_preserves_diacritics() {
        assert_eq!(normalize_reference("Thịnh"), "thịnh");
        assert_eq!(normalize_reference("Long ú"), "long ú");
    }

    #[test]
    fn normalize_strips_punctuation() {
        assert_eq!(normalize_reference("@Long, ú?"), "long ú");
    }

    #[test]
    fn fold_removes_vietnamese_diacritics() {
        assert_eq!(fold_diacritics("ngọc long"), "ngoc long");
        assert_eq!(fold_diacritics("thịnh"), "thinh");
        assert_eq!(fold_diacritics("đạt"), "dat");
    }

    #[test]
    fn match_key_is_insensitive_both_ways() {
        assert_eq!(match_key("Ngoc Long"), match_key("Ngọc LONG"));
        assert_eq!(match_key("Đạt"), "dat");
    }

    #[test]
    fn normalize_is_idempotent() {
        for s in ["Ngọc Long", "  long Ú ", "Huy123", "đen đá"] {
            let once = normalize_reference(s);
            assert_eq!(normalize_reference(&once), once);
        }
    }

    #[test]
    fn empty_and_punctuation_only_normalize_to_empty() {
        assert_eq!(normalize_reference("   "), "");
        assert_eq!(normalize_reference("?!,."), "");
    }
}
