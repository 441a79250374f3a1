//! String utility functions

/// String utility functions
#[derive(Debug)]
pub struct StringUtils;

impl StringUtils {
    /// Truncate a string to at most `max_chars` characters, appending an ellipsis when shortened
    pub fn truncate(s: &str, max_chars: usize) -> String {
        match s.char_indices().nth(max_chars) {
            None => s.to_string(),
            Some((byte_index, _)) => {
                let mut result = s[..byte_index].to_string();
                result.push_str("...");
                result
            }
        }
    }

    /// Quote a SQL identifier, doubling any embedded double quotes
    pub fn quote_identifier(identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    /// Whether the string contains a NUL byte, which cannot travel inside a C string
    pub fn contains_nul(s: &str) -> bool {
        s.as_bytes().contains(&0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_truncate() {
        assert_eq!(StringUtils::truncate("SELECT 1", 20), "SELECT 1");
        assert_eq!(StringUtils::truncate("SELECT * FROM users", 6), "SELECT...");
        assert_eq!(StringUtils::truncate("", 0), "");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(StringUtils::truncate("héllo wörld", 2), "hé...");
        assert_eq!(StringUtils::truncate("日本語", 3), "日本語");
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(StringUtils::quote_identifier("events"), "\"events\"");
        assert_eq!(StringUtils::quote_identifier("MyChannel"), "\"MyChannel\"");
        assert_eq!(StringUtils::quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_contains_nul() {
        assert!(StringUtils::contains_nul("abc\0def"));
        assert!(!StringUtils::contains_nul("abcdef"));
    }

    proptest! {
        #[test]
        fn prop_quoted_identifier_round_trips(identifier in "\\PC*") {
            let quoted = StringUtils::quote_identifier(&identifier);
            let inner = &quoted[1..quoted.len() - 1];
            prop_assert_eq!(inner.replace("\"\"", "\""), identifier);
        }

        #[test]
        fn prop_truncate_keeps_a_prefix(s in "\\PC*", max in 0usize..16) {
            let truncated = StringUtils::truncate(&s, max);
            let kept = truncated.strip_suffix("...").unwrap_or(&truncated);
            prop_assert!(s.starts_with(kept));
            prop_assert!(kept.chars().count() <= max || truncated == s);
        }
    }
}
