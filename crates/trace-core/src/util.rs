//! Shared utility functions used across multiple modules.

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Current Unix timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Normalize diary text before comparing or fingerprinting it.
///
/// CRLF becomes LF and trailing spaces/tabs are stripped from every line, so
/// editor line-ending noise never counts as a content change.
pub fn normalize_content(content: &str) -> String {
    let unified = content.replace("\r\n", "\n");
    unified
        .split('\n')
        .map(|line| line.trim_end_matches([' ', '\t']))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Number of non-whitespace characters, used as the diary word count.
pub fn count_visible_chars(content: &str) -> u32 {
    let count = content.chars().filter(|ch| !ch.is_whitespace()).count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_option_rejects_empty() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some("   ".to_string())), None);
    }

    #[test]
    fn normalize_text_option_trims_value() {
        assert_eq!(
            normalize_text_option(Some(" https://example.com ".to_string())),
            Some("https://example.com".to_string())
        );
    }

    #[test]
    fn is_http_url_accepts_valid_schemes() {
        assert!(is_http_url("http://localhost"));
        assert!(is_http_url("https://example.com"));
        assert!(!is_http_url("ftp://example.com"));
        assert!(!is_http_url("example.com"));
    }

    #[test]
    fn normalize_content_unifies_line_endings_and_trailing_blanks() {
        assert_eq!(normalize_content("a  \r\nb\t\r\n"), "a\nb\n");
        assert_eq!(normalize_content("  keep leading"), "  keep leading");
    }

    #[test]
    fn count_visible_chars_ignores_whitespace() {
        assert_eq!(count_visible_chars(" 今天 晴\n ok "), 5);
        assert_eq!(count_visible_chars("   "), 0);
    }
}
