//! UTF-8 safe truncation helpers.

/// Returns the largest char boundary in `s` that is `<= index`.
pub fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Truncates `s` to at most `max_bytes` bytes without splitting a character.
pub fn truncate_bytes(s: &str, max_bytes: usize) -> &str {
    &s[..floor_char_boundary(s, max_bytes)]
}

/// Keeps the first `max_chars` characters of `s`.
pub fn clip_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Truncates `s` to `max_bytes` bytes, appending `...` when anything was cut.
pub fn truncate_with_ellipsis(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let keep = floor_char_boundary(s, max_bytes.saturating_sub(3));
    format!("{}...", &s[..keep])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_char_boundary_multibyte() {
        let s = "héllo";
        // 'é' occupies bytes 1..3
        assert_eq!(floor_char_boundary(s, 2), 1);
        assert_eq!(floor_char_boundary(s, 3), 3);
        assert_eq!(floor_char_boundary(s, 99), s.len());
    }

    #[test]
    fn test_truncate_bytes() {
        assert_eq!(truncate_bytes("abcdef", 3), "abc");
        assert_eq!(truncate_bytes("ab", 3), "ab");
        assert_eq!(truncate_bytes("日本語", 4), "日");
    }

    #[test]
    fn test_clip_chars_counts_characters() {
        assert_eq!(clip_chars("日本語テキスト", 3), "日本語");
        assert_eq!(clip_chars("short", 300), "short");
    }

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("hello world", 8), "hello...");
        assert_eq!(truncate_with_ellipsis("hello", 8), "hello");
    }
}
