//! Shared utility functions used across the codebase.

/// Parse an environment variable as a boolean, returning `default` if unset.
///
/// Recognises `1`, `true`, `yes`, `y`, `on` as `true` and `0`, `false`, `no`, `n`, `off`
/// as `false` (case-insensitive); anything else maps to `default`.
pub fn env_var_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "y" | "on" => true,
            "0" | "false" | "no" | "n" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Truncate `text` to at most `max_chars` characters, appending `...` when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Sanitize process output to be safe for model consumption.
/// Removes binary garbage while preserving valid text.
pub fn sanitize_output(bytes: &[u8]) -> String {
    let non_printable_count = bytes
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t')
        .count();

    // More than 10% control bytes: treat as binary
    if bytes.len() > 100 && non_printable_count > bytes.len() / 10 {
        return format!(
            "[Binary output detected - {} bytes, {}% non-printable]",
            bytes.len(),
            non_printable_count * 100 / bytes.len()
        );
    }

    let text = String::from_utf8_lossy(bytes);
    text.chars()
        .filter(|&c| c == '\n' || c == '\r' || c == '\t' || (c >= ' ' && c != '\u{FFFD}'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_keeps_short_text() {
        assert_eq!(preview("hello", 10), "hello");
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(preview("héllo wörld", 5), "héllo...");
    }

    #[test]
    fn sanitize_output_strips_control_characters() {
        let out = sanitize_output(b"ok\x00\x07 line\n");
        assert_eq!(out, "ok line\n");
    }

    #[test]
    fn sanitize_output_flags_binary() {
        let bytes = vec![0u8; 200];
        assert!(sanitize_output(&bytes).starts_with("[Binary output detected"));
    }

    #[test]
    fn env_var_bool_reads_false_values() {
        std::env::set_var("WORKSPACE_AGENT_TEST_BOOL_OFF", "off");
        assert!(!env_var_bool("WORKSPACE_AGENT_TEST_BOOL_OFF", true));
        assert!(env_var_bool("WORKSPACE_AGENT_TEST_BOOL_UNSET", true));
    }
}
