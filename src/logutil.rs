//! Logging helpers that keep radio text on a single log line.
//! Message bodies arrive from arbitrary mesh users and routinely contain newlines.

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///   Strings longer than 300 chars are cut with an ellipsis.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 300;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Escape and cap `input` at `max_bytes` of source text, never slicing inside a character.
/// A cut input ends in `...`.
pub fn truncate_for_log(input: &str, max_bytes: usize) -> String {
    if input.len() <= max_bytes {
        return escape_log(input);
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !input.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = escape_log(&input[..cut]);
    out.push_str("...");
    out
}

/// Lowercase hex of at most `max` leading bytes, for frame diagnostics.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    data.iter()
        .take(max)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_newlines_and_tabs() {
        let s = "Line1\nLine2\r\tEnd";
        assert_eq!(escape_log(s), "Line1\\nLine2\\r\\tEnd");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        // "é" is two bytes; a 6 byte cap leaves room for one char plus the dots
        assert_eq!(truncate_for_log("éééé", 6), "é...");
        assert_eq!(truncate_for_log("short", 64), "short");
    }

    #[test]
    fn truncate_escapes_what_it_keeps() {
        assert_eq!(truncate_for_log("a\nbcdefghij", 7), "a\\nbc...");
    }

    #[test]
    fn hex_snippet_caps_length() {
        assert_eq!(hex_snippet(&[0x94, 0xc3, 0x00, 0x05], 2), "94c3");
    }
}
