//! Minimal JSON string escaping for the hand-rendered status and scan
//! responses.
//!
//! The response bodies served by the portal have a fixed byte shape, so they
//! are assembled directly into strings instead of going through a serializer.
//! Only the escaper needs care: SSIDs are attacker-controlled (anyone can
//! broadcast a beacon) and may contain quotes, backslashes or control bytes.

/// Append `input` to `out` as a quoted JSON string.
///
/// `"`, `\` and the short-escape control characters map to their two-byte
/// escapes; any other byte below 0x20 is emitted as `\u00xx`.
pub fn escape_into(out: &mut String, input: &str) {
    out.push('"');
    for ch in input.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Convenience wrapper returning the quoted string.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 2);
    escape_into(&mut out, input);
    out
}
