//! Content Sanitizer
//!
//! Pure text-cleaning functions consumed by the message pipeline and the
//! gateway handler. Strips control characters and trims whitespace; the
//! caller distinguishes "was empty" from "stripped to nothing".

use serde_json::Value;

/// Sanitize message content.
///
/// Returns `None` when nothing printable remains after cleaning.
pub fn sanitize(input: &str) -> Option<String> {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Recursively sanitize every string field of an event payload.
///
/// Strings that clean to nothing become empty strings rather than being
/// dropped, so payload shape stays stable for clients.
pub fn sanitize_event_value(value: &mut Value) {
    match value {
        Value::String(s) => {
            *s = sanitize(s).unwrap_or_default();
        }
        Value::Array(items) => {
            for item in items {
                sanitize_event_value(item);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                sanitize_event_value(v);
            }
        }
        _ => {}
    }
}

/// Validate a reaction emoji.
///
/// Accepts anything up to two characters, or longer sequences made of
/// non-ASCII codepoints and joiners (composed emoji like family sequences).
pub fn is_valid_emoji(emoji: &str) -> bool {
    if emoji.trim().is_empty() {
        return false;
    }
    let count = emoji.chars().count();
    if count <= 2 {
        return true;
    }
    count <= 16
        && emoji
            .chars()
            .all(|c| !c.is_ascii() || c == '\u{200d}' || c == '\u{fe0f}')
}
