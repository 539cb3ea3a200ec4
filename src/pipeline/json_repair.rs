//! Three-strategy JSON repair ladder for truncated/malformed model output.
//!
//! Grounded on the reference template agent's repair sequence: try the raw
//! text first, then each strategy in order, stopping at the first one that
//! parses. Each strategy assumes the previous one's failure reason (a
//! `serde_json::Error` with a byte offset) rather than re-deriving it.

/// Strategy 1: drop trailing commas before a closing bracket/brace.
fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == ']' || chars[j] == '}') {
                i += 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Strategy 2: the text was truncated mid-value. Trim back to the last
/// complete field boundary, then append enough closing brackets/braces to
/// balance what's open.
fn close_truncated_structure(text: &str) -> String {
    let trimmed = text.trim_end();
    let tail_window = &trimmed[trimmed.len().saturating_sub(200)..];

    let cut_at = tail_window.rfind(",\"").or_else(|| tail_window.rfind("\",{"));
    let mut base = if let Some(rel) = cut_at {
        let abs = trimmed.len() - tail_window.len() + rel;
        trimmed[..abs].to_string()
    } else {
        trimmed.to_string()
    };

    let mut open_braces = 0i32;
    let mut open_brackets = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for c in base.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => open_braces += 1,
            '}' if !in_string => open_braces -= 1,
            '[' if !in_string => open_brackets += 1,
            ']' if !in_string => open_brackets -= 1,
            _ => {}
        }
    }

    for _ in 0..open_brackets.max(0) {
        base.push(']');
    }
    for _ in 0..open_braces.max(0) {
        base.push('}');
    }
    base
}

/// Strategy 3: extract the valid prefix up to the parser's reported error
/// byte offset, then trim to the last complete object/array boundary and
/// close what remains open.
fn extract_valid_prefix(text: &str, error_byte_offset: usize) -> Option<String> {
    let prefix = text.get(..error_byte_offset.min(text.len()))?;
    let cut = prefix.rfind("}}").map(|i| i + 2).or_else(|| prefix.rfind('}').map(|i| i + 1))?;
    let mut base = prefix[..cut].to_string();
    if !base.trim_end().ends_with(']') {
        base.push(']');
    }
    if !base.trim_end().ends_with('}') {
        base.push('}');
    }
    Some(base)
}

/// Try each repair strategy in order, returning the first one that yields
/// valid JSON, or `None` if every strategy is exhausted.
#[must_use]
pub fn repair(raw: &str) -> Option<serde_json::Value> {
    if let Ok(v) = serde_json::from_str(raw) {
        return Some(v);
    }

    let stripped = strip_trailing_commas(raw);
    if let Ok(v) = serde_json::from_str(&stripped) {
        return Some(v);
    }

    let closed = close_truncated_structure(&stripped);
    if let Ok(v) = serde_json::from_str(&closed) {
        return Some(v);
    }

    if let Err(e) = serde_json::from_str::<serde_json::Value>(raw) {
        if let Some(candidate) = extract_valid_prefix(raw, e.column()) {
            if let Ok(v) = serde_json::from_str(&candidate) {
                return Some(v);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_json_parses_without_repair() {
        assert!(repair(r#"{"a": 1}"#).is_some());
    }

    #[test]
    fn strips_trailing_comma_before_closing_brace() {
        let v = repair(r#"{"a": 1, "b": 2,}"#).unwrap();
        assert_eq!(v["b"], 2);
    }

    #[test]
    fn closes_truncated_array() {
        let v = repair(r#"{"items": [1, 2, 3"#).unwrap();
        assert!(v["items"].is_array());
    }

    #[test]
    fn unrecoverable_garbage_returns_none() {
        assert!(repair("not json at all, no brackets").is_none());
    }
}
