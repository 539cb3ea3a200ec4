//! Best-effort extraction of a JSON value from free-form model output.
//!
//! Models are asked for JSON but routinely wrap it in prose or fenced code
//! blocks. This mirrors the reference client's two-pass approach: strip a
//! ```json fence if present, then locate the first `{`/`[` and its matching
//! close by scanning from the end of the string.

/// Strip a leading/trailing Markdown code fence, if present.
fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let trimmed = trimmed.strip_prefix("```json").or_else(|| trimmed.strip_prefix("```")).unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

/// Extract the first top-level JSON object or array from `text`.
///
/// Returns `None` if neither `{` nor `[` appears, or if no matching close
/// bracket is found after it.
#[must_use]
pub fn extract_json(text: &str) -> Option<String> {
    let stripped = strip_fence(text);

    let obj_start = stripped.find('{');
    let arr_start = stripped.find('[');

    let (start, open, close) = match (obj_start, arr_start) {
        (Some(o), Some(a)) if a < o => (a, '[', ']'),
        (Some(o), _) => (o, '{', '}'),
        (None, Some(a)) => (a, '[', ']'),
        (None, None) => return None,
    };
    let _ = open;

    let end = stripped.rfind(close)?;
    if end <= start {
        return None;
    }
    Some(stripped[start..=end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_object_from_fenced_block() {
        let text = "Here is the result:\n```json\n{\"a\": 1}\n```\nThanks!";
        assert_eq!(extract_json(text).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn extracts_bare_object() {
        let text = "prefix {\"a\": [1, 2]} suffix";
        assert_eq!(extract_json(text).unwrap(), "{\"a\": [1, 2]}");
    }

    #[test]
    fn extracts_top_level_array_when_it_comes_first() {
        let text = "[1, 2, 3] trailing";
        assert_eq!(extract_json(text).unwrap(), "[1, 2, 3]");
    }

    #[test]
    fn returns_none_without_any_brackets() {
        assert!(extract_json("just some prose").is_none());
    }
}
