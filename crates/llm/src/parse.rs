use crate::error::{LlmError, Result};
use serde::de::DeserializeOwned;

/// Strip whitespace and a surrounding markdown code fence (with or without a
/// language tag) from raw model output.
pub fn extract_json(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // drop an optional language tag up to the first newline
        let rest = match rest.find('\n') {
            Some(idx) => &rest[idx + 1..],
            None => rest,
        };
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

/// Strict parse of (fence-stripped) model output into the target shape.
pub fn parse_typed<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let cleaned = extract_json(raw);
    serde_json::from_str(cleaned).map_err(|e| {
        let preview: String = cleaned.chars().take(120).collect();
        LlmError::JsonParse(format!("{e} (output starts: {preview:?})"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Shape {
        name: String,
        count: u32,
    }

    #[test]
    fn parses_bare_json() {
        let parsed: Shape = parse_typed(r#"{"name": "a", "count": 2}"#).unwrap();
        assert_eq!(parsed, Shape { name: "a".into(), count: 2 });
    }

    #[test]
    fn strips_fence_with_language() {
        let raw = "```json\n{\"name\": \"a\", \"count\": 2}\n```";
        let parsed: Shape = parse_typed(raw).unwrap();
        assert_eq!(parsed.count, 2);
    }

    #[test]
    fn strips_fence_without_language() {
        let raw = "  ```\n{\"name\": \"b\", \"count\": 1}\n```  ";
        let parsed: Shape = parse_typed(raw).unwrap();
        assert_eq!(parsed.name, "b");
    }

    #[test]
    fn parse_failure_is_json_parse_error() {
        let err = parse_typed::<Shape>("the model rambled instead").unwrap_err();
        assert!(matches!(err, LlmError::JsonParse(_)));
    }

    #[test]
    fn extract_leaves_inner_fences_alone() {
        let raw = "```json\n{\"name\": \"has ``` inside\", \"count\": 0}\n```";
        assert!(extract_json(raw).contains("has ``` inside"));
    }
}
