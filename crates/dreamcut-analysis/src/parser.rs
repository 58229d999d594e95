//! Lenient extraction of JSON objects from model replies, plus typed
//! accessors over the resulting `serde_json::Value`.

use serde_json::Value;

use dreamcut_core::error::StepError;

/// Parse the first JSON object found in a model reply.
///
/// Tries three strategies in order:
/// 1. Direct JSON parse of the entire text
/// 2. Extract from a ```json (or bare ```) fenced block
/// 3. Extract the first balanced `{ ... }` block
pub fn extract_json(text: &str) -> Result<Value, StepError> {
    let trimmed = text.trim();

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    for fence in ["```json", "```JSON", "```\n"] {
        if let Some(start) = trimmed.find(fence) {
            let after_fence = &trimmed[start + fence.len()..];
            if let Some(end) = after_fence.find("```") {
                if let Ok(value @ Value::Object(_)) =
                    serde_json::from_str::<Value>(after_fence[..end].trim())
                {
                    return Ok(value);
                }
            }
        }
    }

    if let Some(block) = balanced_object(trimmed) {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(block) {
            return Ok(value);
        }
    }

    let preview: String = trimmed.chars().take(200).collect();
    Err(StepError::MalformedOutput(format!(
        "no JSON object in model reply: {preview}"
    )))
}

fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in text.as_bytes()[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Walk a key path through nested objects.
pub fn at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(*key))
}

/// Non-empty trimmed string at `path`.
pub fn str_at(value: &Value, path: &[&str]) -> Option<String> {
    match at(value, path)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Number at `path`, accepting numeric strings such as `"30"` or `"30s"`.
pub fn f64_at(value: &Value, path: &[&str]) -> Option<f64> {
    let n = match at(value, path)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let digits: String = s
                .trim()
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            digits.parse().ok()
        }
        _ => None,
    };
    n.filter(|n| n.is_finite())
}

/// String list at `path`. A single string becomes a one-element list and
/// comma-separated strings are split.
pub fn strings_at(value: &Value, path: &[&str]) -> Vec<String> {
    match at(value, path) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

/// First path that yields a string.
pub fn first_str(value: &Value, paths: &[&[&str]]) -> Option<String> {
    paths.iter().find_map(|p| str_at(value, p))
}

/// First path that yields a non-empty list.
pub fn first_strings(value: &Value, paths: &[&[&str]]) -> Vec<String> {
    paths
        .iter()
        .map(|p| strings_at(value, p))
        .find(|v| !v.is_empty())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_direct_json() {
        let v = extract_json(r#"{"intent": {"primary": "trailer"}}"#).unwrap();
        assert_eq!(str_at(&v, &["intent", "primary"]).as_deref(), Some("trailer"));
    }

    #[test]
    fn parse_markdown_json_block() {
        let text = "Here is the analysis:\n\n```json\n{\"confidence\": 0.8}\n```\n\nDone.";
        let v = extract_json(text).unwrap();
        assert_eq!(f64_at(&v, &["confidence"]), Some(0.8));
    }

    #[test]
    fn parse_plain_backtick_block() {
        let v = extract_json("```\n{\"caption\": \"a beach\"}\n```").unwrap();
        assert_eq!(str_at(&v, &["caption"]).as_deref(), Some("a beach"));
    }

    #[test]
    fn parse_brace_extraction_with_braces_in_strings() {
        let text = r#"Sure! {"caption": "a sign reading {open}", "score": 7} Hope that helps!"#;
        let v = extract_json(text).unwrap();
        assert_eq!(str_at(&v, &["caption"]).as_deref(), Some("a sign reading {open}"));
        assert_eq!(f64_at(&v, &["score"]), Some(7.0));
    }

    #[test]
    fn arrays_are_not_objects() {
        assert!(extract_json("[1, 2, 3]").is_err());
    }

    #[test]
    fn parse_failure_is_malformed_output() {
        let err = extract_json("This is not JSON at all").unwrap_err();
        assert!(matches!(err, StepError::MalformedOutput(_)));
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let v = json!({"duration": "30s", "bad": "soon", "nan": null});
        assert_eq!(f64_at(&v, &["duration"]), Some(30.0));
        assert_eq!(f64_at(&v, &["bad"]), None);
        assert_eq!(f64_at(&v, &["nan"]), None);
    }

    #[test]
    fn strings_accept_lists_and_csv() {
        let v = json!({"a": ["neon", " ", "rain"], "b": "dark, moody", "c": 3});
        assert_eq!(strings_at(&v, &["a"]), vec!["neon", "rain"]);
        assert_eq!(strings_at(&v, &["b"]), vec!["dark", "moody"]);
        assert!(strings_at(&v, &["c"]).is_empty());
    }

    #[test]
    fn first_helpers_fall_through() {
        let v = json!({"summary": "wide shot", "tags": ["sunset"]});
        assert_eq!(
            first_str(&v, &[&["caption"], &["summary"]]).as_deref(),
            Some("wide shot")
        );
        assert_eq!(
            first_strings(&v, &[&["attributes"], &["tags"]]),
            vec!["sunset"]
        );
    }
}
