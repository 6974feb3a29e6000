//! JSON repair for LLM responses
//!
//! Providers return ill-formed JSON often enough that repair is required
//! behavior, not a nicety: trim to the outermost braces, drop trailing
//! commas, close dangling strings and brackets, strip stray non-ASCII.

use serde_json::{Map, Value};

use crate::utils::{ApiError, ApiResult};

/// Parse a JSON object out of a raw model response, repairing common
/// malformations along the way.
pub fn parse_json_object(raw: &str) -> ApiResult<Map<String, Value>> {
    let candidates = [
        raw.to_string(),
        slice_outermost(raw),
        drop_trailing_commas(&slice_outermost(raw)),
        balance(&drop_trailing_commas(&slice_outermost(raw))),
        strip_non_ascii(&balance(&drop_trailing_commas(&slice_outermost(raw)))),
    ];

    for candidate in &candidates {
        if candidate.is_empty() {
            continue;
        }
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
            return Ok(map);
        }
    }

    Err(ApiError::llm_unavailable(format!(
        "response is not a JSON object after repair: {}",
        truncate(raw, 200)
    )))
}

/// Cut everything outside the outermost brace pair. A missing closing
/// brace keeps the tail so `balance` can add it.
fn slice_outermost(raw: &str) -> String {
    let Some(start) = raw.find('{') else {
        return String::new();
    };
    match raw.rfind('}') {
        Some(end) if end > start => raw[start..=end].to_string(),
        _ => raw[start..].to_string(),
    }
}

fn drop_trailing_commas(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;
    let chars: Vec<char> = raw.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
            out.push(c);
            continue;
        }
        if c == ',' {
            // a comma directly before a closer is noise
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Close a dangling string and any unclosed braces/brackets, innermost
/// first.
fn balance(raw: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in raw.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut out = raw.to_string();
    if in_string {
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

fn strip_non_ascii(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii()).collect()
}

fn truncate(raw: &str, limit: usize) -> String {
    if raw.len() <= limit {
        raw.to_string()
    } else {
        let mut end = limit;
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &raw[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json() {
        let map = parse_json_object(r#"{"a": 1}"#).unwrap();
        assert_eq!(map["a"], 1);
    }

    #[test]
    fn trims_prose_around_the_object() {
        let raw = "Here is the result:\n```json\n{\"key\": \"value\"}\n```\nHope this helps!";
        let map = parse_json_object(raw).unwrap();
        assert_eq!(map["key"], "value");
    }

    #[test]
    fn repairs_trailing_commas() {
        let map = parse_json_object(r#"{"a": 1, "b": [1, 2,],}"#).unwrap();
        assert_eq!(map["b"], serde_json::json!([1, 2]));
    }

    #[test]
    fn closes_missing_braces() {
        let map = parse_json_object(r#"{"a": {"b": [1, 2"#).unwrap();
        assert_eq!(map["a"]["b"], serde_json::json!([1, 2]));
    }

    #[test]
    fn closes_dangling_strings() {
        let map = parse_json_object(r#"{"a": "unfinished"#).unwrap();
        assert_eq!(map["a"], "unfinished");
    }

    #[test]
    fn keeps_commas_inside_strings() {
        let map = parse_json_object(r#"{"a": "one, two,"}"#).unwrap();
        assert_eq!(map["a"], "one, two,");
    }

    #[test]
    fn rejects_hopeless_input() {
        assert!(parse_json_object("no json here at all").is_err());
    }
}
