use serde_json::Value;

/// Best-effort extraction of a JSON object from model output. Strict parse
/// first; when the model wraps the object in prose, recover the longest
/// balanced `{…}` substring that still parses. `None` means the caller only
/// has raw text to work with.
pub fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Some(value);
        }
    }

    let chars: Vec<char> = raw.chars().collect();
    let mut candidates: Vec<(usize, usize)> = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '{' {
            if let Some(end) = balanced_end(&chars, i) {
                candidates.push((i, end));
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }

    candidates.sort_by_key(|(start, end)| std::cmp::Reverse(end - start));
    for (start, end) in candidates {
        let snippet: String = chars[start..=end].iter().collect();
        if let Ok(value) = serde_json::from_str::<Value>(&snippet) {
            if value.is_object() {
                return Some(value);
            }
        }
    }
    None
}

/// Index of the brace closing the block that opens at `start`, tracking
/// string literals and escapes so braces inside strings do not count.
fn balanced_end(chars: &[char], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &c) in chars[start..].iter().enumerate() {
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
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Numeric field read that tolerates numbers quoted as strings.
pub fn json_f32(value: &Value, key: &str) -> Option<f32> {
    let field = value.get(key)?;
    if let Some(n) = field.as_f64() {
        return Some(n as f32);
    }
    field.as_str().and_then(|s| s.trim().parse::<f32>().ok())
}

pub fn json_string(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// String-list field read that accepts a bare string as a one-element list.
pub fn json_string_list(value: &Value, key: &str) -> Vec<String> {
    match value.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Pull every parseable float out of free-form model output.
pub fn parse_float_list(raw: &str) -> Vec<f32> {
    raw.split(|c: char| c == ',' || c == '[' || c == ']' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f32>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_parse() {
        let value = extract_json(r#"{"matchRate": 0.85}"#).unwrap();
        assert_eq!(value["matchRate"], 0.85);
    }

    #[test]
    fn test_object_wrapped_in_prose() {
        let raw = "Here is my assessment:\n{\"matchRate\": 0.7, \"strengths\": [\"sql\"]}\nLet me know.";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["matchRate"], 0.7);
    }

    #[test]
    fn test_longest_balanced_block_wins() {
        let raw = r#"{"a": 1} and the full answer {"matchRate": 0.6, "overallAssessment": "ok"}"#;
        let value = extract_json(raw).unwrap();
        assert_eq!(value["matchRate"], 0.6);
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let raw = r#"{"note": "uses {curly} braces", "score": 2}"#;
        let value = extract_json(raw).unwrap();
        assert_eq!(value["score"], 2);
    }

    #[test]
    fn test_unbalanced_input_yields_none() {
        assert!(extract_json("RECOMMENDATION: HIRE").is_none());
        assert!(extract_json("{\"open\": 1").is_none());
    }

    #[test]
    fn test_numeric_reads_tolerate_strings() {
        let value = extract_json(r#"{"a": "0.5", "b": 3, "c": "n/a"}"#).unwrap();
        assert_eq!(json_f32(&value, "a"), Some(0.5));
        assert_eq!(json_f32(&value, "b"), Some(3.0));
        assert_eq!(json_f32(&value, "c"), None);
        assert_eq!(json_f32(&value, "missing"), None);
    }

    #[test]
    fn test_string_list_accepts_bare_string() {
        let value = extract_json(r#"{"a": ["x", "y"], "b": "solo", "c": 4}"#).unwrap();
        assert_eq!(json_string_list(&value, "a"), vec!["x", "y"]);
        assert_eq!(json_string_list(&value, "b"), vec!["solo"]);
        assert!(json_string_list(&value, "c").is_empty());
    }

    #[test]
    fn test_parse_float_list() {
        let floats = parse_float_list("0.1, -0.2,0.3\n0.4 junk 0.5]");
        assert_eq!(floats, vec![0.1, -0.2, 0.3, 0.4, 0.5]);
    }
}
