//! Provider response handling
//!
//! Backends answer in free text that usually, but not always, contains clean
//! JSON. [`extract_json`] recovers a JSON value from that text and
//! [`parse_batch_result`] maps it onto a `BatchAnalysisResult`. Any failure
//! here is reported as a malformed response.

use serde_json::{Map, Value};
use tracing::debug;

use crate::types::{
    BatchAnalysisResult, CleanlinessAssessment, CleanlinessState, CompletedTask, ProposedTask,
    ResultMetadata, TaskPriority,
};

/// Recover a JSON value from raw provider text
pub fn extract_json(raw: &str) -> Result<Value, String> {
    let cleaned = strip_code_fences(raw.trim().trim_start_matches('\u{feff}'));

    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Ok(value);
    }

    let candidate = embedded_object(cleaned).unwrap_or(cleaned);
    let repaired = balance_closers(&drop_trailing_commas(candidate));
    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => {
            debug!("Recovered JSON from provider text after repair");
            Ok(value)
        }
        Err(e) => Err(format!(
            "no parseable JSON ({}); preview: {}",
            e,
            cleaned.chars().take(120).collect::<String>()
        )),
    }
}

fn strip_code_fences(s: &str) -> &str {
    let mut body = s;
    if body.starts_with("```") {
        body = match body.find('\n') {
            Some(newline) => &body[newline + 1..],
            None => body.trim_start_matches('`'),
        };
    }
    body.trim_end().trim_end_matches("```").trim()
}

/// First balanced `{...}` in mixed prose, or the tail from the first `{`
fn embedded_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (i, ch) in s[start..].char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    Some(&s[start..])
}

fn drop_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escape = false;
    for (i, &ch) in chars.iter().enumerate() {
        if escape {
            escape = false;
        } else if ch == '\\' && in_string {
            escape = true;
        } else if ch == '"' {
            in_string = !in_string;
        } else if ch == ',' && !in_string {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some(']') | Some('}')) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

/// Close strings, arrays and objects left open by a truncated answer
fn balance_closers(s: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escape = false;
    for ch in s.chars() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut out = s.to_string();
    if in_string {
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

// =============================================================================
// Mapping
// =============================================================================

/// Map provider JSON onto a batched result
pub fn parse_batch_result(value: &Value) -> Result<BatchAnalysisResult, String> {
    let root = value
        .as_object()
        .ok_or_else(|| "top-level value is not an object".to_string())?;

    let cleanliness = root
        .get("cleanliness")
        .or_else(|| root.get("cleanliness_assessment"))
        .and_then(Value::as_object)
        .ok_or_else(|| "missing cleanliness assessment".to_string())
        .and_then(parse_cleanliness)?;

    let completed_tasks = array_field(root, "completed_tasks")?
        .iter()
        .filter_map(parse_completed)
        .collect();

    let new_tasks = array_field(root, "new_tasks")?
        .iter()
        .filter_map(parse_proposed)
        .collect();

    Ok(BatchAnalysisResult {
        completed_tasks,
        new_tasks,
        cleanliness,
        metadata: ResultMetadata::default(),
    })
}

fn array_field<'a>(root: &'a Map<String, Value>, key: &str) -> Result<&'a [Value], String> {
    match root.get(key) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(format!("{} is not an array", key)),
    }
}

fn parse_cleanliness(obj: &Map<String, Value>) -> Result<CleanlinessAssessment, String> {
    let raw_score = obj
        .get("score")
        .and_then(number)
        .ok_or_else(|| "cleanliness score missing or not a number".to_string())?;
    let score = raw_score.round().clamp(0.0, 100.0) as u8;

    let state = obj
        .get("state")
        .and_then(Value::as_str)
        .and_then(CleanlinessState::parse)
        .filter(|s| *s != CleanlinessState::Unknown)
        .unwrap_or_else(|| CleanlinessState::from_score(score));

    Ok(CleanlinessAssessment {
        score,
        state,
        observations: strings(obj.get("observations")),
        recommendations: strings(obj.get("recommendations")),
    })
}

fn parse_completed(item: &Value) -> Option<CompletedTask> {
    let obj = item.as_object()?;
    let task_id = obj
        .get("task_id")
        .or_else(|| obj.get("id"))
        .and_then(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|id| !id.is_empty())?;
    let confidence = obj.get("confidence").and_then(number).unwrap_or(0.0);
    Some(CompletedTask {
        task_id,
        confidence: confidence.clamp(0.0, 1.0) as f32,
        reasoning: obj
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

fn parse_proposed(item: &Value) -> Option<ProposedTask> {
    let (description, obj) = match item {
        Value::String(s) => (s.as_str(), None),
        Value::Object(obj) => (obj.get("description")?.as_str()?, Some(obj)),
        _ => return None,
    };
    let description = description.trim();
    if description.is_empty() {
        return None;
    }
    let field = |key: &str| obj.and_then(|o| o.get(key)).and_then(Value::as_str);
    Some(ProposedTask {
        description: description.to_string(),
        priority: field("priority")
            .map(TaskPriority::parse_lenient)
            .unwrap_or_default(),
        category: field("category").map(str::to_string),
    })
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_plain_and_fenced() {
        assert_eq!(extract_json(r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
        assert_eq!(
            extract_json("```json\n{\"a\": 1}\n```").unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn test_extract_from_prose_with_trailing_comma() {
        let raw = "Sure! Here is the analysis:\n{\"items\": [1, 2,],}\nLet me know.";
        assert_eq!(extract_json(raw).unwrap(), json!({"items": [1, 2]}));
    }

    #[test]
    fn test_extract_truncated_answer() {
        let raw = r#"{"cleanliness": {"score": 70, "observations": ["dishes in the si"#;
        let value = extract_json(raw).unwrap();
        assert_eq!(value["cleanliness"]["score"], 70);
    }

    #[test]
    fn test_extract_garbage_fails() {
        assert!(extract_json("I cannot see the image.").is_err());
    }

    #[test]
    fn test_comma_inside_string_untouched() {
        let raw = r#"{"note": "a,]", "x": [1,]}"#;
        assert_eq!(extract_json(raw).unwrap(), json!({"note": "a,]", "x": [1]}));
    }

    #[test]
    fn test_parse_full_result() {
        let value = json!({
            "completed_tasks": [
                {"task_id": "t1", "confidence": 0.92, "reasoning": "counter is clear"},
                {"confidence": 0.9},
                {"id": 7, "confidence": "1.4"}
            ],
            "new_tasks": [
                {"description": "Take out the recycling", "priority": "high", "category": "trash"},
                "Sweep the floor",
                {"description": "   "}
            ],
            "cleanliness": {
                "score": 64.6,
                "state": "acceptable",
                "observations": ["bin is full"],
                "recommendations": ["empty the bin", 3]
            }
        });
        let result = parse_batch_result(&value).unwrap();
        assert_eq!(result.completed_tasks.len(), 2);
        assert_eq!(result.completed_tasks[1].task_id, "7");
        assert_eq!(result.completed_tasks[1].confidence, 1.0);
        assert_eq!(result.new_tasks.len(), 2);
        assert_eq!(result.new_tasks[0].priority, TaskPriority::High);
        assert_eq!(result.new_tasks[1].priority, TaskPriority::Medium);
        assert_eq!(result.cleanliness.score, 65);
        assert_eq!(result.cleanliness.state, CleanlinessState::Acceptable);
        assert_eq!(result.cleanliness.recommendations, vec!["empty the bin"]);
        assert!(!result.is_fallback());
    }

    #[test]
    fn test_state_derived_from_score_when_missing() {
        let value = json!({"cleanliness": {"score": 15}});
        let result = parse_batch_result(&value).unwrap();
        assert_eq!(result.cleanliness.state, CleanlinessState::Messy);
        assert!(result.completed_tasks.is_empty());
    }

    #[test]
    fn test_missing_cleanliness_is_malformed() {
        let value = json!({"completed_tasks": [], "new_tasks": []});
        assert!(parse_batch_result(&value).is_err());
        assert!(parse_batch_result(&json!([1, 2])).is_err());
        assert!(parse_batch_result(&json!({"cleanliness": {"score": "high"}})).is_err());
        assert!(
            parse_batch_result(&json!({"cleanliness": {"score": 50}, "new_tasks": "none"}))
                .is_err()
        );
    }
}
