//! Structured output extraction — pulls a decision record out of free text.
//!
//! Model replies may embed the JSON anywhere, inside or outside code fences,
//! and the JSON itself is often sloppy (single quotes, trailing commas,
//! Python literals). The fallback chain is fixed:
//!
//! 1. the **first** fenced block that parses as a non-empty object;
//! 2. a parse of the whole text;
//! 3. nothing (`Value::Null`), which callers treat as an empty decision.

use serde_json::{Map, Value};
use tracing::debug;

use pulsar_core::error::ExtractionError;

const FENCE: &str = "```";

/// Language tags stripped from the start of a fenced block with no brace in it.
const LANGUAGE_TAGS: &[&str] = &["html", "css", "python", "javascript", "json", "xml"];

// ─────────────────────────────────────────────
// Fence scanning
// ─────────────────────────────────────────────

/// Split a model reply into its prose and its structured payload.
///
/// Returns the text with the winning fence removed (or the original text
/// when no fence won) and the parsed data (`Value::Null` if nothing parsed).
pub fn split_content_and_json(text: &str) -> (String, Value) {
    let marks: Vec<usize> = text.match_indices(FENCE).map(|(i, _)| i).collect();

    for pair in marks.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        let inner = &text[start + FENCE.len()..end];
        let Some(candidate) = fenced_candidate(inner) else {
            continue;
        };
        match parse_lenient(&candidate) {
            Ok(Value::Object(map)) if !map.is_empty() => {
                let before = text[..start].trim();
                let after = text[(end + FENCE.len()).min(text.len())..].trim();
                return (format!("{}\n{}", before, after), Value::Object(map));
            }
            _ => continue,
        }
    }

    match parse_lenient(text) {
        Ok(value) if !is_empty_value(&value) => (text.to_string(), value),
        _ => (text.to_string(), Value::Null),
    }
}

/// Prepare the inside of a fence for parsing.
///
/// Line breaks are dropped, then the text starts at the first `{` or `[`;
/// with neither present, a leading language tag is stripped.
fn fenced_candidate(inner: &str) -> Option<String> {
    let flat: String = inner.chars().filter(|c| *c != '\n' && *c != '\r').collect();
    let flat = flat.trim();
    if flat.is_empty() {
        return None;
    }

    let brace = flat.find(['{', '[']);
    let candidate = match brace {
        Some(pos) => &flat[pos..],
        None => LANGUAGE_TAGS
            .iter()
            .find_map(|tag| flat.strip_prefix(tag))
            .unwrap_or(flat)
            .trim(),
    };
    Some(candidate.to_string())
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

// ─────────────────────────────────────────────
// Lenient JSON
// ─────────────────────────────────────────────

/// Parse JSON, repairing common model mistakes if the strict parse fails.
pub fn parse_lenient(text: &str) -> Result<Value, ExtractionError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExtractionError);
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    let repaired = repair_json(trimmed);
    serde_json::from_str(&repaired).map_err(|e| {
        debug!(error = %e, "Lenient JSON parse failed");
        ExtractionError
    })
}

/// Rewrite JSON5-ish text into strict JSON.
///
/// Handles single-quoted strings, unquoted keys, `//` and `/* */` comments,
/// trailing commas, raw control characters inside strings, and the Python
/// literals `True`, `False`, `None`.
fn repair_json(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                i = copy_string(&chars, i, &mut out);
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i += 2;
                continue;
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some('}') | Some(']') | None) {
                    out.push(',');
                }
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let next = chars[i..].iter().find(|c| !c.is_whitespace());
                if next == Some(&':') {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else {
                    out.push_str(match word.as_str() {
                        "True" => "true",
                        "False" => "false",
                        "None" => "null",
                        other => other,
                    });
                }
                continue;
            }
            _ => out.push(c),
        }
        i += 1;
    }

    out
}

/// Copy one quoted string starting at `start` as a double-quoted JSON string.
/// Returns the index just past the closing quote.
fn copy_string(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    out.push('"');

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            if let Some(&escaped) = chars.get(i + 1) {
                if escaped == '\'' {
                    out.push('\'');
                } else {
                    out.push('\\');
                    out.push(escaped);
                }
                i += 2;
                continue;
            }
        }
        if c == quote {
            out.push('"');
            return i + 1;
        }
        match c {
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
        i += 1;
    }

    out.push('"');
    i
}

// ─────────────────────────────────────────────
// Coercion helpers
// ─────────────────────────────────────────────

/// Truthy coercion: booleans, `true/t/yes/y`, `false/f/no/n`, and 1/0.
pub fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Some(true),
            "false" | "f" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 1.0 => Some(true),
            Some(f) if f == 0.0 => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Render a JSON value as plain text (strings unquoted).
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ─────────────────────────────────────────────
// Decision
// ─────────────────────────────────────────────

/// A named call with arguments, as requested by the model.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActionCall {
    pub name: String,
    pub args: Map<String, Value>,
}

impl ActionCall {
    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let name = obj.get("name").map(value_to_text).unwrap_or_default();
        let args = match obj.get("args").or_else(|| obj.get("arguments")) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        Some(Self { name, args })
    }
}

/// The structured record extracted from one model turn.
#[derive(Clone, Debug, PartialEq)]
pub struct Decision {
    pub think: Option<String>,
    pub text: Option<String>,
    pub mem_op: Option<ActionCall>,
    pub tool: Option<ActionCall>,
    /// Whether the model considers the query answered. Defaults to `true`.
    pub finished: bool,
}

impl Default for Decision {
    fn default() -> Self {
        Self {
            think: None,
            text: None,
            mem_op: None,
            tool: None,
            finished: true,
        }
    }
}

impl Decision {
    /// Extract a decision from raw model output. Never fails.
    pub fn extract(text: &str) -> Self {
        let (_, data) = split_content_and_json(text);
        let decision = Self::from_value(&data);
        debug!(
            has_think = decision.think.is_some(),
            has_text = decision.text.is_some(),
            mem_op = decision.mem_op.as_ref().map(|c| c.name.as_str()),
            tool = decision.tool.as_ref().map(|c| c.name.as_str()),
            finished = decision.finished,
            "Decision extracted"
        );
        decision
    }

    /// Build a decision from parsed data; anything but an object is empty.
    pub fn from_value(data: &Value) -> Self {
        let Some(obj) = data.as_object() else {
            return Self::default();
        };

        let text_field = |key: &str| {
            obj.get(key)
                .filter(|v| !v.is_null())
                .map(value_to_text)
                .filter(|s| !s.trim().is_empty())
        };

        Self {
            think: text_field("think"),
            text: text_field("text"),
            mem_op: obj
                .get("mem_op")
                .or_else(|| obj.get("memOp"))
                .and_then(ActionCall::from_value),
            tool: obj.get("tool").and_then(ActionCall::from_value),
            finished: obj.get("finished").and_then(coerce_bool).unwrap_or(true),
        }
    }

    /// Whether the decision asks for nothing at all.
    pub fn is_empty(&self) -> bool {
        self.think.is_none() && self.text.is_none() && self.mem_op.is_none() && self.tool.is_none()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_fenced_object_wins() {
        let text = "Here you go:\n```json\n{\"text\": \"first\"}\n```\nand\n```json\n{\"text\": \"second\"}\n```";
        let (content, data) = split_content_and_json(text);
        assert_eq!(data, json!({"text": "first"}));
        assert!(content.starts_with("Here you go:\n"));
        assert!(!content.contains("first"));
    }

    #[test]
    fn test_skips_unparseable_and_empty_fences() {
        let text = "```python\nprint('hi')\n```\n```json\n{}\n```\n```json\n{\"finished\": false}\n```";
        let (_, data) = split_content_and_json(text);
        assert_eq!(data, json!({"finished": false}));
    }

    #[test]
    fn test_multiline_fence_is_flattened() {
        let text = "```json\n{\n  \"text\": \"hello\",\n  \"finished\": true\n}\n```";
        let (content, data) = split_content_and_json(text);
        assert_eq!(data["text"], "hello");
        assert_eq!(content.trim(), "");
    }

    #[test]
    fn test_whole_text_fallback() {
        let (content, data) = split_content_and_json(r#"{"text": "bare json"}"#);
        assert_eq!(data["text"], "bare json");
        assert_eq!(content, r#"{"text": "bare json"}"#);
    }

    #[test]
    fn test_nothing_parses() {
        let (content, data) = split_content_and_json("Just a plain answer.");
        assert_eq!(data, Value::Null);
        assert_eq!(content, "Just a plain answer.");
    }

    #[test]
    fn test_unclosed_fence_falls_back() {
        let (_, data) = split_content_and_json("```json\n{\"text\": \"x\"}");
        assert_eq!(data, Value::Null);
    }

    #[test]
    fn test_lenient_repairs() {
        let value = parse_lenient("{'text': 'it\\'s fine', finished: False, tool: None,}").unwrap();
        assert_eq!(value, json!({"text": "it's fine", "finished": false, "tool": null}));

        let value = parse_lenient("{\"a\": [1, 2,], // note\n \"b\": \"x\ty\"}").unwrap();
        assert_eq!(value, json!({"a": [1, 2], "b": "x\ty"}));

        let value = parse_lenient("{\"a\": 1 /* inline */}").unwrap();
        assert_eq!(value, json!({"a": 1}));

        assert!(parse_lenient("").is_err());
        assert!(parse_lenient("not json at all").is_err());
    }

    #[test]
    fn test_lenient_keeps_literals_inside_strings() {
        let value = parse_lenient("{'text': 'True or None, right?',}").unwrap();
        assert_eq!(value["text"], "True or None, right?");
    }

    #[test]
    fn test_coerce_bool() {
        assert_eq!(coerce_bool(&json!(true)), Some(true));
        assert_eq!(coerce_bool(&json!("Yes")), Some(true));
        assert_eq!(coerce_bool(&json!("n")), Some(false));
        assert_eq!(coerce_bool(&json!(1)), Some(true));
        assert_eq!(coerce_bool(&json!(0.0)), Some(false));
        assert_eq!(coerce_bool(&json!(2)), None);
        assert_eq!(coerce_bool(&json!("maybe")), None);
        assert_eq!(coerce_bool(&json!(null)), None);
    }

    #[test]
    fn test_decision_full() {
        let text = r#"Thinking...
```json
{
  "think": "look it up",
  "text": "Searching now.",
  "mem_op": {"name": "add_memory_data", "args": {"key": "color", "value": "blue"}},
  "tool": {"name": "search", "args": {"q": "rust"}},
  "finished": "no"
}
```"#;
        let decision = Decision::extract(text);
        assert_eq!(decision.think.as_deref(), Some("look it up"));
        assert_eq!(decision.text.as_deref(), Some("Searching now."));
        let mem_op = decision.mem_op.unwrap();
        assert_eq!(mem_op.name, "add_memory_data");
        assert_eq!(mem_op.args["value"], "blue");
        assert_eq!(decision.tool.unwrap().args["q"], "rust");
        assert!(!decision.finished);
    }

    #[test]
    fn test_decision_defaults() {
        let decision = Decision::extract("no structure here");
        assert!(decision.is_empty());
        assert!(decision.finished);

        // Uncoercible `finished` falls back to true
        let decision = Decision::from_value(&json!({"text": "hi", "finished": "perhaps"}));
        assert!(decision.finished);
    }

    #[test]
    fn test_decision_accepts_camel_case_mem_op() {
        let decision = Decision::from_value(&json!({"memOp": {"name": "get_memory_data", "args": {"key": "k"}}}));
        assert_eq!(decision.mem_op.unwrap().name, "get_memory_data");
    }

    #[test]
    fn test_decision_ignores_blank_text_and_bad_args() {
        let decision = Decision::from_value(&json!({"text": "  ", "tool": {"name": "x", "args": "oops"}}));
        assert!(decision.text.is_none());
        let tool = decision.tool.unwrap();
        assert_eq!(tool.name, "x");
        assert!(tool.args.is_empty());
    }
}
