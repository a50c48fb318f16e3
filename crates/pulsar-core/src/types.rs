//! Core types for Pulsar — conversation history entries, tool catalogue
//! entries, and the result envelope returned by tools and memory operations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────

/// Speaker of a conversation history entry.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Upper-case label used when rendering history into a prompt.
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
        }
    }
}

/// One entry of the conversation history.
///
/// History is append-only and owned by a single agent session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ─────────────────────────────────────────────
// Tool catalogue
// ─────────────────────────────────────────────

/// A tool exposed by an external tool provider.
///
/// `input_schema` is JSON-Schema-like: `{"type": "object", "properties": {name: {"type": ...}}}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
    /// Id of the provider that registered this tool.
    #[serde(default)]
    pub provider_id: String,
}

impl ToolSpec {
    /// Property names declared by the input schema.
    pub fn declared_properties(&self) -> Vec<String> {
        declared_properties(&self.input_schema)
    }
}

/// Property names declared under `properties` of a JSON schema.
pub fn declared_properties(schema: &Value) -> Vec<String> {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default()
}

/// Declared `type` of a single schema property, if any.
pub fn property_type<'a>(schema: &'a Value, property: &str) -> Option<&'a str> {
    schema
        .get("properties")?
        .get(property)?
        .get("type")?
        .as_str()
}

// ─────────────────────────────────────────────
// Call results
// ─────────────────────────────────────────────

/// One item of a call result envelope.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResultContent {
    Text { text: String },
    Value { value: Value },
}

/// Result envelope of a tool or memory operation call: `{content: [...], isError}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallResult {
    #[serde(default)]
    pub content: Vec<ResultContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallResult {
    /// A successful result with a single text item.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ResultContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// A successful result with a single value item.
    pub fn value(value: Value) -> Self {
        Self {
            content: vec![ResultContent::Value { value }],
            is_error: false,
        }
    }

    /// Render the envelope for the conversation history.
    ///
    /// Text items are copied verbatim, value items become `Value: <json>`.
    pub fn render(&self) -> String {
        self.content
            .iter()
            .map(|item| match item {
                ResultContent::Text { text } => text.clone(),
                ResultContent::Value { value } => format!("Value: {}", render_value(value)),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Strings render bare, everything else as compact JSON.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
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
    fn test_message_constructors() {
        let m = Message::user("hi");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.content, "hi");
        assert_eq!(Message::assistant("ok").role, Role::Assistant);
    }

    #[test]
    fn test_message_serialization_lowercase_role() {
        let json = serde_json::to_value(Message::assistant("x")).unwrap();
        assert_eq!(json["role"], "assistant");
    }

    #[test]
    fn test_declared_properties() {
        let spec = ToolSpec {
            name: "search".into(),
            description: String::new(),
            input_schema: json!({"type": "object", "properties": {"q": {"type": "string"}, "n": {"type": "number"}}}),
            provider_id: "web".into(),
        };
        let mut props = spec.declared_properties();
        props.sort();
        assert_eq!(props, vec!["n", "q"]);
        assert_eq!(property_type(&spec.input_schema, "n"), Some("number"));
        assert_eq!(property_type(&spec.input_schema, "missing"), None);
    }

    #[test]
    fn test_declared_properties_without_schema() {
        assert!(declared_properties(&Value::Null).is_empty());
    }

    #[test]
    fn test_call_result_render() {
        let result = CallResult {
            content: vec![
                ResultContent::Text { text: "stored".into() },
                ResultContent::Value { value: json!("blue") },
                ResultContent::Value { value: json!({"a": 1}) },
            ],
            is_error: false,
        };
        assert_eq!(result.render(), "stored\nValue: blue\nValue: {\"a\":1}");
    }

    #[test]
    fn test_call_result_wire_format() {
        let raw = json!({"content": [{"type": "text", "text": "hello"}], "isError": false});
        let parsed: CallResult = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed, CallResult::text("hello"));
    }
}
