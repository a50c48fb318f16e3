//! Memory store — narrative records, summaries, topics and a key-value database.
//!
//! The model reaches memory through a small catalogue of named operations,
//! each described by a JSON schema. Arguments are coerced against that schema
//! before the handler runs. A periodic refresh asks the model to condense the
//! latest records into a summary, topics and key facts.
//!
//! State is persisted as one JSON snapshot through a [`SnapshotStore`].

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};
use tracing::{debug, error, info, warn};

use pulsar_core::config::MemoryConfig;
use pulsar_core::error::MemoryError;
use pulsar_core::store::SnapshotStore;
use pulsar_core::types::{declared_properties, property_type, CallResult};
use pulsar_core::utils::stamp;
use pulsar_providers::LlmProvider;

use crate::extract::{coerce_bool, split_content_and_json, value_to_text};

// ─────────────────────────────────────────────
// Data
// ─────────────────────────────────────────────

/// One timestamped narrative record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    pub timestamp: String,
    pub content: String,
}

/// A theme extracted from records, ranked by frequency then recency.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Topic {
    pub description: String,
    pub created: String,
    pub last_updated: String,
    #[serde(default)]
    pub frequency: u64,
}

/// Everything the memory store persists.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryData {
    pub records: Vec<MemoryRecord>,
    /// Refresh timestamp → summary text.
    pub summary: BTreeMap<String, String>,
    pub topics: BTreeMap<String, Topic>,
    pub database: Map<String, Value>,
}

// ─────────────────────────────────────────────
// Operations
// ─────────────────────────────────────────────

/// Catalogue entry of a memory operation.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperationSpec {
    pub name: String,
    pub title: String,
    pub description: String,
    pub input_schema: Value,
}

/// Handler run once the arguments have been validated and coerced.
pub type OperationHandler = fn(&mut MemoryData, &Map<String, Value>) -> Result<CallResult, MemoryError>;

struct Operation {
    spec: OperationSpec,
    handler: OperationHandler,
    /// Read-only operations skip the snapshot write.
    mutates: bool,
}

/// Snapshot of the store for status output.
#[derive(Clone, Debug, Serialize)]
pub struct MemoryOverview {
    pub records: usize,
    pub topics: Vec<(String, Topic)>,
    pub database_keys: Vec<String>,
    pub summaries: usize,
    pub latest_summary: Option<String>,
    pub recent_records: Vec<MemoryRecord>,
}

// ─────────────────────────────────────────────
// MemoryStore
// ─────────────────────────────────────────────

pub struct MemoryStore {
    config: MemoryConfig,
    provider: Arc<dyn LlmProvider>,
    store: Box<dyn SnapshotStore>,
    /// Registered operations, in registration order.
    operations: Vec<Operation>,
    data: MemoryData,
}

impl MemoryStore {
    /// Create an empty store with the built-in operations registered.
    pub fn new(config: MemoryConfig, provider: Arc<dyn LlmProvider>, store: Box<dyn SnapshotStore>) -> Self {
        let mut memory = Self {
            config,
            provider,
            store,
            operations: Vec::new(),
            data: MemoryData::default(),
        };
        memory.register_builtins();
        memory
    }

    /// Create a store and, when `load_memory` is set, restore the last snapshot.
    pub async fn open(
        config: MemoryConfig,
        provider: Arc<dyn LlmProvider>,
        store: Box<dyn SnapshotStore>,
    ) -> Self {
        let mut memory = Self::new(config, provider, store);
        if memory.config.load_memory {
            memory.load().await;
        }
        memory
    }

    /// Register an operation. A later registration with the same name replaces the earlier one.
    pub fn register(&mut self, spec: OperationSpec, handler: OperationHandler) {
        self.insert_operation(spec, handler, true);
    }

    /// Register an operation that only reads memory; invoking it never persists.
    pub fn register_read_only(&mut self, spec: OperationSpec, handler: OperationHandler) {
        self.insert_operation(spec, handler, false);
    }

    fn insert_operation(&mut self, spec: OperationSpec, handler: OperationHandler, mutates: bool) {
        self.operations.retain(|op| op.spec.name != spec.name);
        self.operations.push(Operation {
            spec,
            handler,
            mutates,
        });
    }

    fn register_builtins(&mut self) {
        self.register(
            OperationSpec {
                name: "add_memory_record".into(),
                title: "Add Memory Record".into(),
                description: "Add a memory to the system.\n\n    Args:\n        record: The memory piece in string format to add;\n".into(),
                input_schema: object_schema("AddMemoryRecordArguments", &["record"]),
            },
            add_memory_record,
        );
        self.register(
            OperationSpec {
                name: "add_memory_data".into(),
                title: "Add Memory Data".into(),
                description: "Add a key-value pair to the memory database.\n\n    Args:\n        key: A key for the data to add;\n        value: A string value;\n".into(),
                input_schema: object_schema("AddMemoryDataArguments", &["key", "value"]),
            },
            add_memory_data,
        );
        self.register_read_only(
            OperationSpec {
                name: "get_memory_data".into(),
                title: "Get Memory Data".into(),
                description: "Read a value from the memory database.\n\n    Args:\n        key: The key of the data to read;\n".into(),
                input_schema: object_schema("GetMemoryDataArguments", &["key"]),
            },
            get_memory_data,
        );
    }

    // ────────────── Persistence ──────────────

    /// Restore the last snapshot. Missing or unreadable snapshots leave the store empty.
    pub async fn load(&mut self) {
        match self.store.load().await {
            Ok(Some(blob)) => match serde_json::from_str::<MemoryData>(&blob) {
                Ok(data) => {
                    info!(
                        records = data.records.len(),
                        topics = data.topics.len(),
                        "Memory loaded"
                    );
                    self.data = data;
                }
                Err(e) => warn!(store = %self.store.describe(), error = %e, "Corrupt memory snapshot ignored"),
            },
            Ok(None) => debug!("No previous memory found, starting fresh"),
            Err(e) => warn!(store = %self.store.describe(), error = %e, "Failed to read memory snapshot"),
        }
    }

    /// Write the full state snapshot.
    pub async fn save(&self) -> Result<()> {
        let blob = serde_json::to_string_pretty(&self.data)?;
        self.store.save(&blob).await?;
        debug!(store = %self.store.describe(), "Memory saved");
        Ok(())
    }

    // ────────────── Catalogue ──────────────

    /// Operations the model may call: everything except `ignored_operations`.
    pub fn list_operations(&self) -> Vec<&OperationSpec> {
        self.list_operations_excluding(&self.config.ignored_operations)
    }

    /// Operation catalogue minus the given names.
    pub fn list_operations_excluding(&self, excluding: &[String]) -> Vec<&OperationSpec> {
        self.operations
            .iter()
            .filter(|op| !excluding.contains(&op.spec.name))
            .map(|op| &op.spec)
            .collect()
    }

    /// Look up a model-callable operation by name.
    pub fn operation(&self, name: &str) -> Option<&OperationSpec> {
        self.list_operations().into_iter().find(|spec| spec.name == name)
    }

    // ────────────── Invocation ──────────────

    /// Validate and coerce `args` against the operation's schema, run it, and
    /// persist unless the operation is read-only.
    pub async fn invoke(&mut self, name: &str, args: Map<String, Value>) -> Result<CallResult, MemoryError> {
        let op = self
            .operations
            .iter()
            .find(|op| op.spec.name == name)
            .ok_or_else(|| MemoryError::OperationNotFound(name.to_string()))?;

        let args = coerce_args(&op.spec, args)?;
        let (handler, mutates) = (op.handler, op.mutates);
        let result = handler(&mut self.data, &args)?;
        debug!(operation = name, mutates, "Memory operation executed");

        if !mutates {
            return Ok(result);
        }
        if let Err(e) = self.save().await {
            warn!(operation = name, error = %e, "Failed to persist memory");
        }
        Ok(result)
    }

    // ────────────── Prompt context ──────────────

    /// The model-callable operations with their input schemas.
    pub fn static_context(&self) -> String {
        let mut parts = vec!["\n## Available Memory Operations:".to_string()];
        for spec in self.list_operations() {
            parts.push(format!("- {}: {}", spec.name, spec.description));
            parts.push(format!("  Input schema: {}", spec.input_schema));
        }
        parts.join("\n")
    }

    /// The most recent records, or an empty string when there are none.
    pub fn dynamic_context(&self) -> String {
        if self.data.records.is_empty() {
            return String::new();
        }
        let mut parts = vec!["\n## Latest Memory Records:".to_string()];
        let skip = self
            .data
            .records
            .len()
            .saturating_sub(self.config.latest_record_num);
        for record in &self.data.records[skip..] {
            parts.push(format!("- [{}] {}", record.timestamp, record.content));
        }
        parts.join("\n")
    }

    // ────────────── Refresh ──────────────

    /// Condense the latest records into summary, topics and key facts, then persist.
    ///
    /// Does nothing without records. A model failure is logged; the state is
    /// persisted either way. Only a persistence failure is returned.
    pub async fn refresh_from_model(&mut self) -> Result<()> {
        if self.data.records.is_empty() {
            return Ok(());
        }

        let skip = self
            .data
            .records
            .len()
            .saturating_sub(self.config.update_batch_size);
        let records_text = self.data.records[skip..]
            .iter()
            .map(|r| format!("[{}] {}", r.timestamp, r.content))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = refresh_prompt(&records_text, &self.data.topics);

        match self.provider.generate(&prompt).await {
            Ok(response) => {
                let (_, data) = split_content_and_json(&response);
                self.apply_refresh(&data);
                info!(
                    topics = self.data.topics.len(),
                    max_topics = self.config.max_topics,
                    "Memory refreshed"
                );
            }
            Err(e) => error!(error = %e, "Memory refresh failed"),
        }

        self.save().await
    }

    fn apply_refresh(&mut self, data: &Value) {
        if let Some(summary) = data.get("summary") {
            self.data.summary.insert(stamp(), value_to_text(summary));
            while self.data.summary.len() > self.config.max_summaries {
                self.data.summary.pop_first();
            }
        }

        if let Some(topics) = data.get("topics").and_then(Value::as_object) {
            for (name, description) in topics {
                self.upsert_topic(name, value_to_text(description));
            }
        }

        if let Some(facts) = data.get("key_facts").and_then(Value::as_array) {
            let now = stamp();
            for (i, fact) in facts.iter().enumerate() {
                self.data
                    .database
                    .insert(format!("fact_{}_{}", now, i), Value::String(value_to_text(fact)));
            }
        }
    }

    fn upsert_topic(&mut self, name: &str, description: String) {
        let now = stamp();
        if let Some(topic) = self.data.topics.get_mut(name) {
            topic.description = description;
            topic.last_updated = now;
            topic.frequency += 1;
            return;
        }

        if self.data.topics.len() >= self.config.max_topics {
            let weakest = self
                .data
                .topics
                .iter()
                .min_by(|a, b| {
                    (a.1.frequency, &a.1.last_updated).cmp(&(b.1.frequency, &b.1.last_updated))
                })
                .map(|(k, _)| k.clone());
            if let Some(evicted) = weakest {
                self.data.topics.remove(&evicted);
                debug!(evicted = %evicted, topic = name, "Topic evicted");
            }
        }

        self.data.topics.insert(
            name.to_string(),
            Topic {
                description,
                created: now.clone(),
                last_updated: now,
                frequency: 1,
            },
        );
        debug!(topic = name, "Topic added");
    }

    // ────────────── Accessors ──────────────

    pub fn data(&self) -> &MemoryData {
        &self.data
    }

    pub fn provider_name(&self) -> &str {
        self.provider.display_name()
    }

    pub fn overview(&self) -> MemoryOverview {
        let skip = self
            .data
            .records
            .len()
            .saturating_sub(self.config.latest_record_num);
        MemoryOverview {
            records: self.data.records.len(),
            topics: self
                .data
                .topics
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            database_keys: self.data.database.keys().cloned().collect(),
            summaries: self.data.summary.len(),
            latest_summary: self.data.summary.values().next_back().cloned(),
            recent_records: self.data.records[skip..].to_vec(),
        }
    }
}

// ─────────────────────────────────────────────
// Coercion
// ─────────────────────────────────────────────

/// Check every key is declared and coerce values by their declared type.
pub(crate) fn coerce_args(spec: &OperationSpec, args: Map<String, Value>) -> Result<Map<String, Value>, MemoryError> {
    let declared = declared_properties(&spec.input_schema);
    let invalid = |reason: String| MemoryError::InvalidArguments {
        operation: spec.name.clone(),
        reason,
    };

    let mut coerced = Map::new();
    for (key, value) in args {
        if !declared.contains(&key) {
            return Err(invalid(format!(
                "unexpected argument '{}', expected one of: {}",
                key,
                declared.join(", ")
            )));
        }
        let kind = property_type(&spec.input_schema, &key).unwrap_or("string");
        let value = match kind {
            "number" | "integer" => coerce_number(&value)
                .ok_or_else(|| invalid(format!("'{}' is not a number: {}", key, value)))?,
            "boolean" => coerce_bool(&value)
                .map(Value::Bool)
                .ok_or_else(|| invalid(format!("'{}' is not a boolean: {}", key, value)))?,
            "string" => Value::String(stringify(&value)),
            _ => value,
        };
        coerced.insert(key, value);
    }
    Ok(coerced)
}

/// Integer parse first, then float. Integral floats become integers.
fn coerce_number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Some(Value::from(f as i64))
            }
            _ => Some(value.clone()),
        },
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Some(Value::from(i));
            }
            let f = s.parse::<f64>().ok()?;
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                Some(Value::from(f as i64))
            } else {
                Number::from_f64(f).map(Value::Number)
            }
        }
        _ => None,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn object_schema(title: &str, string_props: &[&str]) -> Value {
    let mut properties = Map::new();
    for prop in string_props {
        let mut chars = prop.chars();
        let label = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
            None => String::new(),
        };
        properties.insert(prop.to_string(), json!({"title": label, "type": "string"}));
    }
    json!({
        "properties": properties,
        "title": title,
        "type": "object",
        "required": string_props,
    })
}

fn required_str<'a>(operation: &str, args: &'a Map<String, Value>, key: &str) -> Result<&'a str, MemoryError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| MemoryError::InvalidArguments {
            operation: operation.to_string(),
            reason: format!("missing required argument '{}'", key),
        })
}

// ─────────────────────────────────────────────
// Built-in handlers
// ─────────────────────────────────────────────

fn add_memory_record(data: &mut MemoryData, args: &Map<String, Value>) -> Result<CallResult, MemoryError> {
    let record = required_str("add_memory_record", args, "record")?;
    data.records.push(MemoryRecord {
        timestamp: stamp(),
        content: record.to_string(),
    });
    Ok(CallResult::text(format!("Memory record added: {}", record)))
}

fn add_memory_data(data: &mut MemoryData, args: &Map<String, Value>) -> Result<CallResult, MemoryError> {
    let key = required_str("add_memory_data", args, "key")?;
    let value = required_str("add_memory_data", args, "value")?;
    data.database
        .insert(key.to_string(), Value::String(value.to_string()));
    Ok(CallResult::text(format!("Memory data added: {} - {}", key, value)))
}

fn get_memory_data(data: &mut MemoryData, args: &Map<String, Value>) -> Result<CallResult, MemoryError> {
    let key = required_str("get_memory_data", args, "key")?;
    Ok(match data.database.get(key) {
        Some(value) => CallResult::value(value.clone()),
        None => CallResult::text(format!(
            "Cannot find any value associated to key '{}' in memory data.",
            key
        )),
    })
}

fn refresh_prompt(records_text: &str, topics: &BTreeMap<String, Topic>) -> String {
    let current_topics = if topics.is_empty() {
        "None".to_string()
    } else {
        format!("{:?}", topics.keys().collect::<Vec<_>>())
    };
    format!(
        "Analyze the following memory records and extract:
1. Key topics/themes present in the records
2. A brief summary of the main points
3. Any important data or facts that should be remembered

Recent Memory Records:
{records_text}

Current Topics: {current_topics}

Please respond in JSON format with:
- \"summary\": Brief summary of the records
- \"topics\": Object with topic names as keys and descriptions as values
- \"key_facts\": Array of important facts or data points

Format your response as JSON only, enclosed in triple backticks."
    )
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use pulsar_core::store::{FileSnapshotStore, InMemorySnapshotStore};
    use tempfile::TempDir;

    fn memory_with(responses: Vec<&str>) -> (MemoryStore, Arc<MockProvider>) {
        let provider = Arc::new(MockProvider::new(responses));
        let memory = MemoryStore::new(
            MemoryConfig::default(),
            provider.clone(),
            Box::new(InMemorySnapshotStore::new()),
        );
        (memory, provider)
    }

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn topic(frequency: u64, last_updated: &str) -> Topic {
        Topic {
            description: "d".into(),
            created: last_updated.into(),
            last_updated: last_updated.into(),
            frequency,
        }
    }

    #[test]
    fn test_record_operation_hidden_by_default() {
        let (memory, _) = memory_with(vec![]);
        let names: Vec<_> = memory.list_operations().iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["add_memory_data", "get_memory_data"]);
        assert!(memory.operation("add_memory_record").is_none());

        let all = memory.list_operations_excluding(&[]);
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_invoke_unknown_operation() {
        let (mut memory, _) = memory_with(vec![]);
        let err = memory.invoke("forget_everything", Map::new()).await.unwrap_err();
        assert_eq!(err, MemoryError::OperationNotFound("forget_everything".into()));
    }

    #[tokio::test]
    async fn test_invoke_rejects_undeclared_key() {
        let (mut memory, _) = memory_with(vec![]);
        let err = memory
            .invoke("add_memory_data", args(&[("key", json!("a")), ("colour", json!("red"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidArguments { .. }));
        assert!(memory.data().database.is_empty());
    }

    #[tokio::test]
    async fn test_add_and_get_data() {
        let (mut memory, _) = memory_with(vec![]);
        let result = memory
            .invoke("add_memory_data", args(&[("key", json!("city")), ("value", json!(42))]))
            .await
            .unwrap();
        assert_eq!(result.render(), "Memory data added: city - 42");
        assert_eq!(memory.data().database["city"], json!("42"));

        let found = memory
            .invoke("get_memory_data", args(&[("key", json!("city"))]))
            .await
            .unwrap();
        assert_eq!(found, CallResult::value(json!("42")));

        let missing = memory
            .invoke("get_memory_data", args(&[("key", json!("zip"))]))
            .await
            .unwrap();
        assert_eq!(
            missing.render(),
            "Cannot find any value associated to key 'zip' in memory data."
        );
    }

    #[tokio::test]
    async fn test_read_only_operation_does_not_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory.json");
        let mut memory = MemoryStore::new(
            MemoryConfig::default(),
            Arc::new(MockProvider::new(vec![])),
            Box::new(FileSnapshotStore::new(path.clone())),
        );

        memory
            .invoke("add_memory_data", args(&[("key", json!("city")), ("value", json!("Oslo"))]))
            .await
            .unwrap();
        assert!(path.exists());

        std::fs::remove_file(&path).unwrap();
        let found = memory
            .invoke("get_memory_data", args(&[("key", json!("city"))]))
            .await
            .unwrap();
        assert_eq!(found, CallResult::value(json!("Oslo")));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_required_argument() {
        let (mut memory, _) = memory_with(vec![]);
        let err = memory
            .invoke("add_memory_data", args(&[("key", json!("a"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidArguments { reason, .. } if reason.contains("value")));
    }

    #[tokio::test]
    async fn test_record_operation_still_invocable() {
        let (mut memory, _) = memory_with(vec![]);
        memory
            .invoke("add_memory_record", args(&[("record", json!("likes tea"))]))
            .await
            .unwrap();
        assert_eq!(memory.data().records.len(), 1);
        assert!(memory.dynamic_context().contains("likes tea"));
    }

    #[test]
    fn test_coerce_by_declared_type() {
        let spec = OperationSpec {
            name: "typed".into(),
            title: "Typed".into(),
            description: String::new(),
            input_schema: json!({
                "properties": {
                    "n": {"type": "number"},
                    "f": {"type": "number"},
                    "b": {"type": "boolean"},
                    "s": {"type": "string"},
                    "o": {"type": "object"},
                    "u": {}
                }
            }),
        };
        let coerced = coerce_args(
            &spec,
            args(&[
                ("n", json!("12")),
                ("f", json!("2.5")),
                ("b", json!("yes")),
                ("s", json!(7)),
                ("o", json!({"k": 1})),
                ("u", json!(true)),
            ]),
        )
        .unwrap();
        assert_eq!(coerced["n"], json!(12));
        assert_eq!(coerced["f"], json!(2.5));
        assert_eq!(coerced["b"], json!(true));
        assert_eq!(coerced["s"], json!("7"));
        assert_eq!(coerced["o"], json!({"k": 1}));
        assert_eq!(coerced["u"], json!("true"));

        assert!(coerce_args(&spec, args(&[("n", json!("twelve"))])).is_err());
        assert!(coerce_args(&spec, args(&[("b", json!("maybe"))])).is_err());
    }

    #[test]
    fn test_static_context_lists_callable_operations() {
        let (memory, _) = memory_with(vec![]);
        let ctx = memory.static_context();
        assert!(ctx.starts_with("\n## Available Memory Operations:"));
        assert!(ctx.contains("- add_memory_data: Add a key-value pair"));
        assert!(ctx.contains("Input schema: {"));
        assert!(!ctx.contains("add_memory_record"));
    }

    #[test]
    fn test_dynamic_context_window() {
        let (mut memory, _) = memory_with(vec![]);
        assert_eq!(memory.dynamic_context(), "");
        for i in 0..15 {
            memory.data.records.push(MemoryRecord {
                timestamp: format!("t{:02}", i),
                content: format!("record {}", i),
            });
        }
        let ctx = memory.dynamic_context();
        assert!(ctx.contains("- [t14] record 14"));
        assert!(ctx.contains("- [t05] record 5"));
        assert!(!ctx.contains("[t04]"));
        assert_eq!(ctx.lines().filter(|l| l.starts_with("- [")).count(), 10);
    }

    #[tokio::test]
    async fn test_refresh_without_records_is_noop() {
        let (mut memory, provider) = memory_with(vec!["unused"]);
        memory.refresh_from_model().await.unwrap();
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_refresh_applies_summary_topics_and_facts() {
        let reply = r#"```
{"summary": "User likes tea", "topics": {"drinks": "hot drinks"}, "key_facts": ["tea", 3]}
```"#;
        let (mut memory, provider) = memory_with(vec![reply]);
        for i in 0..7 {
            memory.data.records.push(MemoryRecord {
                timestamp: format!("t{}", i),
                content: format!("note {}", i),
            });
        }
        memory.refresh_from_model().await.unwrap();

        let prompt = &provider.prompts()[0];
        assert!(prompt.contains("[t6] note 6"));
        assert!(prompt.contains("[t2] note 2"));
        assert!(!prompt.contains("[t1] note 1"));
        assert!(prompt.contains("Current Topics: None"));

        let data = memory.data();
        assert_eq!(data.summary.values().next().unwrap(), "User likes tea");
        assert_eq!(data.topics["drinks"].frequency, 1);
        let facts: Vec<_> = data
            .database
            .iter()
            .filter(|(k, _)| k.starts_with("fact_"))
            .map(|(_, v)| v.clone())
            .collect();
        assert_eq!(facts, vec![json!("tea"), json!("3")]);
    }

    #[tokio::test]
    async fn test_refresh_model_failure_still_persists() {
        let provider = Arc::new(MockProvider::scripted(vec![Err("down".into())]));
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("memory").join("memory-default.json");
        let mut memory = MemoryStore::new(
            MemoryConfig::default(),
            provider,
            Box::new(FileSnapshotStore::new(path.clone())),
        );
        memory.data.records.push(MemoryRecord {
            timestamp: "t0".into(),
            content: "kept".into(),
        });
        memory.refresh_from_model().await.unwrap();
        assert!(path.exists());
        assert!(memory.data().summary.is_empty());
    }

    #[test]
    fn test_topic_eviction_picks_lowest_frequency_then_oldest() {
        let (mut memory, _) = memory_with(vec![]);
        memory.config.max_topics = 3;
        memory.data.topics.insert("busy".into(), topic(5, "20240101_000000_000000"));
        memory.data.topics.insert("stale".into(), topic(1, "20240101_000000_000000"));
        memory.data.topics.insert("fresh".into(), topic(1, "20240601_000000_000000"));

        memory.upsert_topic("new", "n".into());
        let names: Vec<_> = memory.data.topics.keys().cloned().collect();
        assert_eq!(names, vec!["busy", "fresh", "new"]);
    }

    #[test]
    fn test_existing_topic_update_never_evicts() {
        let (mut memory, _) = memory_with(vec![]);
        memory.config.max_topics = 2;
        memory.data.topics.insert("a".into(), topic(1, "20240101_000000_000000"));
        memory.data.topics.insert("b".into(), topic(1, "20240102_000000_000000"));

        for _ in 0..3 {
            memory.upsert_topic("a", "again".into());
        }
        assert_eq!(memory.data.topics.len(), 2);
        assert_eq!(memory.data.topics["a"].frequency, 4);
        assert_eq!(memory.data.topics["a"].description, "again");
    }

    #[test]
    fn test_summary_retention_drops_oldest() {
        let (mut memory, _) = memory_with(vec![]);
        memory.config.max_summaries = 2;
        memory.data.summary.insert("00000000_000000_000001".into(), "first".into());
        memory.data.summary.insert("00000000_000000_000002".into(), "second".into());
        memory.apply_refresh(&json!({"summary": "third"}));
        let kept: Vec<_> = memory.data.summary.values().cloned().collect();
        assert_eq!(kept, vec!["second", "third"]);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_through_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("memory-s.json");
        let provider: Arc<dyn LlmProvider> = Arc::new(MockProvider::new(vec![]));

        let mut memory = MemoryStore::new(
            MemoryConfig::default(),
            provider.clone(),
            Box::new(FileSnapshotStore::new(path.clone())),
        );
        memory
            .invoke("add_memory_data", args(&[("key", json!("k")), ("value", json!("v"))]))
            .await
            .unwrap();

        let reopened = MemoryStore::open(
            MemoryConfig::default(),
            provider,
            Box::new(FileSnapshotStore::new(path.clone())),
        )
        .await;
        assert_eq!(reopened.data().database["k"], json!("v"));
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_starts_empty() {
        let provider: Arc<dyn LlmProvider> = Arc::new(MockProvider::new(vec![]));
        let memory = MemoryStore::open(
            MemoryConfig::default(),
            provider,
            Box::new(InMemorySnapshotStore::with_blob("{not json")),
        )
        .await;
        assert_eq!(memory.data(), &MemoryData::default());
    }

    #[test]
    fn test_overview() {
        let (mut memory, _) = memory_with(vec![]);
        memory.data.records.push(MemoryRecord {
            timestamp: "t".into(),
            content: "c".into(),
        });
        memory.data.database.insert("k".into(), json!("v"));
        let overview = memory.overview();
        assert_eq!(overview.records, 1);
        assert_eq!(overview.database_keys, vec!["k"]);
        assert_eq!(overview.recent_records.len(), 1);
        assert!(overview.latest_summary.is_none());
    }
}
