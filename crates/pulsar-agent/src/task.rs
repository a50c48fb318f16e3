//! Task state tracking — target, plan and progress derived from each exchange.
//!
//! After every loop iteration the tracker receives the messages produced in
//! that iteration, cuts artifacts (code, data, pages, articles) out of them,
//! and asks the model to revise the working task. Every update leaves a
//! [`LogRecord`], even when the model call fails.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{bail, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use pulsar_core::config::{ExtractionMode, TaskConfig};
use pulsar_core::store::SnapshotStore;
use pulsar_core::types::Message;
use pulsar_core::utils::{safe_filename, stamp, truncate_chars, truncate_with_ellipsis};
use pulsar_providers::LlmProvider;

use crate::extract::{split_content_and_json, value_to_text};

const MAX_TITLE_CHARS: usize = 60;

// ─────────────────────────────────────────────
// Data
// ─────────────────────────────────────────────

/// Kind of task. Only plan and research tasks exist.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Plan,
    Research,
}

impl TaskKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "plan" => Some(Self::Plan),
            "research" => Some(Self::Research),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Research => "research",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An artifact cut out of a response.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExtractedFile {
    pub filename: String,
    /// code, data, html, article, config or text.
    #[serde(rename = "type")]
    pub file_type: String,
    pub content: String,
    /// Character count of `content`.
    pub size: usize,
    pub timestamp: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ExtractedFile {
    fn new(filename: String, file_type: &str, content: &str) -> Self {
        let content = content.trim().to_string();
        Self {
            filename,
            file_type: file_type.to_string(),
            size: content.chars().count(),
            content,
            timestamp: stamp(),
            language: None,
            format: None,
            metadata: Map::new(),
        }
    }

    fn with_meta(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn to_value(&self) -> Value {
        json!({
            "filename": self.filename,
            "type": self.file_type,
            "content": self.content,
            "size": self.size,
            "timestamp": self.timestamp,
            "language": self.language,
            "format": self.format,
            "metadata": self.metadata,
        })
    }

    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }
}

/// What one update of the working task observed and changed.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogRecord {
    pub timestamp: String,
    pub query: String,
    pub response_summary: String,
    pub entries: Vec<String>,
    pub files: BTreeMap<String, ExtractedFile>,
    pub metadata: Map<String, Value>,
    pub error: Option<String>,
}

impl LogRecord {
    fn new(query: &str, response_summary: String) -> Self {
        Self {
            timestamp: stamp(),
            query: query.to_string(),
            response_summary,
            ..Default::default()
        }
    }

    fn add_entry(&mut self, entry: impl Into<String>) {
        self.entries.push(entry.into());
    }

    fn add_file(&mut self, file: ExtractedFile) {
        self.add_entry(format!(
            "Extracted file: {} ({}, {} chars)",
            file.filename, file.file_type, file.size
        ));
        self.files.insert(file.filename.clone(), file);
    }

    fn set_error(&mut self, error: String) {
        self.add_entry(format!("Error occurred: {}", error));
        self.error = Some(error);
    }

    /// `Extracted N files: 2 code file(s), 1 data file(s)`.
    pub fn file_summary(&self) -> String {
        if self.files.is_empty() {
            return "No files extracted".to_string();
        }
        let mut by_type: BTreeMap<&str, usize> = BTreeMap::new();
        for file in self.files.values() {
            *by_type.entry(file.file_type.as_str()).or_default() += 1;
        }
        let parts: Vec<String> = by_type
            .iter()
            .map(|(kind, count)| format!("{} {} file(s)", count, kind))
            .collect();
        format!("Extracted {} files: {}", self.files.len(), parts.join(", "))
    }
}

/// A unit of work the agent is tracking.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: u64,
    pub kind: TaskKind,
    pub title: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub progress: String,
    pub created_at: String,
    #[serde(default)]
    pub logs: Vec<LogRecord>,
}

impl Task {
    fn new(id: u64, kind: TaskKind) -> Self {
        Self {
            id,
            kind,
            title: format!("Task {}", id),
            target: String::new(),
            plan: String::new(),
            progress: String::new(),
            created_at: stamp(),
            logs: Vec::new(),
        }
    }

    /// Derive a short title from the first sentence of the target.
    fn title_from_target(&mut self) {
        let target = self.target.trim();
        if target.is_empty() {
            return;
        }
        let mut title = match target.split_once('.') {
            Some((first, _)) => first.trim().to_string(),
            None => truncate_chars(target, 50).trim().to_string(),
        };

        const VERBS: [&str; 6] = ["create", "build", "develop", "make", "generate", "write"];
        let mut words = title.split_whitespace();
        if let Some(first) = words.next() {
            if VERBS.contains(&first.to_lowercase().as_str()) {
                title = words.collect::<Vec<_>>().join(" ");
            }
        }

        if !title.is_empty() {
            self.title = title_case(truncate_chars(&title, MAX_TITLE_CHARS).trim());
        }
    }
}

/// Capitalize the first letter of every word, lowercase the rest.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

/// One line of task listing output.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TaskSummary {
    pub id: u64,
    pub kind: TaskKind,
    pub title: String,
    pub target: String,
    pub progress: String,
    pub logs: usize,
    pub files: usize,
    pub last_updated: Option<String>,
    pub working: bool,
}

#[derive(Serialize, Deserialize)]
struct TaskSnapshot {
    tasks: Vec<Task>,
    working_task: Option<u64>,
    next_task_id: u64,
}

// ─────────────────────────────────────────────
// Content extraction
// ─────────────────────────────────────────────

const DATA_FORMATS: [(&str, &str); 5] = [
    ("json", r"(?s)```json\n(.*?)\n```"),
    ("yaml", r"(?s)```ya?ml\n(.*?)\n```"),
    ("toml", r"(?s)```toml\n(.*?)\n```"),
    ("xml", r"(?s)```xml\n(.*?)\n```"),
    ("ini", r"(?s)```ini\n(.*?)\n```"),
];

/// Cuts standalone artifacts out of a response.
pub struct ContentExtractor {
    mode: ExtractionMode,
    fallback_lines: usize,
    /// Compiled fence patterns (built once at construction).
    code: Option<Regex>,
    html: Option<Regex>,
    data: Vec<(&'static str, Regex)>,
}

impl ContentExtractor {
    pub fn new(mode: ExtractionMode, fallback_lines: usize) -> Self {
        Self {
            mode,
            fallback_lines,
            code: Regex::new(r"(?s)```(\w+)?\n(.*?)\n```").ok(),
            html: Regex::new(r"(?s)```html\n(.*?)\n```").ok(),
            data: DATA_FORMATS
                .iter()
                .filter_map(|(fmt, p)| Regex::new(p).ok().map(|re| (*fmt, re)))
                .collect(),
        }
    }

    pub fn mode(&self) -> ExtractionMode {
        self.mode
    }

    /// Extract artifacts with the configured strategy.
    pub async fn extract(&self, text: &str, provider: &dyn LlmProvider) -> Result<Vec<ExtractedFile>> {
        match self.mode {
            ExtractionMode::Patterns => Ok(self.extract_patterns(text)),
            ExtractionMode::Segmented => self.extract_segmented(text, provider).await,
        }
    }

    /// Fence and layout classification, no model involved.
    pub fn extract_patterns(&self, text: &str) -> Vec<ExtractedFile> {
        let mut files = self.code_blocks(text);
        files.extend(self.structured_data(text));
        files.extend(self.html_pages(text));
        files.extend(articles(text));
        files
    }

    fn code_blocks(&self, text: &str) -> Vec<ExtractedFile> {
        let Some(re) = &self.code else {
            return Vec::new();
        };
        let mut files = Vec::new();
        for (i, caps) in re.captures_iter(text).enumerate() {
            let body = caps.get(2).map_or("", |m| m.as_str());
            if body.trim().is_empty() {
                continue;
            }
            let language = caps.get(1).map_or("text", |m| m.as_str()).to_string();
            let index = i + 1;
            let mut file = ExtractedFile::new(
                format!("code_block_{}.{}", index, extension_for(&language)),
                "code",
                body,
            )
            .with_meta("block_index", json!(index));
            file.language = Some(language);
            files.push(file);
        }
        files
    }

    fn structured_data(&self, text: &str) -> Vec<ExtractedFile> {
        let mut files = Vec::new();
        for (format, re) in &self.data {
            for (i, caps) in re.captures_iter(text).enumerate() {
                let body = caps.get(1).map_or("", |m| m.as_str());
                if body.trim().is_empty() {
                    continue;
                }
                let mut file = ExtractedFile::new(format!("data_{}.{}", files.len() + 1, format), "data", body)
                    .with_meta("data_index", json!(i + 1));
                file.format = Some(format.to_string());
                files.push(file);
            }
        }
        files
    }

    fn html_pages(&self, text: &str) -> Vec<ExtractedFile> {
        let Some(re) = &self.html else {
            return Vec::new();
        };
        let mut files = Vec::new();
        for (i, caps) in re.captures_iter(text).enumerate() {
            let body = caps.get(1).map_or("", |m| m.as_str());
            if body.trim().is_empty() {
                continue;
            }
            let mut file = ExtractedFile::new(format!("webpage_{}.html", i + 1), "html", body)
                .with_meta("html_index", json!(i + 1));
            file.format = Some("html".to_string());
            files.push(file);
        }
        files
    }

    /// Ask the model to list artifacts by start/end marker, then cut them out.
    async fn extract_segmented(&self, text: &str, provider: &dyn LlmProvider) -> Result<Vec<ExtractedFile>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let reply = provider.generate(&segment_prompt(text)).await?;
        let (_, data) = split_content_and_json(&reply);
        let Some(entries) = data.get("files").and_then(Value::as_array) else {
            bail!("no artifact list in model reply");
        };

        let mut files = Vec::new();
        for (i, entry) in entries.iter().enumerate() {
            let field = |key: &str| entry.get(key).map(value_to_text).unwrap_or_default();
            let start = field("start_marker");
            if start.is_empty() {
                continue;
            }
            let Some(body) = cut_segment(text, &start, &field("end_marker"), self.fallback_lines) else {
                debug!(marker = %start, "Start marker not found in response");
                continue;
            };

            let file_type = match field("type") {
                t if t.is_empty() => "text".to_string(),
                t => t,
            };
            let filename = match field("filename") {
                f if f.is_empty() => format!("segment_{}.txt", i + 1),
                f => safe_filename(&f),
            };
            let mut file = ExtractedFile::new(filename, &file_type, &body).with_meta("segment_index", json!(i + 1));
            file.language = Some(field("language")).filter(|s| !s.is_empty());
            file.format = Some(field("format")).filter(|s| !s.is_empty());
            files.push(file);
        }
        Ok(files)
    }
}

/// Text from `start` through `end`, or `fallback_lines` lines from `start`
/// when `end` is empty or missing.
pub(crate) fn cut_segment(text: &str, start: &str, end: &str, fallback_lines: usize) -> Option<String> {
    let from = text.find(start)?;
    let rest = &text[from..];
    if !end.is_empty() {
        if let Some(pos) = rest[start.len()..].find(end) {
            let stop = start.len() + pos + end.len();
            return Some(rest[..stop].to_string());
        }
    }
    Some(rest.lines().take(fallback_lines).collect::<Vec<_>>().join("\n"))
}

fn segment_prompt(text: &str) -> String {
    format!(
        "Identify the standalone artifacts (code, data, html, article, config) in the following response that are worth saving as separate files.
For each artifact copy its exact first line as \"start_marker\" and its exact last line as \"end_marker\".

Response:
{text}

Please respond in JSON format with:
- \"files\": Array of objects with \"filename\", \"type\", \"language\", \"format\", \"start_marker\", \"end_marker\"

Format your response as JSON only, enclosed in triple backticks."
    )
}

/// Runs of headings and long lines: more than 5 lines and 200 characters.
fn articles(text: &str) -> Vec<ExtractedFile> {
    fn flush(lines: &[&str], files: &mut Vec<ExtractedFile>) {
        if lines.len() <= 5 {
            return;
        }
        let body = lines.join("\n");
        let body = body.trim();
        if body.chars().count() <= 200 {
            return;
        }
        let index = files.len() + 1;
        let mut file = ExtractedFile::new(format!("article_{}.md", index), "article", body)
            .with_meta("article_index", json!(index))
            .with_meta("line_count", json!(lines.len()));
        file.format = Some("markdown".to_string());
        files.push(file);
    }

    let mut files = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_article = false;

    for line in text.split('\n') {
        let trimmed = line.trim();
        let article_line = line.starts_with('#')
            || (trimmed.chars().count() > 50 && !line.starts_with("```"));

        if article_line {
            if !in_article {
                in_article = true;
                current.clear();
            }
            current.push(line);
        } else if in_article && trimmed.is_empty() {
            current.push(line);
        } else if in_article && (line.starts_with("```") || current.len() > 5) {
            flush(&current, &mut files);
            in_article = false;
            current.clear();
        }
    }
    if in_article {
        flush(&current, &mut files);
    }
    files
}

fn extension_for(language: &str) -> &'static str {
    match language.to_lowercase().as_str() {
        "python" => "py",
        "javascript" => "js",
        "typescript" => "ts",
        "java" => "java",
        "cpp" => "cpp",
        "c" => "c",
        "csharp" => "cs",
        "php" => "php",
        "ruby" => "rb",
        "go" => "go",
        "rust" => "rs",
        "swift" => "swift",
        "kotlin" => "kt",
        "scala" => "scala",
        "html" => "html",
        "css" => "css",
        "sql" => "sql",
        "bash" | "shell" => "sh",
        "powershell" => "ps1",
        "yaml" => "yml",
        "json" => "json",
        "xml" => "xml",
        "markdown" => "md",
        _ => "txt",
    }
}

// ─────────────────────────────────────────────
// TaskStateTracker
// ─────────────────────────────────────────────

pub struct TaskStateTracker {
    config: TaskConfig,
    provider: Arc<dyn LlmProvider>,
    store: Box<dyn SnapshotStore>,
    extractor: ContentExtractor,
    tasks: BTreeMap<u64, Task>,
    working: Option<u64>,
    next_id: u64,
}

impl TaskStateTracker {
    /// Create a tracker whose working task is a fresh plan task.
    pub fn new(config: TaskConfig, provider: Arc<dyn LlmProvider>, store: Box<dyn SnapshotStore>) -> Self {
        let extractor = ContentExtractor::new(config.extraction, config.segment_fallback_lines);
        let mut tracker = Self {
            config,
            provider,
            store,
            extractor,
            tasks: BTreeMap::new(),
            working: None,
            next_id: 1,
        };
        tracker.new_task(TaskKind::Plan.as_str());
        tracker
    }

    /// Create a tracker and restore the last snapshot, if any.
    pub async fn open(config: TaskConfig, provider: Arc<dyn LlmProvider>, store: Box<dyn SnapshotStore>) -> Self {
        let mut tracker = Self::new(config, provider, store);
        tracker.load().await;
        tracker
    }

    // ────────────── Task lifecycle ──────────────

    /// Allocate the next id and make it the working task. `None` for an unknown kind.
    pub fn new_task(&mut self, kind: &str) -> Option<u64> {
        let Some(kind) = TaskKind::parse(kind) else {
            warn!(kind = kind, "Unknown task kind");
            return None;
        };
        let id = self.next_id;
        self.tasks.insert(id, Task::new(id, kind));
        self.working = Some(id);
        self.next_id += 1;
        info!(id, kind = %kind, "Created task");
        Some(id)
    }

    /// Switch the working task. `false` if the id is unknown.
    pub fn load_task(&mut self, id: u64) -> bool {
        if !self.tasks.contains_key(&id) {
            return false;
        }
        self.working = Some(id);
        info!(id, "Loaded task");
        true
    }

    pub fn working_task(&self) -> Option<&Task> {
        self.working.and_then(|id| self.tasks.get(&id))
    }

    pub fn working_task_id(&self) -> Option<u64> {
        self.working
    }

    pub fn task(&self, id: u64) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn summaries(&self) -> Vec<TaskSummary> {
        self.tasks
            .values()
            .map(|task| TaskSummary {
                id: task.id,
                kind: task.kind,
                title: task.title.clone(),
                target: task.target.clone(),
                progress: task.progress.clone(),
                logs: task.logs.len(),
                files: task.logs.iter().map(|l| l.files.len()).sum(),
                last_updated: task.logs.last().map(|l| l.timestamp.clone()),
                working: self.working == Some(task.id),
            })
            .collect()
    }

    /// Most recent extracted file named `filename` in a task's logs.
    pub fn find_file(&self, task_id: u64, filename: &str) -> Option<&ExtractedFile> {
        self.tasks
            .get(&task_id)?
            .logs
            .iter()
            .rev()
            .find_map(|log| log.files.get(filename))
    }

    // ────────────── Prompt context ──────────────

    pub fn static_context(&self) -> String {
        match self.working_task() {
            Some(task) => format!("Current Task Type: {}", task.kind),
            None => String::new(),
        }
    }

    pub fn dynamic_context(&self) -> String {
        match self.working_task() {
            Some(task) => task_state_lines(task).join("\n"),
            None => String::new(),
        }
    }

    // ────────────── Update ──────────────

    /// Revise the working task from one iteration's messages.
    ///
    /// Never fails: extraction and model errors are recorded in the new log record.
    pub async fn update(&mut self, query: &str, new_messages: &[Message]) {
        let Some(id) = self.working else {
            return;
        };
        if !self.tasks.contains_key(&id) {
            return;
        }

        let response_text = new_messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let mut record = LogRecord::new(
            query,
            truncate_with_ellipsis(&response_text, self.config.response_summary_limit),
        );

        match self.extractor.extract(&response_text, self.provider.as_ref()).await {
            Ok(files) => {
                let extracted = !files.is_empty();
                for file in files {
                    record.add_file(file);
                }
                if extracted {
                    let summary = record.file_summary();
                    record.add_entry(format!("Content extraction completed: {}", summary));
                }
            }
            Err(e) => {
                error!(error = %e, "Content extraction failed");
                record.set_error(format!("File extraction failed: {}", e));
            }
        }

        let prompt = match self.tasks.get(&id) {
            Some(task) => update_prompt(task, query, &response_text, &record),
            None => return,
        };
        debug!(task = id, "Requesting task update");
        let reply = self.provider.generate(&prompt).await;

        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        match reply {
            Ok(reply) => {
                let (_, data) = split_content_and_json(&reply);
                match data.as_object().filter(|o| !o.is_empty()) {
                    Some(fields) => apply_update(task, fields, &mut record),
                    None => {
                        warn!(task = id, "Task update reply had no structured data");
                        record.set_error("Task update failed: no structured data in model reply".to_string());
                        record.metadata.insert("update_successful".into(), json!(false));
                    }
                }
            }
            Err(e) => {
                error!(task = id, error = %e, "Task update failed");
                record.set_error(format!("Task update failed: {}", e));
                record.metadata.insert("update_successful".into(), json!(false));
            }
        }

        let files = record.files.len();
        task.logs.push(record);
        if task.logs.len() > self.config.max_logs {
            let excess = task.logs.len() - self.config.max_logs;
            task.logs.drain(..excess);
            debug!(task = id, max_logs = self.config.max_logs, "Trimmed task logs");
        }
        info!(task = id, files, "Task updated");

        if let Err(e) = self.save().await {
            warn!(error = %e, "Failed to persist tasks");
        }
    }

    // ────────────── Persistence ──────────────

    pub async fn save(&self) -> Result<()> {
        let snapshot = TaskSnapshot {
            tasks: self.tasks.values().cloned().collect(),
            working_task: self.working,
            next_task_id: self.next_id,
        };
        let blob = serde_json::to_string_pretty(&snapshot)?;
        self.store.save(&blob).await
    }

    /// Restore tasks, working id and next id. Missing or corrupt snapshots keep the current state.
    pub async fn load(&mut self) {
        let blob = match self.store.load().await {
            Ok(Some(blob)) => blob,
            Ok(None) => return,
            Err(e) => {
                warn!(store = %self.store.describe(), error = %e, "Failed to read task snapshot");
                return;
            }
        };
        let snapshot: TaskSnapshot = match serde_json::from_str(&blob) {
            Ok(s) => s,
            Err(e) => {
                warn!(store = %self.store.describe(), error = %e, "Corrupt task snapshot ignored");
                return;
            }
        };
        if snapshot.tasks.is_empty() {
            return;
        }

        self.tasks = snapshot.tasks.into_iter().map(|t| (t.id, t)).collect();
        let max_id = self.tasks.keys().next_back().copied().unwrap_or(0);
        self.next_id = snapshot.next_task_id.max(max_id + 1);
        self.working = snapshot
            .working_task
            .filter(|id| self.tasks.contains_key(id))
            .or(Some(max_id));
        info!(tasks = self.tasks.len(), working = ?self.working, "Tasks loaded");
    }
}

fn task_state_lines(task: &Task) -> Vec<String> {
    vec![
        format!("Current Task ID: {}", task.id),
        format!("Current Title: {}", task.title),
        format!("Current Target: {}", or_placeholder(&task.target, "Not set")),
        format!("Current Plan: {}", or_placeholder(&task.plan, "Not set")),
        format!("Current Progress: {}", or_placeholder(&task.progress, "Not started")),
    ]
}

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    if value.is_empty() {
        placeholder
    } else {
        value
    }
}

fn update_prompt(task: &Task, query: &str, response_text: &str, record: &LogRecord) -> String {
    let mut parts = vec![
        "Analyze the following user query and assistant response to update the task information.".to_string(),
    ];
    parts.extend(task_state_lines(task));
    parts.push(format!("\nUser Query: {}", query));
    parts.push(format!("Assistant Response: {}", response_text));

    if !record.files.is_empty() {
        let names: Vec<&String> = record.files.keys().collect();
        parts.push(format!("\nExtracted Files/Content: {:?}", names));
    }

    let guidance: [&str; 6] = if task.target.is_empty() {
        [
            "\nThe task target is not set. Please:",
            "1. Identify the main objective or goal from the conversation",
            "2. Set a clear, specific target",
            "3. Extract a short, meaningful title for this task (max 60 characters)",
            "4. Create an initial plan with key steps",
            "5. Set initial progress status",
        ]
    } else {
        [
            "\nThe task already has a target. Please:",
            "1. Keep the target unless it needs significant modification",
            "2. Update the title if the target has changed significantly",
            "3. Update the plan based on new information or progress",
            "4. Update progress to reflect current status",
            "5. Add any new insights or obstacles discovered",
        ]
    };
    parts.extend(guidance.iter().map(|s| s.to_string()));

    parts.push(
        "
Please respond in JSON format with:
- \"target\": Clear statement of the main objective
- \"title\": Short, descriptive title for the task (max 60 characters)
- \"plan\": Detailed plan with numbered steps
- \"progress\": Current progress description
- \"logs\": Array of new log entries about what happened

Format your response as JSON only, enclosed in triple backticks."
            .to_string(),
    );
    parts.join("\n")
}

/// Apply present, non-empty reply fields to the task.
fn apply_update(task: &mut Task, data: &Map<String, Value>, record: &mut LogRecord) {
    let text_of = |key: &str| {
        data.get(key)
            .map(value_to_text)
            .filter(|s| !s.is_empty())
    };

    if let Some(target) = text_of("target") {
        task.target = target;
        record.add_entry(format!("Target updated: {}", task.target));
        task.title_from_target();
    }
    if let Some(title) = text_of("title") {
        task.title = truncate_chars(&title, MAX_TITLE_CHARS);
        record.add_entry(format!("Title updated: {}", task.title));
    }
    if let Some(plan) = text_of("plan") {
        task.plan = plan;
        record.add_entry("Plan updated");
    }
    if let Some(progress) = text_of("progress") {
        task.progress = progress;
        record.add_entry(format!("Progress updated: {}", task.progress));
    }
    if let Some(logs) = data.get("logs").and_then(Value::as_array) {
        for entry in logs {
            record.add_entry(value_to_text(entry));
        }
    }

    for (flag, key) in [
        ("target_updated", "target"),
        ("title_updated", "title"),
        ("plan_updated", "plan"),
        ("progress_updated", "progress"),
    ] {
        record.metadata.insert(flag.into(), json!(data.contains_key(key)));
    }
    record
        .metadata
        .insert("files_extracted".into(), json!(record.files.len()));
    record.metadata.insert("update_successful".into(), json!(true));
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
