//! Configuration schema.
//!
//! Hierarchy: `Config` → `ProviderSettings`, `McpServerConfig`, `MemoryConfig`,
//! `TaskConfig`, `BridgeConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! Every section is `#[serde(default)]`, so a partial file keeps the
//! documented defaults for whatever it omits.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration — loaded from `~/.pulsar/config.json` + env vars.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Language model used by the reasoning loop.
    pub provider: ProviderSettings,
    /// Maximum reasoning iterations per user query.
    #[serde(alias = "max_iters")]
    pub max_iters: usize,
    /// Session label used to name snapshot files.
    pub session: String,
    /// Directory holding memory and task snapshots.
    pub data_dir: String,
    /// External tool providers, keyed by provider id, in file order.
    pub mcp_servers: IndexMap<String, McpServerConfig>,
    pub memory: MemoryConfig,
    pub task: TaskConfig,
    pub bridge: BridgeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderSettings::default(),
            max_iters: 5,
            session: "default".to_string(),
            data_dir: "~/.pulsar/data".to_string(),
            mcp_servers: IndexMap::new(),
            memory: MemoryConfig::default(),
            task: TaskConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl Config {
    /// Resolved data directory (`~` expanded).
    pub fn data_path(&self) -> PathBuf {
        crate::utils::expand_home(&self.data_dir)
    }

    /// Snapshot file for the memory store of this session.
    pub fn memory_snapshot_path(&self) -> PathBuf {
        self.data_path()
            .join("memory")
            .join(format!("memory-{}.json", crate::utils::safe_filename(&self.session)))
    }

    /// Snapshot file for the task tracker of this session.
    pub fn task_snapshot_path(&self) -> PathBuf {
        self.data_path()
            .join("task")
            .join(format!("tasks-{}.json", crate::utils::safe_filename(&self.session)))
    }
}

// ─────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────

/// Which language model to talk to and how.
///
/// `name` selects a provider from the registry (e.g. `"ollama"`, `"openai"`).
/// An empty name means "not configured".
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    pub name: String,
    /// Model identifier; empty uses the provider's default model.
    pub model: String,
    /// Custom API base URL (overrides provider default).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// API key; when empty the provider's env var is consulted.
    pub api_key: String,
    /// Env var holding the API key, overriding the provider default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_name: Option<String>,
}

impl ProviderSettings {
    /// Whether a provider name has been set.
    pub fn is_configured(&self) -> bool {
        !self.name.trim().is_empty()
    }
}

// ─────────────────────────────────────────────
// Tool providers
// ─────────────────────────────────────────────

/// How to launch one stdio tool provider.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct McpServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

// ─────────────────────────────────────────────
// Memory
// ─────────────────────────────────────────────

/// Memory store settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryConfig {
    /// Dedicated model for memory refreshes; `None` shares the agent's.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderSettings>,
    /// Load the previous snapshot on startup.
    pub load_memory: bool,
    /// Records shown in the dynamic memory context.
    pub latest_record_num: usize,
    /// Records sampled by each refresh.
    pub update_batch_size: usize,
    pub max_topics: usize,
    pub max_summaries: usize,
    /// Operations hidden from the model.
    pub ignored_operations: Vec<String>,
    /// Run a memory refresh after every N queries; 0 disables it.
    pub queries_per_refresh: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            provider: None,
            load_memory: true,
            latest_record_num: 10,
            update_batch_size: 5,
            max_topics: 20,
            max_summaries: 10,
            ignored_operations: vec!["add_memory_record".to_string()],
            queries_per_refresh: 0,
        }
    }
}

// ─────────────────────────────────────────────
// Task
// ─────────────────────────────────────────────

/// How artifacts are cut out of a model response.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    /// Regex classification of fenced blocks and article-like text.
    #[default]
    Patterns,
    /// Model-assisted segmentation by start/end markers.
    Segmented,
}

/// Task tracker settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskConfig {
    /// Dedicated model for task updates; `None` shares the agent's.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderSettings>,
    pub response_summary_limit: usize,
    pub max_logs: usize,
    pub extraction: ExtractionMode,
    /// Lines taken from a start marker when its end marker is missing.
    pub segment_fallback_lines: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            provider: None,
            response_summary_limit: 200,
            max_logs: 50,
            extraction: ExtractionMode::Patterns,
            segment_fallback_lines: 20,
        }
    }
}

// ─────────────────────────────────────────────
// Bridge
// ─────────────────────────────────────────────

/// Execution bridge timings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    pub submit_timeout_secs: u64,
    pub shutdown_grace_ms: u64,
    pub startup_attempts: u32,
    pub startup_poll_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            submit_timeout_secs: 180,
            shutdown_grace_ms: 1000,
            startup_attempts: 50,
            startup_poll_ms: 100,
        }
    }
}

impl BridgeConfig {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn startup_poll(&self) -> Duration {
        Duration::from_millis(self.startup_poll_ms)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
