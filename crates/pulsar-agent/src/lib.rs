//! Pulsar Agent — reasoning loop, memory, task tracking and tool providers.
//!
//! This crate contains:
//! - **extract**: structured decisions pulled out of free-form model replies
//! - **tools**: tool provider connections and the registry over them
//! - **memory**: schema-described memory operations and periodic refresh
//! - **task**: working-task state and artifact extraction
//! - **context**: prompt assembly
//! - **agent_loop**: the bounded think / text / memory / tool loop

pub mod agent_loop;
pub mod context;
pub mod extract;
pub mod memory;
pub mod task;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use agent_loop::{AgentInfo, AgentLoop};
pub use context::ContextBuilder;
pub use extract::{split_content_and_json, ActionCall, Decision};
pub use memory::{MemoryOverview, MemoryStore};
pub use task::{TaskStateTracker, TaskSummary};
pub use tools::{ToolConnection, ToolProviderRegistry};
