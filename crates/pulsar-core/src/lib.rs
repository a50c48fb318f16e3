//! Pulsar core — types and infrastructure shared by every other crate.
//!
//! - **types**: conversation messages, tool specs, call results
//! - **config**: typed configuration with JSON + env var loading
//! - **error**: error taxonomy for the bridge, tools, and memory operations
//! - **bridge**: the single-worker execution bridge used by synchronous callers
//! - **store**: snapshot persistence (`save(blob)` / `load() -> blob`)
//! - **utils**: paths, timestamps, string helpers

pub mod bridge;
pub mod config;
pub mod error;
pub mod store;
pub mod types;
pub mod utils;

pub use bridge::ExecutionBridge;
pub use config::Config;
pub use error::{BridgeError, MemoryError, ToolError};
pub use types::{CallResult, Message, ResultContent, Role, ToolSpec};
