//! Error types for Pulsar.
//!
//! Each component gets its own `thiserror` enum. Application seams (agent
//! construction, CLI, persistence) use `anyhow` on top of these.

use thiserror::Error;

/// Execution bridge lifecycle and round-trip failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("execution bridge is not running")]
    NotRunning,

    #[error("execution context did not become ready after {attempts} attempts")]
    NotStarted { attempts: u32 },

    #[error("operation timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("worker stopped before the operation completed")]
    WorkerGone,

    #[error("previous execution worker is still stopping")]
    Stopping,
}

/// Tool provider failures.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool '{0}' not found in any connected provider")]
    NotFound(String),

    #[error("tool provider '{provider}' unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("protocol error from '{provider}': {message}")]
    Protocol { provider: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Memory operation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("memory operation '{0}' not found")]
    OperationNotFound(String),

    #[error("invalid arguments for '{operation}': {reason}")]
    InvalidArguments { operation: String, reason: String },
}

/// No structured decision could be parsed from a model response.
///
/// Never fatal: callers degrade to an empty decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no structured data found in model output")]
pub struct ExtractionError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            BridgeError::Timeout { secs: 180 }.to_string(),
            "operation timed out after 180s"
        );
        assert_eq!(
            ToolError::NotFound("search".into()).to_string(),
            "tool 'search' not found in any connected provider"
        );
        let err = MemoryError::InvalidArguments {
            operation: "add_memory_data".into(),
            reason: "undeclared key 'x'".into(),
        };
        assert!(err.to_string().contains("undeclared key 'x'"));
    }
}
