//! External tool providers.
//!
//! A tool provider is a separate process exposing `list_tools` / `call_tool`.
//! [`ToolConnection`] is one live link to such a provider, [`Connector`]
//! opens links from configuration, and [`ToolProviderRegistry`] owns all of
//! them and presents one catalogue.

use async_trait::async_trait;
use serde_json::{Map, Value};

use pulsar_core::config::McpServerConfig;
use pulsar_core::error::ToolError;
use pulsar_core::types::{CallResult, ToolSpec};

pub mod registry;
pub mod stdio;

pub use registry::ToolProviderRegistry;
pub use stdio::{StdioConnection, StdioConnector};

/// One open connection to a tool provider.
#[async_trait]
pub trait ToolConnection: Send + Sync {
    /// Tools the provider exposes right now.
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError>;

    /// Invoke a tool by name.
    async fn call_tool(&self, name: &str, args: Map<String, Value>) -> Result<CallResult, ToolError>;

    /// Release the connection.
    async fn close(&self) -> Result<(), ToolError>;
}

/// Opens connections to configured providers.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        provider_id: &str,
        config: &McpServerConfig,
    ) -> Result<Box<dyn ToolConnection>, ToolError>;
}

// ─────────────────────────────────────────────
// Test doubles
// ─────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Scripted behaviour of one fake provider.
    #[derive(Clone, Default)]
    pub struct FakeProvider {
        pub tools: Vec<(String, String)>,
        pub fail_connect: bool,
        pub fail_list: Arc<AtomicBool>,
        pub fail_call: bool,
        /// Answer calls with an `is_error` result instead of failing them.
        pub error_result: bool,
        pub fail_close: bool,
        pub calls: Arc<Mutex<Vec<(String, Map<String, Value>)>>>,
        pub closed: Arc<AtomicBool>,
    }

    impl FakeProvider {
        /// Provider exposing tools named `names`, each with a `q: string` property.
        pub fn with_tools(names: &[&str]) -> Self {
            Self {
                tools: names
                    .iter()
                    .map(|n| (n.to_string(), format!("{} tool", n)))
                    .collect(),
                ..Default::default()
            }
        }

        pub fn recorded_calls(&self) -> Vec<(String, Map<String, Value>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    pub struct FakeConnection {
        id: String,
        provider: FakeProvider,
    }

    #[async_trait]
    impl ToolConnection for FakeConnection {
        async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
            if self.provider.fail_list.load(Ordering::SeqCst) {
                return Err(ToolError::Protocol {
                    provider: self.id.clone(),
                    message: "listing failed".into(),
                });
            }
            Ok(self
                .provider
                .tools
                .iter()
                .map(|(name, description)| ToolSpec {
                    name: name.clone(),
                    description: description.clone(),
                    input_schema: serde_json::json!({
                        "type": "object",
                        "properties": {"q": {"type": "string"}}
                    }),
                    provider_id: self.id.clone(),
                })
                .collect())
        }

        async fn call_tool(&self, name: &str, args: Map<String, Value>) -> Result<CallResult, ToolError> {
            self.provider
                .calls
                .lock()
                .unwrap()
                .push((name.to_string(), args));
            if self.provider.fail_call {
                return Err(ToolError::Protocol {
                    provider: self.id.clone(),
                    message: "call failed".into(),
                });
            }
            if self.provider.error_result {
                return Ok(CallResult {
                    is_error: true,
                    ..CallResult::text(format!("{} rejected by {}", name, self.id))
                });
            }
            Ok(CallResult::text(format!("{} from {}", name, self.id)))
        }

        async fn close(&self) -> Result<(), ToolError> {
            self.provider.closed.store(true, Ordering::SeqCst);
            if self.provider.fail_close {
                return Err(ToolError::Protocol {
                    provider: self.id.clone(),
                    message: "close failed".into(),
                });
            }
            Ok(())
        }
    }

    /// Connector handing out fake connections by provider id.
    #[derive(Clone, Default)]
    pub struct FakeConnector {
        pub providers: HashMap<String, FakeProvider>,
    }

    impl FakeConnector {
        pub fn with(mut self, id: &str, provider: FakeProvider) -> Self {
            self.providers.insert(id.to_string(), provider);
            self
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(
            &self,
            provider_id: &str,
            _config: &McpServerConfig,
        ) -> Result<Box<dyn ToolConnection>, ToolError> {
            match self.providers.get(provider_id) {
                Some(p) if !p.fail_connect => Ok(Box::new(FakeConnection {
                    id: provider_id.to_string(),
                    provider: p.clone(),
                })),
                _ => Err(ToolError::ProviderUnavailable {
                    provider: provider_id.to_string(),
                    reason: "refused".into(),
                }),
            }
        }
    }
}
