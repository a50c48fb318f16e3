//! Tool provider registry — one catalogue over many provider connections.
//!
//! Nothing is cached: every listing asks each connected provider again, and
//! every invocation re-resolves which provider owns the tool. A provider that
//! fails to connect or to list is left out; partial connectivity is normal.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use pulsar_core::config::McpServerConfig;
use pulsar_core::error::ToolError;
use pulsar_core::types::{CallResult, ToolSpec};

use super::{Connector, StdioConnector, ToolConnection};

// ─────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────

/// Owns provider connections and dispatches tool calls by name.
pub struct ToolProviderRegistry {
    connector: Box<dyn Connector>,
    /// Configured providers, in registration order.
    configs: Vec<(String, McpServerConfig)>,
    /// Live connections, in connection order.
    connections: Vec<(String, Box<dyn ToolConnection>)>,
}

impl ToolProviderRegistry {
    /// Create an empty registry using the given connector.
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self {
            connector,
            configs: Vec::new(),
            connections: Vec::new(),
        }
    }

    /// Create an empty registry that launches stdio providers.
    pub fn stdio() -> Self {
        Self::new(Box::new(StdioConnector::default()))
    }

    /// Replace the configured provider set. Does not connect.
    pub fn load<I>(&mut self, configs: I)
    where
        I: IntoIterator<Item = (String, McpServerConfig)>,
    {
        self.configs = configs.into_iter().collect();
        debug!(providers = self.configs.len(), "Tool providers configured");
    }

    /// Connect every configured provider that is not connected yet.
    ///
    /// Each provider is tried independently; failures are logged and skipped.
    /// Returns the number of live connections afterwards.
    pub async fn connect_all(&mut self) -> usize {
        for (id, config) in &self.configs {
            if self.connections.iter().any(|(live, _)| live == id) {
                continue;
            }
            match self.connector.connect(id, config).await {
                Ok(conn) => {
                    info!(provider = %id, "Connected tool provider");
                    self.connections.push((id.clone(), conn));
                }
                Err(e) => {
                    warn!(provider = %id, error = %e, "Tool provider unavailable");
                }
            }
        }
        self.connections.len()
    }

    /// Aggregate the live catalogue of every connected provider.
    ///
    /// On a name collision the first provider (in connection order) wins.
    pub async fn list_tools(&self) -> BTreeMap<String, ToolSpec> {
        let mut catalogue = BTreeMap::new();

        for (id, conn) in &self.connections {
            let tools = match conn.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    warn!(provider = %id, error = %e, "Failed to list tools");
                    continue;
                }
            };
            for mut tool in tools {
                if catalogue.contains_key(&tool.name) {
                    debug!(tool = %tool.name, provider = %id, "Duplicate tool name ignored");
                    continue;
                }
                tool.provider_id = id.clone();
                catalogue.insert(tool.name.clone(), tool);
            }
        }

        catalogue
    }

    /// Forward a call to the first connected provider currently listing `name`.
    pub async fn invoke(&self, name: &str, args: Map<String, Value>) -> Result<CallResult, ToolError> {
        for (id, conn) in &self.connections {
            let owns = match conn.list_tools().await {
                Ok(tools) => tools.iter().any(|t| t.name == name),
                Err(e) => {
                    debug!(provider = %id, error = %e, "Skipping provider during resolution");
                    false
                }
            };
            if owns {
                info!(tool = name, provider = %id, "Calling tool");
                return conn.call_tool(name, args).await;
            }
        }

        warn!(tool = name, "tool not found");
        Err(ToolError::NotFound(name.to_string()))
    }

    /// Close every connection. Individual failures are logged; the set is always emptied.
    pub async fn cleanup(&mut self) {
        for (id, conn) in self.connections.drain(..) {
            match conn.close().await {
                Ok(()) => debug!(provider = %id, "Closed tool provider"),
                Err(e) => warn!(provider = %id, error = %e, "Failed to close tool provider"),
            }
        }
    }

    /// Ids of the providers currently connected.
    pub fn connected_providers(&self) -> Vec<String> {
        self.connections.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Number of configured providers.
    pub fn configured_count(&self) -> usize {
        self.configs.len()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
