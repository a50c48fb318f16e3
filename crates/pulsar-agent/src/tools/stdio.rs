//! Stdio tool provider client (MCP over newline-delimited JSON-RPC 2.0).
//!
//! The provider is launched as a child process. Requests go to its stdin one
//! JSON object per line; responses are read from its stdout, skipping
//! notifications and any non-JSON noise until the matching `id` arrives.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use pulsar_core::config::McpServerConfig;
use pulsar_core::error::ToolError;
use pulsar_core::types::{CallResult, ResultContent, ToolSpec};

use super::{Connector, ToolConnection};

const PROTOCOL_VERSION: &str = "2024-11-05";

/// Per-request wait for a provider response.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ─────────────────────────────────────────────
// Connector
// ─────────────────────────────────────────────

/// Launches stdio providers and performs the initialize handshake.
#[derive(Clone, Debug)]
pub struct StdioConnector {
    request_timeout: Duration,
}

impl Default for StdioConnector {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl StdioConnector {
    pub fn with_request_timeout(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

#[async_trait]
impl Connector for StdioConnector {
    async fn connect(
        &self,
        provider_id: &str,
        config: &McpServerConfig,
    ) -> Result<Box<dyn ToolConnection>, ToolError> {
        let conn = StdioConnection::spawn(provider_id, config, self.request_timeout)?;
        if let Err(e) = conn.initialize().await {
            let _ = conn.close().await;
            return Err(ToolError::ProviderUnavailable {
                provider: provider_id.to_string(),
                reason: e.to_string(),
            });
        }
        Ok(Box::new(conn))
    }
}

// ─────────────────────────────────────────────
// Connection
// ─────────────────────────────────────────────

struct Pipes {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// A live stdio provider process.
pub struct StdioConnection {
    provider_id: String,
    child: Mutex<Child>,
    pipes: Mutex<Pipes>,
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl StdioConnection {
    /// Launch the provider process. No protocol traffic yet.
    pub fn spawn(
        provider_id: &str,
        config: &McpServerConfig,
        request_timeout: Duration,
    ) -> Result<Self, ToolError> {
        let unavailable = |reason: String| ToolError::ProviderUnavailable {
            provider: provider_id.to_string(),
            reason,
        };

        if config.command.trim().is_empty() {
            return Err(unavailable("no command configured".into()));
        }

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| unavailable(format!("failed to start '{}': {}", config.command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| unavailable("failed to open stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| unavailable("failed to open stdout".into()))?;

        debug!(provider = provider_id, command = %config.command, "Tool provider process started");

        Ok(Self {
            provider_id: provider_id.to_string(),
            child: Mutex::new(child),
            pipes: Mutex::new(Pipes {
                stdin,
                stdout: BufReader::new(stdout),
            }),
            next_id: AtomicU64::new(1),
            request_timeout,
        })
    }

    fn protocol_error(&self, message: impl Into<String>) -> ToolError {
        ToolError::Protocol {
            provider: self.provider_id.clone(),
            message: message.into(),
        }
    }

    /// `initialize` request followed by the `notifications/initialized` notification.
    pub async fn initialize(&self) -> Result<(), ToolError> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": "pulsar", "version": env!("CARGO_PKG_VERSION") }
                }),
            )
            .await?;
        debug!(
            provider = %self.provider_id,
            server = result.pointer("/serverInfo/name").and_then(serde_json::Value::as_str).unwrap_or("?"),
            "Tool provider initialized"
        );
        self.notify("notifications/initialized", json!({})).await
    }

    async fn write_line(&self, pipes: &mut Pipes, message: &Value) -> Result<(), ToolError> {
        let mut line = serde_json::to_string(message).map_err(|e| self.protocol_error(e.to_string()))?;
        line.push('\n');
        pipes.stdin.write_all(line.as_bytes()).await?;
        pipes.stdin.flush().await?;
        Ok(())
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), ToolError> {
        let mut pipes = self.pipes.lock().await;
        let message = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        self.write_line(&mut pipes, &message).await
    }

    /// Send a request and wait for the response carrying the same id.
    async fn request(&self, method: &str, params: Value) -> Result<Value, ToolError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut pipes = self.pipes.lock().await;

        let message = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        self.write_line(&mut pipes, &message).await?;

        let response = tokio::time::timeout(self.request_timeout, read_response(&mut pipes.stdout, id))
            .await
            .map_err(|_| self.protocol_error(format!("'{}' timed out", method)))??
            .ok_or_else(|| self.protocol_error("provider closed its output"))?;

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| error.to_string());
            return Err(self.protocol_error(message));
        }

        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }
}

/// Read lines until a JSON-RPC response with `id` arrives; `None` on EOF.
async fn read_response(
    stdout: &mut BufReader<ChildStdout>,
    id: u64,
) -> Result<Option<Value>, ToolError> {
    let mut line = String::new();
    loop {
        line.clear();
        if stdout.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let message: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                debug!(line = trimmed, "Ignoring non-JSON provider output");
                continue;
            }
        };
        if message.get("id").and_then(Value::as_u64) == Some(id) {
            return Ok(Some(message));
        }
    }
}

/// Map a `tools/list` entry onto a catalogue entry.
fn parse_tool(provider_id: &str, raw: &Value) -> Option<ToolSpec> {
    let name = raw.get("name")?.as_str()?.to_string();
    Some(ToolSpec {
        name,
        description: raw
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        input_schema: raw
            .get("inputSchema")
            .cloned()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
        provider_id: provider_id.to_string(),
    })
}

/// Map a `tools/call` result onto the call envelope.
///
/// Text items stay text; every other item type is kept whole as a value.
fn parse_call_result(result: &Value) -> CallResult {
    let content = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| match (item.get("type").and_then(Value::as_str), item.get("text")) {
                    (Some("text"), Some(Value::String(text))) => ResultContent::Text { text: text.clone() },
                    (Some("value"), _) => ResultContent::Value {
                        value: item.get("value").cloned().unwrap_or(Value::Null),
                    },
                    _ => ResultContent::Value { value: item.clone() },
                })
                .collect()
        })
        .unwrap_or_else(|| vec![ResultContent::Value { value: result.clone() }]);

    CallResult {
        content,
        is_error: result.get("isError").and_then(Value::as_bool).unwrap_or(false),
    }
}

#[async_trait]
impl ToolConnection for StdioConnection {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        let result = self.request("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .ok_or_else(|| self.protocol_error("tools/list returned no tools array"))?;
        Ok(tools
            .iter()
            .filter_map(|raw| parse_tool(&self.provider_id, raw))
            .collect())
    }

    async fn call_tool(&self, name: &str, args: Map<String, Value>) -> Result<CallResult, ToolError> {
        let result = self
            .request("tools/call", json!({ "name": name, "arguments": args }))
            .await?;
        Ok(parse_call_result(&result))
    }

    async fn close(&self) -> Result<(), ToolError> {
        let mut child = self.child.lock().await;
        match child.try_wait()? {
            Some(_) => Ok(()),
            None => {
                if let Err(e) = child.kill().await {
                    warn!(provider = %self.provider_id, error = %e, "Failed to kill tool provider");
                    return Err(e.into());
                }
                Ok(())
            }
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tool() {
        let raw = json!({
            "name": "get_forecast",
            "description": "Weather forecast",
            "inputSchema": {"type": "object", "properties": {"city": {"type": "string"}}}
        });
        let tool = parse_tool("weather", &raw).unwrap();
        assert_eq!(tool.name, "get_forecast");
        assert_eq!(tool.provider_id, "weather");
        assert_eq!(tool.declared_properties(), vec!["city"]);

        assert!(parse_tool("weather", &json!({"description": "nameless"})).is_none());
        let bare = parse_tool("weather", &json!({"name": "ping"})).unwrap();
        assert!(bare.declared_properties().is_empty());
    }

    #[test]
    fn test_parse_call_result() {
        let result = parse_call_result(&json!({
            "content": [
                {"type": "text", "text": "sunny"},
                {"type": "image", "data": "...", "mimeType": "image/png"}
            ],
            "isError": false
        }));
        assert_eq!(result.content.len(), 2);
        assert_eq!(result.content[0], ResultContent::Text { text: "sunny".into() });
        assert!(matches!(result.content[1], ResultContent::Value { .. }));

        let error = parse_call_result(&json!({"content": [], "isError": true}));
        assert!(error.is_error);
    }

    #[tokio::test]
    async fn test_spawn_missing_command() {
        let config = McpServerConfig {
            command: "/definitely/not/a/real/binary".into(),
            ..Default::default()
        };
        let err = StdioConnector::default()
            .connect("ghost", &config)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ToolError::ProviderUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_empty_command_is_unavailable() {
        let result = StdioConnection::spawn("empty", &McpServerConfig::default(), DEFAULT_REQUEST_TIMEOUT);
        assert!(matches!(result, Err(ToolError::ProviderUnavailable { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_handshake_against_scripted_provider() {
        // A shell script that answers initialize, tools/list and tools/call in order.
        let script = r#"
read init
echo 'starting up'
echo '{"jsonrpc":"2.0","id":1,"result":{"serverInfo":{"name":"scripted"}}}'
read initialized
read list
echo '{"jsonrpc":"2.0","method":"notifications/message","params":{}}'
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"Echo","inputSchema":{"type":"object","properties":{"q":{"type":"string"}}}}]}}'
read call
echo '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"pong"}]}}'
read done
"#;
        let config = McpServerConfig {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            ..Default::default()
        };

        let conn = StdioConnector::with_request_timeout(Duration::from_secs(5))
            .connect("scripted", &config)
            .await
            .unwrap();

        let tools = conn.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");

        let result = conn.call_tool("echo", Map::new()).await.unwrap();
        assert_eq!(result.render(), "pong");

        conn.close().await.unwrap();
    }
}
