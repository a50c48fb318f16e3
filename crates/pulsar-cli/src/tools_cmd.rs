//! `pulsar tools` — connect to the configured tool providers and list their tools.

use std::path::Path;

use anyhow::{Context, Result};
use futures_util::future::FutureExt;
use tracing::info;

use pulsar_agent::ToolProviderRegistry;
use pulsar_core::config::{load_config, McpServerConfig};
use pulsar_core::types::ToolSpec;
use pulsar_core::ExecutionBridge;

use crate::helpers;

/// Run the tools command.
pub fn run(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);
    if config.mcp_servers.is_empty() {
        println!();
        println!("  No tool providers configured (set \"mcpServers\" in the config file).");
        println!();
        return Ok(());
    }

    let bridge: ExecutionBridge<()> = ExecutionBridge::new(&config.bridge);
    bridge
        .ensure_running()
        .context("failed to start execution bridge")?;

    let servers: Vec<(String, McpServerConfig)> = config.mcp_servers.clone().into_iter().collect();
    let configured = servers.len();
    let listed = bridge.submit(move |_: &mut ()| {
        async move { collect_tools(servers).await }.boxed_local()
    });
    bridge.shutdown();

    let (connected, tools) = listed?;
    info!(configured, connected, tools = tools.len(), "Listed tools");
    println!();
    println!("  Connected to {connected} of {configured} tool providers.");
    helpers::print_tools(&tools);
    Ok(())
}

/// Connect, list, and close every provider in one pass.
async fn collect_tools(servers: Vec<(String, McpServerConfig)>) -> (usize, Vec<ToolSpec>) {
    let mut registry = ToolProviderRegistry::stdio();
    registry.load(servers);
    let connected = registry.connect_all().await;
    let tools = registry.list_tools().await.into_values().collect();
    registry.cleanup().await;
    (connected, tools)
}
