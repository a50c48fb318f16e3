//! Agent session — one `AgentLoop` hosted on the execution bridge.
//!
//! The CLI is synchronous. Every interaction with the agent is submitted to
//! the bridge worker, which owns the agent for the whole session.

use anyhow::{anyhow, Context, Result};
use futures_util::future::{FutureExt, LocalBoxFuture};
use tracing::{info, warn};

use pulsar_agent::AgentLoop;
use pulsar_core::config::Config;
use pulsar_core::types::Message;
use pulsar_core::ExecutionBridge;

pub struct AgentSession {
    bridge: ExecutionBridge<Option<AgentLoop>>,
}

impl AgentSession {
    /// Start the worker and build the agent inside it.
    pub fn start(config: &Config) -> Result<Self> {
        let bridge = ExecutionBridge::new(&config.bridge);
        bridge
            .ensure_running()
            .context("failed to start execution bridge")?;

        let config = config.clone();
        let built = bridge.submit(move |slot: &mut Option<AgentLoop>| {
            async move {
                match AgentLoop::from_config(&config).await {
                    Ok(agent) => {
                        *slot = Some(agent);
                        Ok(())
                    }
                    Err(e) => Err(format!("{:#}", e)),
                }
            }
            .boxed_local()
        })?;

        if let Err(reason) = built {
            bridge.shutdown();
            return Err(anyhow!(reason)).context("failed to initialize agent");
        }
        info!("Agent session started");
        Ok(Self { bridge })
    }

    /// Run `op` against the agent on the worker and wait for its result.
    pub fn call<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut AgentLoop) -> LocalBoxFuture<'a, T> + Send + 'static,
    {
        let output = self.bridge.submit(move |slot: &mut Option<AgentLoop>| {
            async move {
                match slot.as_mut() {
                    Some(agent) => Some(op(agent).await),
                    None => None,
                }
            }
            .boxed_local()
        })?;
        output.ok_or_else(|| anyhow!("agent is not initialized"))
    }

    /// Run the reasoning loop for one query.
    pub fn query(&self, text: &str) -> Result<Vec<Message>> {
        let text = text.to_string();
        self.call(move |agent| async move { agent.process_direct(&text).await }.boxed_local())
    }

    /// Close tool providers and stop the worker.
    pub fn close(self) {
        if let Err(e) = self.call(|agent| async move { agent.cleanup().await }.boxed_local()) {
            warn!(error = %e, "Agent cleanup failed");
        }
        if !self.bridge.shutdown() {
            warn!("Execution bridge did not stop within the grace period");
        }
    }
}
