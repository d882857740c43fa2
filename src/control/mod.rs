//! Actuator commands: the shared control path and the automation loop.

pub mod rules;
pub mod service;

use async_trait::async_trait;
use serde_json::Value;

pub use service::ControlService;

/// Where device commands are published.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn publish(&self, topic: &str, payload: &Value) -> anyhow::Result<()>;
}

/// Used when no broker is configured. Every command is reported undelivered.
pub struct NullSink;

#[async_trait]
impl CommandSink for NullSink {
    async fn publish(&self, _topic: &str, _payload: &Value) -> anyhow::Result<()> {
        anyhow::bail!("no MQTT broker configured")
    }
}
