use crate::types::{Packet, Result, WebhookMessage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Run state of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderState {
    Idle,
    Running,
}

/// Receives every packet a provider produces
#[async_trait]
pub trait PacketHandler: Send + Sync {
    async fn handle(&self, packet: Packet);
}

/// A polled content source that emits packets to a single registered handler
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Source kind stamped on every packet, e.g. "danbooru"
    fn kind(&self) -> &str;

    /// Constructor arguments, used to serialize the provider
    fn args(&self) -> serde_json::Value;

    async fn state(&self) -> ProviderState;

    /// Load persisted state (cursor, queues)
    async fn init(&self) -> Result<()>;

    /// Begin polling. A second call while running only logs a warning.
    async fn start(&self);

    /// Stop polling. A second call while idle only logs a warning.
    async fn stop(&self);

    async fn set_handler(&self, handler: Option<Arc<dyn PacketHandler>>);
}

/// Query side of the booru API
#[async_trait]
pub trait PostSource: Send + Sync {
    /// Base URL used to build post and artist links
    fn base_url(&self) -> &str;

    /// Newest post matching `tags`, restricted to ids greater than `after` when set
    async fn most_recent(&self, tags: &[String], after: Option<u64>) -> Result<Option<serde_json::Value>>;

    /// Every post whose id is in `ids`
    async fn posts_with_ids(&self, ids: &[u64]) -> Result<Vec<serde_json::Value>>;
}

/// Outbound delivery of documents to named destinations
#[async_trait]
pub trait Delivery: Send + Sync {
    fn has_destination(&self, name: &str) -> bool;

    /// Send and log; failures are never reported back to the caller
    async fn send(&self, destination: &str, message: &WebhookMessage);
}
