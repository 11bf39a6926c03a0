use crate::sources::post::PostInfo;
use serde::{Deserialize, Serialize};

/// Identifies the provider a packet came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub name: String,
    pub kind: String,
}

/// Raw record as returned by the source plus the normalized view of it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketMetadata {
    pub raw: serde_json::Value,
    pub info: PostInfo,
}

/// The unit that flows from a provider through middleware to a destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    pub source: SourceRef,
    pub payload: WebhookMessage,
    pub metadata: PacketMetadata,
}

impl Packet {
    pub fn new(source: SourceRef, payload: WebhookMessage, metadata: PacketMetadata) -> Self {
        Self {
            source,
            payload,
            metadata,
        }
    }

    pub fn with_payload(mut self, payload: WebhookMessage) -> Self {
        self.payload = payload;
        self
    }
}

/// Delivery document posted to a webhook endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
    pub footer: EmbedFooter,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://danbooru.donmai.us".to_string(),
            user_agent: "Booru-Relay/1.0".to_string(),
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Field {field} undefined")]
    MissingField { field: String },

    #[error("Source rejected request: {0}")]
    SourceRejected(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Middleware ({name}) was not found")]
    UnknownMiddleware { name: String },

    #[error("Provider ({name}) was not found")]
    UnknownProvider { name: String },

    #[error("Endpoint ({name}) was not found")]
    UnknownDestination { name: String },

    #[error("Mapping ({id}) was not found")]
    UnknownMapping { id: u64 },

    #[error("No such middleware type exists: {kind}")]
    UnknownMiddlewareKind { kind: String },

    #[error("No such provider type exists: {kind}")]
    UnknownProviderKind { kind: String },

    #[error("Invalid arguments for {kind}: {reason}")]
    InvalidArguments { kind: String, reason: String },

    #[error("Invalid serialization: {0}")]
    InvalidSerialization(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
