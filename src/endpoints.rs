use crate::traits::Delivery;
use crate::types::{RelayError, Result, WebhookMessage};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, error, info};
use url::Url;

pub const DISCORD_WEBHOOK_BASE: &str = "https://discord.com/api/webhooks";

/// Webhook credentials of one destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
struct EndpointFileItem {
    name: String,
    id: String,
    token: String,
}

/// Named webhook destinations; delivers documents with a JSON POST
pub struct WebhookEndpoints {
    client: Client,
    base_url: String,
    endpoints: RwLock<BTreeMap<String, Endpoint>>,
}

impl WebhookEndpoints {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, DISCORD_WEBHOOK_BASE)
    }

    pub fn with_base_url(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            endpoints: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn add(&self, name: impl Into<String>, id: impl Into<String>, token: impl Into<String>) {
        self.endpoints.write().unwrap_or_else(PoisonError::into_inner).insert(
            name.into(),
            Endpoint {
                id: id.into(),
                token: token.into(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Result<Endpoint> {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| RelayError::UnknownDestination {
                name: name.to_string(),
            })
    }

    pub fn entries(&self) -> BTreeMap<String, Endpoint> {
        self.endpoints.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Load `[{name, id, token}]` from a JSON file. Returns how many endpoints were added.
    pub async fn load_from_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        info!("Loading endpoint info from {}", path.display());
        let content = tokio::fs::read_to_string(path).await?;
        let items: Vec<EndpointFileItem> = serde_json::from_str(&content)?;
        let count = items.len();
        for item in items {
            self.add(item.name, item.id, item.token);
        }
        Ok(count)
    }

    fn webhook_url(&self, endpoint: &Endpoint) -> Result<Url> {
        let url = format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.id,
            endpoint.token
        );
        Ok(Url::parse(&url)?)
    }

    async fn post(&self, destination: &str, message: &WebhookMessage) -> Result<()> {
        let endpoint = self.get(destination)?;
        let url = self.webhook_url(&endpoint)?;
        let response = self
            .client
            .post(url)
            .header("Accept", "application/json")
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::DeliveryFailed(format!("HTTP {}: {}", status, body)));
        }
        debug!("Delivered webhook to {} ({})", destination, status);
        Ok(())
    }
}

#[async_trait]
impl Delivery for WebhookEndpoints {
    fn has_destination(&self, name: &str) -> bool {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    async fn send(&self, destination: &str, message: &WebhookMessage) {
        if let Err(e) = self.post(destination, message).await {
            error!("Failed to deliver webhook to {}: {}", destination, e);
        }
    }
}
