use super::{keys, load_or, Persistence};
use crate::endpoints::{Endpoint, WebhookEndpoints};
use crate::middleware::MiddlewareRegistry;
use crate::personas::{Persona, Personas};
use crate::providers::Providers;
use crate::router::{MappingRequest, Router};
use crate::serializer::{SerializedMiddleware, SerializedProvider, Serializer};
use crate::types::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

/// Stored form of one mapping. The id is informational; routes get fresh ids on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub middlewares: Vec<SerializedMiddleware>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,
}

/// Everything that is saved to and restored from the store
pub struct RelayState {
    pub personas: Arc<Personas>,
    pub endpoints: Arc<WebhookEndpoints>,
    pub registry: Arc<MiddlewareRegistry>,
    pub providers: Arc<Providers>,
    pub router: Arc<Router>,
}

pub async fn save_personas(store: &dyn Persistence, serializer: &Serializer, personas: &Personas) -> Result<()> {
    let value = serde_json::to_value(serializer.serialize_personas(personas))?;
    store.set(keys::PERSONALITIES, value).await
}

pub async fn load_personas(store: &dyn Persistence, serializer: &Serializer, personas: &Personas) -> Result<()> {
    let stored: BTreeMap<String, Persona> = load_or(store, keys::PERSONALITIES, BTreeMap::new()).await?;
    info!("Loading {} personas", stored.len());
    serializer.deserialize_personas_into(personas, &stored);
    Ok(())
}

pub async fn save_endpoints(store: &dyn Persistence, endpoints: &WebhookEndpoints) -> Result<()> {
    store.set(keys::ENDPOINTS, serde_json::to_value(endpoints.entries())?).await
}

pub async fn load_endpoints(store: &dyn Persistence, endpoints: &WebhookEndpoints) -> Result<()> {
    let stored: BTreeMap<String, Endpoint> = load_or(store, keys::ENDPOINTS, BTreeMap::new()).await?;
    info!("Loading {} endpoints", stored.len());
    for (name, endpoint) in stored {
        endpoints.add(name, endpoint.id, endpoint.token);
    }
    Ok(())
}

pub async fn save_registry(
    store: &dyn Persistence,
    serializer: &Serializer,
    registry: &MiddlewareRegistry,
) -> Result<()> {
    let entries: BTreeMap<String, SerializedMiddleware> = registry
        .entries()
        .into_iter()
        .map(|(name, middleware)| (name, serializer.serialize_middleware(&middleware)))
        .collect();
    store.set(keys::MIDDLEWARES, serde_json::to_value(entries)?).await
}

/// Registry entries may reference each other by name, so load order does not matter
pub async fn load_registry(
    store: &dyn Persistence,
    serializer: &Serializer,
    registry: &MiddlewareRegistry,
) -> Result<()> {
    let stored: BTreeMap<String, SerializedMiddleware> =
        load_or(store, keys::MIDDLEWARES, BTreeMap::new()).await?;
    info!("Loading {} registered middlewares", stored.len());
    for (name, serialized) in stored {
        registry.add(name, serializer.deserialize_middleware(&serialized)?);
    }
    Ok(())
}

pub async fn save_providers(store: &dyn Persistence, serializer: &Serializer, providers: &Providers) -> Result<()> {
    let value = serde_json::to_value(serializer.serialize_providers(providers))?;
    store.set(keys::PROVIDERS, value).await
}

pub async fn load_providers(store: &dyn Persistence, serializer: &Serializer, providers: &Providers) -> Result<()> {
    let stored: BTreeMap<String, SerializedProvider> = load_or(store, keys::PROVIDERS, BTreeMap::new()).await?;
    info!("Loading {} providers", stored.len());
    serializer.deserialize_providers_into(providers, &stored)
}

pub async fn save_mappings(store: &dyn Persistence, serializer: &Serializer, router: &Router) -> Result<()> {
    let mappings: Vec<SerializedMapping> = router
        .mappings()
        .await
        .into_iter()
        .map(|mapping| SerializedMapping {
            id: Some(mapping.id),
            source: mapping.source,
            destination: mapping.destination,
            middlewares: mapping
                .middlewares
                .iter()
                .map(|m| serializer.serialize_middleware(m))
                .collect(),
            personality: mapping.personality,
        })
        .collect();
    store.set(keys::MAPPINGS, serde_json::to_value(mappings)?).await
}

/// Re-add stored mappings. A mapping that no longer resolves is logged and
/// skipped; returns how many were restored.
pub async fn load_mappings(store: &dyn Persistence, serializer: &Serializer, router: &Router) -> Result<usize> {
    let stored: Vec<SerializedMapping> = load_or(store, keys::MAPPINGS, Vec::new()).await?;
    info!("Loading {} mappings", stored.len());

    let mut restored = 0;
    for mapping in stored {
        let middlewares = match mapping
            .middlewares
            .iter()
            .map(|m| serializer.deserialize_middleware(m))
            .collect::<Result<Vec<_>>>()
        {
            Ok(middlewares) => middlewares,
            Err(e) => {
                error!("Skipping mapping {} -> {}: {}", mapping.source, mapping.destination, e);
                continue;
            }
        };

        let mut request = MappingRequest::new(&mapping.source, &mapping.destination).with_middlewares(middlewares);
        if let Some(personality) = mapping.personality {
            request = request.with_personality(personality);
        }
        match router.add_mapping(request).await {
            Ok(_) => restored += 1,
            Err(e) => error!("Skipping mapping {} -> {}: {}", mapping.source, mapping.destination, e),
        }
    }
    Ok(restored)
}

/// Write every subsystem and flush
pub async fn save_all(store: &dyn Persistence, serializer: &Serializer, state: &RelayState) -> Result<()> {
    save_personas(store, serializer, &state.personas).await?;
    save_endpoints(store, &state.endpoints).await?;
    save_registry(store, serializer, &state.registry).await?;
    save_providers(store, serializer, &state.providers).await?;
    save_mappings(store, serializer, &state.router).await?;
    store.save().await
}

/// Restore every subsystem. Mappings go last since they resolve providers,
/// destinations and registry names.
pub async fn load_all(store: &dyn Persistence, serializer: &Serializer, state: &RelayState) -> Result<()> {
    load_personas(store, serializer, &state.personas).await?;
    load_endpoints(store, &state.endpoints).await?;
    load_registry(store, serializer, &state.registry).await?;
    load_providers(store, serializer, &state.providers).await?;
    load_mappings(store, serializer, &state.router).await?;
    Ok(())
}
