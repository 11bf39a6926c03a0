use crate::middleware::{compose, Flow, Middleware, MiddlewareRegistry};
use crate::personas::Personas;
use crate::providers::Providers;
use crate::traits::{Delivery, PacketHandler};
use crate::types::{Packet, RelayError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{error, info};

/// Request to connect a source to a destination
#[derive(Debug, Clone)]
pub struct MappingRequest {
    pub source: String,
    pub destination: String,
    pub middlewares: Vec<Middleware>,
    pub personality: Option<String>,
}

impl MappingRequest {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            middlewares: Vec::new(),
            personality: None,
        }
    }

    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn with_middlewares(mut self, middlewares: Vec<Middleware>) -> Self {
        self.middlewares = middlewares;
        self
    }

    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = Some(personality.into());
        self
    }
}

/// A registered route. The id is assigned once and never reused.
#[derive(Debug, Clone)]
pub struct Mapping {
    pub id: u64,
    pub source: String,
    pub destination: String,
    pub middlewares: Vec<Middleware>,
    pub personality: Option<String>,
}

struct Route {
    mapping_id: u64,
    source: String,
    destination: String,
    personality: Option<String>,
    pipeline: Middleware,
    personas: Arc<Personas>,
    registry: Arc<MiddlewareRegistry>,
    delivery: Arc<dyn Delivery>,
}

impl Route {
    async fn handle(&self, mut packet: Packet) {
        // Decorate first so middleware sees the final document
        if let Some(personality) = &self.personality {
            info!("Route {}: appending persona {}", self.mapping_id, personality);
            packet.payload = self.personas.decorate(personality, std::mem::take(&mut packet.payload));
        }

        info!(
            "Route {}: sending post {} from {} through middleware",
            self.mapping_id, packet.metadata.info.id, self.source
        );
        match self.pipeline.run(packet, &self.registry) {
            Ok(Flow::Continue(packet)) => {
                info!("Route {}: sending webhook to {}", self.mapping_id, self.destination);
                self.delivery.send(&self.destination, &packet.payload).await;
            }
            Ok(Flow::Drop) => {
                info!("Route {}: packet dropped by middleware", self.mapping_id);
            }
            Err(e) => {
                error!("Route {}: middleware failed: {}", self.mapping_id, e);
            }
        }
    }
}

struct Subscriber {
    destination: String,
    mapping_id: u64,
    route: Arc<Route>,
}

type Subscriptions = Arc<RwLock<HashMap<String, Vec<Subscriber>>>>;

/// The one handler registered on a provider; re-broadcasts to every route in
/// subscription order
struct SourceDispatcher {
    source: String,
    subscriptions: Subscriptions,
}

#[async_trait]
impl PacketHandler for SourceDispatcher {
    async fn handle(&self, packet: Packet) {
        let routes: Vec<Arc<Route>> = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.source)
            .map(|subscribers| subscribers.iter().map(|s| Arc::clone(&s.route)).collect())
            .unwrap_or_default();

        for route in routes {
            route.handle(packet.clone()).await;
        }
    }
}

/// Subscribes destinations to sources through per-route middleware pipelines
pub struct Router {
    providers: Arc<Providers>,
    delivery: Arc<dyn Delivery>,
    personas: Arc<Personas>,
    registry: Arc<MiddlewareRegistry>,
    mappings: Mutex<Vec<Mapping>>,
    subscriptions: Subscriptions,
    next_id: AtomicU64,
}

impl Router {
    pub fn new(
        providers: Arc<Providers>,
        delivery: Arc<dyn Delivery>,
        personas: Arc<Personas>,
        registry: Arc<MiddlewareRegistry>,
    ) -> Self {
        Self {
            providers,
            delivery,
            personas,
            registry,
            mappings: Mutex::new(Vec::new()),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<MiddlewareRegistry> {
        &self.registry
    }

    pub async fn mappings(&self) -> Vec<Mapping> {
        self.mappings.lock().await.clone()
    }

    /// Number of routes subscribed to `source`
    pub fn subscriber_count(&self, source: &str) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .map_or(0, Vec::len)
    }

    /// Destinations subscribed to `source`, in subscription order
    pub fn subscribers(&self, source: &str) -> Vec<(u64, String)> {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .map(|subscribers| {
                subscribers
                    .iter()
                    .map(|s| (s.mapping_id, s.destination.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Top-level registry names are resolved now; references nested inside a
    /// registry-aware composition stay late-bound
    fn resolve_middlewares(&self, middlewares: &[Middleware]) -> Result<Vec<Middleware>> {
        middlewares
            .iter()
            .map(|middleware| match middleware {
                Middleware::Registered(name) => self.registry.get(name),
                other => Ok(other.clone()),
            })
            .collect()
    }

    /// Add a route and return its id
    pub async fn add_mapping(&self, request: MappingRequest) -> Result<u64> {
        let mut mappings = self.mappings.lock().await;
        info!(
            "Adding new mapping {} -> {} (persona {:?})",
            request.source, request.destination, request.personality
        );

        let provider = self.providers.get(&request.source)?;
        if !self.delivery.has_destination(&request.destination) {
            return Err(RelayError::UnknownDestination {
                name: request.destination,
            });
        }
        let pipeline = compose(self.resolve_middlewares(&request.middlewares)?);

        let mapping_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let route = Arc::new(Route {
            mapping_id,
            source: request.source.clone(),
            destination: request.destination.clone(),
            personality: request.personality.clone(),
            pipeline,
            personas: Arc::clone(&self.personas),
            registry: Arc::clone(&self.registry),
            delivery: Arc::clone(&self.delivery),
        });

        let first_subscriber = {
            let mut subscriptions = self.subscriptions.write().unwrap_or_else(PoisonError::into_inner);
            let subscribers = subscriptions.entry(request.source.clone()).or_default();
            subscribers.push(Subscriber {
                destination: request.destination.clone(),
                mapping_id,
                route,
            });
            subscribers.len() == 1
        };
        if first_subscriber {
            provider
                .set_handler(Some(Arc::new(SourceDispatcher {
                    source: request.source.clone(),
                    subscriptions: Arc::clone(&self.subscriptions),
                })))
                .await;
        }

        mappings.push(Mapping {
            id: mapping_id,
            source: request.source,
            destination: request.destination,
            middlewares: request.middlewares,
            personality: request.personality,
        });
        Ok(mapping_id)
    }

    /// Remove a route. The source's handler is unregistered with its last route.
    pub async fn remove_mapping(&self, id: u64) -> Result<Mapping> {
        let mut mappings = self.mappings.lock().await;
        let position = mappings
            .iter()
            .position(|m| m.id == id)
            .ok_or(RelayError::UnknownMapping { id })?;
        let mapping = mappings.remove(position);
        info!("Removing mapping {} ({} -> {})", id, mapping.source, mapping.destination);

        let now_empty = {
            let mut subscriptions = self.subscriptions.write().unwrap_or_else(PoisonError::into_inner);
            match subscriptions.get_mut(&mapping.source) {
                Some(subscribers) => {
                    subscribers.retain(|s| s.mapping_id != id);
                    if subscribers.is_empty() {
                        subscriptions.remove(&mapping.source);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };
        if now_empty {
            self.providers.unset_handler(&mapping.source).await?;
        }
        Ok(mapping)
    }
}
