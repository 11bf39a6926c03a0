pub mod args;
pub mod endpoints;
pub mod fetcher;
pub mod middleware;
pub mod persistence;
pub mod personas;
pub mod providers;
pub mod router;
pub mod serializer;
pub mod sources;
pub mod traits;
pub mod types;
pub mod utils;

pub use endpoints::WebhookEndpoints;
pub use fetcher::Fetcher;
pub use middleware::{compose, compose_with_registry, Flow, Middleware, MiddlewareCatalog, MiddlewareRegistry};
pub use persistence::{JsonFileStore, MemoryStore, Persistence};
pub use personas::Personas;
pub use providers::Providers;
pub use router::{Mapping, MappingRequest, Router};
pub use serializer::Serializer;
pub use sources::{DanbooruOptions, DanbooruProvider, ProviderCatalog};
pub use types::*;
