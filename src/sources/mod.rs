pub mod danbooru;
pub mod post;

pub use danbooru::{ApprovalQueueItem, DanbooruOptions, DanbooruProvider};
pub use post::PostInfo;

use crate::args::ArgType;
use crate::persistence::Persistence;
use crate::traits::{PostSource, Provider};
use crate::types::{RelayError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type ProviderFactory = Arc<dyn Fn(serde_json::Value) -> Result<Arc<dyn Provider>> + Send + Sync>;

/// Describes one constructible provider kind
#[derive(Clone)]
pub struct ProviderDescriptor {
    pub display_name: String,
    pub description: String,
    pub arguments: ArgType,
    pub factory: ProviderFactory,
}

/// Kind -> factory table used to rebuild providers from `{kind, args}`
#[derive(Clone, Default)]
pub struct ProviderCatalog {
    descriptors: BTreeMap<String, ProviderDescriptor>,
}

impl ProviderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in providers, all sharing one post source and one store
    pub fn standard(source: Arc<dyn PostSource>, persistence: Arc<dyn Persistence>) -> Self {
        let mut catalog = Self::new();
        catalog.register(
            danbooru::KIND,
            ProviderDescriptor {
                display_name: "Danbooru".to_string(),
                description: "Polls for the newest post matching a tag query".to_string(),
                arguments: DanbooruOptions::arguments(),
                factory: Arc::new(move |args| {
                    let options: DanbooruOptions = serde_json::from_value(args)?;
                    let provider = DanbooruProvider::new(options, Arc::clone(&source), Arc::clone(&persistence))?;
                    Ok(Arc::new(provider) as Arc<dyn Provider>)
                }),
            },
        );
        catalog
    }

    pub fn register(&mut self, kind: impl Into<String>, descriptor: ProviderDescriptor) {
        self.descriptors.insert(kind.into(), descriptor);
    }

    pub fn descriptor(&self, kind: &str) -> Option<&ProviderDescriptor> {
        self.descriptors.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }

    pub fn build(&self, kind: &str, args: serde_json::Value) -> Result<Arc<dyn Provider>> {
        let descriptor = self.descriptor(kind).ok_or_else(|| RelayError::UnknownProviderKind {
            kind: kind.to_string(),
        })?;
        descriptor.arguments
            .validate(&args)
            .map_err(|reason| RelayError::InvalidArguments {
                kind: kind.to_string(),
                reason,
            })?;
        (descriptor.factory)(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::Fetcher;
    use crate::persistence::MemoryStore;
    use crate::types::FetchConfig;
    use serde_json::json;

    fn catalog() -> ProviderCatalog {
        let fetcher = Fetcher::new(FetchConfig::default()).unwrap();
        ProviderCatalog::standard(Arc::new(fetcher), Arc::new(MemoryStore::new()))
    }

    #[test]
    fn builds_danbooru_provider() {
        let provider = catalog()
            .build("danbooru", json!({ "name": "tojiko", "tags": ["soga_no_tojiko"] }))
            .unwrap();
        assert_eq!(provider.name(), "tojiko");
        assert_eq!(provider.kind(), "danbooru");
        assert_eq!(provider.args()["interval_ms"], json!(120_000));
    }

    #[test]
    fn rejects_unknown_kind_and_bad_args() {
        let catalog = catalog();
        assert!(matches!(
            catalog.build("pixiv", json!({})),
            Err(RelayError::UnknownProviderKind { .. })
        ));
        assert!(matches!(
            catalog.build("danbooru", json!({ "name": "x", "tags": [], "interval_ms": 10 })),
            Err(RelayError::InvalidArguments { .. })
        ));
        assert!(matches!(
            catalog.build("danbooru", json!({ "tags": [] })),
            Err(RelayError::InvalidArguments { .. })
        ));
    }
}
