use super::filters::{AllowedRatingsFilter, BlockedTagsFilter, RemoveDuplicates};
use super::{AcceptedKinds, Middleware, PacketFilter};
use crate::args::ArgType;
use crate::sources::danbooru::KIND as DANBOORU;
use crate::types::{RelayError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type FilterFactory = Arc<dyn Fn(serde_json::Value) -> Result<Arc<dyn PacketFilter>> + Send + Sync>;

/// Describes one constructible middleware kind
#[derive(Clone)]
pub struct MiddlewareDescriptor {
    pub display_name: String,
    pub description: String,
    pub accepted_kinds: AcceptedKinds,
    pub arguments: ArgType,
    pub factory: FilterFactory,
}

/// Kind -> factory table used to rebuild leaf middlewares from `{kind, args}`
#[derive(Clone, Default)]
pub struct MiddlewareCatalog {
    descriptors: BTreeMap<String, MiddlewareDescriptor>,
}

impl MiddlewareCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in filters
    pub fn standard() -> Self {
        let name_only = || ArgType::object(vec![("name", ArgType::string())]);
        let with_list = |field: &str| {
            ArgType::object(vec![("name", ArgType::string()), (field, ArgType::array(ArgType::string()))])
        };

        let mut catalog = Self::new();
        catalog.register(
            RemoveDuplicates::KIND,
            MiddlewareDescriptor {
                display_name: "Remove Duplicates".to_string(),
                description: "Drops posts whose id was already seen".to_string(),
                accepted_kinds: AcceptedKinds::only([DANBOORU]),
                arguments: name_only(),
                factory: Arc::new(|args| Ok(Arc::new(RemoveDuplicates::from_args(args)?) as Arc<dyn PacketFilter>)),
            },
        );
        catalog.register(
            AllowedRatingsFilter::KIND,
            MiddlewareDescriptor {
                display_name: "Allow Ratings".to_string(),
                description: "Drops posts whose rating is not listed".to_string(),
                accepted_kinds: AcceptedKinds::only([DANBOORU]),
                arguments: with_list("ratings"),
                factory: Arc::new(|args| Ok(Arc::new(AllowedRatingsFilter::from_args(args)?) as Arc<dyn PacketFilter>)),
            },
        );
        catalog.register(
            BlockedTagsFilter::KIND,
            MiddlewareDescriptor {
                display_name: "Block Tags".to_string(),
                description: "Drops posts carrying any listed tag".to_string(),
                accepted_kinds: AcceptedKinds::only([DANBOORU]),
                arguments: with_list("tags"),
                factory: Arc::new(|args| Ok(Arc::new(BlockedTagsFilter::from_args(args)?) as Arc<dyn PacketFilter>)),
            },
        );
        catalog
    }

    pub fn register(&mut self, kind: impl Into<String>, descriptor: MiddlewareDescriptor) {
        self.descriptors.insert(kind.into(), descriptor);
    }

    pub fn descriptor(&self, kind: &str) -> Option<&MiddlewareDescriptor> {
        self.descriptors.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.descriptors.keys().map(String::as_str)
    }

    /// Construct a leaf middleware of `kind` from its constructor arguments
    pub fn build(&self, kind: &str, args: serde_json::Value) -> Result<Middleware> {
        let descriptor = self.descriptor(kind).ok_or_else(|| RelayError::UnknownMiddlewareKind {
            kind: kind.to_string(),
        })?;
        descriptor.arguments
            .validate(&args)
            .map_err(|reason| RelayError::InvalidArguments {
                kind: kind.to_string(),
                reason,
            })?;
        Ok(Middleware::Filter((descriptor.factory)(args)?))
    }
}
