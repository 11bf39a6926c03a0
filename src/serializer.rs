//! Converts live middleware trees and providers to plain tagged structures and back.
//!
//! Leaves serialize as `{kind, args}` and are rebuilt through the middleware
//! catalog; compositions keep their children so nesting survives a round trip.

use crate::middleware::{compose, compose_with_registry, Middleware, MiddlewareCatalog};
use crate::personas::{Persona, Personas};
use crate::providers::Providers;
use crate::sources::ProviderCatalog;
use crate::traits::Provider;
use crate::types::{RelayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const COMPOSED: &str = "composed";
pub const COMPOSED_WITH_REGISTRY_REFS: &str = "composed-with-registry-refs";
pub const REGISTERED: &str = "registered";
pub const IDENTITY: &str = "identity";

#[derive(Debug, Clone, PartialEq)]
pub enum SerializedMiddleware {
    Leaf { kind: String, args: Value },
    Composed { children: Vec<SerializedMiddleware> },
    ComposedWithRegistryRefs { children: Vec<SerializedMiddleware> },
    Registered { name: String },
}

/// On-disk shape shared by every variant
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializedNode {
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    children: Option<Vec<SerializedNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl From<SerializedMiddleware> for SerializedNode {
    fn from(middleware: SerializedMiddleware) -> Self {
        let node = |kind: &str| SerializedNode {
            kind: kind.to_string(),
            args: None,
            children: None,
            name: None,
        };
        match middleware {
            SerializedMiddleware::Leaf { kind, args } => SerializedNode {
                args: Some(args),
                ..node(&kind)
            },
            SerializedMiddleware::Composed { children } => SerializedNode {
                children: Some(children.into_iter().map(Into::into).collect()),
                ..node(COMPOSED)
            },
            SerializedMiddleware::ComposedWithRegistryRefs { children } => SerializedNode {
                children: Some(children.into_iter().map(Into::into).collect()),
                ..node(COMPOSED_WITH_REGISTRY_REFS)
            },
            SerializedMiddleware::Registered { name } => SerializedNode {
                name: Some(name),
                ..node(REGISTERED)
            },
        }
    }
}

impl TryFrom<SerializedNode> for SerializedMiddleware {
    type Error = RelayError;

    fn try_from(node: SerializedNode) -> Result<Self> {
        let children = |node: SerializedNode| -> Result<Vec<SerializedMiddleware>> {
            node.children
                .ok_or_else(|| RelayError::InvalidSerialization(format!("{} node without children", node.kind)))?
                .into_iter()
                .map(SerializedMiddleware::try_from)
                .collect()
        };

        match node.kind.as_str() {
            COMPOSED => Ok(SerializedMiddleware::Composed { children: children(node)? }),
            COMPOSED_WITH_REGISTRY_REFS => Ok(SerializedMiddleware::ComposedWithRegistryRefs {
                children: children(node)?,
            }),
            REGISTERED => match node.name {
                Some(name) => Ok(SerializedMiddleware::Registered { name }),
                None => Err(RelayError::InvalidSerialization(
                    "registered node without a name".to_string(),
                )),
            },
            _ => match node.args {
                Some(args) => Ok(SerializedMiddleware::Leaf { kind: node.kind, args }),
                None => Err(RelayError::InvalidSerialization(format!(
                    "{} node without args",
                    node.kind
                ))),
            },
        }
    }
}

impl Serialize for SerializedMiddleware {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        SerializedNode::from(self.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SerializedMiddleware {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let node = SerializedNode::deserialize(deserializer)?;
        SerializedMiddleware::try_from(node).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedProvider {
    pub kind: String,
    pub args: Value,
}

pub struct Serializer {
    middleware: MiddlewareCatalog,
    providers: ProviderCatalog,
}

impl Serializer {
    pub fn new(middleware: MiddlewareCatalog, providers: ProviderCatalog) -> Self {
        Self { middleware, providers }
    }

    pub fn serialize_middleware(&self, middleware: &Middleware) -> SerializedMiddleware {
        match middleware {
            Middleware::Identity => SerializedMiddleware::Leaf {
                kind: IDENTITY.to_string(),
                args: Value::Object(Default::default()),
            },
            Middleware::Filter(filter) => SerializedMiddleware::Leaf {
                kind: filter.kind().to_string(),
                args: filter.args(),
            },
            Middleware::Composed { children, .. } => SerializedMiddleware::Composed {
                children: children.iter().map(|c| self.serialize_middleware(c)).collect(),
            },
            Middleware::ComposedWithRegistry { children } => SerializedMiddleware::ComposedWithRegistryRefs {
                children: children.iter().map(|c| self.serialize_middleware(c)).collect(),
            },
            Middleware::Registered(name) => SerializedMiddleware::Registered { name: name.clone() },
        }
    }

    /// Rebuild a middleware tree. Unknown leaf kinds are an error.
    pub fn deserialize_middleware(&self, serialized: &SerializedMiddleware) -> Result<Middleware> {
        match serialized {
            SerializedMiddleware::Leaf { kind, .. } if kind == IDENTITY => Ok(Middleware::Identity),
            SerializedMiddleware::Leaf { kind, args } => self.middleware.build(kind, args.clone()),
            SerializedMiddleware::Composed { children } => Ok(compose(self.deserialize_all(children)?)),
            SerializedMiddleware::ComposedWithRegistryRefs { children } => {
                Ok(compose_with_registry(self.deserialize_all(children)?))
            }
            SerializedMiddleware::Registered { name } => Ok(Middleware::registered(name.clone())),
        }
    }

    fn deserialize_all(&self, children: &[SerializedMiddleware]) -> Result<Vec<Middleware>> {
        children.iter().map(|c| self.deserialize_middleware(c)).collect()
    }

    pub fn serialize_provider(&self, provider: &dyn Provider) -> SerializedProvider {
        SerializedProvider {
            kind: provider.kind().to_string(),
            args: provider.args(),
        }
    }

    pub fn deserialize_provider(&self, serialized: &SerializedProvider) -> Result<Arc<dyn Provider>> {
        self.providers.build(&serialized.kind, serialized.args.clone())
    }

    pub fn serialize_providers(&self, providers: &Providers) -> BTreeMap<String, SerializedProvider> {
        providers
            .entries()
            .into_iter()
            .map(|(name, provider)| (name, self.serialize_provider(provider.as_ref())))
            .collect()
    }

    pub fn deserialize_providers_into(
        &self,
        providers: &Providers,
        serialized: &BTreeMap<String, SerializedProvider>,
    ) -> Result<()> {
        for (name, provider) in serialized {
            providers.add(name.clone(), self.deserialize_provider(provider)?);
        }
        Ok(())
    }

    pub fn serialize_personas(&self, personas: &Personas) -> BTreeMap<String, Persona> {
        personas.entries()
    }

    pub fn deserialize_personas_into(&self, personas: &Personas, serialized: &BTreeMap<String, Persona>) {
        for (name, persona) in serialized {
            personas.add(name.clone(), persona.display_name.clone(), persona.avatar_url.clone());
        }
    }
}
