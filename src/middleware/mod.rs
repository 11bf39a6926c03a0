pub mod catalog;
pub mod filters;
pub mod registry;

pub use catalog::{MiddlewareCatalog, MiddlewareDescriptor};
pub use filters::{AllowedRatingsFilter, BlockedTagsFilter, RemoveDuplicates};
pub use registry::MiddlewareRegistry;

use crate::types::{Packet, Result};
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

/// Source kinds a middleware is allowed to run against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptedKinds {
    All,
    Only(BTreeSet<String>),
}

impl AcceptedKinds {
    pub fn only<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AcceptedKinds::Only(kinds.into_iter().map(Into::into).collect())
    }

    pub fn accepts(&self, kind: &str) -> bool {
        match self {
            AcceptedKinds::All => true,
            AcceptedKinds::Only(kinds) => kinds.contains(kind),
        }
    }

    /// Intersection where `All` never narrows the result
    pub fn intersect<'a>(kinds: impl IntoIterator<Item = &'a AcceptedKinds>) -> AcceptedKinds {
        kinds.into_iter().fold(AcceptedKinds::All, |acc, next| match (acc, next) {
            (acc, AcceptedKinds::All) => acc,
            (AcceptedKinds::All, only) => only.clone(),
            (AcceptedKinds::Only(a), AcceptedKinds::Only(b)) => {
                AcceptedKinds::Only(a.intersection(b).cloned().collect())
            }
        })
    }
}

/// Outcome of running a packet through a middleware
#[derive(Debug, Clone)]
pub enum Flow {
    Continue(Packet),
    Drop,
}

impl Flow {
    pub fn into_packet(self) -> Option<Packet> {
        match self {
            Flow::Continue(packet) => Some(packet),
            Flow::Drop => None,
        }
    }

    pub fn is_drop(&self) -> bool {
        matches!(self, Flow::Drop)
    }
}

/// A leaf filter or transform
pub trait PacketFilter: Send + Sync + Debug {
    /// Catalog kind used for serialization
    fn kind(&self) -> &str;

    fn accepted_kinds(&self) -> AcceptedKinds;

    /// The exact constructor arguments
    fn args(&self) -> serde_json::Value;

    fn process(&self, packet: Packet) -> Flow;
}

#[derive(Debug, Clone)]
pub enum Middleware {
    Identity,
    Filter(Arc<dyn PacketFilter>),
    Composed {
        children: Vec<Middleware>,
        accepted: AcceptedKinds,
    },
    /// Children may be `Registered` names resolved on every run
    ComposedWithRegistry { children: Vec<Middleware> },
    /// Late-bound reference to a registry entry
    Registered(String),
}

impl Middleware {
    pub fn filter(filter: impl PacketFilter + 'static) -> Self {
        Middleware::Filter(Arc::new(filter))
    }

    pub fn registered(name: impl Into<String>) -> Self {
        Middleware::Registered(name.into())
    }

    pub fn accepted_kinds(&self) -> AcceptedKinds {
        match self {
            Middleware::Identity => AcceptedKinds::All,
            Middleware::Filter(filter) => filter.accepted_kinds(),
            Middleware::Composed { accepted, .. } => accepted.clone(),
            Middleware::ComposedWithRegistry { .. } | Middleware::Registered(_) => AcceptedKinds::All,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Middleware::Identity => "identity",
            Middleware::Filter(filter) => filter.kind(),
            Middleware::Composed { .. } => "composed",
            Middleware::ComposedWithRegistry { .. } => "composed-with-registry-refs",
            Middleware::Registered(_) => "registered",
        }
    }

    /// Run the packet through this middleware. A packet whose source kind is not
    /// accepted passes through untouched; only an explicit filter decision drops it.
    pub fn run(&self, packet: Packet, registry: &MiddlewareRegistry) -> Result<Flow> {
        if !self.accepted_kinds().accepts(&packet.source.kind) {
            debug!(
                "Skipping {} middleware for {} packet from {}",
                self.kind(),
                packet.source.kind,
                packet.source.name
            );
            return Ok(Flow::Continue(packet));
        }

        match self {
            Middleware::Identity => Ok(Flow::Continue(packet)),
            Middleware::Filter(filter) => Ok(filter.process(packet)),
            Middleware::Composed { children, .. } | Middleware::ComposedWithRegistry { children } => {
                run_chain(children, packet, registry)
            }
            Middleware::Registered(name) => registry.get(name)?.run(packet, registry),
        }
    }
}

fn run_chain(children: &[Middleware], packet: Packet, registry: &MiddlewareRegistry) -> Result<Flow> {
    let mut current = packet;
    for child in children {
        match child.run(current, registry)? {
            Flow::Continue(next) => current = next,
            Flow::Drop => return Ok(Flow::Drop),
        }
    }
    Ok(Flow::Continue(current))
}

/// Chain middlewares left to right. No middlewares gives identity and a single
/// middleware is returned unwrapped.
pub fn compose(mut middlewares: Vec<Middleware>) -> Middleware {
    match middlewares.len() {
        0 => Middleware::Identity,
        1 => middlewares.remove(0),
        _ => {
            let kinds: Vec<AcceptedKinds> = middlewares.iter().map(Middleware::accepted_kinds).collect();
            let accepted = AcceptedKinds::intersect(&kinds);
            Middleware::Composed {
                children: middlewares,
                accepted,
            }
        }
    }
}

/// Like [`compose`], but `Registered` children stay references and are looked
/// up in the registry on every run.
pub fn compose_with_registry(mut middlewares: Vec<Middleware>) -> Middleware {
    match middlewares.len() {
        0 => Middleware::Identity,
        1 => middlewares.remove(0),
        _ => Middleware::ComposedWithRegistry { children: middlewares },
    }
}
