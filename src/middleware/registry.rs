use super::Middleware;
use crate::types::{RelayError, Result};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use tracing::info;

/// Named middleware shared between routes. Replacing an entry changes the
/// behaviour of every pipeline that refers to it by name.
#[derive(Debug, Default)]
pub struct MiddlewareRegistry {
    entries: RwLock<BTreeMap<String, Middleware>>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace in a single write
    pub fn add(&self, name: impl Into<String>, middleware: Middleware) {
        let name = name.into();
        info!("Registering middleware {} ({})", name, middleware.kind());
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, middleware);
    }

    pub fn get(&self, name: &str) -> Result<Middleware> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| RelayError::UnknownMiddleware {
                name: name.to_string(),
            })
    }

    pub fn remove(&self, name: &str) -> Option<Middleware> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Point-in-time copy of every entry
    pub fn entries(&self) -> Vec<(String, Middleware)> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, middleware)| (name.clone(), middleware.clone()))
            .collect()
    }
}
