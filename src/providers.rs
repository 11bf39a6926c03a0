use crate::traits::{PacketHandler, Provider};
use crate::types::{RelayError, Result};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{error, info};

/// Named set of providers with lifecycle control and handler wiring
#[derive(Default)]
pub struct Providers {
    providers: RwLock<BTreeMap<String, Arc<dyn Provider>>>,
}

impl Providers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        let name = name.into();
        info!("Adding provider {} ({})", name, provider.kind());
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, provider);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| RelayError::UnknownProvider {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Point-in-time copy of every provider
    pub fn entries(&self) -> Vec<(String, Arc<dyn Provider>)> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, provider)| (name.clone(), Arc::clone(provider)))
            .collect()
    }

    /// Initialize every provider concurrently. Failures are logged and returned as a count.
    pub async fn init_all(&self) -> usize {
        let entries = self.entries();
        let results = join_all(entries.iter().map(|(_, provider)| provider.init())).await;

        let mut failures = 0;
        for ((name, _), result) in entries.iter().zip(results) {
            if let Err(e) = result {
                error!("Failed to initialize provider {}: {}", name, e);
                failures += 1;
            }
        }
        failures
    }

    pub async fn start_all(&self) {
        for (_, provider) in self.entries() {
            provider.start().await;
        }
    }

    pub async fn stop_all(&self) {
        for (_, provider) in self.entries() {
            provider.stop().await;
        }
    }

    /// Register the single produce handler of `name`, replacing any previous one
    pub async fn set_handler(&self, name: &str, handler: Arc<dyn PacketHandler>) -> Result<()> {
        self.get(name)?.set_handler(Some(handler)).await;
        Ok(())
    }

    pub async fn unset_handler(&self, name: &str) -> Result<()> {
        self.get(name)?.set_handler(None).await;
        Ok(())
    }
}
