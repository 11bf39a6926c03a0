use crate::types::WebhookMessage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use tracing::{info, warn};

/// Display name and avatar a destination shows for a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub display_name: String,
    pub avatar_url: String,
}

#[derive(Debug, Default)]
pub struct Personas {
    persons: RwLock<BTreeMap<String, Persona>>,
}

impl Personas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, name: impl Into<String>, display_name: impl Into<String>, avatar_url: impl Into<String>) {
        let name = name.into();
        let persona = Persona {
            display_name: display_name.into(),
            avatar_url: avatar_url.into(),
        };
        info!("Persona {} added ({})", name, persona.display_name);
        self.persons
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, persona);
    }

    pub fn remove(&self, name: &str) -> Option<Persona> {
        info!("Persona {} removed", name);
        self.persons
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Persona> {
        self.persons
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn entries(&self) -> BTreeMap<String, Persona> {
        self.persons.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Stamp the persona's name and avatar on `message`. Unknown names leave it unchanged.
    pub fn decorate(&self, name: &str, mut message: WebhookMessage) -> WebhookMessage {
        let Some(persona) = self.get(name) else {
            warn!("Tried to append persona {} that does not exist", name);
            return message;
        };
        message.username = Some(persona.display_name);
        message.avatar_url = Some(persona.avatar_url);
        message
    }
}
