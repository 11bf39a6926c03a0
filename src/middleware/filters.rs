use super::{AcceptedKinds, Flow, PacketFilter};
use crate::sources::danbooru::KIND as DANBOORU;
use crate::types::{Packet, RelayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use tracing::info;

fn parse_options<T: for<'de> Deserialize<'de>>(kind: &str, args: serde_json::Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| RelayError::InvalidArguments {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveDuplicatesOptions {
    pub name: String,
}

/// Blocks posts that have already been provided, e.g. a post matched by two
/// feeds that deliver to the same destination. Seen ids are not persisted.
#[derive(Debug)]
pub struct RemoveDuplicates {
    options: RemoveDuplicatesOptions,
    seen_ids: Mutex<HashSet<u64>>,
}

impl RemoveDuplicates {
    pub const KIND: &'static str = "remove-duplicates";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            options: RemoveDuplicatesOptions { name: name.into() },
            seen_ids: Mutex::new(HashSet::new()),
        }
    }

    pub fn from_args(args: serde_json::Value) -> Result<Self> {
        let options: RemoveDuplicatesOptions = parse_options(Self::KIND, args)?;
        Ok(Self::new(options.name))
    }
}

impl PacketFilter for RemoveDuplicates {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn accepted_kinds(&self) -> AcceptedKinds {
        AcceptedKinds::only([DANBOORU])
    }

    fn args(&self) -> serde_json::Value {
        serde_json::to_value(&self.options).unwrap_or_default()
    }

    fn process(&self, packet: Packet) -> Flow {
        info!("Running middleware {} for {}", self.options.name, packet.source.name);
        let id = packet.metadata.info.id;
        let first_time = self
            .seen_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        if !first_time {
            info!("Middleware {}: duplicate post {} found", self.options.name, id);
            return Flow::Drop;
        }
        Flow::Continue(packet)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllowedRatingsOptions {
    pub name: String,
    pub ratings: Vec<String>,
}

/// Lets through only posts whose rating is listed
#[derive(Debug)]
pub struct AllowedRatingsFilter {
    options: AllowedRatingsOptions,
}

impl AllowedRatingsFilter {
    pub const KIND: &'static str = "allowed-ratings-filter";

    pub fn new(name: impl Into<String>, ratings: Vec<String>) -> Self {
        Self {
            options: AllowedRatingsOptions {
                name: name.into(),
                ratings,
            },
        }
    }

    pub fn from_args(args: serde_json::Value) -> Result<Self> {
        let options: AllowedRatingsOptions = parse_options(Self::KIND, args)?;
        Ok(Self { options })
    }
}

impl PacketFilter for AllowedRatingsFilter {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn accepted_kinds(&self) -> AcceptedKinds {
        AcceptedKinds::only([DANBOORU])
    }

    fn args(&self) -> serde_json::Value {
        serde_json::to_value(&self.options).unwrap_or_default()
    }

    fn process(&self, packet: Packet) -> Flow {
        info!("Running middleware {} for {}", self.options.name, packet.source.name);
        let rating = &packet.metadata.info.rating;
        if !self.options.ratings.contains(rating) {
            info!(
                "Middleware {}: post {} blocked due to rating {}",
                self.options.name, packet.metadata.info.id, rating
            );
            return Flow::Drop;
        }
        Flow::Continue(packet)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedTagsOptions {
    pub name: String,
    pub tags: Vec<String>,
}

/// Drops posts carrying any blocked general tag
#[derive(Debug)]
pub struct BlockedTagsFilter {
    options: BlockedTagsOptions,
    blocked: HashSet<String>,
}

impl BlockedTagsFilter {
    pub const KIND: &'static str = "blocked-tags-filter";

    pub fn new(name: impl Into<String>, tags: Vec<String>) -> Self {
        let blocked = tags.iter().cloned().collect();
        Self {
            options: BlockedTagsOptions {
                name: name.into(),
                tags,
            },
            blocked,
        }
    }

    pub fn from_args(args: serde_json::Value) -> Result<Self> {
        let options: BlockedTagsOptions = parse_options(Self::KIND, args)?;
        Ok(Self::new(options.name, options.tags))
    }
}

impl PacketFilter for BlockedTagsFilter {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn accepted_kinds(&self) -> AcceptedKinds {
        AcceptedKinds::only([DANBOORU])
    }

    fn args(&self) -> serde_json::Value {
        serde_json::to_value(&self.options).unwrap_or_default()
    }

    fn process(&self, packet: Packet) -> Flow {
        info!("Running middleware {} for {}", self.options.name, packet.source.name);
        if let Some(tag) = packet.metadata.info.tags.iter().find(|tag| self.blocked.contains(*tag)) {
            info!("Middleware {}: blocked due to tag {}", self.options.name, tag);
            return Flow::Drop;
        }
        Flow::Continue(packet)
    }
}
