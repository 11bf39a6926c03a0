#![allow(dead_code)]

// Shared doubles for the integration tests
pub use booru_relay::persistence::MemoryStore;
pub use booru_relay::sources::{DanbooruOptions, DanbooruProvider};

use async_trait::async_trait;
use booru_relay::traits::{Delivery, PacketHandler, PostSource};
use booru_relay::{Packet, RelayError, Result, WebhookMessage};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const BASE_URL: &str = "https://booru.test";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

/// A complete, approved post with media
pub fn raw_post(id: u64) -> Value {
    json!({
        "id": id,
        "rating": "g",
        "tag_string_artist": "some_artist",
        "tag_string_character": "soga_no_tojiko",
        "tag_string_general": "1girl hat",
        "tag_string_copyright": "touhou",
        "created_at": "2024-01-01T00:00:00.000Z",
        "image_width": 800,
        "image_height": 600,
        "file_url": format!("https://cdn.test/{}.png", id),
        "preview_file_url": format!("https://cdn.test/{}_preview.jpg", id),
        "file_ext": "png",
        "file_size": 2048,
        "is_banned": false,
        "is_deleted": false,
        "is_pending": false
    })
}

pub fn with_field(mut post: Value, field: &str, value: Value) -> Value {
    post[field] = value;
    post
}

pub fn pending_post(id: u64) -> Value {
    with_field(raw_post(id), "is_pending", json!(true))
}

enum Scripted {
    Answer(Option<Value>),
    Failure,
}

/// Replays a script of "most recent" answers and serves id lookups from a table
#[derive(Default)]
pub struct ScriptedSource {
    script: Mutex<VecDeque<Scripted>>,
    posts: Mutex<HashMap<u64, Value>>,
    failing_lookups: AtomicBool,
    pub after_calls: Mutex<Vec<Option<u64>>>,
    pub id_requests: Mutex<Vec<Vec<u64>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, post: Option<Value>) {
        self.script.lock().unwrap().push_back(Scripted::Answer(post));
    }

    /// The next "most recent" request fails
    pub fn push_failure(&self) {
        self.script.lock().unwrap().push_back(Scripted::Failure);
    }

    /// Make every id lookup fail until switched back
    pub fn fail_lookups(&self, failing: bool) {
        self.failing_lookups.store(failing, Ordering::SeqCst);
    }

    pub fn id_request_count(&self) -> usize {
        self.id_requests.lock().unwrap().len()
    }

    pub fn set_post(&self, post: Value) {
        let id = post["id"].as_u64().unwrap();
        self.posts.lock().unwrap().insert(id, post);
    }

    pub fn most_recent_calls(&self) -> usize {
        self.after_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PostSource for ScriptedSource {
    fn base_url(&self) -> &str {
        BASE_URL
    }

    async fn most_recent(&self, _tags: &[String], after: Option<u64>) -> Result<Option<Value>> {
        self.after_calls.lock().unwrap().push(after);
        match self.script.lock().unwrap().pop_front() {
            Some(Scripted::Answer(post)) => Ok(post),
            Some(Scripted::Failure) => Err(RelayError::SourceRejected("scripted failure".to_string())),
            None => Ok(None),
        }
    }

    async fn posts_with_ids(&self, ids: &[u64]) -> Result<Vec<Value>> {
        self.id_requests.lock().unwrap().push(ids.to_vec());
        if self.failing_lookups.load(Ordering::SeqCst) {
            return Err(RelayError::SourceRejected("lookup unavailable".to_string()));
        }
        let posts = self.posts.lock().unwrap();
        Ok(ids.iter().filter_map(|id| posts.get(id).cloned()).collect())
    }
}

/// Collects every packet a provider emits
#[derive(Default)]
pub struct RecordingHandler {
    pub packets: Mutex<Vec<Packet>>,
}

impl RecordingHandler {
    pub fn ids(&self) -> Vec<u64> {
        self.packets
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.metadata.info.id)
            .collect()
    }
}

#[async_trait]
impl PacketHandler for RecordingHandler {
    async fn handle(&self, packet: Packet) {
        self.packets.lock().unwrap().push(packet);
    }
}

/// Records deliveries instead of posting them
pub struct RecordingDelivery {
    destinations: HashSet<String>,
    pub sent: Mutex<Vec<(String, WebhookMessage)>>,
}

impl RecordingDelivery {
    pub fn new(destinations: &[&str]) -> Self {
        Self {
            destinations: destinations.iter().map(|d| d.to_string()).collect(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn destinations_sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(d, _)| d.clone()).collect()
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    fn has_destination(&self, name: &str) -> bool {
        self.destinations.contains(name)
    }

    async fn send(&self, destination: &str, message: &WebhookMessage) {
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), message.clone()));
    }
}

pub fn provider(
    options: DanbooruOptions,
    source: &Arc<ScriptedSource>,
    store: &Arc<MemoryStore>,
) -> Arc<DanbooruProvider> {
    Arc::new(DanbooruProvider::new(options, source.clone(), store.clone()).unwrap())
}
