pub mod json_file;
pub mod snapshots;

pub use json_file::JsonFileStore;

use crate::types::{RelayError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

/// Key namespace shared by every subsystem
pub mod keys {
    pub const PERSONALITIES: &str = "/personalities";
    pub const ENDPOINTS: &str = "/endpoints";
    pub const MIDDLEWARES: &str = "/middlewares";
    pub const MAPPINGS: &str = "/mappings";
    pub const PROVIDERS: &str = "/providers";

    pub fn last_id(provider: &str) -> String {
        format!("/extra/danbooru/lastIds/{}", provider)
    }

    pub fn approval_queue(provider: &str) -> String {
        format!("/extra/danbooru/approvalQueue/{}", provider)
    }
}

/// Async key-path store. Paths are `/`-separated, e.g. `/providers/feed`.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Replace the value at `path`, creating intermediate objects
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// Flush to the backing medium
    async fn save(&self) -> Result<()>;
}

/// Read `path` as `T`, falling back to `default` when nothing is stored
pub async fn load_or<T: DeserializeOwned>(store: &dyn Persistence, path: &str, default: T) -> Result<T> {
    match store.get(path).await? {
        Some(value) if !value.is_null() => Ok(serde_json::from_value(value)?),
        _ => Ok(default),
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

pub(crate) fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path).try_fold(root, |node, key| node.as_object()?.get(key))
}

pub(crate) fn set_path(root: &mut Value, path: &str, value: Value) -> Result<()> {
    let keys: Vec<&str> = segments(path).collect();
    let Some((last, parents)) = keys.split_last() else {
        *root = value;
        return Ok(());
    };

    let mut node = root;
    for key in parents {
        let object = node
            .as_object_mut()
            .ok_or_else(|| RelayError::Persistence(format!("{} crosses a non-object value at {}", path, key)))?;
        node = object
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let object = node
        .as_object_mut()
        .ok_or_else(|| RelayError::Persistence(format!("parent of {} is not an object", path)))?;
    object.insert(last.to_string(), value);
    Ok(())
}

/// In-memory store; `save` does nothing
pub struct MemoryStore {
    root: RwLock<Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Value::Object(Map::new())),
        }
    }

    pub fn with_root(root: Value) -> Self {
        Self {
            root: RwLock::new(root),
        }
    }

    pub async fn snapshot(&self) -> Value {
        self.root.read().await.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        Ok(get_path(&*self.root.read().await, path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        set_path(&mut *self.root.write().await, path, value)
    }

    async fn save(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn sets_and_gets_nested_paths() {
        let store = MemoryStore::new();
        store.set("/extra/danbooru/lastIds/feed", json!(7)).await.unwrap();

        assert_eq!(store.get("/extra/danbooru/lastIds/feed").await.unwrap(), Some(json!(7)));
        assert_eq!(
            store.get("/extra/danbooru/lastIds").await.unwrap(),
            Some(json!({ "feed": 7 }))
        );
        assert_eq!(store.get("/extra/missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn load_or_falls_back_to_default() {
        let store = MemoryStore::new();
        let last_id: Option<u64> = load_or(&store, "/nothing", None).await.unwrap();
        assert_eq!(last_id, None);

        store.set("/n", json!(3)).await.unwrap();
        let n: u64 = load_or(&store, "/n", 0).await.unwrap();
        assert_eq!(n, 3);
    }

    #[tokio::test]
    async fn refuses_to_descend_through_scalars() {
        let store = MemoryStore::new();
        store.set("/a", json!(1)).await.unwrap();
        assert!(store.set("/a/b", json!(2)).await.is_err());
    }

    #[test]
    fn stored_null_counts_as_missing() {
        let store = MemoryStore::with_root(json!({ "queue": null }));
        let queue: Vec<u64> = tokio_test::block_on(load_or(&store, "/queue", vec![1])).unwrap();
        assert_eq!(queue, vec![1]);
    }
}
