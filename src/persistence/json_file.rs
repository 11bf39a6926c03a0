use super::{get_path, set_path, Persistence};
use crate::types::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Hierarchical JSON document kept in memory and written back to a file on `save`
pub struct JsonFileStore {
    path: PathBuf,
    root: RwLock<Value>,
    // One writer of the temp file at a time
    save_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open `path`, starting from an empty document when the file does not exist yet
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let root = match tokio::fs::read_to_string(&path).await {
            Ok(content) if !content.trim().is_empty() => serde_json::from_str(&content)?,
            Ok(_) => Value::Object(Map::new()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("State file {} not found, starting empty", path.display());
                Value::Object(Map::new())
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            root: RwLock::new(root),
            save_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Persistence for JsonFileStore {
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        Ok(get_path(&*self.root.read().await, path).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        set_path(&mut *self.root.write().await, path, value)
    }

    async fn save(&self) -> Result<()> {
        let _saving = self.save_lock.lock().await;
        let content = serde_json::to_string_pretty(&*self.root.read().await)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Saved state to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn survives_reopen() {
        let path = std::env::temp_dir().join(format!("booru-relay-state-{}.json", std::process::id()));
        let _ = tokio::fs::remove_file(&path).await;

        let store = JsonFileStore::open(&path).await.unwrap();
        store.set("/providers/feed", json!({ "kind": "danbooru" })).await.unwrap();
        store.save().await.unwrap();

        let reopened = JsonFileStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.get("/providers/feed/kind").await.unwrap(),
            Some(json!("danbooru"))
        );

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_leave_a_readable_file() {
        let path = std::env::temp_dir().join(format!("booru-relay-concurrent-{}.json", std::process::id()));
        let _ = tokio::fs::remove_file(&path).await;
        let store = std::sync::Arc::new(JsonFileStore::open(&path).await.unwrap());

        let tasks: Vec<_> = (0..8)
            .map(|task| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move {
                    for round in 0..20 {
                        store
                            .set(&format!("/extra/danbooru/lastIds/feed{}", task), json!(round))
                            .await?;
                        store.save().await?;
                    }
                    Ok::<_, crate::types::RelayError>(())
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let reopened = JsonFileStore::open(&path).await.unwrap();
        for task in 0..8 {
            assert_eq!(
                reopened
                    .get(&format!("/extra/danbooru/lastIds/feed{}", task))
                    .await
                    .unwrap(),
                Some(json!(19))
            );
        }
        assert!(!path.with_extension("json.tmp").exists());

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
