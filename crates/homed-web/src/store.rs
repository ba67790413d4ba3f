//! Session token and dashboard persistence.
//!
//! One JSON file holds everything the gateway remembers across restarts:
//! the set of valid auth tokens and the dashboard definitions owned by
//! the frontend. Every successful write also publishes a retained status
//! snapshot on `status/web`, so the rest of the deployment can see the
//! gateway is alive and which dashboards it carries.

use crate::bridge::BusCommand;
use homed_core::topic::STATUS_TOPIC;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct DatabaseFile {
    #[serde(default = "empty_array")]
    dashboards: Value,
    #[serde(default)]
    tokens: HashSet<String>,
}

fn empty_array() -> Value {
    Value::Array(Vec::new())
}

impl Default for DatabaseFile {
    fn default() -> Self {
        Self {
            dashboards: empty_array(),
            tokens: HashSet::new(),
        }
    }
}

/// Shared handle to the persisted gateway state.
#[derive(Debug, Clone)]
pub struct Store {
    inner: Arc<RwLock<DatabaseFile>>,
    path: PathBuf,
    commands: mpsc::UnboundedSender<BusCommand>,
}

impl Store {
    /// Load the database file; a missing or unreadable file starts empty.
    pub async fn load(path: PathBuf, commands: mpsc::UnboundedSender<BusCommand>) -> Self {
        let data = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<DatabaseFile>(&bytes) {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "database file unreadable, starting empty");
                    DatabaseFile::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no database file yet");
                DatabaseFile::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read database file, starting empty");
                DatabaseFile::default()
            }
        };

        Self {
            inner: Arc::new(RwLock::new(data)),
            path,
            commands,
        }
    }

    pub async fn contains_token(&self, token: &str) -> bool {
        self.inner.read().await.tokens.contains(token)
    }

    pub async fn insert_token(&self, token: String) {
        self.inner.write().await.tokens.insert(token);
    }

    pub async fn remove_token(&self, token: &str) {
        self.inner.write().await.tokens.remove(token);
    }

    pub async fn clear_tokens(&self) {
        self.inner.write().await.tokens.clear();
    }

    /// Replace the dashboard definitions wholesale.
    pub async fn set_dashboards(&self, dashboards: Value) {
        self.inner.write().await.dashboards = dashboards;
    }

    /// Write the database file and publish the retained status snapshot.
    ///
    /// The exclusive guard spans the write and the publish: overlapping
    /// calls serialize, and snapshots reach the disk in mutation order.
    /// Persistence is best-effort: a failed write is logged and the status
    /// publish is skipped, but the in-memory state stays authoritative.
    pub async fn store(&self) {
        let data = self.inner.write().await;
        let contents = serde_json::to_string_pretty(&*data).unwrap_or_default();

        if let Err(e) = tokio::fs::write(&self.path, contents).await {
            warn!(path = %self.path.display(), error = %e, "cannot write database file");
            return;
        }

        debug!(path = %self.path.display(), "database stored");
        let _ = self.commands.send(BusCommand::Publish {
            topic: STATUS_TOPIC.to_string(),
            payload: json!({
                "dashboards": data.dashboards,
                "timestamp": unix_time(),
                "version": env!("CARGO_PKG_VERSION"),
            }),
            retain: true,
        });
    }
}

fn unix_time() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (
        mpsc::UnboundedSender<BusCommand>,
        mpsc::UnboundedReceiver<BusCommand>,
    ) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, _rx) = channel();
        let store = Store::load(dir.path().join("web.json"), tx).await;
        assert!(!store.contains_token("anything").await);
    }

    #[tokio::test]
    async fn tokens_survive_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("web.json");

        let (tx, _rx) = channel();
        let store = Store::load(path.clone(), tx).await;
        store.insert_token("abc123".to_string()).await;
        store.store().await;

        let (tx, _rx) = channel();
        let reloaded = Store::load(path, tx).await;
        assert!(reloaded.contains_token("abc123").await);
        assert!(!reloaded.contains_token("other").await);
    }

    #[tokio::test]
    async fn remove_and_clear_tokens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, _rx) = channel();
        let store = Store::load(dir.path().join("web.json"), tx).await;

        store.insert_token("one".to_string()).await;
        store.insert_token("two".to_string()).await;
        store.remove_token("one").await;
        assert!(!store.contains_token("one").await);
        assert!(store.contains_token("two").await);

        store.clear_tokens().await;
        assert!(!store.contains_token("two").await);
    }

    #[tokio::test]
    async fn store_publishes_retained_status() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, mut rx) = channel();
        let store = Store::load(dir.path().join("web.json"), tx).await;

        store.set_dashboards(json!([{"name": "Home"}])).await;
        store.store().await;

        match rx.recv().await.expect("status command") {
            BusCommand::Publish {
                topic,
                payload,
                retain,
            } => {
                assert_eq!(topic, STATUS_TOPIC);
                assert!(retain);
                assert_eq!(payload["dashboards"], json!([{"name": "Home"}]));
                assert_eq!(payload["version"], env!("CARGO_PKG_VERSION"));
                assert!(payload["timestamp"].as_u64().is_some());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_stores_keep_the_file_intact() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("web.json");
        let (tx, _rx) = channel();
        let store = Store::load(path.clone(), tx).await;

        let mut tasks = Vec::new();
        for n in 0..24 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.insert_token(format!("token-{n:02}")).await;
                store.store().await;
            }));
        }
        for task in tasks {
            task.await.expect("join");
        }

        let bytes = tokio::fs::read(&path).await.expect("read database");
        let data: DatabaseFile = serde_json::from_slice(&bytes).expect("parseable database");
        assert_eq!(data.tokens.len(), 24);
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("web.json");
        tokio::fs::write(&path, b"{ not json")
            .await
            .expect("write fixture");

        let (tx, _rx) = channel();
        let store = Store::load(path, tx).await;
        assert!(!store.contains_token("anything").await);
    }

    #[tokio::test]
    async fn failed_write_skips_status() {
        let (tx, mut rx) = channel();
        let store = Store::load(PathBuf::from("/nonexistent/dir/web.json"), tx).await;
        store.store().await;
        assert!(rx.try_recv().is_err());
    }
}
