use std::{path::Path, sync::Arc, time::Duration};

use {
    tokio::task::JoinHandle,
    tracing::{debug, warn},
};

use crate::{collection::Collection, error::Result};

/// The named collections every bot database carries.
pub const COLLECTION_NAMES: [&str; 6] = ["users", "chats", "settings", "msgs", "sticker", "stats"];

/// Cadence of the autocompaction task.
pub const DEFAULT_COMPACTION_INTERVAL: Duration = Duration::from_millis(300_000);

/// The bot's document database: one [`Collection`] per name in
/// [`COLLECTION_NAMES`], autoloaded on open.
pub struct Database {
    users: Arc<Collection>,
    chats: Arc<Collection>,
    settings: Arc<Collection>,
    msgs: Arc<Collection>,
    sticker: Arc<Collection>,
    stats: Arc<Collection>,
}

impl Database {
    /// Open (autoload) all collections under `dir`, creating it if absent.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let open = |name: &'static str| Collection::open(name, dir.join(format!("{name}.db")));
        let [users, chats, settings, msgs, sticker, stats] = COLLECTION_NAMES;
        Ok(Self {
            users: Arc::new(open(users).await?),
            chats: Arc::new(open(chats).await?),
            settings: Arc::new(open(settings).await?),
            msgs: Arc::new(open(msgs).await?),
            sticker: Arc::new(open(sticker).await?),
            stats: Arc::new(open(stats).await?),
        })
    }

    #[must_use]
    pub fn users(&self) -> &Arc<Collection> {
        &self.users
    }

    #[must_use]
    pub fn chats(&self) -> &Arc<Collection> {
        &self.chats
    }

    #[must_use]
    pub fn settings(&self) -> &Arc<Collection> {
        &self.settings
    }

    #[must_use]
    pub fn msgs(&self) -> &Arc<Collection> {
        &self.msgs
    }

    #[must_use]
    pub fn sticker(&self) -> &Arc<Collection> {
        &self.sticker
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<Collection> {
        &self.stats
    }

    fn all(&self) -> [&Arc<Collection>; 6] {
        [
            &self.users,
            &self.chats,
            &self.settings,
            &self.msgs,
            &self.sticker,
            &self.stats,
        ]
    }

    /// Compact every dirty collection. Used by the autocompaction task and by
    /// graceful shutdown.
    pub async fn flush_all(&self) -> Result<()> {
        for collection in self.all() {
            if collection.is_dirty() {
                collection.compact().await?;
                debug!(collection = collection.name(), "collection compacted");
            }
        }
        Ok(())
    }

    /// Spawn the autocompaction task. Failures are logged, never fatal.
    pub fn spawn_autocompaction(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        let db = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = db.flush_all().await {
                    warn!(error = %e, "autocompaction failed");
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, serde_json::json};

    #[tokio::test]
    async fn open_creates_all_collections() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Database::open(tmp.path().join("database")).await.unwrap();

        db.users().set("u1", json!({"name": "ada"})).await.unwrap();
        db.stats().set("hits", json!({"n": 1})).await.unwrap();

        let reopened = Database::open(tmp.path().join("database")).await.unwrap();
        assert_eq!(reopened.users().get("u1"), Some(json!({"name": "ada"})));
        assert!(reopened.chats().is_empty());
    }

    #[tokio::test]
    async fn flush_all_compacts_dirty_collections() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Database::open(tmp.path()).await.unwrap();

        for i in 0..5 {
            db.settings().set("mode", json!({"i": i})).await.unwrap();
        }
        assert!(db.settings().is_dirty());

        db.flush_all().await.unwrap();
        assert!(!db.settings().is_dirty());
        assert_eq!(db.settings().get("mode"), Some(json!({"i": 4})));
    }
}
