use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use {
    anyhow::Result,
    chrono::{SecondsFormat, Utc},
    tokio::{sync::Mutex, task::JoinHandle},
    tracing::{debug, warn},
};

use crate::creds::CredentialStore;

/// Maximum number of retained backup entries; oldest pruned first.
pub const MAX_BACKUPS: usize = 3;

/// Cadence of the periodic backup task.
pub const DEFAULT_BACKUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

const BACKUP_PREFIX: &str = "creds-";
const BACKUP_SUFFIX: &str = ".json";

/// One snapshot of the credential blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    /// Creation timestamp as embedded in the filename (RFC 3339 with `:` and
    /// `.` replaced by `-`; fixed width, so lexicographic order is
    /// chronological).
    pub timestamp: String,
    pub path: PathBuf,
}

/// Rotating snapshots of the credential blob.
///
/// `backup` and `restore` serialize through an internal mutex: the periodic
/// timer and the reconnect path both touch the backup directory, and the
/// prune-to-[`MAX_BACKUPS`] invariant must hold under preemptive scheduling.
pub struct BackupManager {
    store: CredentialStore,
    backup_dir: PathBuf,
    lock: Mutex<()>,
}

impl BackupManager {
    /// Create a manager writing snapshots under `backup_dir`, creating the
    /// directory if absent.
    pub fn new(store: CredentialStore, backup_dir: impl Into<PathBuf>) -> Result<Self> {
        let backup_dir = backup_dir.into();
        std::fs::create_dir_all(&backup_dir)?;
        Ok(Self {
            store,
            backup_dir,
            lock: Mutex::new(()),
        })
    }

    /// Snapshot the current credential blob, then prune to [`MAX_BACKUPS`].
    ///
    /// No-op returning `None` when no blob exists. Returns the entry created
    /// otherwise.
    pub async fn backup(&self) -> Result<Option<BackupEntry>> {
        let _guard = self.lock.lock().await;

        if !self.store.exists() {
            return Ok(None);
        }

        let src = self.store.path().to_path_buf();
        let timestamp = filename_timestamp();
        let path = self
            .backup_dir
            .join(format!("{BACKUP_PREFIX}{timestamp}{BACKUP_SUFFIX}"));
        let backup_dir = self.backup_dir.clone();

        let entry = BackupEntry { timestamp, path };
        let created = entry.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            std::fs::copy(&src, &entry.path)?;

            let mut entries = list_entries(&backup_dir)?;
            while entries.len() > MAX_BACKUPS {
                let oldest = entries.remove(0);
                match std::fs::remove_file(&oldest.path) {
                    // Already pruned by a concurrent invocation.
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {},
                    other => other?,
                }
            }
            Ok(())
        })
        .await??;

        Ok(Some(created))
    }

    /// Copy the most recent snapshot over the canonical credential blob.
    ///
    /// No-op returning `None` when no snapshots exist. Returns the entry
    /// restored otherwise.
    pub async fn restore(&self) -> Result<Option<BackupEntry>> {
        let _guard = self.lock.lock().await;

        let backup_dir = self.backup_dir.clone();
        let dest = self.store.path().to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<Option<BackupEntry>> {
            let mut entries = list_entries(&backup_dir)?;
            let Some(latest) = entries.pop() else {
                return Ok(None);
            };
            std::fs::copy(&latest.path, &dest)?;
            Ok(Some(latest))
        })
        .await?
    }

    /// Current snapshots, oldest first.
    pub fn list(&self) -> Result<Vec<BackupEntry>> {
        Ok(list_entries(&self.backup_dir)?)
    }

    /// Spawn the periodic backup task. Failures are logged, never fatal.
    pub fn spawn_periodic(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        let manager = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval fires immediately; the first backup should wait a full period
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match manager.backup().await {
                    Ok(Some(entry)) => {
                        debug!(path = %entry.path.display(), "periodic credential backup complete");
                    },
                    Ok(None) => debug!("no credential blob yet, skipping backup"),
                    Err(e) => warn!(error = %e, "periodic credential backup failed"),
                }
            }
        })
    }
}

/// High-resolution timestamp safe for filenames: RFC 3339 in UTC with
/// nanosecond precision, `:` and `.` replaced by `-`.
fn filename_timestamp() -> String {
    Utc::now()
        .to_rfc3339_opts(SecondsFormat::Nanos, true)
        .replace([':', '.'], "-")
}

fn list_entries(dir: &Path) -> io::Result<Vec<BackupEntry>> {
    let mut entries = Vec::new();
    for dir_entry in std::fs::read_dir(dir)? {
        let path = dir_entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(timestamp) = name
            .strip_prefix(BACKUP_PREFIX)
            .and_then(|rest| rest.strip_suffix(BACKUP_SUFFIX))
        else {
            continue;
        };
        entries.push(BackupEntry {
            timestamp: timestamp.to_string(),
            path,
        });
    }
    entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    Ok(entries)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn manager(tmp: &tempfile::TempDir) -> BackupManager {
        let store = CredentialStore::new(tmp.path().join("auth")).unwrap();
        BackupManager::new(store, tmp.path().join("backups")).unwrap()
    }

    fn write_creds(manager: &BackupManager, content: &str) {
        std::fs::write(manager.store.path(), content).unwrap();
    }

    #[tokio::test]
    async fn backup_is_noop_without_creds() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(&tmp);
        assert!(manager.backup().await.unwrap().is_none());
        assert!(manager.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn retention_keeps_three_newest() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(&tmp);
        write_creds(&manager, "blob");

        let mut created = Vec::new();
        for _ in 0..4 {
            created.push(manager.backup().await.unwrap().unwrap());
        }

        // Nanosecond timestamps: all four entries are distinct.
        let timestamps: Vec<_> = created.iter().map(|e| e.timestamp.clone()).collect();
        let mut deduped = timestamps.clone();
        deduped.dedup();
        assert_eq!(deduped.len(), 4);

        // After the 4th call exactly {t2, t3, t4} remain, oldest pruned.
        let remaining = manager.list().unwrap();
        assert_eq!(remaining, created[1..].to_vec());
        assert!(!created[0].path.exists());
    }

    #[tokio::test]
    async fn retention_holds_for_longer_sequences() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(&tmp);
        write_creds(&manager, "blob");

        for _ in 0..10 {
            manager.backup().await.unwrap();
            assert!(manager.list().unwrap().len() <= MAX_BACKUPS);
        }
        assert_eq!(manager.list().unwrap().len(), MAX_BACKUPS);
    }

    #[tokio::test]
    async fn restore_is_noop_without_backups() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(&tmp);
        write_creds(&manager, "original");

        assert!(manager.restore().await.unwrap().is_none());
        assert_eq!(
            std::fs::read_to_string(manager.store.path()).unwrap(),
            "original"
        );
    }

    #[tokio::test]
    async fn restore_overwrites_with_newest_backup() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(&tmp);

        write_creds(&manager, "v1");
        manager.backup().await.unwrap();
        write_creds(&manager, "v2");
        let newest = manager.backup().await.unwrap().unwrap();

        // Simulate corruption after the last snapshot.
        write_creds(&manager, "corrupt");

        let restored = manager.restore().await.unwrap().unwrap();
        assert_eq!(restored, newest);
        assert_eq!(std::fs::read_to_string(manager.store.path()).unwrap(), "v2");
    }

    #[tokio::test]
    async fn unrelated_files_are_not_backup_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(&tmp);
        write_creds(&manager, "blob");

        std::fs::write(tmp.path().join("backups").join("notes.txt"), "x").unwrap();
        std::fs::write(tmp.path().join("backups").join("creds-bad.tmp"), "x").unwrap();

        manager.backup().await.unwrap();
        assert_eq!(manager.list().unwrap().len(), 1);
    }
}
