use std::{
    collections::HashMap,
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::{
        RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use {serde_json::Value, tracing::warn};

use crate::error::{Context, Result};

/// One named document collection: an append-only JSONL file replayed
/// last-wins into an in-memory map.
///
/// Every `set` appends an upsert line and every `remove` appends a tombstone;
/// [`Collection::compact`] rewrites the file with one line per live document.
pub struct Collection {
    name: String,
    path: PathBuf,
    docs: RwLock<HashMap<String, Value>>,
    /// Lines appended since the last compaction.
    appended: AtomicU64,
}

impl Collection {
    /// Open the collection at `path`, replaying any existing log.
    pub async fn open(name: impl Into<String>, path: PathBuf) -> Result<Self> {
        let name = name.into();
        let load_path = path.clone();
        let docs = tokio::task::spawn_blocking(move || load(&load_path))
            .await
            .context("collection load task panicked")??;
        Ok(Self {
            name,
            path,
            docs: RwLock::new(docs),
            appended: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Value> {
        self.read_docs().get(id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read_docs().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_docs().is_empty()
    }

    /// Insert or replace a document.
    pub async fn set(&self, id: &str, doc: Value) -> Result<()> {
        let line = serde_json::to_string(&upsert_line(id, &doc))?;
        self.append(line).await?;
        self.write_docs().insert(id.to_string(), doc);
        Ok(())
    }

    /// Delete a document. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let existed = self.write_docs().remove(id).is_some();
        if existed {
            let line = serde_json::to_string(&tombstone_line(id))?;
            self.append(line).await?;
        }
        Ok(existed)
    }

    /// Whether appends have accumulated since the last compaction.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.appended.load(Ordering::Relaxed) > 0
    }

    /// Rewrite the log with one upsert line per live document.
    pub async fn compact(&self) -> Result<()> {
        let snapshot: Vec<(String, Value)> = {
            let docs = self.read_docs();
            docs.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let tmp = path.with_extension("db.tmp");
            {
                let mut file = std::fs::File::create(&tmp)?;
                for (id, doc) in &snapshot {
                    let line = serde_json::to_string(&upsert_line(id, doc))?;
                    writeln!(file, "{line}")?;
                }
                file.sync_all()?;
            }
            std::fs::rename(&tmp, &path)?;
            Ok(())
        })
        .await
        .context("compaction task panicked")??;

        self.appended.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn append(&self, line: String) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            writeln!(file, "{line}")?;
            Ok(())
        })
        .await
        .context("append task panicked")??;
        self.appended.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn read_docs(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Value>> {
        self.docs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_docs(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Value>> {
        self.docs.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn upsert_line(id: &str, doc: &Value) -> Value {
    serde_json::json!({ "_id": id, "doc": doc })
}

fn tombstone_line(id: &str) -> Value {
    serde_json::json!({ "_id": id, "deleted": true })
}

fn load(path: &Path) -> Result<HashMap<String, Value>> {
    let mut docs = HashMap::new();
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(docs),
        Err(e) => return Err(e.into()),
    };

    for line in BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let entry: Value = match serde_json::from_str(trimmed) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping malformed collection line");
                continue;
            },
        };
        let Some(id) = entry.get("_id").and_then(|v| v.as_str()) else {
            warn!(path = %path.display(), "skipping collection line without _id");
            continue;
        };
        if entry.get("deleted").and_then(|v| v.as_bool()) == Some(true) {
            docs.remove(id);
        } else if let Some(doc) = entry.get("doc") {
            docs.insert(id.to_string(), doc.clone());
        }
    }
    Ok(docs)
}
