use std::path::{Path, PathBuf};

use anyhow::Result;

/// Filename of the canonical credential blob inside the auth directory.
pub const CREDS_FILENAME: &str = "creds.json";

/// Location of the canonical credential blob.
///
/// The blob itself is opaque serialized authentication state owned by the
/// protocol library; this store only answers presence/path/content questions
/// for the backup manager and the supervisor.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    auth_dir: PathBuf,
    creds_path: PathBuf,
}

impl CredentialStore {
    /// Create a store rooted at `auth_dir`, creating the directory if absent.
    pub fn new(auth_dir: impl Into<PathBuf>) -> Result<Self> {
        let auth_dir = auth_dir.into();
        std::fs::create_dir_all(&auth_dir)?;
        let creds_path = auth_dir.join(CREDS_FILENAME);
        Ok(Self {
            auth_dir,
            creds_path,
        })
    }

    /// Whether the canonical credential blob exists on disk.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.creds_path.exists()
    }

    /// Read the blob. Returns `None` when it does not exist.
    pub async fn read(&self) -> Result<Option<Vec<u8>>> {
        let path = self.creds_path.clone();
        let data = tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>> {
            match std::fs::read(&path) {
                Ok(data) => Ok(Some(data)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await??;
        Ok(data)
    }

    /// Path of the canonical credential blob.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.creds_path
    }

    /// Directory handed to the protocol library as its auth root.
    #[must_use]
    pub fn auth_dir(&self) -> &Path {
        &self.auth_dir
    }
}
