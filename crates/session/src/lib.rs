//! Session credential lifecycle: the canonical credential blob and its
//! rotating backup set.
//!
//! The credential file is written by the protocol library on every handshake
//! and can be corrupted by a bad disconnect. [`BackupManager`] keeps the three
//! most recent snapshots and restores the newest one before a reconnect.

pub mod backup;
pub mod creds;

pub use {
    backup::{BackupEntry, BackupManager, DEFAULT_BACKUP_INTERVAL, MAX_BACKUPS},
    creds::CredentialStore,
};
