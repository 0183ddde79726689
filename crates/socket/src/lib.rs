//! Session socket abstraction over the WhatsApp protocol library.
//!
//! The protocol itself lives in a Node Baileys sidecar process; this crate
//! exposes the trait seam ([`SessionSocket`] / [`SessionFactory`]) the
//! supervisor works against, and the concrete WebSocket adapter that drives
//! the sidecar.

pub mod config;
pub mod error;
pub mod handle;
pub mod process;
pub mod sidecar;
pub mod types;

pub use {
    config::{DEFAULT_SIDECAR_PORT, SessionOptions, SidecarConfig, SocketConfig},
    error::{Error, Result},
    handle::{GroupMetadataCache, SessionFactory, SessionSocket, SharedSocket},
    process::{SidecarProcess, find_sidecar_dir, start_sidecar},
    sidecar::{SidecarFactory, SidecarSocket},
    types::{ConnectionPhase, ConnectionUpdate},
};
