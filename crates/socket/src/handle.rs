//! The trait seam between the supervisor and the session library.

use std::{collections::HashMap, sync::Arc};

use {
    async_trait::async_trait,
    novabot_common::{InboundMessage, ReplyPayload},
    tokio::sync::mpsc,
};

use crate::{config::SocketConfig, error::Result, types::ConnectionUpdate};

/// Group metadata cached in memory and carried across reconnects.
pub type GroupMetadataCache = Arc<std::sync::RwLock<HashMap<String, serde_json::Value>>>;

/// The single live session handle slot, owned by the supervisor and exposed
/// read-only to collaborators.
pub type SharedSocket = Arc<tokio::sync::RwLock<Option<Box<dyn SessionSocket>>>>;

/// A live protocol session.
///
/// Exactly one instance exists at a time; the supervisor detaches and closes
/// it before creating a replacement.
#[async_trait]
pub trait SessionSocket: Send + Sync {
    /// Take the `connection.update` stream. Yields once.
    fn take_updates(&mut self) -> Option<mpsc::Receiver<ConnectionUpdate>>;

    /// Take the inbound-message stream. Yields once.
    fn take_inbound(&mut self) -> Option<mpsc::Receiver<InboundMessage>>;

    /// Request a pairing code for a digits-only phone number.
    async fn request_pairing_code(&self, number: &str) -> Result<String>;

    /// Send a reply payload to a chat.
    async fn send(&self, chat_id: &str, payload: &ReplyPayload) -> Result<()>;

    /// Stop event delivery. After this returns, neither stream yields again.
    fn detach(&self);

    /// Close the underlying transport. Callers treat failure as best-effort.
    async fn close(&self) -> Result<()>;
}

/// Creates session handles from configuration plus the carried-over cache.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(
        &self,
        config: &SocketConfig,
        cache: GroupMetadataCache,
    ) -> Result<Box<dyn SessionSocket>>;
}
