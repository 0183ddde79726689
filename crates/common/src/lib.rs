//! Shared types, error definitions, and utilities used across all novabot crates.

pub mod error;
pub mod types;

pub use {
    error::{Error, FromMessage, Result},
    types::{InboundMessage, MediaAttachment, ReplyPayload},
};
