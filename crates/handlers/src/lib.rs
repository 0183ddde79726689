//! Command handlers and the rebuildable handler registry.
//!
//! Handlers are compiled in; "hot reload" is a registry rebuild from a
//! [`HandlerSource`], replacing the active command mapping atomically. A
//! rebuild that fails or yields nothing keeps the previous mapping.

pub mod builtin;
pub mod error;
pub mod registry;

pub use {
    builtin::BuiltinHandlers,
    error::{Error, Result},
    registry::{CommandHandler, HandlerContext, HandlerMap, HandlerRegistry, HandlerSource},
};
