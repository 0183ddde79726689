//! Store errors reuse the shared workspace error with crate-local context
//! helpers.

pub use novabot_common::Error;

pub type Result<T> = std::result::Result<T, Error>;

novabot_common::impl_context!();
