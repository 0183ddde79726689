//! Compiled-in command handlers.

pub mod ping;
pub mod sticker;

use std::sync::Arc;

use crate::{
    error::Result,
    registry::{HandlerMap, HandlerSource, register},
};

pub use {ping::PingHandler, sticker::StickerHandler};

/// The built-in handler set.
pub struct BuiltinHandlers;

impl HandlerSource for BuiltinHandlers {
    fn id(&self) -> &str {
        "builtin"
    }

    fn load(&self) -> Result<HandlerMap> {
        let mut map = HandlerMap::new();
        register(&mut map, Arc::new(PingHandler));
        register(&mut map, Arc::new(StickerHandler));
        Ok(map)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn builtin_set_is_not_empty() {
        let map = BuiltinHandlers.load().unwrap();
        assert!(map.contains_key("ping"));
        assert!(map.contains_key("sticker"));
        assert!(map.contains_key("s"));
    }
}
