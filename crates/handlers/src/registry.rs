use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use {
    async_trait::async_trait,
    novabot_common::{InboundMessage, ReplyPayload},
    novabot_store::Database,
    tracing::{debug, info, warn},
};

use crate::error::Result;

/// Shared state handed to every handler invocation.
#[derive(Clone)]
pub struct HandlerContext {
    pub db: Arc<Database>,
    /// Command prefix, e.g. `"."`.
    pub prefix: String,
}

impl HandlerContext {
    pub fn new(db: Arc<Database>, prefix: impl Into<String>) -> Self {
        Self {
            db,
            prefix: prefix.into(),
        }
    }
}

/// One chat command.
///
/// User-facing rejections (bad input, cooldowns) are `Ok` replies; an `Err`
/// is an internal failure that is logged and produces no chat output.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handler identifier for logs.
    fn name(&self) -> &str;

    /// Command words (first is canonical, the rest aliases).
    fn commands(&self) -> &[&str];

    fn tags(&self) -> &[&str] {
        &[]
    }

    async fn handle(
        &self,
        ctx: &HandlerContext,
        msg: &InboundMessage,
        args: &[&str],
    ) -> anyhow::Result<ReplyPayload>;
}

/// Active command mapping: command word → handler.
pub type HandlerMap = HashMap<String, Arc<dyn CommandHandler>>;

/// Where handler mappings come from.
///
/// The compiled-language rendition of re-importing a handler module: a
/// rebuild produces a whole new mapping or an error.
pub trait HandlerSource: Send + Sync {
    /// Source identifier for logs.
    fn id(&self) -> &str;

    fn load(&self) -> Result<HandlerMap>;
}

/// Registry of chat command handlers with atomic snapshot replacement.
pub struct HandlerRegistry {
    source: Arc<dyn HandlerSource>,
    active: RwLock<HandlerMap>,
}

impl HandlerRegistry {
    /// Build the registry from an initial load. Unlike [`reload`], a failure
    /// here propagates: a bot with no handlers at boot is a startup failure.
    ///
    /// [`reload`]: HandlerRegistry::reload
    pub fn load(source: Arc<dyn HandlerSource>) -> Result<Self> {
        let map = source.load()?;
        info!(source = source.id(), handlers = map.len(), "handler registry loaded");
        Ok(Self {
            source,
            active: RwLock::new(map),
        })
    }

    /// Rebuild the mapping from the source.
    ///
    /// A non-empty result replaces the active snapshot atomically; an empty
    /// result or a load error keeps the previous snapshot and is only logged.
    pub fn reload(&self) {
        match self.source.load() {
            Ok(map) if !map.is_empty() => {
                let count = map.len();
                *self.write_active() = map;
                info!(source = self.source.id(), handlers = count, "handler registry reloaded");
            },
            Ok(_) => {
                warn!(
                    source = self.source.id(),
                    "handler source returned no handlers, keeping previous set"
                );
            },
            Err(e) => {
                warn!(
                    source = self.source.id(),
                    error = %e,
                    "handler reload failed, keeping previous set"
                );
            },
        }
    }

    /// Look up the handler for a command word.
    #[must_use]
    pub fn resolve(&self, command: &str) -> Option<Arc<dyn CommandHandler>> {
        self.read_active().get(command).cloned()
    }

    /// All registered command words, sorted.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        let mut commands: Vec<String> = self.read_active().keys().cloned().collect();
        commands.sort();
        commands
    }

    /// Route an inbound message to its handler, if it is a command.
    ///
    /// Returns the reply to send, or `None` for non-commands, unknown
    /// commands, empty replies, and handler failures (logged).
    pub async fn dispatch(
        &self,
        ctx: &HandlerContext,
        msg: &InboundMessage,
    ) -> Option<ReplyPayload> {
        let text = msg.text.trim();
        let rest = text.strip_prefix(&ctx.prefix)?;
        let mut words = rest.split_whitespace();
        let command = words.next()?.to_lowercase();
        let args: Vec<&str> = words.collect();

        let Some(handler) = self.resolve(&command) else {
            debug!(command, "unknown command");
            return None;
        };

        match handler.handle(ctx, msg, &args).await {
            Ok(reply) if !reply.is_empty() => Some(reply),
            Ok(_) => None,
            Err(e) => {
                warn!(handler = handler.name(), command, error = %e, "command handler failed");
                None
            },
        }
    }

    fn read_active(&self) -> std::sync::RwLockReadGuard<'_, HandlerMap> {
        self.active.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_active(&self) -> std::sync::RwLockWriteGuard<'_, HandlerMap> {
        self.active.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Insert a handler into `map` under each of its command words.
pub fn register(map: &mut HandlerMap, handler: Arc<dyn CommandHandler>) {
    for command in handler.commands() {
        map.insert((*command).to_string(), Arc::clone(&handler));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::Error;

    struct EchoHandler;

    #[async_trait]
    impl CommandHandler for EchoHandler {
        fn name(&self) -> &str {
            "echo"
        }

        fn commands(&self) -> &[&str] {
            &["echo", "say"]
        }

        async fn handle(
            &self,
            _ctx: &HandlerContext,
            _msg: &InboundMessage,
            args: &[&str],
        ) -> anyhow::Result<ReplyPayload> {
            Ok(ReplyPayload::text(args.join(" ")))
        }
    }

    /// Source whose next result is scripted by the test.
    struct ScriptedSource {
        next: Mutex<Option<Result<HandlerMap>>>,
    }

    impl ScriptedSource {
        fn new(first: Result<HandlerMap>) -> Self {
            Self {
                next: Mutex::new(Some(first)),
            }
        }

        fn script(&self, next: Result<HandlerMap>) {
            *self.next.lock().unwrap() = Some(next);
        }
    }

    impl HandlerSource for ScriptedSource {
        fn id(&self) -> &str {
            "scripted"
        }

        fn load(&self) -> Result<HandlerMap> {
            self.next
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok(HandlerMap::new()))
        }
    }

    fn echo_map() -> HandlerMap {
        let mut map = HandlerMap::new();
        register(&mut map, Arc::new(EchoHandler));
        map
    }

    async fn test_ctx() -> (tempfile::TempDir, HandlerContext) {
        let tmp = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(tmp.path()).await.unwrap());
        let ctx = HandlerContext::new(db, ".");
        (tmp, ctx)
    }

    fn message(text: &str) -> InboundMessage {
        InboundMessage {
            chat_id: "123@g.us".into(),
            sender_id: "456@s.whatsapp.net".into(),
            sender_name: None,
            text: text.into(),
            is_group: false,
            timestamp: 1_700_000_000_000,
            media: None,
        }
    }

    #[test]
    fn register_inserts_all_aliases() {
        let map = echo_map();
        assert_eq!(map.len(), 2);
        assert!(map.contains_key("echo"));
        assert!(map.contains_key("say"));
    }

    #[test]
    fn failed_reload_keeps_previous_mapping_referentially() {
        let source = Arc::new(ScriptedSource::new(Ok(echo_map())));
        let registry = HandlerRegistry::load(Arc::clone(&source) as Arc<dyn HandlerSource>).unwrap();
        let before = registry.resolve("echo").unwrap();

        source.script(Err(Error::empty_source("scripted")));
        registry.reload();

        let after = registry.resolve("echo").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn empty_reload_keeps_previous_mapping() {
        let source = Arc::new(ScriptedSource::new(Ok(echo_map())));
        let registry = HandlerRegistry::load(Arc::clone(&source) as Arc<dyn HandlerSource>).unwrap();

        source.script(Ok(HandlerMap::new()));
        registry.reload();

        assert_eq!(registry.commands(), vec!["echo", "say"]);
    }

    #[test]
    fn successful_reload_replaces_mapping() {
        let source = Arc::new(ScriptedSource::new(Ok(echo_map())));
        let registry = HandlerRegistry::load(Arc::clone(&source) as Arc<dyn HandlerSource>).unwrap();

        let mut replacement = HandlerMap::new();
        register(&mut replacement, Arc::new(EchoHandler));
        replacement.remove("say");
        source.script(Ok(replacement));
        registry.reload();

        assert_eq!(registry.commands(), vec!["echo"]);
    }

    #[test]
    fn initial_load_failure_propagates() {
        let source = Arc::new(ScriptedSource::new(Err(Error::empty_source("scripted"))));
        assert!(HandlerRegistry::load(source as Arc<dyn HandlerSource>).is_err());
    }

    #[tokio::test]
    async fn dispatch_routes_aliases_and_passes_args() {
        let (_tmp, ctx) = test_ctx().await;
        let source = Arc::new(ScriptedSource::new(Ok(echo_map())));
        let registry = HandlerRegistry::load(source as Arc<dyn HandlerSource>).unwrap();

        let reply = registry.dispatch(&ctx, &message(".say hello there")).await;
        assert_eq!(reply.unwrap().text.as_deref(), Some("hello there"));
    }

    #[tokio::test]
    async fn dispatch_ignores_non_commands_and_unknown_commands() {
        let (_tmp, ctx) = test_ctx().await;
        let source = Arc::new(ScriptedSource::new(Ok(echo_map())));
        let registry = HandlerRegistry::load(source as Arc<dyn HandlerSource>).unwrap();

        assert!(registry.dispatch(&ctx, &message("plain chatter")).await.is_none());
        assert!(registry.dispatch(&ctx, &message(".nosuch")).await.is_none());
    }
}
