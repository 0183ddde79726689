use {
    async_trait::async_trait,
    novabot_common::{InboundMessage, ReplyPayload},
};

use crate::registry::{CommandHandler, HandlerContext};

/// Liveness check.
pub struct PingHandler;

#[async_trait]
impl CommandHandler for PingHandler {
    fn name(&self) -> &str {
        "ping"
    }

    fn commands(&self) -> &[&str] {
        &["ping"]
    }

    fn tags(&self) -> &[&str] {
        &["info"]
    }

    async fn handle(
        &self,
        _ctx: &HandlerContext,
        _msg: &InboundMessage,
        _args: &[&str],
    ) -> anyhow::Result<ReplyPayload> {
        Ok(ReplyPayload::text("pong"))
    }
}
