//! `sticker` command: convert a received image into a WebP sticker.

use std::io::Cursor;

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    image::{DynamicImage, codecs::webp::WebPEncoder},
    novabot_common::{InboundMessage, MediaAttachment, ReplyPayload},
    serde_json::json,
    tracing::warn,
};

use crate::registry::{CommandHandler, HandlerContext};

/// Stickers are bounded to this square.
pub const STICKER_DIMENSION: u32 = 512;

/// Video sources longer than this are rejected.
const MAX_VIDEO_SECONDS: u32 = 11;

/// Per-user cooldown between sticker conversions.
const STICKER_COOLDOWN_MS: i64 = 10_000;

const USAGE: &str = "reply to an image (or send one with a caption) to make a sticker";

pub struct StickerHandler;

#[async_trait]
impl CommandHandler for StickerHandler {
    fn name(&self) -> &str {
        "sticker"
    }

    fn commands(&self) -> &[&str] {
        &["sticker", "s", "stiker"]
    }

    fn tags(&self) -> &[&str] {
        &["sticker"]
    }

    async fn handle(
        &self,
        ctx: &HandlerContext,
        msg: &InboundMessage,
        _args: &[&str],
    ) -> Result<ReplyPayload> {
        let users = ctx.db.users();
        let mut user = users
            .get(&msg.sender_id)
            .unwrap_or_else(|| json!({}));

        let last = user.get("last_sticker_ms").and_then(|v| v.as_i64());
        if let Some(last) = last
            && msg.timestamp - last < STICKER_COOLDOWN_MS
        {
            return Ok(ReplyPayload::text(
                "wait a few seconds before making another sticker",
            ));
        }

        let Some(media) = &msg.media else {
            return Ok(ReplyPayload::text(USAGE));
        };

        let Some(sticker) = render(media) else {
            return Ok(ReplyPayload::text(USAGE));
        };

        if let Some(obj) = user.as_object_mut() {
            obj.insert("last_sticker_ms".into(), json!(msg.timestamp));
        }
        users.set(&msg.sender_id, user).await?;

        Ok(sticker)
    }
}

/// Produce the sticker reply, or `None` when the media cannot be used (the
/// caller sends the usage hint).
fn render(media: &MediaAttachment) -> Option<ReplyPayload> {
    if media.is_video() {
        if media.seconds.unwrap_or(0) > MAX_VIDEO_SECONDS {
            return Some(ReplyPayload::text(format!(
                "the video must not be longer than {MAX_VIDEO_SECONDS} seconds"
            )));
        }
        return Some(ReplyPayload::text(
            "video stickers are not supported, send an image",
        ));
    }

    // Already a sticker-ready WebP: pass through untouched.
    if media.is_webp() {
        return Some(ReplyPayload::sticker(media.data.clone()));
    }

    if !media.is_image() {
        return None;
    }

    match convert_image(&media.data) {
        Ok(webp) => Some(ReplyPayload::sticker(webp)),
        Err(e) => {
            warn!(mime_type = %media.mime_type, error = %e, "sticker conversion failed");
            None
        },
    }
}

/// Decode, bound to [`STICKER_DIMENSION`], and re-encode as lossless WebP.
fn convert_image(data: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data).context("failed to decode image")?;

    let img = if img.width() > STICKER_DIMENSION || img.height() > STICKER_DIMENSION {
        img.resize(
            STICKER_DIMENSION,
            STICKER_DIMENSION,
            image::imageops::FilterType::Lanczos3,
        )
    } else {
        img
    };

    // WebP encoding wants RGB(A) input.
    let img = DynamicImage::ImageRgba8(img.to_rgba8());

    let mut out = Cursor::new(Vec::new());
    img.write_with_encoder(WebPEncoder::new_lossless(&mut out))
        .context("failed to encode webp")?;
    Ok(out.into_inner())
}
