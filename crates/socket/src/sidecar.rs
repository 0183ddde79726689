//! WebSocket adapter driving the Baileys sidecar process.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    base64::Engine as _,
    futures::{SinkExt, StreamExt, stream::SplitStream},
    novabot_common::{InboundMessage, ReplyPayload},
    tokio::{
        net::TcpStream,
        sync::{Mutex, mpsc, oneshot},
        task::JoinHandle,
    },
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
    tracing::{debug, warn},
    uuid::Uuid,
};

use crate::{
    config::{SessionOptions, SocketConfig},
    error::{Error, Result},
    handle::{GroupMetadataCache, SessionFactory, SessionSocket},
    process::{SidecarProcess, find_sidecar_dir, start_sidecar},
    types::{ConnectionUpdate, GatewayFrame, SidecarFrame},
};

const CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);
const PAIRING_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_BUFFER: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingPairing = Arc<Mutex<HashMap<String, oneshot::Sender<String>>>>;

/// A live session driven through the sidecar's WebSocket server.
pub struct SidecarSocket {
    writer: mpsc::UnboundedSender<Message>,
    updates: Option<mpsc::Receiver<ConnectionUpdate>>,
    inbound: Option<mpsc::Receiver<InboundMessage>>,
    pending_pairing: PendingPairing,
    detached: Arc<AtomicBool>,
    options: SessionOptions,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl SidecarSocket {
    /// Connect to the sidecar and start the session with the given auth state
    /// and options, seeding it with the carried-over group metadata.
    pub async fn connect(config: &SocketConfig, cache: GroupMetadataCache) -> Result<Self> {
        let url = format!("ws://127.0.0.1:{}", config.sidecar.port);
        let stream = connect_with_retry(&url, CONNECT_ATTEMPTS).await?;
        let (mut sink, reader) = stream.split();

        let (writer, mut writer_rx) = mpsc::unbounded_channel::<Message>();
        let writer_task = tokio::spawn(async move {
            while let Some(msg) = writer_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    debug!(error = %e, "sidecar write failed");
                    return;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        });

        let (updates_tx, updates_rx) = mpsc::channel(EVENT_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(EVENT_BUFFER);
        let pending_pairing: PendingPairing = Arc::new(Mutex::new(HashMap::new()));
        let detached = Arc::new(AtomicBool::new(false));

        let reader_task = tokio::spawn(read_loop(
            reader,
            writer.clone(),
            updates_tx,
            inbound_tx,
            Arc::clone(&pending_pairing),
            Arc::clone(&detached),
            Arc::clone(&cache),
        ));

        let socket = Self {
            writer,
            updates: Some(updates_rx),
            inbound: Some(inbound_rx),
            pending_pairing,
            detached,
            options: config.options.clone(),
            reader_task,
            writer_task,
        };

        socket.send_frame(&GatewayFrame::Login {
            auth_dir: config.auth_dir.display().to_string(),
            options: config.options.clone(),
            cached_group_metadata: cache_snapshot(&cache),
        })?;

        Ok(socket)
    }

    fn send_frame(&self, frame: &GatewayFrame) -> Result<()> {
        let json = serde_json::to_string(frame)?;
        self.writer
            .send(Message::Text(json.into()))
            .map_err(|_| Error::NotConnected)
    }
}

#[async_trait]
impl SessionSocket for SidecarSocket {
    fn take_updates(&mut self) -> Option<mpsc::Receiver<ConnectionUpdate>> {
        self.updates.take()
    }

    fn take_inbound(&mut self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound.take()
    }

    async fn request_pairing_code(&self, number: &str) -> Result<String> {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending_pairing
            .lock()
            .await
            .insert(request_id.clone(), tx);

        self.send_frame(&GatewayFrame::RequestPairingCode {
            request_id: request_id.clone(),
            number: number.to_string(),
        })?;

        match tokio::time::timeout(PAIRING_TIMEOUT, rx).await {
            Ok(Ok(code)) => Ok(code),
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => {
                self.pending_pairing.lock().await.remove(&request_id);
                Err(Error::timeout("pairing code request"))
            },
        }
    }

    async fn send(&self, chat_id: &str, payload: &ReplyPayload) -> Result<()> {
        self.send_frame(&GatewayFrame::Send {
            request_id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            text: payload.text.clone(),
            sticker_b64: payload
                .sticker
                .as_ref()
                .map(|data| base64::engine::general_purpose::STANDARD.encode(data)),
            pack_name: self.options.pack_name.clone(),
            author: self.options.author.clone(),
        })
    }

    fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    async fn close(&self) -> Result<()> {
        self.send_frame(&GatewayFrame::Close)
    }
}

impl Drop for SidecarSocket {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

async fn read_loop(
    mut reader: SplitStream<WsStream>,
    writer: mpsc::UnboundedSender<Message>,
    updates: mpsc::Sender<ConnectionUpdate>,
    inbound: mpsc::Sender<InboundMessage>,
    pending: PendingPairing,
    detached: Arc<AtomicBool>,
    cache: GroupMetadataCache,
) {
    loop {
        match reader.next().await {
            Some(Ok(Message::Text(text))) => {
                let frame = match serde_json::from_str::<SidecarFrame>(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "unparseable sidecar frame");
                        continue;
                    },
                };
                if detached.load(Ordering::SeqCst) {
                    continue;
                }
                handle_frame(frame, &updates, &inbound, &pending, &cache).await;
            },
            Some(Ok(Message::Ping(data))) => {
                let _ = writer.send(Message::Pong(data));
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {},
            Some(Err(e)) => {
                debug!(error = %e, "sidecar read failed");
                break;
            },
        }
    }

    // Transport to the sidecar itself is gone; surface it as a close so the
    // supervisor reconnects.
    if !detached.load(Ordering::SeqCst) {
        let _ = updates
            .send(ConnectionUpdate::close("sidecar connection lost"))
            .await;
    }
}

async fn handle_frame(
    frame: SidecarFrame,
    updates: &mpsc::Sender<ConnectionUpdate>,
    inbound: &mpsc::Sender<InboundMessage>,
    pending: &PendingPairing,
    cache: &GroupMetadataCache,
) {
    match frame {
        SidecarFrame::ConnectionUpdate {
            connection,
            last_disconnect,
        } => {
            let _ = updates
                .send(ConnectionUpdate {
                    phase: connection,
                    last_disconnect,
                })
                .await;
        },
        SidecarFrame::PairingCode { request_id, code } => {
            if let Some(tx) = pending.lock().await.remove(&request_id) {
                let _ = tx.send(code);
            }
        },
        SidecarFrame::Message { message } => {
            let _ = inbound.send(message).await;
        },
        SidecarFrame::GroupMetadata { chat_id, metadata } => {
            cache
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(chat_id, metadata);
        },
        SidecarFrame::SendResult {
            request_id,
            success,
            error,
        } => {
            if success {
                debug!(request_id, "message sent");
            } else {
                warn!(request_id, ?error, "failed to send message");
            }
        },
        SidecarFrame::Error { message } => {
            warn!(message, "sidecar reported an error");
        },
    }
}

fn cache_snapshot(cache: &GroupMetadataCache) -> HashMap<String, serde_json::Value> {
    cache.read().unwrap_or_else(|e| e.into_inner()).clone()
}

async fn connect_with_retry(url: &str, attempts: u32) -> Result<WsStream> {
    let mut last_err = None;
    for attempt in 1..=attempts {
        match connect_async(url).await {
            Ok((stream, _response)) => {
                if attempt > 1 {
                    debug!(attempt, "connected to sidecar after retry");
                }
                return Ok(stream);
            },
            Err(e) => {
                debug!(attempt, error = %e, "sidecar connect attempt failed");
                last_err = Some(e.into());
            },
        }
        tokio::time::sleep(CONNECT_RETRY_DELAY).await;
    }
    Err(last_err.unwrap_or(Error::NotConnected))
}

/// Creates [`SidecarSocket`] sessions, managing the sidecar process when
/// auto-start is enabled.
pub struct SidecarFactory {
    process: Mutex<Option<SidecarProcess>>,
}

impl SidecarFactory {
    #[must_use]
    pub fn new() -> Self {
        Self {
            process: Mutex::new(None),
        }
    }

    async fn ensure_process(&self, config: &SocketConfig) -> Result<()> {
        let mut slot = self.process.lock().await;

        if let Some(proc) = slot.as_mut() {
            if proc.is_running() {
                return Ok(());
            }
            warn!("sidecar process died, restarting");
        }

        let dir = find_sidecar_dir(config.sidecar.dir.as_deref())?;
        let proc = start_sidecar(&dir, config.sidecar.port, &config.auth_dir).await?;
        *slot = Some(proc);
        Ok(())
    }

    /// Stop the managed sidecar process, if any.
    pub async fn stop(&self) {
        let mut slot = self.process.lock().await;
        if let Some(proc) = slot.as_mut() {
            proc.stop().await;
        }
        *slot = None;
    }
}

impl Default for SidecarFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionFactory for SidecarFactory {
    async fn create(
        &self,
        config: &SocketConfig,
        cache: GroupMetadataCache,
    ) -> Result<Box<dyn SessionSocket>> {
        if config.sidecar.auto_start {
            self.ensure_process(config).await?;
        }
        let socket = SidecarSocket::connect(config, cache).await?;
        Ok(Box::new(socket))
    }
}
