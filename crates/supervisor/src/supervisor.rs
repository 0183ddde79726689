use std::{
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    anyhow::{Result, bail},
    novabot_handlers::{HandlerContext, HandlerRegistry},
    novabot_session::{BackupManager, CredentialStore},
    novabot_socket::{
        ConnectionPhase, ConnectionUpdate, GroupMetadataCache, SessionFactory, SharedSocket,
        SocketConfig,
    },
    tokio::sync::mpsc,
    tracing::{debug, error, info, warn},
};

use crate::pairing::{PAIRING_DELAY, format_pairing_code, normalize_number};

/// Tunables for the reconnect loop and the pairing bootstrap.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Phone number for pairing-code bootstrap; QR login when unset.
    pub phone_number: Option<String>,
    /// Settle time before the pairing-code request.
    pub pairing_delay: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Circuit breaker: abort after this many closes without an open.
    pub max_consecutive_failures: u32,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            phone_number: None,
            pairing_delay: PAIRING_DELAY,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_consecutive_failures: 20,
        }
    }
}

/// Connection lifecycle state, cycling
/// `Disconnected → Connecting → Connected → Closing → Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Owns the single live session handle and drives the reconnect cycle.
///
/// On a reported close the supervisor restores the newest credential backup,
/// rebuilds the handler registry, tears the old handle down (listeners
/// detached first, socket closed best-effort), and creates a replacement
/// carrying the group-metadata cache forward.
pub struct ConnectionSupervisor {
    factory: Arc<dyn SessionFactory>,
    config: SocketConfig,
    creds: CredentialStore,
    backups: Arc<BackupManager>,
    registry: Arc<HandlerRegistry>,
    handler_ctx: HandlerContext,
    options: SupervisorOptions,
    shared: SharedSocket,
    cache: GroupMetadataCache,
    state: RwLock<SupervisorState>,
    pairing_started: AtomicBool,
}

impl ConnectionSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        config: SocketConfig,
        creds: CredentialStore,
        backups: Arc<BackupManager>,
        registry: Arc<HandlerRegistry>,
        handler_ctx: HandlerContext,
        options: SupervisorOptions,
    ) -> Self {
        Self {
            factory,
            config,
            creds,
            backups,
            registry,
            handler_ctx,
            options,
            shared: Arc::new(tokio::sync::RwLock::new(None)),
            cache: Arc::new(RwLock::new(std::collections::HashMap::new())),
            state: RwLock::new(SupervisorState::Disconnected),
            pairing_started: AtomicBool::new(false),
        }
    }

    /// The live session handle slot. Collaborators read it; only the
    /// supervisor writes it.
    #[must_use]
    pub fn shared_socket(&self) -> SharedSocket {
        Arc::clone(&self.shared)
    }

    /// The group-metadata cache carried across reconnects.
    #[must_use]
    pub fn group_cache(&self) -> GroupMetadataCache {
        Arc::clone(&self.cache)
    }

    #[must_use]
    pub fn state(&self) -> SupervisorState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Run the connect/supervise/reconnect cycle until the circuit breaker
    /// trips or the task is cancelled.
    pub async fn run(&self) -> Result<()> {
        let mut backoff = self.options.initial_backoff;
        let mut consecutive_failures: u32 = 0;
        let mut first_attempt = true;

        loop {
            if !first_attempt {
                let delay = with_jitter(backoff);
                info!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");
                tokio::time::sleep(delay).await;
            }
            first_attempt = false;

            self.set_state(SupervisorState::Connecting);
            let mut updates = match self.start_session().await {
                Ok(updates) => updates,
                Err(e) => {
                    error!(error = %e, "failed to create session");
                    consecutive_failures += 1;
                    if consecutive_failures >= self.options.max_consecutive_failures {
                        self.set_state(SupervisorState::Disconnected);
                        bail!(
                            "giving up after {consecutive_failures} consecutive connection failures"
                        );
                    }
                    backoff = next_backoff(backoff, self.options.max_backoff);
                    continue;
                },
            };

            self.maybe_start_pairing();

            let opened = self.drive(&mut updates).await;

            self.set_state(SupervisorState::Closing);
            if opened {
                consecutive_failures = 0;
                backoff = self.options.initial_backoff;
            } else {
                consecutive_failures += 1;
                if consecutive_failures >= self.options.max_consecutive_failures {
                    self.teardown_session().await;
                    self.set_state(SupervisorState::Disconnected);
                    bail!(
                        "giving up after {consecutive_failures} consecutive connection failures"
                    );
                }
                backoff = next_backoff(backoff, self.options.max_backoff);
            }

            // The blob may have been corrupted by the dying session; put the
            // newest snapshot back before retrying.
            match self.backups.restore().await {
                Ok(Some(entry)) => {
                    info!(backup = %entry.path.display(), "credentials restored from backup");
                },
                Ok(None) => debug!("no credential backups to restore"),
                Err(e) => warn!(error = %e, "credential restore failed"),
            }

            self.registry.reload();

            self.teardown_session().await;
            self.set_state(SupervisorState::Disconnected);
        }
    }

    /// Create a session from the current credentials and install it into the
    /// shared slot, wiring the inbound stream to the dispatcher.
    async fn start_session(&self) -> Result<mpsc::Receiver<ConnectionUpdate>> {
        let mut socket = self
            .factory
            .create(&self.config, Arc::clone(&self.cache))
            .await?;

        let updates = match socket.take_updates() {
            Some(updates) => updates,
            None => bail!("session socket yielded no update stream"),
        };
        if let Some(inbound) = socket.take_inbound() {
            self.spawn_dispatch(inbound);
        }

        *self.shared.write().await = Some(socket);
        Ok(updates)
    }

    fn spawn_dispatch(&self, mut inbound: mpsc::Receiver<novabot_common::InboundMessage>) {
        let registry = Arc::clone(&self.registry);
        let ctx = self.handler_ctx.clone();
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            while let Some(msg) = inbound.recv().await {
                let Some(reply) = registry.dispatch(&ctx, &msg).await else {
                    continue;
                };
                let slot = shared.read().await;
                let Some(socket) = slot.as_ref() else {
                    continue;
                };
                if let Err(e) = socket.send(&msg.chat_id, &reply).await {
                    warn!(chat_id = %msg.chat_id, error = %e, "failed to send reply");
                }
            }
        });
    }

    /// Consume connection updates until the session reports a close.
    /// Returns whether an open was seen first.
    async fn drive(&self, updates: &mut mpsc::Receiver<ConnectionUpdate>) -> bool {
        let mut opened = false;
        while let Some(update) = updates.recv().await {
            match update.phase {
                ConnectionPhase::Connecting => debug!("session connecting"),
                ConnectionPhase::Open => {
                    opened = true;
                    self.set_state(SupervisorState::Connected);
                    info!("connection open");
                },
                ConnectionPhase::Close => {
                    warn!(
                        reason = update.last_disconnect.as_deref().unwrap_or("unknown"),
                        "connection closed"
                    );
                    return opened;
                },
            }
        }
        debug!("update stream ended without a close event");
        opened
    }

    /// Detach and close the old handle. Close failures are swallowed: the
    /// socket may already be gone, and teardown must never block reconnect.
    async fn teardown_session(&self) {
        let mut slot = self.shared.write().await;
        if let Some(socket) = slot.take() {
            socket.detach();
            if let Err(e) = socket.close().await {
                debug!(error = %e, "socket close failed (ignored)");
            }
        }
    }

    /// One-time bootstrap when no credential blob exists at startup: request
    /// and display a pairing code, or point at the QR code.
    fn maybe_start_pairing(&self) {
        if self.creds.exists() || self.pairing_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let Some(number) = self.options.phone_number.clone() else {
            info!("no credentials yet, scan the QR code to link this bot");
            return;
        };

        let shared = Arc::clone(&self.shared);
        let delay = self.options.pairing_delay;
        tokio::spawn(async move {
            if let Some(code) = request_pairing_code(shared, &number, delay).await {
                info!(code = %code, "pairing code, enter it on the linked phone");
            }
        });
    }

    fn set_state(&self, next: SupervisorState) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if *state != next {
            debug!(from = ?*state, to = ?next, "connection state");
            *state = next;
        }
    }
}

/// Wait for the session to initialize, then request and format a pairing
/// code. Failures are logged and produce no code; the operator retries by
/// restarting.
async fn request_pairing_code(
    shared: SharedSocket,
    number: &str,
    delay: Duration,
) -> Option<String> {
    tokio::time::sleep(delay).await;
    let number = normalize_number(number);

    let slot = shared.read().await;
    let socket = slot.as_ref()?;
    match socket.request_pairing_code(&number).await {
        Ok(code) => Some(format_pairing_code(&code)),
        Err(e) => {
            warn!(error = %e, "pairing code request failed");
            None
        },
    }
}

/// Doubling backoff, bounded by `max`.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// Spread reconnect delays by ±50% to avoid synchronized retry storms.
fn with_jitter(base: Duration) -> Duration {
    use rand::Rng;
    let base_ms = base.as_millis() as u64;
    let spread = base_ms / 2;
    let jitter = rand::rng().random_range(0..=spread * 2);
    Duration::from_millis(base_ms - spread + jitter)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering as AtomicOrdering},
    };

    use {
        async_trait::async_trait,
        novabot_common::{InboundMessage, ReplyPayload},
        novabot_handlers::{CommandHandler, HandlerMap, HandlerSource, registry::register},
        novabot_socket::SessionSocket,
        novabot_store::Database,
    };

    use super::*;

    type EventLog = Arc<Mutex<Vec<String>>>;

    struct MockSocket {
        id: usize,
        log: EventLog,
        updates: Option<mpsc::Receiver<ConnectionUpdate>>,
        pairing_calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SessionSocket for MockSocket {
        fn take_updates(&mut self) -> Option<mpsc::Receiver<ConnectionUpdate>> {
            self.updates.take()
        }

        fn take_inbound(&mut self) -> Option<mpsc::Receiver<InboundMessage>> {
            None
        }

        async fn request_pairing_code(&self, number: &str) -> novabot_socket::Result<String> {
            self.pairing_calls.lock().unwrap().push(number.to_string());
            Ok("K1DX9PZQ".into())
        }

        async fn send(
            &self,
            _chat_id: &str,
            _payload: &ReplyPayload,
        ) -> novabot_socket::Result<()> {
            Ok(())
        }

        fn detach(&self) {
            self.log.lock().unwrap().push(format!("detach:{}", self.id));
        }

        async fn close(&self) -> novabot_socket::Result<()> {
            self.log.lock().unwrap().push(format!("close:{}", self.id));
            // Close errors must be swallowed by the supervisor.
            Err(novabot_socket::Error::NotConnected)
        }
    }

    struct MockFactory {
        log: EventLog,
        update_senders: Arc<Mutex<Vec<mpsc::Sender<ConnectionUpdate>>>>,
        pairing_calls: Arc<Mutex<Vec<String>>>,
        counter: AtomicUsize,
        fail: bool,
    }

    impl MockFactory {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                log: Arc::new(Mutex::new(Vec::new())),
                update_senders: Arc::new(Mutex::new(Vec::new())),
                pairing_calls: Arc::new(Mutex::new(Vec::new())),
                counter: AtomicUsize::new(0),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                log: Arc::new(Mutex::new(Vec::new())),
                update_senders: Arc::new(Mutex::new(Vec::new())),
                pairing_calls: Arc::new(Mutex::new(Vec::new())),
                counter: AtomicUsize::new(0),
                fail: true,
            })
        }

        fn events(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn sender(&self, index: usize) -> mpsc::Sender<ConnectionUpdate> {
            self.update_senders.lock().unwrap()[index].clone()
        }
    }

    #[async_trait]
    impl SessionFactory for MockFactory {
        async fn create(
            &self,
            _config: &SocketConfig,
            _cache: GroupMetadataCache,
        ) -> novabot_socket::Result<Box<dyn SessionSocket>> {
            if self.fail {
                return Err(novabot_socket::Error::NotConnected);
            }
            let id = self.counter.fetch_add(1, AtomicOrdering::SeqCst) + 1;
            self.log.lock().unwrap().push(format!("create:{id}"));
            let (tx, rx) = mpsc::channel(8);
            self.update_senders.lock().unwrap().push(tx);
            Ok(Box::new(MockSocket {
                id,
                log: Arc::clone(&self.log),
                updates: Some(rx),
                pairing_calls: Arc::clone(&self.pairing_calls),
            }))
        }
    }

    struct NoopHandler;

    #[async_trait]
    impl CommandHandler for NoopHandler {
        fn name(&self) -> &str {
            "noop"
        }

        fn commands(&self) -> &[&str] {
            &["noop"]
        }

        async fn handle(
            &self,
            _ctx: &HandlerContext,
            _msg: &InboundMessage,
            _args: &[&str],
        ) -> Result<ReplyPayload> {
            Ok(ReplyPayload::default())
        }
    }

    /// Source that records the credential file content seen at each load, so
    /// tests can prove restore ran before the registry rebuild.
    struct ReloadProbe {
        creds_path: std::path::PathBuf,
        loads: Arc<Mutex<Vec<String>>>,
    }

    impl HandlerSource for ReloadProbe {
        fn id(&self) -> &str {
            "probe"
        }

        fn load(&self) -> novabot_handlers::Result<HandlerMap> {
            let content = std::fs::read_to_string(&self.creds_path).unwrap_or_default();
            self.loads.lock().unwrap().push(content);
            let mut map = HandlerMap::new();
            register(&mut map, Arc::new(NoopHandler));
            Ok(map)
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        supervisor: Arc<ConnectionSupervisor>,
        factory: Arc<MockFactory>,
        loads: Arc<Mutex<Vec<String>>>,
    }

    async fn fixture(factory: Arc<MockFactory>, options: SupervisorOptions) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let creds = CredentialStore::new(tmp.path().join("auth")).unwrap();
        let backups =
            Arc::new(BackupManager::new(creds.clone(), tmp.path().join("backups")).unwrap());

        let loads = Arc::new(Mutex::new(Vec::new()));
        let probe = Arc::new(ReloadProbe {
            creds_path: creds.path().to_path_buf(),
            loads: Arc::clone(&loads),
        });
        let registry = Arc::new(HandlerRegistry::load(probe as Arc<dyn HandlerSource>).unwrap());

        let db = Arc::new(Database::open(tmp.path().join("database")).await.unwrap());
        let handler_ctx = HandlerContext::new(db, ".");

        let supervisor = Arc::new(ConnectionSupervisor::new(
            Arc::clone(&factory) as Arc<dyn SessionFactory>,
            SocketConfig::default(),
            creds,
            backups,
            registry,
            handler_ctx,
            options,
        ));

        Fixture {
            _tmp: tmp,
            supervisor,
            factory,
            loads,
        }
    }

    fn fast_options() -> SupervisorOptions {
        SupervisorOptions {
            phone_number: None,
            pairing_delay: Duration::from_millis(20),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            max_consecutive_failures: 3,
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn disconnect_restores_reloads_then_rebuilds_in_order() {
        let fx = fixture(MockFactory::new(), fast_options()).await;

        // Seed a known-good backup, then corrupt the canonical blob.
        let creds_path = {
            let path = fx.supervisor.creds.path().to_path_buf();
            std::fs::write(&path, "good").unwrap();
            fx.supervisor.backups.backup().await.unwrap();
            std::fs::write(&path, "corrupt").unwrap();
            path
        };

        let supervisor = Arc::clone(&fx.supervisor);
        let run = tokio::spawn(async move { supervisor.run().await });

        let factory = Arc::clone(&fx.factory);
        wait_until(|| factory.events().contains(&"create:1".to_string())).await;

        // Simulated handshake, then a disconnect.
        let sender = fx.factory.sender(0);
        sender.send(ConnectionUpdate::open()).await.unwrap();
        wait_until(|| fx.supervisor.state() == SupervisorState::Connected).await;
        sender
            .send(ConnectionUpdate::close("stream errored"))
            .await
            .unwrap();

        let factory = Arc::clone(&fx.factory);
        wait_until(|| factory.events().contains(&"create:2".to_string())).await;

        // restore happened: the canonical blob holds the backup content again.
        assert_eq!(std::fs::read_to_string(&creds_path).unwrap(), "good");

        // restore happened before reload: the rebuild saw the restored blob.
        let loads = fx.loads.lock().unwrap().clone();
        assert_eq!(loads.last().map(String::as_str), Some("good"));

        // old handle detached and closed before the new handle exists.
        let events = fx.factory.events();
        let pos = |needle: &str| events.iter().position(|e| e == needle).unwrap();
        assert!(pos("create:1") < pos("detach:1"));
        assert!(pos("detach:1") < pos("close:1"));
        assert!(pos("close:1") < pos("create:2"));

        run.abort();
    }

    #[tokio::test]
    async fn pairing_bootstrap_waits_then_requests_normalized_number() {
        let mut options = fast_options();
        options.phone_number = Some("+1 (555) 123-4567".into());
        options.pairing_delay = Duration::from_millis(100);
        let fx = fixture(MockFactory::new(), options).await;

        let supervisor = Arc::clone(&fx.supervisor);
        let run = tokio::spawn(async move { supervisor.run().await });

        let factory = Arc::clone(&fx.factory);
        wait_until(|| factory.events().contains(&"create:1".to_string())).await;

        // Inside the settle delay no request has been made yet.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(fx.factory.pairing_calls.lock().unwrap().is_empty());

        let factory = Arc::clone(&fx.factory);
        wait_until(|| !factory.pairing_calls.lock().unwrap().is_empty()).await;
        assert_eq!(
            fx.factory.pairing_calls.lock().unwrap().as_slice(),
            ["15551234567"]
        );

        run.abort();
    }

    #[tokio::test]
    async fn pairing_helper_formats_the_code() {
        let fx = fixture(MockFactory::new(), fast_options()).await;
        let socket = fx
            .factory
            .create(&SocketConfig::default(), fx.supervisor.group_cache())
            .await
            .unwrap();
        let shared = fx.supervisor.shared_socket();
        *shared.write().await = Some(socket);

        let code = request_pairing_code(shared, "5551234567", Duration::from_millis(5)).await;
        assert_eq!(code.as_deref(), Some("K1DX-9PZQ"));
        assert_eq!(
            fx.factory.pairing_calls.lock().unwrap().as_slice(),
            ["5551234567"]
        );
    }

    #[tokio::test]
    async fn no_pairing_when_credentials_exist() {
        let mut options = fast_options();
        options.phone_number = Some("5551234567".into());
        let fx = fixture(MockFactory::new(), options).await;
        std::fs::write(fx.supervisor.creds.path(), "blob").unwrap();

        let supervisor = Arc::clone(&fx.supervisor);
        let run = tokio::spawn(async move { supervisor.run().await });

        let factory = Arc::clone(&fx.factory);
        wait_until(|| factory.events().contains(&"create:1".to_string())).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(fx.factory.pairing_calls.lock().unwrap().is_empty());

        run.abort();
    }

    #[tokio::test]
    async fn circuit_breaker_aborts_after_repeated_failures() {
        let fx = fixture(MockFactory::failing(), fast_options()).await;
        let supervisor = Arc::clone(&fx.supervisor);

        let result = tokio::time::timeout(Duration::from_secs(5), supervisor.run()).await;
        let err = result.expect("run should abort on its own").unwrap_err();
        assert!(err.to_string().contains("consecutive connection failures"));
    }

    #[test]
    fn backoff_doubles_until_the_cap() {
        let max = Duration::from_secs(30);
        let mut backoff = Duration::from_secs(1);
        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(backoff);
            backoff = next_backoff(backoff, max);
        }
        assert_eq!(seen[1], Duration::from_secs(2));
        assert_eq!(seen[4], Duration::from_secs(16));
        assert_eq!(seen[5], max);
        assert_eq!(seen[6], max);
    }

    #[test]
    fn jitter_stays_within_half_spread() {
        for _ in 0..100 {
            let delay = with_jitter(Duration::from_millis(100));
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(150));
        }
    }
}
