mod config;

use std::{sync::Arc, time::Duration};

use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    novabot_handlers::{BuiltinHandlers, HandlerContext, HandlerRegistry, HandlerSource},
    novabot_session::{BackupManager, CredentialStore},
    novabot_socket::{SessionFactory, SidecarFactory, SocketConfig},
    novabot_store::{DEFAULT_COMPACTION_INTERVAL, Database},
    novabot_supervisor::{ConnectionSupervisor, SupervisorOptions, normalize_number},
    tracing::{error, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use crate::config::BotConfig;

#[derive(Parser)]
#[command(name = "novabot", about = "NovaBot — WhatsApp chat bot")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Custom config directory (overrides default ~/.config/novabot/).
    #[arg(long, global = true, env = "NOVABOT_CONFIG_DIR")]
    config_dir: Option<std::path::PathBuf>,

    /// Custom data directory (overrides the config value).
    #[arg(long, global = true, env = "NOVABOT_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot (default when no subcommand is provided).
    Run,
    /// Snapshot the credential blob into the backup set.
    Backup,
    /// Restore the newest credential backup over the canonical blob.
    Restore,
    /// Show what the pairing bootstrap would request for a number.
    Pair {
        #[arg(long)]
        number: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    let mut config = config::discover_and_load(cli.config_dir.as_deref());
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Backup => backup_once(&config).await,
        Commands::Restore => restore_once(&config).await,
        Commands::Pair { number } => pair_preview(&number),
    }
}

/// Wire everything up and supervise the connection until shutdown.
async fn run(config: BotConfig) -> Result<()> {
    let creds = CredentialStore::new(config.auth_dir())?;
    let backups = Arc::new(BackupManager::new(creds.clone(), config.backup_dir())?);
    let db = Arc::new(Database::open(config.database_dir()).await?);

    let backup_task =
        Arc::clone(&backups).spawn_periodic(Duration::from_secs(config.backup_interval_secs));
    let compaction_task = Arc::clone(&db).spawn_autocompaction(DEFAULT_COMPACTION_INTERVAL);

    let registry = Arc::new(HandlerRegistry::load(
        Arc::new(BuiltinHandlers) as Arc<dyn HandlerSource>
    )?);
    let handler_ctx = HandlerContext::new(Arc::clone(&db), config.command_prefix.clone());

    let socket_config = SocketConfig {
        auth_dir: config.auth_dir(),
        options: config.session.clone(),
        sidecar: config.sidecar.clone(),
    };
    let factory = Arc::new(SidecarFactory::new());

    let options = SupervisorOptions {
        phone_number: config.phone_number.clone(),
        initial_backoff: Duration::from_millis(config.reconnect.initial_backoff_ms),
        max_backoff: Duration::from_millis(config.reconnect.max_backoff_ms),
        max_consecutive_failures: config.reconnect.max_consecutive_failures,
        ..SupervisorOptions::default()
    };

    let supervisor = ConnectionSupervisor::new(
        Arc::clone(&factory) as Arc<dyn SessionFactory>,
        socket_config,
        creds,
        backups,
        registry,
        handler_ctx,
        options,
    );

    info!(port = config.port, "novabot started, waiting for link if required");

    let result = tokio::select! {
        result = supervisor.run() => result,
        () = shutdown_signal() => {
            info!("shutdown signal received");
            Ok(())
        },
    };

    backup_task.abort();
    compaction_task.abort();
    factory.stop().await;

    db.flush_all().await?;
    info!("database flushed, exiting");

    result
}

async fn backup_once(config: &BotConfig) -> Result<()> {
    let creds = CredentialStore::new(config.auth_dir())?;
    let backups = BackupManager::new(creds, config.backup_dir())?;
    match backups.backup().await? {
        Some(entry) => println!("backup written: {}", entry.path.display()),
        None => println!("no credential blob to back up"),
    }
    Ok(())
}

async fn restore_once(config: &BotConfig) -> Result<()> {
    let creds = CredentialStore::new(config.auth_dir())?;
    let backups = BackupManager::new(creds, config.backup_dir())?;
    match backups.restore().await? {
        Some(entry) => println!("restored from {}", entry.path.display()),
        None => println!("no backups to restore"),
    }
    Ok(())
}

fn pair_preview(number: &str) -> Result<()> {
    let normalized = normalize_number(number);
    if normalized.is_empty() {
        anyhow::bail!("no digits in phone number: {number}");
    }
    println!("a pairing code for {normalized} will be requested shortly after startup");
    println!("set BOT_PHONE_NUMBER={normalized} (or phone_number in novabot.toml) and run the bot");
    Ok(())
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Initialise tracing from `RUST_LOG`, falling back to `--log-level`.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}
