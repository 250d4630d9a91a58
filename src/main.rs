//! Kira service binary.
//!
//! Wires the core components — vault store, Host API, event bus, scheduler,
//! LLM router, tool registry, agent executor, message handler, HTTP surface
//! — and runs until interrupted.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use kira::agent::{AgentExecutor, SessionStore};
use kira::bus::scheduler::{JobOptions, Scheduler};
use kira::bus::{EventBus, IdempotencyStore};
use kira::config::KiraConfig;
use kira::host::audit::AuditLogger;
use kira::host::schema::SchemaCache;
use kira::host::{HostApi, HostDeps, HostError};
use kira::http::Metrics;
use kira::ingress::{LoggingSink, MessageHandler};
use kira::providers::router::LlmRouter;
use kira::timeutil;
use kira::tools::notes::NoteCreateTool;
use kira::tools::rollup::{InboxNormalizeTool, RollupDailyTool};
use kira::tools::tasks::{
    TaskCreateTool, TaskDeleteTool, TaskGetTool, TaskListTool, TaskUpdateTool,
};
use kira::tools::ToolRegistry;
use kira::vault::VaultStore;

/// Idempotency records are swept after this many days.
const SEEN_EVENTS_TTL_DAYS: i64 = 30;

/// How often the session and idempotency sweeps run.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// How often `sync.tick` fires for calendar-sync and plugin subscribers.
const SYNC_TICK_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Parser)]
#[command(name = "kira", about = "Kira personal knowledge and task core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the service: bus, scheduler, ingress, and HTTP surface.
    Start,
    /// Validate the configuration and print the effective values.
    CheckConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

/// Map an error chain to the documented CLI exit codes.
///
/// `0` success, `2` validation, `3` conflict, `4` FSM, `5` I/O or lock,
/// `6` config, `7` unknown.
fn exit_code_for(error: &anyhow::Error) -> u8 {
    if let Some(host) = error.downcast_ref::<HostError>() {
        return match host {
            HostError::Validation { .. } | HostError::NotFound { .. } => 2,
            HostError::DuplicateId { .. } => 3,
            HostError::FsmGuard(_) => 4,
            HostError::Io(_)
            | HostError::LockTimeout { .. }
            | HostError::Store(_)
            | HostError::Parse(_) => 5,
        };
    }
    if error.downcast_ref::<ConfigError>().is_some() {
        return 6;
    }
    7
}

/// Marker wrapper so config failures map to exit code 6.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct ConfigError(String);

fn run(cli: Cli) -> Result<()> {
    // .env is optional; ignore a missing file.
    let _ = dotenvy::dotenv();

    match cli.command {
        Command::CheckConfig => {
            kira::logging::init_cli();
            let config = KiraConfig::load()
                .map_err(|e| anyhow::Error::new(ConfigError(format!("{e:#}"))))?;
            timeutil::parse_timezone(&config.core.timezone)
                .map_err(|e| anyhow::Error::new(ConfigError(e.to_string())))?;
            println!("config ok: vault={}", config.vault.path.display());
            Ok(())
        }
        Command::Start => {
            let config = KiraConfig::load()
                .map_err(|e| anyhow::Error::new(ConfigError(format!("{e:#}"))))?;
            let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
            runtime.block_on(start(config))
        }
    }
}

async fn start(config: KiraConfig) -> Result<()> {
    let data_dir = config.data_dir();
    let _logging_guard = kira::logging::init_production(&data_dir.join("logs"), "kira")?;
    info!("kira starting");

    let config = Arc::new(config);
    let tz = timeutil::parse_timezone(&config.core.timezone)
        .map_err(|e| anyhow::Error::new(ConfigError(e.to_string())))?;

    // SQLite: conversations, session_state, seen_events, sync_ledger.
    let db = open_database(&data_dir).await?;

    // Event bus with idempotent delivery.
    let idempotency = IdempotencyStore::new(db.clone()).await?;
    let bus = Arc::new(EventBus::with_store(idempotency.clone()));

    // Vault, schemas, audit, Host API.
    let vault = Arc::new(VaultStore::new(&config.vault.path)?);
    let schemas = SchemaCache::new(config.vault.path.join(".kira").join("schemas"))?;
    let audit = Arc::new(AuditLogger::new(data_dir.join("audit"))?);
    let host = Arc::new(
        HostApi::new(HostDeps {
            vault,
            schemas,
            audit,
            bus: Arc::clone(&bus),
            db: db.clone(),
            tz,
            features: config.features.clone(),
        })
        .await?,
    );

    // LLM router and tools.
    let router = Arc::new(LlmRouter::from_config(&config.router)?);
    info!(providers = ?router.available(), "LLM router ready");
    let registry = Arc::new(build_tool_registry(&host, &bus, tz)?);

    // Sessions and executor.
    let sessions = SessionStore::new(db.clone()).await?;
    let executor = Arc::new(AgentExecutor::new(
        router,
        registry,
        sessions,
        Arc::clone(&config),
    ));

    // Ingress: adapters publish message.received; replies go to the sink.
    let handler = MessageHandler::new(Arc::clone(&executor), Arc::new(LoggingSink));
    handler.attach(&bus);

    // Maintenance jobs and the sync heartbeat.
    let scheduler = Scheduler::new();
    schedule_sweeps(&scheduler, &executor, &idempotency, &config);
    schedule_sync_tick(&scheduler, &bus);

    // HTTP surface.
    let metrics = Arc::new(Metrics::new()?);
    let http_task = if config.http.enabled {
        let bind = config.http.bind_addr.clone();
        let executor = Arc::clone(&executor);
        let metrics = Arc::clone(&metrics);
        Some(tokio::spawn(async move {
            if let Err(e) = kira::http::serve(&bind, executor, metrics).await {
                error!(error = %format!("{e:#}"), "HTTP service stopped");
            }
        }))
    } else {
        None
    };

    info!("kira ready");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("kira shutting down");
    scheduler.shutdown();
    if let Some(task) = http_task {
        task.abort();
    }
    Ok(())
}

/// Open `conversations.db` in WAL mode, creating it if needed.
async fn open_database(data_dir: &std::path::Path) -> Result<SqlitePool> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
    let options = SqliteConnectOptions::new()
        .filename(data_dir.join("conversations.db"))
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .context("failed to open conversations.db")?;
    Ok(pool)
}

/// Register the canonical tool set.
fn build_tool_registry(
    host: &Arc<HostApi>,
    bus: &Arc<EventBus>,
    tz: chrono_tz::Tz,
) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(TaskListTool::new(Arc::clone(host))))?;
    registry.register(Arc::new(TaskGetTool::new(Arc::clone(host))))?;
    registry.register(Arc::new(TaskCreateTool::new(Arc::clone(host))))?;
    registry.register(Arc::new(TaskUpdateTool::new(Arc::clone(host))))?;
    registry.register(Arc::new(TaskDeleteTool::new(Arc::clone(host))))?;
    registry.register(Arc::new(NoteCreateTool::new(Arc::clone(host))))?;
    registry.register(Arc::new(RollupDailyTool::new(Arc::clone(host), tz)))?;
    registry.register(Arc::new(InboxNormalizeTool::new(
        Arc::clone(host),
        Arc::clone(bus),
    )))?;
    Ok(registry)
}

/// Register the periodic session and idempotency sweeps.
fn schedule_sweeps(
    scheduler: &Scheduler,
    executor: &Arc<AgentExecutor>,
    idempotency: &IdempotencyStore,
    config: &Arc<KiraConfig>,
) {
    let sessions_executor = Arc::clone(executor);
    let ttl = config.memory.session_ttl_secs;
    let cap = config.memory.max_sessions;
    scheduler.schedule_interval(
        "session-sweep",
        SWEEP_INTERVAL,
        Arc::new(move |_cancel| {
            let executor = Arc::clone(&sessions_executor);
            Box::pin(async move {
                executor.sessions().sweep(ttl, cap).await?;
                Ok(())
            })
        }),
        JobOptions::default(),
    );

    let store = idempotency.clone();
    scheduler.schedule_interval(
        "seen-events-sweep",
        SWEEP_INTERVAL,
        Arc::new(move |_cancel| {
            let store = store.clone();
            Box::pin(async move {
                let removed = store.sweep(SEEN_EVENTS_TTL_DAYS).await?;
                if removed > 0 {
                    warn!(removed, "idempotency records swept");
                }
                Ok(())
            })
        }),
        JobOptions::default(),
    );
}

/// Publish `sync.tick` periodically; calendar sync and plugins subscribe.
fn schedule_sync_tick(scheduler: &Scheduler, bus: &Arc<EventBus>) {
    let bus = Arc::clone(bus);
    scheduler.schedule_interval(
        "sync-tick",
        SYNC_TICK_INTERVAL,
        Arc::new(move |_cancel| {
            let bus = Arc::clone(&bus);
            Box::pin(async move {
                bus.publish(kira::bus::EventEnvelope::internal(
                    "sync.tick",
                    serde_json::json!({}),
                ))
                .await?;
                Ok(())
            })
        }),
        JobOptions::default(),
    );
}
