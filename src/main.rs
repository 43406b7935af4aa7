use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use eventgate::auth::password::{Argon2Hashing, PasswordHashing};
use eventgate::cli::{self, Commands, UserCommands};
use eventgate::config::{self, Config};
use eventgate::jobs::{pending_report, sweeper::TombstoneSweeper};
use eventgate::store::kv::{KeyValueStore, RedisKv};
use eventgate::store::memory::{MemoryKv, MemoryRecordStore};
use eventgate::store::postgres::PgStore;
use eventgate::store::RecordStore;
use eventgate::tombstones::TombstoneStore;
use eventgate::{api, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(Commands::Serve { port, in_memory }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port, in_memory).await
        }
        Some(Commands::Sweep) => run_sweep(&cfg).await,
        Some(Commands::User { command }) => handle_user_command(&cfg, command).await,
        None => {
            let port = cfg.port;
            run_server(cfg, port, false).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn init_tracing() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // export spans only when a collector is configured
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "eventgate"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "eventgate=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();
    Ok(())
}

/// The record and key-value backends: Postgres and Redis, or process
/// memory for local runs.
async fn connect_backends(
    cfg: &Config,
    in_memory: bool,
) -> anyhow::Result<(Arc<dyn RecordStore>, Arc<dyn KeyValueStore>)> {
    if in_memory {
        tracing::warn!("running with in-memory stores; all state is lost on exit");
        let memory = Arc::new(MemoryKv::new());
        memory.spawn_reaper(Duration::from_secs(60));
        let records: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
        let kv: Arc<dyn KeyValueStore> = memory;
        return Ok((records, kv));
    }

    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;
    tracing::info!("Running migrations...");
    db.migrate().await?;

    tracing::info!("Connecting to Redis...");
    let redis = RedisKv::connect(&cfg.redis_url).await?;
    let records: Arc<dyn RecordStore> = Arc::new(db);
    let kv: Arc<dyn KeyValueStore> = Arc::new(redis);
    Ok((records, kv))
}

async fn run_server(cfg: Config, port: u16, in_memory: bool) -> anyhow::Result<()> {
    let (records, kv) = connect_backends(&cfg, in_memory).await?;
    let sweep_every = cfg.sweep_interval();
    let report_every = cfg.pending_report_interval();

    let hasher: Arc<dyn PasswordHashing> = Arc::new(Argon2Hashing::default());
    let state = Arc::new(AppState::new(cfg, records.clone(), kv.clone(), hasher));

    let app = api::router(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    let sweeper = TombstoneSweeper::new(TombstoneStore::new(kv), sweep_every).spawn();
    tracing::info!(every_secs = sweep_every.as_secs(), "tombstone sweeper started");
    let report = report_every.map(|every| {
        tracing::info!(every_secs = every.as_secs(), "pending report started");
        pending_report::spawn(records, every)
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("eventgate listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    if let Some(report) = report {
        report.abort();
    }
    tracing::info!("eventgate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn run_sweep(cfg: &Config) -> anyhow::Result<()> {
    let kv = RedisKv::connect(&cfg.redis_url).await?;
    let sweeper = TombstoneSweeper::new(
        TombstoneStore::new(Arc::new(kv)),
        cfg.sweep_interval(),
    );
    let report = sweeper.sweep().await?;
    println!(
        "Sweep complete:\n  Scanned: {}\n  Purged:  {}",
        report.scanned, report.purged
    );
    Ok(())
}

async fn handle_user_command(cfg: &Config, cmd: UserCommands) -> anyhow::Result<()> {
    match cmd {
        UserCommands::Create {
            email,
            password,
            role,
            plan,
        } => {
            let db = PgStore::connect(&cfg.database_url).await?;
            db.migrate().await?;
            // account creation mints no tokens, so revocations stay local
            let state = AppState::new(
                cfg.clone(),
                Arc::new(db),
                Arc::new(MemoryKv::new()),
                Arc::new(Argon2Hashing::default()),
            );
            let user = state
                .auth
                .register(&email, &password, role, Some(plan))
                .await?;
            println!(
                "User created:\n  ID:    {}\n  Email: {}\n  Role:  {}\n  Plan:  {}",
                user.id, user.email, user.role, plan
            );
        }
    }
    Ok(())
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    // responses carry tokens and per-user data
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");

    resp
}
