//! mart-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, connects storage,
//! spawns the reconcile worker pool, and starts the HTTP server.  All route
//! handlers live in `routes.rs`; shared state types live in `state.rs`.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use mart_accrual::HttpAccrualClient;
use mart_daemon::{config::Config, routes, state};
use mart_db::PgStore;
use mart_engine::{pool, EngineDeps, OrderService};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    // Silent if the file does not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config = Config::parse();

    let db = mart_db::connect(&config.database_url).await?;
    mart_db::migrate(&db).await?;

    let store = Arc::new(PgStore::new(db));
    let deps = EngineDeps {
        orders: store.clone(),
        ledger: store.clone(),
        queue: store.clone(),
        accrual: Arc::new(HttpAccrualClient::with_settings(
            config.accrual_url.clone(),
            config.accrual_settings(),
        )),
    };

    let workers = pool::spawn(deps.clone(), config.pool_config());

    let service = OrderService::new(deps, config.recheck_delay());
    let shared = Arc::new(state::AppState::new(service));

    let app = routes::build_router(shared).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("bind {}", config.listen))?;
    info!("mart-daemon listening on http://{}", config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    // The listener is closed; let in-flight reconcile work finish.
    workers.shutdown().await;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl-c handler failed; shutting down");
    }
    info!("shutdown signal received");
}
