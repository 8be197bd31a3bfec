mod config;
mod db;
mod errors;
mod flow;
mod models;
mod persistence;
mod routes;
mod runtime;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::flow::templates::TemplateLibrary;
use crate::persistence::flows::PgFlowRepository;
use crate::persistence::gateway::FlowGateway;
use crate::persistence::sessions::PgConversationStateStore;
use crate::routes::build_router;
use crate::runtime::executor::HttpEffectExecutor;
use crate::runtime::runner::Runner;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting flow API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL (runs migrations)
    let db = create_pool(&config.database_url, config.database_max_connections).await?;

    let templates = TemplateLibrary::new(config.flow_templates_dir.clone());
    if let Some(dir) = &config.flow_templates_dir {
        info!("System flow overrides read from {}", dir.display());
    }
    let flows = FlowGateway::new(Arc::new(PgFlowRepository::new(db.clone())), templates);

    let executor = HttpEffectExecutor::new(
        Duration::from_secs(config.effect_http_timeout_secs),
        config.notify_webhook_url.clone(),
    )?;
    if config.notify_webhook_url.is_none() {
        info!("NOTIFY_WEBHOOK_URL not set; e-mail and SMS actions will only be logged");
    }
    let runner = Runner::new(Arc::new(executor), config.max_auto_steps);
    info!("Session runner ready (max {} automatic steps per call)", config.max_auto_steps);

    // Build app state
    let state = AppState {
        flows,
        sessions: Arc::new(PgConversationStateStore::new(db)),
        runner,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins to the editor host once it is configurable

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
