use axum::{
    http::Method,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod database;
mod error;
mod handlers;
mod jobs;
mod services;
mod store;
mod workflows;

pub use error::{ApiError, ApiResult, AppError};

#[cfg(test)]
mod tests;

use services::{EmailSender, LoggingEmailSender, NotificationService, SmtpEmailService};
use store::{PgStore, Store};
use workflows::{WorkflowEngine, WorkflowTriggers};

pub struct AppState {
    pub db: sqlx::PgPool,
    pub store: Arc<dyn Store>,
    pub engine: WorkflowEngine,
    pub triggers: WorkflowTriggers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let db = database::create_pool(&config.database_url).await?;

    database::migrate(&db).await?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(db.clone()));

    let email: Arc<dyn EmailSender> = if config.smtp.is_configured() {
        Arc::new(SmtpEmailService::new(&config.smtp))
    } else {
        tracing::warn!("SMTP not configured; workflow emails will be logged only");
        Arc::new(LoggingEmailSender)
    };
    let notifier = Arc::new(NotificationService::new(store.clone()));

    let engine = WorkflowEngine::new(store.clone(), email, notifier, &config.engine);
    let triggers = WorkflowTriggers::new(engine.clone());

    jobs::ExecutionResumer::new(engine.clone(), store.clone(), config.engine.resume_poll_interval)
        .start();

    let app_state = Arc::new(AppState {
        db,
        store,
        engine,
        triggers,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(|| async { "Lattice CRM API v0.1.0" }))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1/workflows", handlers::workflow_routes())
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
