// Conveyor process host: wires the store, registry, worker, and HTTP
// control plane together, and owns graceful shutdown.

mod api;
mod config;
mod telemetry;
mod workflows;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use conveyor_engine::{
    ActivityLog, EventType, PostgresWorkflowStore, Task, TaskStatus, Worker, WorkflowInstance,
    WorkflowRegistry, WorkflowService, WorkflowStatus, WorkflowStore,
};

use api::ErrorResponse;

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        api::workflows::health,
        api::workflows::readiness,
        api::workflows::available_workflows,
        api::workflows::start_workflow,
        api::workflows::list_workflows,
        api::workflows::workflow_detail,
    ),
    components(schemas(
        WorkflowInstance,
        WorkflowStatus,
        Task,
        TaskStatus,
        ActivityLog,
        EventType,
        ErrorResponse,
        api::workflows::HealthResponse,
        api::workflows::ReadinessResponse,
        api::workflows::AvailableWorkflowsResponse,
        api::workflows::StartWorkflowBody,
        api::workflows::StartWorkflowResponse,
        api::workflows::ListWorkflowsResponse,
        api::workflows::WorkflowDetailResponse,
    )),
    tags(
        (name = "health", description = "Liveness and readiness probes"),
        (name = "workflows", description = "Workflow admission and inspection")
    ),
    info(
        title = "Conveyor API",
        description = "Control plane for the conveyor workflow engine",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let cfg = config::AppConfig::from_env();
    tracing::info!("conveyor starting...");

    // Database
    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_open_conns)
        .min_connections(cfg.database.max_idle_conns.min(cfg.database.max_open_conns))
        .max_lifetime(cfg.database.max_lifetime)
        .connect(&cfg.database.url())
        .await
        .context("failed to connect to database")?;
    let store = PostgresWorkflowStore::new(pool);
    store
        .ensure_schema()
        .await
        .context("failed to apply database schema")?;
    let store: Arc<dyn WorkflowStore> = Arc::new(store);
    tracing::info!("connected to database");

    // Workflow definitions are fixed from here on; the registry is
    // shared read-only by the service and the worker.
    let mut registry = WorkflowRegistry::new();
    workflows::register_all(&mut registry).context("failed to register workflows")?;
    let registry = Arc::new(registry);
    tracing::info!(workflows = ?registry.names(), "registered workflows");

    let service = Arc::new(WorkflowService::new(
        Arc::clone(&store),
        Arc::clone(&registry),
    ));

    // Worker
    let worker = Arc::new(Worker::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        cfg.worker.worker_config(),
    ));
    let worker_handle = tokio::spawn({
        let worker = Arc::clone(&worker);
        async move { worker.run().await }
    });

    // HTTP control plane
    let app = api::workflows::routes(api::workflows::AppState::new(service));
    let app =
        app.merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()));
    let app = apply_cors(app, &cfg.cors_allowed_origins);
    let app = app.layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(cfg.server.addr())
        .await
        .with_context(|| format!("failed to bind {}", cfg.server.addr()))?;
    tracing::info!(address = %cfg.server.addr(), "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // The server has drained; stop leasing and let the current batch
    // finish within the configured window.
    tracing::info!("shutting down worker");
    worker.shutdown();
    if tokio::time::timeout(cfg.shutdown_timeout, worker_handle)
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_ms = cfg.shutdown_timeout.as_millis() as u64,
            "worker did not drain within the shutdown window"
        );
    }

    tracing::info!("shutdown complete");
    Ok(())
}

/// Add a CORS layer when extra origins are configured
fn apply_cors(app: Router, origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

    if origins.is_empty() {
        tracing::info!("CORS not configured (same-origin requests only)");
        return app;
    }

    tracing::info!(origins = ?origins, "CORS origins configured");
    app.layer(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT]),
    )
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
