//! # Server Configuration
//!
//! Router assembly, shared state and the HTTP listener.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::handlers;
use crate::ingestion::Aggregator;
use crate::repositories::ProjectCache;
use crate::telemetry::trace_id_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub aggregator: Arc<Aggregator>,
    pub projects: ProjectCache,
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let admin = Router::new()
        .route("/projects", post(handlers::admin::create_project))
        .route("/projects/{id}", get(handlers::admin::get_project))
        .route(
            "/projects/{project_id}/alerts",
            get(handlers::admin::list_alerts),
        )
        .route(
            "/projects/{project_id}/alert_notification_destinations",
            post(handlers::admin::create_destination),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route(
            "/api/{public_id}/envelope",
            post(handlers::ingestion::ingest_envelope),
        )
        .nest("/api/admin", admin)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id_middleware))
}

/// Serves the application until `shutdown` is cancelled, then drains open requests.
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> Result<()> {
    let addr = state
        .config
        .bind_addr()
        .with_context(|| format!("Invalid server address: {}", state.config.api_bind_addr))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(%addr, profile = %state.config.profile, "Server listening");

    axum::serve(listener, create_app(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("HTTP server failed")?;

    tracing::info!("Server stopped");
    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::readyz,
        crate::handlers::ingestion::ingest_envelope,
        crate::handlers::admin::create_project,
        crate::handlers::admin::get_project,
        crate::handlers::admin::list_alerts,
        crate::handlers::admin::create_destination,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::HealthResponse,
            crate::handlers::ingestion::IngestResponse,
            crate::handlers::admin::CreateProjectRequest,
            crate::handlers::admin::ProjectDto,
            crate::handlers::admin::ProjectResponse,
            crate::handlers::admin::AlertDto,
            crate::handlers::admin::AlertListResponse,
            crate::handlers::admin::CreateDestinationRequest,
            crate::handlers::admin::DestinationDto,
        )
    ),
    tags(
        (name = "root", description = "Service information"),
        (name = "health", description = "Liveness and readiness probes"),
        (name = "ingestion", description = "SDK event ingestion"),
        (name = "admin", description = "Operator administration"),
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Periscope API",
        description = "Error event ingestion and alerting",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}
