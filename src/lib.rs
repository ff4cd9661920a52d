pub mod error;
pub mod handlers;
pub mod models;
pub mod openapi;
pub mod repository;
pub mod settings;
pub mod store;
pub mod validation;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use handlers::{
    create_booking, create_class, diagnostics, list_bookings, list_classes, list_plugins, root,
    upsert_plugin,
};
use tower_http::LatencyUnit;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::models::{Booking, GymClass, Plugin};
use crate::openapi::ApiDoc;
use crate::repository::Repository;
use crate::settings::Settings;
use crate::store::{DocumentStore, MemoryStore, PostgresStore};

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub store: Arc<dyn DocumentStore>,
}

impl AppState {
    pub fn new(settings: Settings, store: Arc<dyn DocumentStore>) -> Self {
        Self { settings, store }
    }

    pub fn classes(&self) -> Repository<GymClass> {
        Repository::new(self.store.clone())
    }

    pub fn bookings(&self) -> Repository<Booking> {
        Repository::new(self.store.clone())
    }

    pub fn plugins(&self) -> Repository<Plugin> {
        Repository::new(self.store.clone())
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;

    let env_filter = if settings.debug { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let store = open_store(&settings).await?;
    let state = AppState::new(settings, store);
    let app = build_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.settings.port));
    info!("Starting Gym Booking API on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn open_store(
    settings: &Settings,
) -> Result<Arc<dyn DocumentStore>, Box<dyn std::error::Error>> {
    match &settings.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url, settings.database_max_connections).await?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("No database URL configured, using the in-memory store; data is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    let mut router = Router::new()
        .route("/", get(root))
        .route("/test", get(diagnostics))
        .route("/api/classes", post(create_class).get(list_classes))
        .route("/api/bookings", post(create_booking).get(list_bookings))
        .route("/api/plugins", get(list_plugins))
        .route("/api/plugins/{key}", post(upsert_plugin))
        .with_state(state.clone());

    if state.settings.enable_swagger {
        let openapi = ApiDoc::openapi();
        let swagger = SwaggerUi::new("/docs").url("/openapi.json", openapi);
        router = router.merge(swagger);
    }

    router
        .layer(CorsLayer::very_permissive())
        .layer(trace_layer)
}
