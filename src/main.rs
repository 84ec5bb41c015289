use anyhow::Result;
use axum::{
    extract::Request,
    middleware,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use visitrack::auth::{identify_user, AuthService};
use visitrack::config::Config;
use visitrack::device::WootheeParser;
use visitrack::events::EventBus;
use visitrack::geo::GeoIpService;
use visitrack::models::Visitor;
use visitrack::session::MemorySessionStore;
use visitrack::storage;
use visitrack::{track_visits, RouteNames, TrackingState, VisitRecorder};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    let storage = storage::open(&config.database).await?;

    info!("Initializing database...");
    storage.init().await?;
    info!("Database initialized successfully");

    let events = Arc::new(EventBus::default());
    spawn_event_logger(&events);

    let tracker_config = config.tracker.clone();
    let mut recorder = VisitRecorder::new(
        tracker_config.clone(),
        Arc::clone(&storage),
        Arc::new(WootheeParser::new()),
        events,
    );

    if let Some(geoip) = GeoIpService::from_path(tracker_config.geoip.city_db_path.as_deref())? {
        info!("GeoIP enrichment enabled");
        recorder = recorder.with_geoip(geoip);
    }

    let sessions = Arc::new(MemorySessionStore::new(
        tracker_config.session.max_sessions,
        Duration::from_secs(tracker_config.session.ttl_secs),
    ));

    let route_names = RouteNames::new()
        .name("/", "home")
        .name("/about", "about")
        .name("/contact", "contact")
        .name("/api/health", "api.health");

    let tracking = Arc::new(TrackingState::new(
        Arc::new(recorder),
        sessions,
        route_names,
    )?);

    if config.auth.api_keys.is_empty() {
        info!("No API keys configured, all visitors are anonymous");
    }
    let auth_service = Arc::new(AuthService::new(config.auth.api_keys.clone()));

    let app = Router::new()
        .route("/", get(home))
        .route("/about", get(about))
        .route("/contact", post(contact))
        .route("/api/health", get(health_check))
        .route_layer(middleware::from_fn_with_state(tracking, track_visits))
        .layer(middleware::from_fn_with_state(auth_service, identify_user))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn spawn_event_logger(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => info!(
                    unique_id = %event.unique_id,
                    ip = %event.attributes.ip,
                    browser = %event.attributes.browser,
                    os = %event.attributes.os,
                    is_bot = event.attributes.is_bot,
                    "new visitor"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "new visitor log lagging behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn home(request: Request) -> impl IntoResponse {
    let greeting = match request.extensions().get::<Visitor>() {
        Some(visitor) if !visitor.browser.is_empty() => {
            format!("Welcome, {} user!", visitor.browser)
        }
        _ => "Welcome!".to_string(),
    };

    Html(format!("<h1>{greeting}</h1>"))
}

async fn about() -> impl IntoResponse {
    Html("<h1>About</h1>")
}

async fn contact() -> impl IntoResponse {
    Json(json!({ "status": "received" }))
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "OK" }))
}
