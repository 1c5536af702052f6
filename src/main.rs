mod clients;
mod config;
mod db;
mod docs;
mod error;
mod handlers;
mod models;
mod routes;
mod services;
mod websocket;
mod ws;

use axum::{http::HeaderValue, Router};
use clients::{DocumentMirror, FirestoreMirror, GooglePubSubPublisher, MemoryMirror, MemoryPublisher, Publisher};
use config::Config;
use docs::ApiDoc;
use routes::{create_api_routes, create_conference_routes, create_health_routes, create_ws_routes, AppState};
use services::conference_publisher::{ConferencePublisher, TopicBindings};
use services::conference_service::ConferenceService;
use std::panic;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use ws::hub::ConferenceHub;

fn build_publisher(config: &Config) -> Arc<dyn Publisher> {
    if let Some(project_id) = &config.pubsub_project_id {
        match GooglePubSubPublisher::new(&config.pubsub_base_url, project_id, config.pubsub_access_token.clone()) {
            Ok(publisher) => {
                info!("Publishing code runs to Pub/Sub project {}", project_id);
                return Arc::new(publisher);
            }
            Err(e) => error!("Failed to create Pub/Sub client: {}", e),
        }
    }
    warn!("No Pub/Sub project configured - code runs stay in process");
    Arc::new(MemoryPublisher::new())
}

fn build_mirror(config: &Config) -> Arc<dyn DocumentMirror> {
    if let Some(project_id) = &config.firestore_project_id {
        match FirestoreMirror::new(&config.firestore_base_url, project_id, config.firestore_access_token.clone()) {
            Ok(mirror) => {
                info!("Mirroring code runs to Firestore project {}", project_id);
                return Arc::new(mirror);
            }
            Err(e) => error!("Failed to create Firestore client: {}", e),
        }
    }
    warn!("No Firestore project configured - code runs are mirrored in memory");
    Arc::new(MemoryMirror::new())
}

fn build_cors(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins()
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    if origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
    }
}

#[tokio::main]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "tutor_conference=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = config::init_config(Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    }));
    if config.is_development() {
        info!("Running in development mode");
    }

    // Start the signaling hub
    let hub = ConferenceHub::spawn();
    ws::sessionctx::init_session_ctx_cache();

    // Initialize database connection if URL is provided
    let store = match &config.db_url {
        Some(db_url) => match db::dbconference::init_db(db_url).await {
            Ok(db) => {
                info!("Database initialized successfully");
                Some(db)
            }
            Err(e) => {
                error!("Failed to initialize database: {}", e);
                None
            }
        },
        None => None,
    };

    let conference = match store {
        Some(store) => {
            let publisher = ConferencePublisher::new(build_publisher(config), TopicBindings::from_config(config));
            if let Err(e) = publisher.create_topics().await {
                error!("Failed to create code topics: {}", e);
            }
            Some(Arc::new(ConferenceService::new(store, build_mirror(config), publisher)))
        }
        None => {
            warn!("No database available - code submission disabled, conference ids are not checked");
            None
        }
    };

    let state = Arc::new(AppState { hub, conference });

    // Combine all routes
    let app_routes = Router::new()
        .merge(create_ws_routes(state.clone()))
        .merge(create_conference_routes(state.clone()))
        .merge(create_health_routes(state.clone()))
        .nest("/api", create_api_routes(state))
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(build_cors(config))
        .layer(TraceLayer::new_for_http());

    // Start the HTTP/WebSocket server
    let listener = match tokio::net::TcpListener::bind(config.server_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.server_address(), e);
            std::process::exit(1);
        }
    };

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 Signaling available at ws://{}/conference/{{id}}/yjs/", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    if let Err(e) = axum::serve(listener, app_routes).await {
        error!("Server error: {}", e);
    }
}
