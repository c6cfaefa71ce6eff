//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, HeuristicFormatDetector, LocalTextExtractor, OpenAiQuizAdapter},
    config::{Config, ConfigError},
    error::ApiError,
    web::{
        generate_quiz_handler, quota_handler, resolve_identity, rest::ApiDoc, state::AppState,
        ws_handler,
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE},
        HeaderName, HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use quiz_core::{ports::KeyValueStore, InMemoryStore};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Pick the Usage Ledger Store ---
    let store: Arc<dyn KeyValueStore> = match &config.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
            let db_adapter = DbAdapter::new(db_pool);
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(db_adapter)
        }
        None => {
            warn!("DATABASE_URL is not set; usage ledger is kept in memory and lost on restart.");
            Arc::new(InMemoryStore::new())
        }
    };

    // --- 3. Initialize Service Adapters ---
    let api_key = config
        .openai_api_key
        .as_ref()
        .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;
    let mut openai_config = OpenAIConfig::new().with_api_key(api_key);
    if let Some(base) = &config.openai_api_base {
        openai_config = openai_config.with_api_base(base);
    }
    let openai_client = Client::with_config(openai_config);

    let extractor = Arc::new(LocalTextExtractor::new(
        openai_client.clone(),
        config.ocr_model.clone(),
    ));
    let detector = Arc::new(
        HeuristicFormatDetector::new()
            .map_err(|e| ApiError::Internal(format!("Invalid format detector pattern: {}", e)))?,
    );
    let generator = Arc::new(OpenAiQuizAdapter::new(
        openai_client.clone(),
        config.quiz_model.clone(),
    ));

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        config: config.clone(),
        extractor,
        detector,
        generator,
        store,
    });

    // --- 5. Configure CORS ---
    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ConfigError::InvalidValue("CORS_ORIGIN".to_string(), e.to_string())
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            ACCEPT,
            ACCEPT_LANGUAGE,
            HeaderName::from_static("x-user-id"),
            HeaderName::from_static("x-client-id"),
        ]);

    // --- 6. Create the Web Router ---
    let api_router = Router::new()
        .route("/quizzes", post(generate_quiz_handler))
        .route("/quota", get(quota_handler))
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            resolve_identity,
        ))
        .layer(DefaultBodyLimit::max(25 * 1024 * 1024))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
