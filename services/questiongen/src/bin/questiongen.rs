//! services/questiongen/src/bin/questiongen.rs

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use questiongen_core::{
    ports::{CaptioningService, GenerationProvider},
    GenerationOrchestrator, PipelinePorts,
};
use questiongen_lib::{
    adapters::{
        azure_client, openai_client, AiBrokerAdapter, OpenAiChatAdapter, OpenAiVisionAdapter,
        PdftoppmRasterizer, PgStore,
    },
    config::{Config, ProviderKind},
    error::ServiceError,
    tasks::TaskRunner,
    web::{
        create_generation_handler, get_generation_handler, list_presets_handler, rest::ApiDoc,
        state::AppState,
    },
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Builds the generation and captioning adapters for the configured provider.
fn provider_adapters(
    config: &Config,
) -> Result<(Arc<dyn GenerationProvider>, Arc<dyn CaptioningService>), ServiceError> {
    let http_error = |e: reqwest::Error| ServiceError::Internal(format!("HTTP client: {}", e));
    let api_key = || {
        config
            .api_key
            .clone()
            .ok_or_else(|| ServiceError::Internal("QUESTIONGEN_API_KEY is required".to_string()))
    };

    match config.provider {
        ProviderKind::AiManager => {
            let broker = Arc::new(
                AiBrokerAdapter::new(&config.endpoint, config.api_key.clone(), config.http_timeout)
                    .map_err(http_error)?,
            );
            let provider: Arc<dyn GenerationProvider> = broker.clone();
            let captioner: Arc<dyn CaptioningService> = broker;
            Ok((provider, captioner))
        }
        ProviderKind::OpenAi => {
            let client = openai_client(&api_key()?, &config.endpoint, config.http_timeout)
                .map_err(http_error)?;
            let provider: Arc<dyn GenerationProvider> =
                Arc::new(OpenAiChatAdapter::new(client.clone(), config.model.clone()));
            let captioner: Arc<dyn CaptioningService> =
                Arc::new(OpenAiVisionAdapter::new(client, config.model.clone()));
            Ok((provider, captioner))
        }
        ProviderKind::Azure => {
            let client = azure_client(
                &api_key()?,
                &config.endpoint,
                &config.model,
                &config.azure_api_version,
                config.http_timeout,
            )
            .map_err(http_error)?;
            let provider: Arc<dyn GenerationProvider> =
                Arc::new(OpenAiChatAdapter::new(client.clone(), config.model.clone()));
            let captioner: Arc<dyn CaptioningService> =
                Arc::new(OpenAiVisionAdapter::new(client, config.model.clone()));
            Ok((provider, captioner))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgStore::new(db_pool));
    info!("Running database migrations...");
    store.run_migrations().await?;
    store.seed_default_presets().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let (provider, captioner) = provider_adapters(&config)?;
    info!("Using the {:?} provider at {}.", config.provider, config.endpoint);

    let orchestrator = Arc::new(GenerationOrchestrator::new(
        PipelinePorts {
            requests: store.clone(),
            question_bank: store.clone(),
            provider,
            markup_importer: store.clone(),
            question_creator: store.clone(),
            extraction_cache: store.clone(),
            captioner,
            rasterizer: Arc::new(PdftoppmRasterizer::new(config.pdftoppm_path.clone())),
        },
        config.generation.clone(),
    ));

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        presets: store.clone(),
        requests: store.clone(),
        progress: store.clone(),
        runner: Arc::new(TaskRunner::new(orchestrator, store)),
    });

    // --- 5. Create the Web Router ---
    let api_router = Router::new()
        .route("/generations", post(create_generation_handler))
        .route("/generations/{task_id}", get(get_generation_handler))
        .route("/presets", get(list_presets_handler))
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
