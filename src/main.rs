//! Document assistant server - upload documents, convert between formats,
//! and chat with a hosted model about them.

mod chat;
mod config;
mod convert;
mod error;
mod openrouter;
mod storage;

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, State,
    },
    response::Json,
    routing::{get, post},
    Router,
};
use chat::{ChatProvider, ChatRelay, ChatRequest};
use config::AppConfig;
use convert::{Dispatcher, OutputFormat};
use error::ApiError;
use openrouter::OpenRouterClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::UploadStore;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Services shared across handlers. Built once in `main`, dropped on shutdown.
#[derive(Clone)]
struct AppState {
    uploads: UploadStore,
    dispatcher: Arc<Dispatcher>,
    chat: Arc<ChatRelay>,
}

impl AppState {
    async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let uploads = UploadStore::open(&config.upload_dir).await?;
        info!("Upload directory: {:?}", uploads.root());

        let dispatcher = Dispatcher::from_config(&config.converter);
        info!(
            "Converters: {} {:?} in {:?} (timeout {:?})",
            config.converter.interpreter,
            config.converter.interpreter_args,
            config.converter.scripts_dir,
            config.converter.timeout
        );

        let openrouter = OpenRouterClient::from_config(&config.chat)?;
        info!("OpenRouter client initialized (model={})", openrouter.model());
        let provider: Arc<dyn ChatProvider> = Arc::new(openrouter);

        Ok(Self {
            uploads,
            dispatcher: Arc::new(dispatcher),
            chat: Arc::new(ChatRelay::new(provider)),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docassist=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let state = AppState::from_config(&config).await?;
    let app = router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/upload", post(upload_file))
        .route("/convert", post(convert_file))
        .route("/chat", post(chat_message))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    success: bool,
    filename: String,
    filepath: String,
    file_type: String,
    size: u64,
}

/// Store a single uploaded file under a fresh name.
async fn upload_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::validation(e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error)?
    {
        if field.name() != Some("file") {
            continue;
        }

        let original_name = field.file_name().unwrap_or("upload").to_string();
        let mime_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(multipart_error)?;

        info!(
            "Received file: {} ({} bytes, {:?})",
            original_name,
            data.len(),
            mime_type
        );

        let stored = state
            .uploads
            .save(&original_name, mime_type.as_deref(), &data)
            .await?;
        info!("Stored {} as {}", stored.original_name, stored.stored_name());

        return Ok(Json(UploadResponse {
            success: true,
            filename: stored.stored_name(),
            filepath: stored.storage_path.display().to_string(),
            file_type: stored.mime_type,
            size: stored.size_bytes,
        }));
    }

    Err(ApiError::MissingFile)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConvertRequest {
    #[serde(default)]
    input_file: Option<String>,
    #[serde(default)]
    output_format: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConvertResponse {
    success: bool,
    output_file: String,
    message: String,
}

/// Convert a stored upload to another format.
async fn convert_file(
    State(state): State<AppState>,
    payload: Result<Json<ConvertRequest>, JsonRejection>,
) -> Result<Json<ConvertResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::validation(e.body_text()))?;

    let input_file = required(request.input_file, "inputFile")?;
    let output_format = required(request.output_format, "outputFormat")?;
    let format = OutputFormat::parse(&output_format)
        .ok_or(ApiError::UnsupportedFormat { format: output_format })?;

    let input_path = state.uploads.resolve(&input_file)?;
    let output_path = state.dispatcher.dispatch(&input_path, format).await?;

    let output_file = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    info!("Converted {} -> {}", input_file, output_file);

    Ok(Json(ConvertResponse {
        success: true,
        output_file,
        message: "File converted successfully".to_string(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatResponse {
    response: String,
}

/// Relay a message (plus attachment descriptors) to the chat model.
async fn chat_message(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::validation(e.body_text()))?;
    let response = state.chat.reply(request).await?;
    Ok(Json(ChatResponse { response }))
}

/// Oversize bodies keep their 413; everything else is a malformed request.
fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == axum::http::StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::validation(format!("Multipart error: {}", e.body_text()))
    }
}

fn required(value: Option<String>, name: &'static str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ApiError::MissingParameter { name })
}
