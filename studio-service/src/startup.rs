//! Application startup and lifecycle management.

use axum::{
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{security_headers_middleware, tracing::request_id_middleware};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::{ProviderKind, StudioConfig};
use crate::handlers::{auth, chat, edit, health, metrics};
use crate::middleware::auth_middleware;
use crate::services::credential_gate::CredentialGate;
use crate::services::image_edit::ImageEditor;
use crate::services::metrics::init_metrics;
use crate::services::providers::gemini::{GeminiChatProvider, GeminiConfig, GeminiImageProvider};
use crate::services::providers::mock::{MockChatProvider, MockImageProvider};
use crate::services::providers::{ChatProvider, ImageProvider};
use crate::services::workspace::Workspaces;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<StudioConfig>,
    pub gate: Arc<CredentialGate>,
    pub workspaces: Arc<Workspaces>,
    pub chat_provider: Arc<dyn ChatProvider>,
    pub image_provider: Arc<dyn ImageProvider>,
    pub editor: Arc<ImageEditor>,
}

impl AppState {
    pub fn new(
        config: StudioConfig,
        chat_provider: Arc<dyn ChatProvider>,
        image_provider: Arc<dyn ImageProvider>,
    ) -> Self {
        let gate = CredentialGate::new(
            config.gate.username.clone(),
            config.gate.password.clone(),
            config.gate.delay,
        );
        let editor = ImageEditor::new(Arc::clone(&image_provider), config.limits);
        let workspaces = Workspaces::with_ttl(config.gate.token_ttl);

        Self {
            config: Arc::new(config),
            gate: Arc::new(gate),
            workspaces: Arc::new(workspaces),
            chat_provider,
            image_provider,
            editor: Arc::new(editor),
        }
    }
}

/// Construct the providers named by the configuration.
pub fn build_providers(
    config: &StudioConfig,
) -> Result<(Arc<dyn ChatProvider>, Arc<dyn ImageProvider>), AppError> {
    match config.provider {
        ProviderKind::Mock => {
            tracing::warn!("Using mock providers; no requests leave this process");
            Ok((
                Arc::new(MockChatProvider::new(true)),
                Arc::new(MockImageProvider::new(true)),
            ))
        }
        ProviderKind::Gemini => {
            let api_key = config.google.api_key.clone().ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("GOOGLE_API_KEY is required but not set"))
            })?;

            let chat = GeminiChatProvider::new(GeminiConfig::new(
                api_key.clone(),
                config.models.chat_model.clone(),
            ))
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;
            let image = GeminiImageProvider::new(GeminiConfig::new(
                api_key,
                config.models.image_model.clone(),
            ))
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;

            tracing::info!(
                chat_model = %config.models.chat_model,
                image_model = %config.models.image_model,
                "Initialized Gemini providers"
            );
            Ok((Arc::new(chat), Arc::new(image)))
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/chat/sessions", post(chat::create_session))
        .route(
            "/chat/sessions/:id",
            get(chat::get_session).delete(chat::delete_session),
        )
        .route("/chat/sessions/:id/messages", post(chat::send_message))
        .route("/edit/sessions", post(edit::create_session))
        .route(
            "/edit/sessions/:id",
            get(edit::get_session)
                .patch(edit::update_session)
                .delete(edit::delete_session),
        )
        .route("/edit/sessions/:id/images", post(edit::add_images))
        .route("/edit/sessions/:id/uploads", post(edit::upload_images))
        .route(
            "/edit/sessions/:id/images/:index",
            delete(edit::remove_image),
        )
        .route("/edit/sessions/:id/generate", post(edit::generate))
        .route("/edit/sessions/:id/refine", post(edit::refine))
        .route("/edit/sessions/:id/reset", post(edit::reset))
        .route("/edit/sessions/:id/result", get(edit::download_result))
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    let body_limit = state.config.body_limit_bytes;

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(metrics::metrics))
        .route("/auth/login", post(auth::login))
        .merge(protected)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(from_fn(security_headers_middleware))
        // Add tracing layer
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        // Add tracing middleware for request_id
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Build the application with the providers named by `config`.
    pub async fn build(config: StudioConfig) -> Result<Self, AppError> {
        let (chat_provider, image_provider) = build_providers(&config)?;
        Self::build_with_providers(config, chat_provider, image_provider).await
    }

    /// Build the application around already constructed providers.
    pub async fn build_with_providers(
        config: StudioConfig,
        chat_provider: Arc<dyn ChatProvider>,
        image_provider: Arc<dyn ImageProvider>,
    ) -> Result<Self, AppError> {
        init_metrics().map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;

        // Bind HTTP listener (port 0 = random port for testing)
        let address = config.common.address();
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", address, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        let state = AppState::new(config, chat_provider, image_provider);
        let router = build_router(state);

        tracing::info!("Studio service: HTTP on port {}", port);

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        axum::serve(self.listener, self.router).await
    }

    /// Run the application until `shutdown` resolves.
    pub async fn run_with_graceful_shutdown<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
