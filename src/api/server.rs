use std::sync::Arc;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use regex::Regex;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::routes::{self, HandlerErrorMessage, RequestUsage};
use crate::error::Result;
use crate::store::EmbeddingStore;
use crate::upstream::UpstreamClient;

/// Settings the request handler needs beyond its collaborators.
#[derive(Debug)]
pub struct ServeConfig {
    pub allowed_models: Vec<String>,
    /// Tokens must match this pattern when set; `None` accepts any token.
    pub api_key_pattern: Option<Regex>,
    /// Log raw request payloads at DEBUG level.
    pub debug_body: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EmbeddingStore>,
    pub upstream: Arc<UpstreamClient>,
    pub config: Arc<ServeConfig>,
}

pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(
        store: Arc<dyn EmbeddingStore>,
        upstream: Arc<UpstreamClient>,
        config: ServeConfig,
    ) -> Self {
        Self {
            state: AppState {
                store,
                upstream,
                config: Arc::new(config),
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(
                "/v1/embeddings",
                post(routes::create_embeddings).fallback(routes::method_not_allowed),
            )
            .fallback(routes::not_found)
            .layer(middleware::from_fn(request_log))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    pub async fn serve(self, addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr, "server is ready");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

/// Emits exactly one log event per request at completion. Successful
/// responses carry the token usage the handler recorded; 5xx responses carry
/// the error string and log at ERROR level.
async fn request_log(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;
    let status = response.status().as_u16();

    if response.status().is_server_error() {
        let error = response
            .extensions()
            .get::<HandlerErrorMessage>()
            .map(|e| e.0.clone())
            .unwrap_or_default();
        tracing::error!(%request_id, method, path, status, error, "request completed");
    } else if let Some(RequestUsage(usage)) = response.extensions().get::<RequestUsage>().copied() {
        tracing::info!(
            %request_id,
            method,
            path,
            status,
            prompt_tokens = usage.prompt_tokens,
            total_tokens = usage.total_tokens,
            "request completed"
        );
    } else {
        tracing::info!(%request_id, method, path, status, "request completed");
    }

    response
}
