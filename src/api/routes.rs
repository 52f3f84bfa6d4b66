//! The `/v1/embeddings` handler.
//!
//! Each request is split into per-input cache lookups; the missing subset is
//! fetched from the upstream in one call, persisted, and stitched back into
//! the response in request order.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::server::AppState;
use crate::codec;
use crate::error::Error;
use crate::input::EmbeddingInput;
use crate::store::EmbeddingStore;
use crate::upstream::{EmbeddingData, EmbeddingResponse, EmbeddingVector, Usage};

/// Token usage recorded on successful responses, read back by the
/// completion-log middleware.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RequestUsage(pub Usage);

/// Error string attached to 5xx responses for the completion log.
#[derive(Debug, Clone)]
pub(crate) struct HandlerErrorMessage(pub String);

/// An error response in the OpenAI wire shape.
#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    error_type: String,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, error_type: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            error_type: error_type.to_string(),
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request_error", message)
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "invalid_request_error", message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            message,
        )
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidInput(msg) => Self::bad_request(msg),
            Error::UpstreamHttp {
                status,
                error_type,
                message,
                ..
            } => Self {
                status: StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                error_type: if error_type.is_empty() {
                    "upstream_error".to_string()
                } else {
                    error_type
                },
                message,
            },
            Error::UpstreamTransport(msg) => Self::new(
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                format!("Failed to reach upstream API: {msg}"),
            ),
            Error::MalformedVector(msg) | Error::Store(msg) | Error::Config(msg) => {
                Self::internal(msg)
            }
            Error::Io(e) => Self::internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message.clone(),
                "type": self.error_type,
                "code": self.status.canonical_reason().unwrap_or("Unknown"),
            }
        }));
        let mut response = (self.status, body).into_response();
        if self.status.is_server_error() {
            response
                .extensions_mut()
                .insert(HandlerErrorMessage(self.message));
        }
        response
    }
}

#[derive(Deserialize)]
struct EmbeddingsRequest {
    #[serde(default)]
    input: Value,
    #[serde(default)]
    model: String,
    #[serde(default)]
    encoding_format: Option<String>,
    #[serde(default)]
    dimensions: Option<i64>,
}

#[derive(Clone, Copy, PartialEq)]
enum EncodingFormat {
    Float,
    Base64,
}

pub(crate) async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "invalid_request_error", "Not found")
}

pub(crate) async fn method_not_allowed() -> ApiError {
    ApiError::new(
        StatusCode::METHOD_NOT_ALLOWED,
        "invalid_request_error",
        "Method not allowed. Please use POST.",
    )
}

pub(crate) async fn create_embeddings(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if state.config.debug_body {
        tracing::debug!(payload = %String::from_utf8_lossy(&body), "request payload");
    }

    let authorization = authenticate(&state, &headers)?;

    let request: EmbeddingsRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON payload: {e}")))?;

    if request.input.is_null() || request.model.is_empty() {
        return Err(ApiError::bad_request(
            "Missing required fields: 'input' and 'model' must not be empty",
        ));
    }

    if !state.config.allowed_models.contains(&request.model) {
        return Err(ApiError::bad_request(format!(
            "Unsupported model: {}",
            request.model
        )));
    }

    let encoding_format = match request.encoding_format.as_deref() {
        None | Some("float") => EncodingFormat::Float,
        Some("base64") => EncodingFormat::Base64,
        Some(_) => {
            return Err(ApiError::bad_request(
                "Invalid encoding_format: must be either 'float' or 'base64'",
            ))
        }
    };

    if let Some(dimensions) = request.dimensions {
        if dimensions <= 1 || dimensions >= 10000 {
            return Err(ApiError::bad_request(
                "Invalid dimensions: must be greater than 1 and less than 10000",
            ));
        }
    }
    let dimension = request.dimensions.unwrap_or(0) as i32;

    let input = EmbeddingInput::from_value(&request.input)?;
    let hashes = input.content_hashes();

    // Per-input point lookups; the hit's content stays base64-encoded.
    let mut contents: Vec<Option<String>> = Vec::with_capacity(hashes.len());
    for hash in &hashes {
        let cached = state.store.get(hash, &request.model, dimension).await?;
        contents.push(cached.map(|entry| entry.content));
    }

    let miss_indexes: Vec<usize> = contents
        .iter()
        .enumerate()
        .filter_map(|(i, content)| content.is_none().then_some(i))
        .collect();

    // A full cache hit is not charged.
    let mut usage = Usage::default();

    if !miss_indexes.is_empty() {
        let sub_request = input.subset(&miss_indexes)?;
        let upstream_response = state
            .upstream
            .create_embedding(
                &sub_request,
                &request.model,
                request.dimensions.map(|d| d as u32),
                authorization,
            )
            .await?;

        if upstream_response.data.len() != miss_indexes.len() {
            return Err(Error::UpstreamTransport(format!(
                "upstream returned {} embeddings for {} inputs",
                upstream_response.data.len(),
                miss_indexes.len()
            ))
            .into());
        }
        usage = upstream_response.usage;

        for item in upstream_response.data {
            // `item.index` addresses the sub-request; map it back to the
            // position in the original input.
            let slot = *miss_indexes.get(item.index).ok_or_else(|| {
                ApiError::from(Error::UpstreamTransport(format!(
                    "upstream returned out-of-range index {}",
                    item.index
                )))
            })?;
            let content = match item.embedding {
                EmbeddingVector::Base64(encoded) => encoded,
                EmbeddingVector::Floats(values) => codec::encode_vector(&values),
            };

            if let Err(e) = state
                .store
                .put(&hashes[slot], &request.model, dimension, &content)
                .await
            {
                tracing::error!(
                    error = %e,
                    input_hash = %hashes[slot],
                    model = %request.model,
                    "failed to store cache entry"
                );
            }
            contents[slot] = Some(content);
        }
    }

    let mut data = Vec::with_capacity(contents.len());
    for (index, content) in contents.iter().enumerate() {
        let content = content
            .as_ref()
            .ok_or_else(|| ApiError::internal(format!("missing embedding for input {index}")))?;
        let embedding = match encoding_format {
            EncodingFormat::Base64 => EmbeddingVector::Base64(content.clone()),
            EncodingFormat::Float => EmbeddingVector::Floats(codec::decode_vector(content)?),
        };
        data.push(EmbeddingData {
            object: "embedding".to_string(),
            embedding,
            index,
        });
    }

    let response_body = EmbeddingResponse {
        object: "list".to_string(),
        data,
        model: request.model,
        usage,
    };

    let mut response = (StatusCode::OK, Json(response_body)).into_response();
    response.extensions_mut().insert(RequestUsage(usage));
    Ok(response)
}

/// Validate the `Authorization` header and return it for pass-through.
fn authenticate<'a>(state: &AppState, headers: &'a HeaderMap) -> Result<&'a str, ApiError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let Some(token) = authorization.strip_prefix("Bearer ") else {
        return Err(ApiError::unauthorized(
            "Missing or invalid Authorization header. Expected format: 'Bearer YOUR-API-KEY'",
        ));
    };
    if token.is_empty() {
        return Err(ApiError::unauthorized("API key is required"));
    }
    if let Some(pattern) = &state.config.api_key_pattern {
        if !pattern.is_match(token) {
            return Err(ApiError::unauthorized("Invalid API key format"));
        }
    }

    Ok(authorization)
}
