//! Client for the upstream OpenAI-compatible embeddings API.
//!
//! One POST per cache fill. Vectors are always requested as base64 so
//! cached content can be stored verbatim; the client's `Authorization`
//! header passes through untouched.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::input::EmbeddingInput;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Token accounting as reported by the upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub total_tokens: u64,
}

/// One embedding as the upstream may return it: a base64 string or a plain
/// float array, depending on the `encoding_format` it honored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingVector {
    Base64(String),
    Floats(Vec<f32>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingData {
    pub object: String,
    pub embedding: EmbeddingVector,
    pub index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub object: String,
    pub data: Vec<EmbeddingData>,
    pub model: String,
    pub usage: Usage,
}

#[derive(Serialize)]
struct UpstreamRequest<'a> {
    input: &'a EmbeddingInput,
    model: &'a str,
    encoding_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<u32>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

pub struct UpstreamClient {
    client: reqwest::Client,
    url: String,
}

impl UpstreamClient {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("failed to build upstream client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// POST the given inputs and return the parsed response.
    ///
    /// Non-2xx responses become `Error::UpstreamHttp` carrying the status,
    /// error type, message, and usage the upstream reported; anything that
    /// prevents reaching or reading the upstream becomes
    /// `Error::UpstreamTransport`.
    pub async fn create_embedding(
        &self,
        input: &EmbeddingInput,
        model: &str,
        dimensions: Option<u32>,
        authorization: &str,
    ) -> Result<EmbeddingResponse> {
        let request = UpstreamRequest {
            input,
            model,
            encoding_format: "base64",
            dimensions,
        };

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        match response.json::<ErrorBody>().await {
            Ok(body) => Err(Error::UpstreamHttp {
                status: status.as_u16(),
                error_type: body.error.error_type,
                message: body.error.message,
                usage: body.usage.unwrap_or_default(),
            }),
            Err(e) => Err(Error::UpstreamTransport(format!(
                "upstream returned {status} with unreadable error body: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embedding_vector_parses_both_forms() {
        let base64: EmbeddingVector = serde_json::from_value(json!("AAAAPgAAgD4AAAA/")).unwrap();
        assert!(matches!(base64, EmbeddingVector::Base64(_)));

        let floats: EmbeddingVector = serde_json::from_value(json!([0.125, 0.25])).unwrap();
        match floats {
            EmbeddingVector::Floats(v) => assert_eq!(v, vec![0.125, 0.25]),
            other => panic!("expected floats, got {other:?}"),
        }
    }

    #[test]
    fn request_serializes_original_input_shape() {
        let input = EmbeddingInput::TokenBatches(vec![vec![1, 2], vec![3, 4]]);
        let request = UpstreamRequest {
            input: &input,
            model: "text-embedding-3-small",
            encoding_format: "base64",
            dimensions: None,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "input": [[1, 2], [3, 4]],
                "model": "text-embedding-3-small",
                "encoding_format": "base64",
            })
        );
    }

    #[test]
    fn error_body_parses_with_and_without_usage() {
        let body: ErrorBody = serde_json::from_value(json!({
            "error": {"message": "Rate limit exceeded", "type": "rate_limit_error", "code": "rate_limit_exceeded"}
        }))
        .unwrap();
        assert_eq!(body.error.error_type, "rate_limit_error");
        assert!(body.usage.is_none());

        let body: ErrorBody = serde_json::from_value(json!({
            "error": {"message": "boom", "type": "server_error"},
            "usage": {"prompt_tokens": 3, "total_tokens": 3}
        }))
        .unwrap();
        assert_eq!(body.usage.unwrap().total_tokens, 3);
    }
}
