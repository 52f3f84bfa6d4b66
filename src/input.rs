//! Classification and content-addressing of the polymorphic `input` field.
//!
//! A request's `input` is one of four JSON shapes: a string, an array of
//! strings, an integer token sequence, or an array of token sequences. Each
//! shape yields an ordered list of logical inputs; every logical input has a
//! canonical byte form whose SHA-1 is its cache key. The enum also rebuilds
//! a sub-request in the original shape for the subset of inputs that missed
//! the cache.

use serde::Serialize;
use serde_json::Value;
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// The `input` field of an embedding request, classified by shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    /// A single string: one logical input.
    Single(String),
    /// An array of strings: one logical input per element.
    Batch(Vec<String>),
    /// A single token sequence: one logical input.
    Tokens(Vec<i64>),
    /// An array of token sequences: one logical input per inner array.
    TokenBatches(Vec<Vec<i64>>),
}

impl EmbeddingInput {
    /// Classify a decoded JSON value by inspecting the first element's type.
    ///
    /// Empty arrays, mixed element types, nested strings, and non-integer
    /// numbers in token position are all rejected.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(EmbeddingInput::Single(s.clone())),
            Value::Array(items) => {
                let first = items
                    .first()
                    .ok_or_else(|| Error::InvalidInput("input array must not be empty".into()))?;
                match first {
                    Value::String(_) => {
                        let mut strings = Vec::with_capacity(items.len());
                        for (i, item) in items.iter().enumerate() {
                            match item {
                                Value::String(s) => strings.push(s.clone()),
                                other => {
                                    return Err(Error::InvalidInput(format!(
                                        "expected string at index {i}, got {}",
                                        type_name(other)
                                    )))
                                }
                            }
                        }
                        Ok(EmbeddingInput::Batch(strings))
                    }
                    Value::Number(_) => Ok(EmbeddingInput::Tokens(parse_tokens(items)?)),
                    Value::Array(_) => {
                        let mut batches = Vec::with_capacity(items.len());
                        for (i, item) in items.iter().enumerate() {
                            match item {
                                Value::Array(inner) => batches.push(parse_tokens(inner)?),
                                other => {
                                    return Err(Error::InvalidInput(format!(
                                        "expected token array at index {i}, got {}",
                                        type_name(other)
                                    )))
                                }
                            }
                        }
                        Ok(EmbeddingInput::TokenBatches(batches))
                    }
                    other => Err(Error::InvalidInput(format!(
                        "unsupported array element type: {}",
                        type_name(other)
                    ))),
                }
            }
            other => Err(Error::InvalidInput(format!(
                "unsupported input type: {}",
                type_name(other)
            ))),
        }
    }

    /// Number of logical inputs; the response must carry exactly this many
    /// embeddings.
    pub fn len(&self) -> usize {
        match self {
            EmbeddingInput::Single(_) | EmbeddingInput::Tokens(_) => 1,
            EmbeddingInput::Batch(items) => items.len(),
            EmbeddingInput::TokenBatches(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lowercase-hex SHA-1 per logical input, in input order.
    pub fn content_hashes(&self) -> Vec<String> {
        match self {
            EmbeddingInput::Single(s) => vec![sha1_hex(s.as_bytes())],
            EmbeddingInput::Batch(items) => {
                items.iter().map(|s| sha1_hex(s.as_bytes())).collect()
            }
            EmbeddingInput::Tokens(tokens) => vec![sha1_hex(canonical_tokens(tokens).as_bytes())],
            EmbeddingInput::TokenBatches(batches) => batches
                .iter()
                .map(|tokens| sha1_hex(canonical_tokens(tokens).as_bytes()))
                .collect(),
        }
    }

    /// Rebuild a request containing only the logical inputs at `indexes`,
    /// preserving the original shape. Scalar shapes only admit `[0]`.
    pub fn subset(&self, indexes: &[usize]) -> Result<EmbeddingInput> {
        match self {
            EmbeddingInput::Single(_) | EmbeddingInput::Tokens(_) => {
                if indexes.len() != 1 || indexes[0] != 0 {
                    return Err(Error::InvalidInput(format!(
                        "invalid subset {indexes:?} for a single input"
                    )));
                }
                Ok(self.clone())
            }
            EmbeddingInput::Batch(items) => Ok(EmbeddingInput::Batch(pick(items, indexes)?)),
            EmbeddingInput::TokenBatches(items) => {
                Ok(EmbeddingInput::TokenBatches(pick(items, indexes)?))
            }
        }
    }
}

fn pick<T: Clone>(items: &[T], indexes: &[usize]) -> Result<Vec<T>> {
    indexes
        .iter()
        .map(|&i| {
            items
                .get(i)
                .cloned()
                .ok_or_else(|| Error::InvalidInput(format!("input index {i} out of range")))
        })
        .collect()
}

fn parse_tokens(items: &[Value]) -> Result<Vec<i64>> {
    if items.is_empty() {
        return Err(Error::InvalidInput("token array must not be empty".into()));
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Number(n) => n.as_i64().ok_or_else(|| {
                Error::InvalidInput(format!("token at index {i} is not an integer: {n}"))
            }),
            other => Err(Error::InvalidInput(format!(
                "expected integer at index {i}, got {}",
                type_name(other)
            ))),
        })
        .collect()
}

/// Canonical byte form of a token sequence: decimal digits joined by commas.
fn canonical_tokens(tokens: &[i64]) -> String {
    tokens
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn sha1_hex(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
