//! HTTP surface: the `/v1/embeddings` route and the server around it.

pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState, ServeConfig};
