use thiserror::Error;

use crate::upstream::Usage;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("malformed vector data: {0}")]
    MalformedVector(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("upstream returned {status}: {message}")]
    UpstreamHttp {
        status: u16,
        error_type: String,
        message: String,
        usage: Usage,
    },

    #[error("failed to reach upstream: {0}")]
    UpstreamTransport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Store(err.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Store(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::UpstreamTransport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
