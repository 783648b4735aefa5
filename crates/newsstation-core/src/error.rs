use std::fmt;

use thiserror::Error;

/// Why a source adapter could not produce articles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailureKind {
    /// Network error or non-success HTTP status
    Unreachable,
    /// The adapter call exceeded the configured timeout
    Timeout,
    /// The upstream answered but the payload could not be understood
    Invalid,
    /// The upstream answered with nothing usable
    Empty,
}

impl fmt::Display for FetchFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FetchFailureKind::Unreachable => "unreachable",
            FetchFailureKind::Timeout => "timed out",
            FetchFailureKind::Invalid => "returned invalid data",
            FetchFailureKind::Empty => "returned no items",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Source '{source_id}' {kind}: {message}")]
    Fetch {
        source_id: String,
        kind: FetchFailureKind,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid parameter: {0}")]
    Validation(String),

    #[error("Content unavailable: {0}")]
    ContentUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn fetch(source_id: &str, kind: FetchFailureKind, message: impl Into<String>) -> Self {
        Error::Fetch {
            source_id: source_id.to_string(),
            kind,
            message: message.into(),
        }
    }

    /// HTTP status code the API layer answers with for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            Error::ContentUnavailable(_) | Error::Fetch { .. } => 503,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
