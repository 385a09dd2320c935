use thiserror::Error;
use uuid::Uuid;

/// Stable error kinds for the crawl orchestrator, one variant per failure
/// surface described by the system's error-handling design: transport
/// failures, policy denials, broker outages, and malformed submissions.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("policy denied fetch of {url}: {reason}")]
    PolicyDenied { url: String, reason: String },

    #[error("failed to parse {what}: {reason}")]
    ParseError { what: String, reason: String },

    #[error("broker error: {0}")]
    Broker(#[from] redis::RedisError),

    #[error("broker connection pool error: {0}")]
    Pool(String),

    #[error("invalid job submission: {0}")]
    InvalidJob(String),

    #[error("result references unknown job {0}")]
    UnknownJob(Uuid),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
