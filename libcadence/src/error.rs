//! Error types for Cadence

use std::collections::BTreeMap;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CadenceError>;

/// Field-level validation details reported by a platform
/// (e.g. `{"content": ["Content is too long for this platform"]}`).
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Error, Debug)]
pub enum CadenceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl CadenceError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CadenceError::InvalidInput(_) | CadenceError::NotFound(_) => 3,
            CadenceError::Config(_) => 2,
            CadenceError::Database(_) | CadenceError::Queue(_) | CadenceError::Publish(_) => 1,
        }
    }
}

impl From<sqlx::Error> for CadenceError {
    fn from(err: sqlx::Error) -> Self {
        CadenceError::Database(DbError::SqlxError(err))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Malformed task payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Errors a publisher can report for a single platform call.
///
/// These are data, not control flow: the retry policy classifies them into
/// permanent, throttled and transient outcomes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    #[error("Validation failed: {}", format_field_errors(.0))]
    Validation(FieldErrors),

    #[error("Rate limit exceeded{}", format_retry_after(.retry_after))]
    RateLimit { retry_after: Option<u64> },

    #[error("Server error: {0}")]
    Server(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl PublishError {
    /// Build a validation error for a single field
    pub fn validation(field: &str, message: &str) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.to_string()]);
        PublishError::Validation(errors)
    }
}

fn format_retry_after(retry_after: &Option<u64>) -> String {
    match retry_after {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    }
}

fn format_field_errors(errors: &FieldErrors) -> String {
    errors
        .iter()
        .map(|(field, messages)| format!("{}: {}", field, messages.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}
