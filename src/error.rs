//! Error types for the wellbeing/vitals pipeline

use thiserror::Error;

/// Errors that can occur while running a pipeline stage
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[cfg(feature = "db")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Missing column in checkpoint: {0}")]
    MissingColumn(String),

    #[error("Malformed value in column {column}: {value:?}")]
    MalformedField { column: String, value: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Duplicate key ({user_id}, {device_id}, {date}) in vital table")]
    DuplicateKey {
        user_id: i64,
        device_id: i32,
        date: chrono::NaiveDate,
    },

    #[error("Date out of range: {0}")]
    DateOutOfRange(String),
}

impl PipelineError {
    pub(crate) fn malformed(column: &str, value: &str) -> Self {
        PipelineError::MalformedField {
            column: column.to_string(),
            value: value.to_string(),
        }
    }
}
