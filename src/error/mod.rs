use thiserror::Error;

/// Errors surfaced by the delivery engine.
///
/// `Config` and `NotFound` are fatal and raised before any campaign state
/// mutation. Per-recipient and batch-level delivery failures never appear
/// here: they are absorbed into the campaign-send ledger and counted in the
/// run's `SendReport`.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
