use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("persistence error: {0}")]
    Persistence(#[from] serde_json::Error),
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("logging setup failed: {0}")]
    Logging(String),
}

/// Failure reported by a signal source. The integration manager treats any of
/// these as "skip this source".
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalError {
    #[error("signal source unavailable: {0}")]
    Unavailable(String),
    #[error("{source_name} produced invalid value {value}")]
    InvalidState { source_name: &'static str, value: f64 },
}
