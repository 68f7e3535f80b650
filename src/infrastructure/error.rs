use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid date: {0}")]
    InvalidDate(String),
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("Dispatch error: {0}")]
    Dispatch(String),
    #[error("Calendar error: {0}")]
    Calendar(String),
    #[error("Callback error: {0}")]
    Callback(String),
}
