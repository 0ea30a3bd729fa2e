use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("insufficient data: need {required} observations, got {got}")]
    InsufficientData { required: usize, got: usize },

    #[error("secondary estimator unavailable: {0}")]
    SecondaryUnavailable(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("feed error: {0}")]
    Feed(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Recoverable conditions the caller should retry later rather than escalate.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InsufficientData { .. } | Self::SecondaryUnavailable(_) | Self::Feed(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}
