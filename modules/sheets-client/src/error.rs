use thiserror::Error;

pub type Result<T> = std::result::Result<T, SheetsError>;

#[derive(Debug, Error)]
pub enum SheetsError {
    /// The request never reached the server (connect/build failure).
    #[error("Network error: {0}")]
    Network(String),

    /// The request was sent but the response was lost (timeout, reset).
    /// Writes in this state may or may not have been applied.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Rate limited (status {status}): {message}")]
    RateLimited { status: u16, message: String },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Auth error: {0}")]
    Auth(String),
}

impl SheetsError {
    /// Classify a non-success response. Quota errors surface as 429
    /// (`RESOURCE_EXHAUSTED`) or as 403 with a rate-limit reason.
    pub(crate) fn from_status(status: u16, message: String) -> Self {
        let quota = message.contains("RESOURCE_EXHAUSTED")
            || message.contains("rateLimitExceeded")
            || message.contains("RATE_LIMIT_EXCEEDED")
            || message.contains("Quota exceeded");
        if status == 429 || (status == 403 && quota) {
            SheetsError::RateLimited { status, message }
        } else {
            SheetsError::Api { status, message }
        }
    }
}

impl From<reqwest::Error> for SheetsError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_builder() {
            SheetsError::Network(err.to_string())
        } else if err.is_decode() {
            SheetsError::Parse(err.to_string())
        } else {
            SheetsError::ConnectionLost(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SheetsError {
    fn from(err: serde_json::Error) -> Self {
        SheetsError::Parse(err.to_string())
    }
}
