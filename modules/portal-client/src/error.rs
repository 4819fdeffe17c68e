use thiserror::Error;

pub type Result<T> = std::result::Result<T, PortalError>;

#[derive(Debug, Error)]
pub enum PortalError {
    /// The request never reached the server.
    #[error("Network error: {0}")]
    Network(String),

    /// The request was sent but no complete response arrived (timeout, reset).
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Rate limited (status {status})")]
    RateLimited { status: u16 },

    #[error("Profile not found: {0}")]
    NotFound(String),

    /// Credentials were submitted but the platform kept us on the login page.
    #[error("Login rejected for {0}")]
    LoginRejected(String),

    /// An authenticated page bounced us to the login form.
    #[error("Session expired")]
    SessionExpired,

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for PortalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_builder() {
            PortalError::Network(err.to_string())
        } else {
            PortalError::ConnectionLost(err.to_string())
        }
    }
}

impl From<url::ParseError> for PortalError {
    fn from(err: url::ParseError) -> Self {
        PortalError::Parse(err.to_string())
    }
}
