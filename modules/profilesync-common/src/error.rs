use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Failure taxonomy shared by every stage of a sync run.
///
/// Adapters (portal, sheets) classify their transport errors into these
/// variants at the boundary so the core can decide retry / record / abort
/// without looking at HTTP details.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No valid session could be produced. Fatal for the run.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Throttling persisted past the configured retry budget.
    #[error("Remote throttled after {attempts} retries")]
    RemoteThrottled { attempts: u32 },

    /// A single quota/throttle signal from a remote. Consumed by the pacer.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Network-level failure where the request is known not to have taken effect.
    #[error("Transient network error: {0}")]
    Transient(String),

    #[error("Profile not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    /// A write was sent but its outcome could not be confirmed.
    #[error("Write could not be confirmed: {0}")]
    IndeterminateWrite(String),

    #[error("Remote error (status {status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Session store error: {0}")]
    Session(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Quota/throttling signal that the pacer cools down on and retries.
    pub fn is_throttle_signal(&self) -> bool {
        matches!(self, SyncError::RateLimited(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }

    /// Errors that end the run regardless of policy.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Authentication(_) | SyncError::Config(_))
    }

    /// Short, single-line form suitable for a spreadsheet remark cell.
    pub fn remark(&self) -> String {
        match self {
            SyncError::NotFound(_) => "Not found".to_string(),
            SyncError::Parse(msg) => format!("Parse error: {}", truncate(msg, 40)),
            SyncError::IndeterminateWrite(_) => "Write unconfirmed".to_string(),
            SyncError::RemoteThrottled { attempts } => {
                format!("Throttled ({attempts} retries)")
            }
            other => format!("Error: {}", truncate(&other.to_string(), 40)),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Session(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
