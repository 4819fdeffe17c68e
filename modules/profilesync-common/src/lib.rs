pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use config::{Config, Credentials, GoogleCredentials, PersistenceMode};
pub use error::{Result, SyncError};
pub use types::*;
