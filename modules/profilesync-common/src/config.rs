use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SyncError};

const DEFAULT_PORTAL_BASE_URL: &str = "https://damadam.pk";
const DEFAULT_GOOGLE_CREDENTIALS_FILE: &str = "credentials.json";

/// One login credential pair. Debug output never shows the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub label: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(label: &str, username: &str, password: &str) -> Self {
        Self {
            label: label.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("label", &self.label)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where session state lives between runs. Selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceMode {
    /// Session blob is written to disk and restored on the next run.
    Durable,
    /// Session lives only in memory for the duration of the run.
    Ephemeral,
}

impl PersistenceMode {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "durable" => Ok(Self::Durable),
            "ephemeral" => Ok(Self::Ephemeral),
            other => Err(SyncError::Config(format!(
                "SESSION_PERSISTENCE must be 'durable' or 'ephemeral', got '{other}'"
            ))),
        }
    }
}

/// Service-account key material for the spreadsheet API.
#[derive(Clone, PartialEq, Eq)]
pub enum GoogleCredentials {
    File(PathBuf),
    /// Raw JSON (already base64-decoded if it arrived encoded).
    Inline(String),
}

impl fmt::Debug for GoogleCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Inline(json) => write!(f, "Inline(<{} chars>)", json.len()),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Platform
    pub portal_base_url: String,
    pub primary: Credentials,
    pub secondary: Option<Credentials>,

    // Remote store
    pub sheet_location: String,
    pub google_credentials: GoogleCredentials,

    // Queue
    /// 0 = unbounded.
    pub max_profiles: usize,
    /// 0 = no batch pause.
    pub batch_size: usize,
    pub batch_pause: Duration,

    // Pacing
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub throttle_cooldown: Duration,
    pub max_throttle_retries: u32,
    pub throttle_fatal: bool,

    // Session
    pub persistence: PersistenceMode,
    pub session_file: PathBuf,
}

impl Config {
    /// Load configuration from the process environment, after merging `.env`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| get(key).map(|v| clean(&v)).filter(|v| !v.is_empty());

        let primary = Credentials::new(
            "primary",
            &var("PORTAL_USERNAME").unwrap_or_default(),
            &var("PORTAL_PASSWORD").unwrap_or_default(),
        );
        let secondary = match (var("PORTAL_USERNAME_2"), var("PORTAL_PASSWORD_2")) {
            (Some(user), Some(pass)) => Some(Credentials::new("secondary", &user, &pass)),
            _ => None,
        };

        let google_credentials = match var("GOOGLE_CREDENTIALS_JSON").or_else(|| var("GOOGLE_CREDENTIALS")) {
            Some(raw) => GoogleCredentials::Inline(raw),
            None => GoogleCredentials::File(PathBuf::from(
                var("GOOGLE_APPLICATION_CREDENTIALS")
                    .unwrap_or_else(|| DEFAULT_GOOGLE_CREDENTIALS_FILE.to_string()),
            )),
        };

        let is_ci = var("CI").is_some() || var("GITHUB_ACTIONS").is_some();
        let persistence = match var("SESSION_PERSISTENCE") {
            Some(mode) => PersistenceMode::parse(&mode)?,
            None if is_ci => PersistenceMode::Ephemeral,
            None => PersistenceMode::Durable,
        };

        let data_dir = PathBuf::from(var("DATA_DIR").unwrap_or_else(|| "data".to_string()));
        let session_file = var("SESSION_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("session.json"));

        let config = Self {
            portal_base_url: var("PORTAL_BASE_URL")
                .unwrap_or_else(|| DEFAULT_PORTAL_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            primary,
            secondary,
            sheet_location: var("GOOGLE_SHEET_URL").unwrap_or_default(),
            google_credentials,
            max_profiles: parse_or(&var, "MAX_PROFILES_PER_RUN", 0)?,
            batch_size: parse_or(&var, "BATCH_SIZE", 20)?,
            batch_pause: secs(parse_or(&var, "BATCH_PAUSE_SECS", 3.0)?, "BATCH_PAUSE_SECS")?,
            min_delay: secs(parse_or(&var, "MIN_DELAY", 0.3)?, "MIN_DELAY")?,
            max_delay: secs(parse_or(&var, "MAX_DELAY", 0.5)?, "MAX_DELAY")?,
            throttle_cooldown: secs(
                parse_or(&var, "THROTTLE_COOLDOWN_SECS", 60.0)?,
                "THROTTLE_COOLDOWN_SECS",
            )?,
            max_throttle_retries: parse_or(&var, "MAX_THROTTLE_RETRIES", 3)?,
            throttle_fatal: parse_or(&var, "THROTTLE_FATAL", false)?,
            persistence,
            session_file,
        };

        config.validate()?;
        Ok(config)
    }

    /// Credential sets in the order they should be tried.
    pub fn credential_sets(&self) -> Vec<Credentials> {
        std::iter::once(self.primary.clone())
            .chain(self.secondary.clone())
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.primary.username.is_empty() || self.primary.password.is_empty() {
            return Err(SyncError::Config(
                "PORTAL_USERNAME and PORTAL_PASSWORD are required".to_string(),
            ));
        }
        if self.sheet_location.is_empty() {
            return Err(SyncError::Config("GOOGLE_SHEET_URL is required".to_string()));
        }
        if self.min_delay > self.max_delay {
            return Err(SyncError::Config(format!(
                "MIN_DELAY ({:?}) must not exceed MAX_DELAY ({:?})",
                self.min_delay, self.max_delay
            )));
        }
        Ok(())
    }

    pub fn log_redacted(&self) {
        fn preview(val: &str) -> String {
            let n = val.chars().take(5).collect::<String>();
            format!("{}...({} chars)", n, val.len())
        }

        tracing::info!("Config loaded:");
        tracing::info!("  PORTAL_BASE_URL: {}", self.portal_base_url);
        tracing::info!("  PORTAL_USERNAME: {}", self.primary.username);
        tracing::info!("  PORTAL_PASSWORD: {}", preview(&self.primary.password));
        tracing::info!(
            "  PORTAL_USERNAME_2: {}",
            self.secondary.as_ref().map_or("<not set>", |c| c.username.as_str())
        );
        tracing::info!("  GOOGLE_SHEET_URL: {}", preview(&self.sheet_location));
        tracing::info!("  GOOGLE_CREDENTIALS: {:?}", self.google_credentials);
        tracing::info!(
            max_profiles = self.max_profiles,
            batch_size = self.batch_size,
            min_delay_ms = self.min_delay.as_millis() as u64,
            max_delay_ms = self.max_delay.as_millis() as u64,
            throttle_cooldown_secs = self.throttle_cooldown.as_secs(),
            max_throttle_retries = self.max_throttle_retries,
            persistence = ?self.persistence,
            "  Run settings"
        );
    }
}

/// Strip surrounding whitespace and quotes, as `.env` files often carry them.
fn clean(value: &str) -> String {
    value.trim().trim_matches('"').trim_matches('\'').to_string()
}

fn parse_or<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match var(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| SyncError::Config(format!("{key} has an invalid value: '{raw}'"))),
    }
}

fn secs(value: f64, key: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| SyncError::Config(format!("{key} must be a non-negative number of seconds")))
}
