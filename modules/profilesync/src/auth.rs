use std::sync::Arc;

use tracing::{info, warn};

use profilesync_common::{Credentials, Result, SyncError};

use crate::session::Session;
use crate::session_store::SessionStore;
use crate::traits::SessionProvider;

/// Produces a valid session for the run: the persisted one if it still
/// works, otherwise a fresh login with each configured credential set in turn.
pub struct Authenticator {
    provider: Arc<dyn SessionProvider>,
    store: Arc<dyn SessionStore>,
    credentials: Vec<Credentials>,
}

impl Authenticator {
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        store: Arc<dyn SessionStore>,
        credentials: Vec<Credentials>,
    ) -> Self {
        Self {
            provider,
            store,
            credentials,
        }
    }

    pub async fn authenticate(&self) -> Result<Session> {
        info!("Starting authentication");

        if let Some(mut session) = self.store.restore() {
            match self.probe_with_retry(&session).await {
                Ok(true) => {
                    session.mark_valid();
                    info!(account = session.account.as_str(), "Persisted session is valid");
                    return Ok(session);
                }
                Ok(false) => {
                    session.mark_invalid();
                    info!("Persisted session expired, logging in");
                }
                Err(e) => {
                    warn!(error = %e, "Could not validate persisted session, logging in");
                }
            }
        }

        let session = self.fresh_login().await?;
        if let Err(e) = self.store.persist(&session) {
            warn!(error = %e, "Failed to persist session; continuing with it in memory");
        }
        Ok(session)
    }

    /// A probe that fails in transit says nothing about the session, so it
    /// gets one more try before we give up on it.
    async fn probe_with_retry(&self, session: &Session) -> Result<bool> {
        match self.provider.probe(session).await {
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Session probe failed in transit, retrying once");
                self.provider.probe(session).await
            }
            other => other,
        }
    }

    async fn fresh_login(&self) -> Result<Session> {
        let mut last_error = None;

        for credentials in &self.credentials {
            info!(account = credentials.label.as_str(), "Attempting login");
            match self.provider.login(credentials).await {
                Ok(mut session) => {
                    session.mark_valid();
                    info!(account = credentials.label.as_str(), "Login successful");
                    return Ok(session);
                }
                Err(e) => {
                    warn!(account = credentials.label.as_str(), error = %e, "Login failed");
                    last_error = Some(e);
                }
            }
        }

        Err(SyncError::Authentication(match last_error {
            Some(e) => format!(
                "all {} credential set(s) failed, last error: {e}",
                self.credentials.len()
            ),
            None => "no credentials configured".to_string(),
        }))
    }
}
