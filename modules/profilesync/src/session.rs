use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use portal_client::CookieJar;

/// Whether a session has been checked against the platform in this run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Loaded from persistence, not yet probed.
    #[default]
    Untested,
    Valid,
    Invalid,
}

/// Authenticated platform state: the cookie set plus when it was issued.
///
/// Only the cookies, issue time and account label are persisted. The state
/// is per-run, so a restored session always starts `Untested`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    pub cookies: CookieJar,
    pub issued_at: DateTime<Utc>,
    /// Label of the credential set that produced this session.
    pub account: String,
    #[serde(skip)]
    state: SessionState,
}

impl Session {
    /// A session produced by a successful login in this run.
    pub fn fresh(account: &str, cookies: CookieJar) -> Self {
        Self {
            cookies,
            issued_at: Utc::now(),
            account: account.to_string(),
            state: SessionState::Valid,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_valid(&self) -> bool {
        self.state == SessionState::Valid
    }

    pub fn mark_valid(&mut self) {
        self.state = SessionState::Valid;
    }

    pub fn mark_invalid(&mut self) {
        self.state = SessionState::Invalid;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("account", &self.account)
            .field("issued_at", &self.issued_at)
            .field("cookies", &format_args!("<{} cookies>", self.cookies.len()))
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restored_sessions_start_untested() {
        let mut cookies = CookieJar::new();
        cookies.insert("sessionid", "abc");
        let session = Session::fresh("primary", cookies);
        assert!(session.is_valid());

        let json = serde_json::to_string(&session).unwrap();
        let restored: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.state(), SessionState::Untested);
        assert_eq!(restored.cookies.get("sessionid"), Some("abc"));
        assert_eq!(restored.account, "primary");
    }

    #[test]
    fn debug_output_hides_cookie_values() {
        let mut cookies = CookieJar::new();
        cookies.insert("sessionid", "s3cret");
        let session = Session::fresh("primary", cookies);
        assert!(!format!("{session:?}").contains("s3cret"));
    }
}
