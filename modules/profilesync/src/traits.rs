// Trait seams for the sync core's collaborators.
//
// SessionProvider: login and probe against the platform.
// ProfileScraper: one target identifier in, one ProfileRecord out; also
//   lists who is online right now.
// RemoteTable: row-level access to the spreadsheet regions.
//
// The real clients implement these below and classify their transport
// errors into `SyncError` on the way out. Tests swap in the mocks from
// `testing`.

use async_trait::async_trait;

use portal_client::{PortalClient, PortalError};
use profilesync_common::{Credentials, ProfileRecord, Region, Result, SyncError};
use sheets_client::{a1_range, column_letter, SheetsClient, SheetsError};

use crate::session::Session;

// ---------------------------------------------------------------------------
// SessionProvider
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Submit one credential set. Success means the platform showed the
    /// authenticated state afterwards.
    async fn login(&self, credentials: &Credentials) -> Result<Session>;

    /// One lightweight authenticated request. `Ok(false)` means the session
    /// was rejected; `Err` means the probe itself didn't complete.
    async fn probe(&self, session: &Session) -> Result<bool>;
}

#[async_trait]
impl SessionProvider for PortalClient {
    async fn login(&self, credentials: &Credentials) -> Result<Session> {
        let cookies = PortalClient::login(self, &credentials.username, &credentials.password)
            .await
            .map_err(classify_portal)?;
        Ok(Session::fresh(&credentials.label, cookies))
    }

    async fn probe(&self, session: &Session) -> Result<bool> {
        PortalClient::probe(self, &session.cookies)
            .await
            .map_err(classify_portal)
    }
}

// ---------------------------------------------------------------------------
// ProfileScraper
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ProfileScraper: Send + Sync {
    /// Scrape one profile. `NotFound` and `Parse` are per-target outcomes.
    async fn scrape(&self, session: &Session, nickname: &str) -> Result<ProfileRecord>;

    /// Nicknames on the platform's online-users list, in page order.
    async fn online_nicknames(&self, session: &Session) -> Result<Vec<String>>;
}

#[async_trait]
impl ProfileScraper for PortalClient {
    async fn scrape(&self, session: &Session, nickname: &str) -> Result<ProfileRecord> {
        self.fetch_profile(&session.cookies, nickname)
            .await
            .map_err(classify_portal)
    }

    async fn online_nicknames(&self, session: &Session) -> Result<Vec<String>> {
        PortalClient::online_nicknames(self, &session.cookies)
            .await
            .map_err(classify_portal)
    }
}

fn classify_portal(err: PortalError) -> SyncError {
    match err {
        PortalError::Network(msg) | PortalError::ConnectionLost(msg) => SyncError::Transient(msg),
        PortalError::RateLimited { status } => {
            SyncError::RateLimited(format!("platform answered {status}"))
        }
        PortalError::NotFound(nick) => SyncError::NotFound(nick),
        PortalError::LoginRejected(user) => {
            SyncError::Authentication(format!("login rejected for {user}"))
        }
        PortalError::SessionExpired => {
            SyncError::Authentication("session expired mid-run".to_string())
        }
        PortalError::Api { status, message } => SyncError::Remote { status, message },
        PortalError::Parse(msg) => SyncError::Parse(msg),
    }
}

// ---------------------------------------------------------------------------
// RemoteTable
// ---------------------------------------------------------------------------

/// Row access to the spreadsheet. Rows are 1-based sheet rows (the header is
/// row 1); columns are addressed by header name.
#[async_trait]
pub trait RemoteTable: Send + Sync {
    /// Every row of a region, header included, in stored order.
    async fn read_rows(&self, region: Region) -> Result<Vec<Vec<String>>>;

    /// One column top to bottom, header included. Index `i` is row `i + 1`.
    async fn scan_column(&self, region: Region, column: &str) -> Result<Vec<String>>;

    /// Append a row after the last one. Returns the row it landed on.
    async fn append_row(&self, region: Region, row: Vec<String>) -> Result<usize>;

    async fn read_note(&self, region: Region, row: usize, column: &str) -> Result<Option<String>>;

    /// Replace the note attached to one cell.
    async fn write_note(&self, region: Region, row: usize, column: &str, note: &str) -> Result<()>;

    /// Overwrite consecutive cells of one row, starting at `column`.
    async fn update_cells(
        &self,
        region: Region,
        row: usize,
        column: &str,
        values: Vec<String>,
    ) -> Result<()>;

    /// Create the region if it doesn't exist yet. Returns whether it was created.
    async fn ensure_region(&self, region: Region) -> Result<bool>;
}

#[async_trait]
impl RemoteTable for SheetsClient {
    async fn read_rows(&self, region: Region) -> Result<Vec<Vec<String>>> {
        self.get_values(&sheet_range(region, ""))
            .await
            .map_err(|e| classify_sheets(e, false))
    }

    async fn scan_column(&self, region: Region, column: &str) -> Result<Vec<String>> {
        let letter = column_letter(column_index(region, column)?);
        let rows = self
            .get_values(&sheet_range(region, &format!("{letter}:{letter}")))
            .await
            .map_err(|e| classify_sheets(e, false))?;
        Ok(rows
            .into_iter()
            .map(|r| r.into_iter().next().unwrap_or_default())
            .collect())
    }

    async fn append_row(&self, region: Region, row: Vec<String>) -> Result<usize> {
        let appended = SheetsClient::append_row(self, &sheet_range(region, "A1"), row)
            .await
            .map_err(|e| classify_sheets(e, true))?;
        Ok(appended.first_row)
    }

    async fn read_note(&self, region: Region, row: usize, column: &str) -> Result<Option<String>> {
        let col = column_index(region, column)?;
        self.get_note(region.sheet_name(), row, col)
            .await
            .map_err(|e| classify_sheets(e, false))
    }

    async fn write_note(&self, region: Region, row: usize, column: &str, note: &str) -> Result<()> {
        let col = column_index(region, column)?;
        self.set_note(region.sheet_name(), row, col, note)
            .await
            .map_err(|e| classify_sheets(e, false))
    }

    async fn update_cells(
        &self,
        region: Region,
        row: usize,
        column: &str,
        values: Vec<String>,
    ) -> Result<()> {
        let first = column_index(region, column)?;
        let last = first + values.len().saturating_sub(1);
        let cells = format!("{}{row}:{}{row}", column_letter(first), column_letter(last));
        self.update_values(&sheet_range(region, &cells), vec![values])
            .await
            .map_err(|e| classify_sheets(e, false))
    }

    async fn ensure_region(&self, region: Region) -> Result<bool> {
        let existing = self
            .sheet_id(region.sheet_name())
            .await
            .map_err(|e| classify_sheets(e, false))?;
        if existing.is_some() {
            return Ok(false);
        }
        self.add_sheet(region.sheet_name())
            .await
            .map_err(|e| classify_sheets(e, false))?;
        Ok(true)
    }
}

fn sheet_range(region: Region, cells: &str) -> String {
    a1_range(region.sheet_name(), cells)
}

fn column_index(region: Region, column: &str) -> Result<usize> {
    region
        .column_index(column)
        .ok_or_else(|| SyncError::Config(format!("no column '{column}' in region {region}")))
}

/// Map a spreadsheet error onto the core taxonomy. For appends, anything that
/// leaves the outcome unknown (response lost, server error, unreadable reply)
/// is an indeterminate write rather than a retryable failure.
fn classify_sheets(err: SheetsError, append: bool) -> SyncError {
    match err {
        SheetsError::RateLimited { status, message } => {
            SyncError::RateLimited(format!("spreadsheet answered {status}: {message}"))
        }
        SheetsError::Network(msg) => SyncError::Transient(msg),
        SheetsError::ConnectionLost(msg) if append => SyncError::IndeterminateWrite(msg),
        SheetsError::ConnectionLost(msg) => SyncError::Transient(msg),
        SheetsError::Api { status, message } if append && status >= 500 => {
            SyncError::IndeterminateWrite(format!("status {status}: {message}"))
        }
        SheetsError::Api { status, message } if status >= 500 => SyncError::Transient(message),
        SheetsError::Api { status, message } => SyncError::Remote { status, message },
        SheetsError::Parse(msg) if append => SyncError::IndeterminateWrite(msg),
        SheetsError::Parse(msg) => SyncError::Parse(msg),
        SheetsError::Auth(msg) => SyncError::Authentication(format!("spreadsheet: {msg}")),
    }
}
