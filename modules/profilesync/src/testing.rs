// Test mocks for the sync core.
//
// Three mocks matching the three trait boundaries:
// - MockSessionProvider (SessionProvider): scripted probe results, accepted usernames
// - MockScraper (ProfileScraper): nickname → canned record or failure, plus an online list
// - MockTable (RemoteTable): in-memory regions and cell notes

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use portal_client::CookieJar;
use profilesync_common::{Credentials, ProfileRecord, Region, Result, SyncError};

use crate::session::Session;
use crate::traits::{ProfileScraper, RemoteTable, SessionProvider};

/// A minimal verified record with a fixed capture time.
pub fn record(nickname: &str) -> ProfileRecord {
    let mut record = ProfileRecord::new(nickname);
    record.captured_at = Utc
        .with_ymd_and_hms(2026, 10, 15, 5, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    record
}

// ---------------------------------------------------------------------------
// MockSessionProvider
// ---------------------------------------------------------------------------

/// Probe results are served in order (`Ok(false)` once exhausted). Logins
/// succeed only for usernames registered with `.accept()`.
pub struct MockSessionProvider {
    probes: Mutex<VecDeque<Result<bool>>>,
    accepted: HashSet<String>,
    probe_calls: AtomicUsize,
    login_calls: AtomicUsize,
}

impl MockSessionProvider {
    pub fn new() -> Self {
        Self {
            probes: Mutex::new(VecDeque::new()),
            accepted: HashSet::new(),
            probe_calls: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
        }
    }

    pub fn on_probe(self, result: Result<bool>) -> Self {
        self.probes.lock().unwrap().push_back(result);
        self
    }

    pub fn accept(mut self, username: &str) -> Self {
        self.accepted.insert(username.to_string());
        self
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockSessionProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionProvider for MockSessionProvider {
    async fn login(&self, credentials: &Credentials) -> Result<Session> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if !self.accepted.contains(&credentials.username) {
            return Err(SyncError::Authentication(format!(
                "login rejected for {}",
                credentials.username
            )));
        }
        let mut cookies = CookieJar::new();
        cookies.insert("sessionid", format!("session-{}", credentials.username));
        Ok(Session::fresh(&credentials.label, cookies))
    }

    async fn probe(&self, _session: &Session) -> Result<bool> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        self.probes.lock().unwrap().pop_front().unwrap_or(Ok(false))
    }
}

// ---------------------------------------------------------------------------
// MockScraper
// ---------------------------------------------------------------------------

enum Scripted {
    Record(ProfileRecord),
    NotFound,
    ParseError(String),
    /// Throttle this many times, then return a record.
    ThrottleThen(usize, ProfileRecord),
}

/// HashMap-based scraper. Unregistered nicknames scrape to a minimal record
/// for that nickname.
pub struct MockScraper {
    scripts: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<Vec<String>>,
    online: Mutex<Option<Result<Vec<String>>>>,
}

impl MockScraper {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            online: Mutex::new(None),
        }
    }

    pub fn on_profile(self, nickname: &str, record: ProfileRecord) -> Self {
        self.script(nickname, Scripted::Record(record))
    }

    pub fn on_not_found(self, nickname: &str) -> Self {
        self.script(nickname, Scripted::NotFound)
    }

    pub fn on_parse_error(self, nickname: &str, message: &str) -> Self {
        self.script(nickname, Scripted::ParseError(message.to_string()))
    }

    pub fn on_throttled(self, nickname: &str, times: usize) -> Self {
        self.script(nickname, Scripted::ThrottleThen(times, record(nickname)))
    }

    /// Online list served once; afterwards (or if never set) the list is empty.
    pub fn on_online(self, nicknames: &[&str]) -> Self {
        *self.online.lock().unwrap() =
            Some(Ok(nicknames.iter().map(|n| n.to_string()).collect()));
        self
    }

    pub fn on_online_error(self, err: SyncError) -> Self {
        *self.online.lock().unwrap() = Some(Err(err));
        self
    }

    /// Nicknames scraped, in call order (retries included).
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn script(self, nickname: &str, scripted: Scripted) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(nickname.to_string(), scripted);
        self
    }
}

impl Default for MockScraper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileScraper for MockScraper {
    async fn scrape(&self, _session: &Session, nickname: &str) -> Result<ProfileRecord> {
        self.calls.lock().unwrap().push(nickname.to_string());
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(nickname) {
            None => Ok(record(nickname)),
            Some(Scripted::Record(r)) => Ok(r.clone()),
            Some(Scripted::NotFound) => Err(SyncError::NotFound(nickname.to_string())),
            Some(Scripted::ParseError(msg)) => Err(SyncError::Parse(msg.clone())),
            Some(Scripted::ThrottleThen(remaining, r)) => {
                if *remaining > 0 {
                    *remaining -= 1;
                    Err(SyncError::RateLimited("429".into()))
                } else {
                    Ok(r.clone())
                }
            }
        }
    }

    async fn online_nicknames(&self, _session: &Session) -> Result<Vec<String>> {
        self.online.lock().unwrap().take().unwrap_or(Ok(Vec::new()))
    }
}

// ---------------------------------------------------------------------------
// MockTable
// ---------------------------------------------------------------------------

/// In-memory spreadsheet. Regions that were never created or written to
/// don't exist, and reading them fails like a bad range would.
pub struct MockTable {
    regions: Mutex<HashMap<Region, Vec<Vec<String>>>>,
    notes: Mutex<HashMap<(Region, usize, usize), String>>,
    append_failures: Mutex<VecDeque<SyncError>>,
    update_failures: Mutex<VecDeque<SyncError>>,
    scan_failures: Mutex<VecDeque<SyncError>>,
    append_calls: AtomicUsize,
    scan_calls: AtomicUsize,
}

impl MockTable {
    pub fn new() -> Self {
        Self {
            regions: Mutex::new(HashMap::new()),
            notes: Mutex::new(HashMap::new()),
            append_failures: Mutex::new(VecDeque::new()),
            update_failures: Mutex::new(VecDeque::new()),
            scan_failures: Mutex::new(VecDeque::new()),
            append_calls: AtomicUsize::new(0),
            scan_calls: AtomicUsize::new(0),
        }
    }

    /// Ledger and queue regions with their header rows.
    pub fn with_headers() -> Self {
        let table = Self::new();
        for region in [Region::Profiles, Region::RunList] {
            table.push_row(region, region.headers().iter().map(|h| h.to_string()).collect());
        }
        table
    }

    /// Queue region with the given `(nickname, status)` rows under its header.
    pub fn with_queue(targets: &[(&str, &str)]) -> Self {
        let table = Self::with_headers();
        for (nick, status) in targets {
            table.push_row(Region::RunList, vec![nick.to_string(), status.to_string()]);
        }
        table
    }

    pub fn push_row(&self, region: Region, row: Vec<String>) {
        self.regions
            .lock()
            .unwrap()
            .entry(region)
            .or_default()
            .push(row);
    }

    pub fn rows(&self, region: Region) -> Vec<Vec<String>> {
        self.regions
            .lock()
            .unwrap()
            .get(&region)
            .cloned()
            .unwrap_or_default()
    }

    /// One cell by 1-based row and 0-based column; empty when unset.
    pub fn cell(&self, region: Region, row: usize, col: usize) -> String {
        self.rows(region)
            .get(row - 1)
            .and_then(|r| r.get(col))
            .cloned()
            .unwrap_or_default()
    }

    pub fn note(&self, region: Region, row: usize, col: usize) -> Option<String> {
        self.notes.lock().unwrap().get(&(region, row, col)).cloned()
    }

    pub fn set_note(&self, region: Region, row: usize, col: usize, note: &str) {
        self.notes
            .lock()
            .unwrap()
            .insert((region, row, col), note.to_string());
    }

    pub fn fail_next_append(&self, err: SyncError) {
        self.append_failures.lock().unwrap().push_back(err);
    }

    pub fn fail_next_update(&self, err: SyncError) {
        self.update_failures.lock().unwrap().push_back(err);
    }

    pub fn fail_next_scan(&self, err: SyncError) {
        self.scan_failures.lock().unwrap().push_back(err);
    }

    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    pub fn scan_calls(&self) -> usize {
        self.scan_calls.load(Ordering::SeqCst)
    }

    fn column(region: Region, column: &str) -> Result<usize> {
        region
            .column_index(column)
            .ok_or_else(|| SyncError::Config(format!("no column '{column}' in region {region}")))
    }
}

impl Default for MockTable {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteTable for MockTable {
    async fn read_rows(&self, region: Region) -> Result<Vec<Vec<String>>> {
        self.regions
            .lock()
            .unwrap()
            .get(&region)
            .cloned()
            .ok_or_else(|| SyncError::Remote {
                status: 400,
                message: format!("Unable to parse range: {region}"),
            })
    }

    async fn scan_column(&self, region: Region, column: &str) -> Result<Vec<String>> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.scan_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let col = Self::column(region, column)?;
        Ok(self
            .rows(region)
            .iter()
            .map(|r| r.get(col).cloned().unwrap_or_default())
            .collect())
    }

    async fn append_row(&self, region: Region, row: Vec<String>) -> Result<usize> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.append_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let mut regions = self.regions.lock().unwrap();
        let rows = regions.entry(region).or_default();
        rows.push(row);
        Ok(rows.len())
    }

    async fn read_note(&self, region: Region, row: usize, column: &str) -> Result<Option<String>> {
        let col = Self::column(region, column)?;
        Ok(self.note(region, row, col))
    }

    async fn write_note(&self, region: Region, row: usize, column: &str, note: &str) -> Result<()> {
        let col = Self::column(region, column)?;
        self.set_note(region, row, col, note);
        Ok(())
    }

    async fn update_cells(
        &self,
        region: Region,
        row: usize,
        column: &str,
        values: Vec<String>,
    ) -> Result<()> {
        if let Some(err) = self.update_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let first = Self::column(region, column)?;
        let mut regions = self.regions.lock().unwrap();
        let rows = regions.entry(region).or_default();
        if rows.len() < row {
            rows.resize(row, Vec::new());
        }
        let cells = &mut rows[row - 1];
        if cells.len() < first + values.len() {
            cells.resize(first + values.len(), String::new());
        }
        for (offset, value) in values.into_iter().enumerate() {
            cells[first + offset] = value;
        }
        Ok(())
    }

    async fn ensure_region(&self, region: Region) -> Result<bool> {
        let mut regions = self.regions.lock().unwrap();
        if regions.contains_key(&region) {
            return Ok(false);
        }
        regions.insert(region, Vec::new());
        Ok(true)
    }
}
