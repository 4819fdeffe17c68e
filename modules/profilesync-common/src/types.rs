use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time::format_timestamp;

// --- Remote table schema ---

/// Column order of the profile ledger. The identity column is first.
pub const PROFILE_COLUMNS: [&str; 18] = [
    "NICK NAME",
    "TAGS",
    "CITY",
    "GENDER",
    "MARRIED",
    "AGE",
    "JOINED",
    "FOLLOWERS",
    "STATUS",
    "POSTS",
    "INTRO",
    "SOURCE",
    "DATETIME SCRAP",
    "LAST POST",
    "LAST POST TIME",
    "IMAGE",
    "PROFILE LINK",
    "POST URL",
];

pub const IDENTITY_COLUMN: &str = "NICK NAME";

/// Column order of the target queue.
pub const QUEUE_COLUMNS: [&str; 4] = ["Nickname", "Status", "Remarks", "Source"];

pub const QUEUE_STATUS_COLUMN: &str = "Status";
pub const QUEUE_REMARKS_COLUMN: &str = "Remarks";

/// Provenance used when a queue row leaves its Source cell empty.
pub const DEFAULT_PROVENANCE: &str = "RunList";

/// Provenance of profiles captured from the online-users list.
pub const ONLINE_PROVENANCE: &str = "Online";

/// Column order of the presence log.
pub const ONLINE_LOG_COLUMNS: [&str; 4] = ["DATE", "TIME", "NICKNAME", "DATE/TIME"];

/// Named regions of the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// Append-only ledger of captured profiles.
    Profiles,
    /// Queue of targets to scrape.
    RunList,
    /// Optional tag mapping: column header = tag, cells = nicknames.
    Tags,
    /// One row per nickname seen on the online-users list.
    OnlineLog,
}

impl Region {
    pub fn sheet_name(&self) -> &'static str {
        match self {
            Region::Profiles => "Profiles",
            Region::RunList => "RunList",
            Region::Tags => "Tags",
            Region::OnlineLog => "OnlineLog",
        }
    }

    /// Header row this system writes when the region is empty. `Tags` is
    /// user-maintained and has no fixed header.
    pub fn headers(&self) -> &'static [&'static str] {
        match self {
            Region::Profiles => &PROFILE_COLUMNS,
            Region::RunList => &QUEUE_COLUMNS,
            Region::Tags => &[],
            Region::OnlineLog => &ONLINE_LOG_COLUMNS,
        }
    }

    /// Zero-based index of a named column.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.headers().iter().position(|c| *c == column)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sheet_name())
    }
}

// --- Targets ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetStatus {
    Pending,
    Done,
    Error,
}

impl TargetStatus {
    /// Lenient parse of a queue status cell. Decoration around the keyword
    /// (emoji, punctuation, case) is ignored.
    pub fn parse(cell: &str) -> Option<Self> {
        let lower = cell.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        match words.as_slice() {
            ["pending"] => Some(TargetStatus::Pending),
            ["done"] => Some(TargetStatus::Done),
            ["error"] => Some(TargetStatus::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Pending => "Pending",
            TargetStatus::Done => "Done",
            TargetStatus::Error => "Error",
        }
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queued identifier to scrape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub nickname: String,
    /// 1-based sheet row in the queue region.
    pub row: usize,
    pub status: TargetStatus,
    pub remark: String,
    pub provenance: String,
}

impl Target {
    /// Build a target from a raw queue row. Rows without a nickname or with an
    /// unrecognised status are not targets.
    pub fn from_row(row: usize, cells: &[String]) -> Option<Self> {
        let cell = |i: usize| cells.get(i).map(|c| c.trim()).unwrap_or("");

        let nickname = cell(0);
        if nickname.is_empty() {
            return None;
        }
        let status = TargetStatus::parse(cell(1))?;
        let provenance = match cell(3) {
            "" => DEFAULT_PROVENANCE,
            s => s,
        };

        Some(Self {
            nickname: nickname.to_string(),
            row,
            status,
            remark: cell(2).to_string(),
            provenance: provenance.to_string(),
        })
    }
}

// --- Profiles ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    #[default]
    Verified,
    Unverified,
    Banned,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verified => write!(f, "Verified"),
            Self::Unverified => write!(f, "Unverified"),
            Self::Banned => write!(f, "Banned"),
        }
    }
}

/// The result of scraping one target. Consumed once by the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    /// Canonical platform identifier; the ledger's natural key.
    pub nickname: String,
    pub tags: String,
    pub city: String,
    pub gender: String,
    pub married: String,
    pub age: String,
    pub joined: String,
    pub followers: String,
    pub status: AccountStatus,
    pub posts: String,
    pub intro: String,
    pub source: String,
    pub last_post: String,
    pub last_post_time: String,
    pub image: String,
    pub profile_link: String,
    pub post_url: String,
    pub captured_at: DateTime<Utc>,
}

impl ProfileRecord {
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            tags: String::new(),
            city: String::new(),
            gender: String::new(),
            married: String::new(),
            age: String::new(),
            joined: String::new(),
            followers: String::new(),
            status: AccountStatus::Verified,
            posts: String::new(),
            intro: String::new(),
            source: DEFAULT_PROVENANCE.to_string(),
            last_post: String::new(),
            last_post_time: String::new(),
            image: String::new(),
            profile_link: String::new(),
            post_url: String::new(),
            captured_at: Utc::now(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.nickname
    }

    /// Cell values in `PROFILE_COLUMNS` order.
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.nickname.clone(),
            self.tags.clone(),
            self.city.clone(),
            self.gender.clone(),
            self.married.clone(),
            self.age.clone(),
            self.joined.clone(),
            self.followers.clone(),
            self.status.to_string(),
            self.posts.clone(),
            self.intro.clone(),
            self.source.clone(),
            format_timestamp(self.captured_at),
            self.last_post.clone(),
            self.last_post_time.clone(),
            self.image.clone(),
            self.profile_link.clone(),
            self.post_url.clone(),
        ]
        .into_iter()
        .map(|v| v.trim().to_string())
        .collect()
    }
}

// --- Sync results ---

/// Outcome of syncing one record into the ledger. Rows are 1-based sheet rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Appended(usize),
    Duplicate(usize),
}

impl SyncOutcome {
    pub fn row(&self) -> usize {
        match self {
            SyncOutcome::Appended(row) | SyncOutcome::Duplicate(row) => *row,
        }
    }
}

/// Counters for one queue run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub processed: u64,
    pub new_profiles: u64,
    pub duplicates: u64,
    pub errors: u64,
    /// Pending targets left untouched because `max_profiles` was reached.
    pub skipped_by_cap: u64,
    /// Status write-backs that failed after the target itself was handled.
    pub status_write_failures: u64,
    /// Presence rows written to the online log (online mode only).
    pub presence_logged: u64,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} new_profiles={} duplicates={} errors={} skipped_by_cap={} status_write_failures={} presence_logged={}",
            self.processed,
            self.new_profiles,
            self.duplicates,
            self.errors,
            self.skipped_by_cap,
            self.status_write_failures,
            self.presence_logged,
        )
    }
}
