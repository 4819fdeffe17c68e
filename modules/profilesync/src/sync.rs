// Remote Sync Engine: duplicate-aware append into the profile ledger.
//
// The ledger is append-only. A nickname's first sighting is the row of
// record; later sightings only add a timestamped note to that row's
// identity cell. Uniqueness is upheld here by reading the entire identity
// column before every write, since the spreadsheet enforces nothing.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use profilesync_common::time::format_timestamp;
use profilesync_common::{ProfileRecord, Region, Result, SyncOutcome, IDENTITY_COLUMN};

use crate::pacer::Pacer;
use crate::traits::RemoteTable;

pub struct SyncEngine {
    table: Arc<dyn RemoteTable>,
    pacer: Arc<Pacer>,
    /// Lowercased nickname → tags from the Tags region.
    tags: HashMap<String, Vec<String>>,
}

impl SyncEngine {
    pub fn new(table: Arc<dyn RemoteTable>, pacer: Arc<Pacer>) -> Self {
        Self {
            table,
            pacer,
            tags: HashMap::new(),
        }
    }

    /// Make sure the ledger and queue exist with header rows, and load the
    /// optional tag mapping. Called once before the first `sync`.
    pub async fn bootstrap(&mut self) -> Result<()> {
        for region in [Region::Profiles, Region::RunList] {
            self.prepare_region(region).await?;
        }

        // The Tags region is optional; a missing or unreadable one just
        // means no tags.
        match self
            .pacer
            .execute("read tags", || self.table.read_rows(Region::Tags))
            .await
        {
            Ok(rows) => {
                self.tags = tag_map(&rows);
                info!(nicknames = self.tags.len(), "Loaded tag mapping");
            }
            Err(e) => warn!(error = %e, "Tag mapping unavailable, continuing without tags"),
        }

        Ok(())
    }

    /// Create `region` if it is missing and write its header row when the
    /// first cell is empty.
    pub async fn prepare_region(&self, region: Region) -> Result<()> {
        let created = self
            .pacer
            .execute("ensure region", || self.table.ensure_region(region))
            .await?;
        if created {
            info!(%region, "Created missing region");
        }

        let Some(&first) = region.headers().first() else {
            return Ok(());
        };
        let column = self
            .pacer
            .execute("read header", || self.table.scan_column(region, first))
            .await?;
        let has_header = column.first().is_some_and(|c| !c.trim().is_empty());
        if !has_header {
            let headers: Vec<String> = region.headers().iter().map(|h| h.to_string()).collect();
            self.pacer
                .execute("write header", || {
                    self.table.update_cells(region, 1, first, headers.clone())
                })
                .await?;
            info!(%region, "Wrote header row");
        }
        Ok(())
    }

    pub fn tags_for(&self, nickname: &str) -> Option<&[String]> {
        self.tags.get(&nickname.to_lowercase()).map(Vec::as_slice)
    }

    /// Append the record as a new ledger row, or annotate the existing row
    /// for its identity.
    pub async fn sync(&self, mut record: ProfileRecord) -> Result<SyncOutcome> {
        if record.tags.is_empty() {
            if let Some(tags) = self.tags_for(&record.nickname) {
                record.tags = tags.join(", ");
            }
        }

        let identity = record.identity().trim().to_string();
        if let Some(row) = self.locate(&identity).await? {
            self.annotate_duplicate(row).await?;
            info!(nickname = identity.as_str(), row, "Duplicate, annotated existing row");
            return Ok(SyncOutcome::Duplicate(row));
        }

        let values = record.to_row();
        let row = self
            .pacer
            .execute("append profile", || {
                self.table.append_row(Region::Profiles, values.clone())
            })
            .await?;
        info!(nickname = identity.as_str(), row, "Appended new profile");
        Ok(SyncOutcome::Appended(row))
    }

    /// Ledger row already holding `identity`, scanning the whole column.
    pub async fn locate(&self, identity: &str) -> Result<Option<usize>> {
        let column = self
            .pacer
            .execute("scan ledger", || {
                self.table.scan_column(Region::Profiles, IDENTITY_COLUMN)
            })
            .await?;
        debug!(rows = column.len(), nickname = identity, "Scanned ledger");
        Ok(find_identity(&column, identity.trim()))
    }

    async fn annotate_duplicate(&self, row: usize) -> Result<()> {
        let existing = self
            .pacer
            .execute("read note", || {
                self.table.read_note(Region::Profiles, row, IDENTITY_COLUMN)
            })
            .await?;

        let stamp = format!("Duplicate seen again @ {}", format_timestamp(Utc::now()));
        let note = match existing {
            Some(prev) if !prev.trim().is_empty() => format!("{}\n{stamp}", prev.trim_end()),
            _ => stamp,
        };

        self.pacer
            .execute("write note", || {
                self.table
                    .write_note(Region::Profiles, row, IDENTITY_COLUMN, &note)
            })
            .await
    }
}

/// 1-based row of the first data row whose identity cell matches exactly.
/// The header (row 1) is never a match.
fn find_identity(column: &[String], identity: &str) -> Option<usize> {
    column
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, cell)| cell.trim() == identity)
        .map(|(i, _)| i + 1)
}

/// Build nickname → tags from the Tags region: each column header is a tag,
/// each cell below it a nickname carrying that tag.
fn tag_map(rows: &[Vec<String>]) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    let Some((header, body)) = rows.split_first() else {
        return map;
    };

    for (col, tag) in header.iter().enumerate() {
        let tag = tag.trim();
        if tag.is_empty() {
            continue;
        }
        for row in body {
            let Some(nick) = row.get(col).map(|c| c.trim()).filter(|c| !c.is_empty()) else {
                continue;
            };
            let tags = map.entry(nick.to_lowercase()).or_default();
            if !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }
    }
    map
}
