// Online mode: capture everyone on the platform's online-users list.
//
// Each listed nickname gets a presence row in the OnlineLog region. Nicknames
// already in the ledger count as duplicates and are not scraped again; the
// presence row is their sighting record. The rest are scraped and synced the
// same way queue targets are, with the Online provenance.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use profilesync_common::time::presence_cells;
use profilesync_common::{
    Config, Region, Result, RunStats, SyncError, SyncOutcome, ONLINE_PROVENANCE,
};

use crate::pacer::Pacer;
use crate::session::Session;
use crate::sync::SyncEngine;
use crate::traits::{ProfileScraper, RemoteTable};

#[derive(Debug, Clone)]
pub struct OnlineOptions {
    /// Only the first this many listed nicknames are handled. 0 = all.
    pub max_profiles: usize,
    pub throttle_fatal: bool,
}

impl From<&Config> for OnlineOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_profiles: config.max_profiles,
            throttle_fatal: config.throttle_fatal,
        }
    }
}

pub struct OnlineProcessor {
    table: Arc<dyn RemoteTable>,
    scraper: Arc<dyn ProfileScraper>,
    engine: SyncEngine,
    pacer: Arc<Pacer>,
    options: OnlineOptions,
}

impl OnlineProcessor {
    pub fn new(
        table: Arc<dyn RemoteTable>,
        scraper: Arc<dyn ProfileScraper>,
        engine: SyncEngine,
        pacer: Arc<Pacer>,
        options: OnlineOptions,
    ) -> Self {
        Self {
            table,
            scraper,
            engine,
            pacer,
            options,
        }
    }

    /// Handle `provided` nicknames, or the live online list when `None`.
    pub async fn run(&self, session: &Session, provided: Option<Vec<String>>) -> Result<RunStats> {
        self.engine.prepare_region(Region::OnlineLog).await?;

        let mut nicknames = match provided {
            Some(list) => dedup(list),
            None => {
                self.pacer
                    .execute("fetch online list", || self.scraper.online_nicknames(session))
                    .await?
            }
        };

        let mut stats = RunStats::default();
        let cap = self.options.max_profiles;
        if cap > 0 && nicknames.len() > cap {
            stats.skipped_by_cap = (nicknames.len() - cap) as u64;
            nicknames.truncate(cap);
        }
        info!(online = nicknames.len(), skipped = stats.skipped_by_cap, "Online list loaded");

        for nickname in &nicknames {
            stats.processed += 1;

            match self.log_presence(nickname).await {
                Ok(row) => {
                    stats.presence_logged += 1;
                    info!(nickname = nickname.as_str(), row, "Presence logged");
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    stats.status_write_failures += 1;
                    warn!(nickname = nickname.as_str(), error = %e, "Failed to log presence");
                }
            }

            match self.capture(session, nickname).await {
                Ok(SyncOutcome::Appended(_)) => stats.new_profiles += 1,
                Ok(SyncOutcome::Duplicate(row)) => {
                    stats.duplicates += 1;
                    info!(nickname = nickname.as_str(), row, "Already in ledger");
                }
                Err(e) if e.is_fatal() => {
                    warn!(nickname = nickname.as_str(), error = %e, "Fatal error, aborting run");
                    return Err(e);
                }
                Err(e) => {
                    stats.errors += 1;
                    warn!(nickname = nickname.as_str(), error = %e, "Online profile failed");
                    if self.options.throttle_fatal && matches!(e, SyncError::RemoteThrottled { .. }) {
                        warn!(%stats, "Throttling is fatal, aborting run");
                        return Err(e);
                    }
                }
            }
        }

        info!(%stats, "Online run complete");
        Ok(stats)
    }

    async fn capture(&self, session: &Session, nickname: &str) -> Result<SyncOutcome> {
        if let Some(row) = self.engine.locate(nickname).await? {
            return Ok(SyncOutcome::Duplicate(row));
        }
        let mut record = self
            .pacer
            .execute("scrape profile", || self.scraper.scrape(session, nickname))
            .await?;
        record.source = ONLINE_PROVENANCE.to_string();
        self.engine.sync(record).await
    }

    async fn log_presence(&self, nickname: &str) -> Result<usize> {
        let [date, time, stamp] = presence_cells(Utc::now());
        let row = vec![date, time, nickname.to_string(), stamp];
        self.pacer
            .execute("log presence", || {
                self.table.append_row(Region::OnlineLog, row.clone())
            })
            .await
    }
}

/// Trimmed, non-empty, first occurrence only.
fn dedup(nicknames: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    nicknames
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty() && seen.insert(n.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provided_nicknames_are_trimmed_and_deduplicated() {
        let got = dedup(vec![" zara ".into(), "".into(), "ali".into(), "zara".into()]);
        assert_eq!(got, vec!["zara".to_string(), "ali".to_string()]);
    }
}
