// Target Queue Processor: one pass over the Pending rows of the run list.
//
// Targets are handled strictly one at a time with the run's single session
// and pacer. Every terminal outcome is written back to the target's row, so
// the queue itself is the audit log of the run.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{info, warn};

use profilesync_common::time::format_timestamp;
use profilesync_common::{
    Config, Region, Result, RunStats, SyncError, SyncOutcome, Target, TargetStatus,
    QUEUE_STATUS_COLUMN,
};

use crate::pacer::Pacer;
use crate::session::Session;
use crate::sync::SyncEngine;
use crate::traits::{ProfileScraper, RemoteTable};

#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Stop after this many attempted targets. 0 = no cap.
    pub max_profiles: usize,
    /// Extra pause after every this many targets. 0 = never.
    pub batch_size: usize,
    pub batch_pause: Duration,
    /// Abort the run when throttling outlasts the pacer's retries.
    pub throttle_fatal: bool,
}

impl From<&Config> for QueueOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_profiles: config.max_profiles,
            batch_size: config.batch_size,
            batch_pause: config.batch_pause,
            throttle_fatal: config.throttle_fatal,
        }
    }
}

/// One-shot iterator over the queue's Pending targets in stored order.
///
/// Built from a single read of the queue; rows are turned into targets as
/// the iterator advances. Once consumed it cannot be restarted.
pub struct PendingTargets {
    rows: std::iter::Enumerate<std::vec::IntoIter<Vec<String>>>,
    total: usize,
}

impl PendingTargets {
    /// `rows` is the full region, header first.
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        let total = rows
            .iter()
            .skip(1)
            .filter(|r| is_pending(r))
            .count();
        let mut rows = rows.into_iter().enumerate();
        rows.next();
        Self { rows, total }
    }

    /// Number of Pending targets in the queue when it was read.
    pub fn total(&self) -> usize {
        self.total
    }
}

fn is_pending(cells: &[String]) -> bool {
    Target::from_row(0, cells).is_some_and(|t| t.status == TargetStatus::Pending)
}

impl Iterator for PendingTargets {
    type Item = Target;

    fn next(&mut self) -> Option<Target> {
        self.rows.by_ref().find_map(|(i, cells)| {
            Target::from_row(i + 1, &cells).filter(|t| t.status == TargetStatus::Pending)
        })
    }
}

pub struct QueueProcessor {
    table: Arc<dyn RemoteTable>,
    scraper: Arc<dyn ProfileScraper>,
    engine: SyncEngine,
    pacer: Arc<Pacer>,
    options: QueueOptions,
}

impl QueueProcessor {
    pub fn new(
        table: Arc<dyn RemoteTable>,
        scraper: Arc<dyn ProfileScraper>,
        engine: SyncEngine,
        pacer: Arc<Pacer>,
        options: QueueOptions,
    ) -> Self {
        Self {
            table,
            scraper,
            engine,
            pacer,
            options,
        }
    }

    pub async fn pending_targets(&self) -> Result<PendingTargets> {
        let rows = self
            .pacer
            .execute("read queue", || self.table.read_rows(Region::RunList))
            .await?;
        Ok(PendingTargets::new(rows))
    }

    /// Process the queue once. Per-target failures are recorded and the run
    /// continues; only fatal errors (and exhausted throttling when
    /// configured as fatal) end it early.
    pub async fn run(&self, session: &Session) -> Result<RunStats> {
        let targets = self.pending_targets().await?;
        let cap = self.options.max_profiles;
        let planned = match cap {
            0 => targets.total(),
            n => n.min(targets.total()),
        };
        info!(pending = targets.total(), planned, "Queue loaded");

        let started = Instant::now();
        let mut stats = RunStats::default();

        for target in targets {
            let attempted = stats.processed as usize;
            if cap > 0 && attempted >= cap {
                stats.skipped_by_cap += 1;
                continue;
            }
            if self.options.batch_size > 0 && attempted > 0 && attempted % self.options.batch_size == 0 {
                info!(
                    after = attempted,
                    pause_secs = self.options.batch_pause.as_secs_f64(),
                    "Batch complete, pausing"
                );
                tokio::time::sleep(self.options.batch_pause).await;
            }

            stats.processed += 1;
            info!(
                nickname = target.nickname.as_str(),
                row = target.row,
                progress = %format!("{}/{planned}", stats.processed),
                eta_secs = ?eta(started.elapsed(), attempted, planned).map(|d| d.as_secs()),
                "Processing target"
            );

            let (status, remark, abort) = match self.process(session, &target).await {
                Ok(SyncOutcome::Appended(_)) => {
                    stats.new_profiles += 1;
                    (TargetStatus::Done, stamped("New profile"), None)
                }
                Ok(SyncOutcome::Duplicate(row)) => {
                    stats.duplicates += 1;
                    (TargetStatus::Done, stamped(&format!("Duplicate (row {row})")), None)
                }
                Err(e) if e.is_fatal() => {
                    // The target stays Pending for the next run.
                    warn!(nickname = target.nickname.as_str(), error = %e, "Fatal error, aborting run");
                    return Err(e);
                }
                Err(e) => {
                    stats.errors += 1;
                    warn!(nickname = target.nickname.as_str(), error = %e, "Target failed");
                    let abort = matches!(e, SyncError::RemoteThrottled { .. })
                        && self.options.throttle_fatal;
                    (TargetStatus::Error, e.remark(), abort.then_some(e))
                }
            };

            if let Err(e) = self.write_status(&target, status, &remark).await {
                stats.status_write_failures += 1;
                warn!(
                    nickname = target.nickname.as_str(),
                    row = target.row,
                    error = %e,
                    "Failed to write target status"
                );
            }

            if let Some(e) = abort {
                warn!(%stats, "Throttling is fatal, aborting run");
                return Err(e);
            }
        }

        info!(%stats, elapsed_secs = started.elapsed().as_secs(), "Queue run complete");
        Ok(stats)
    }

    async fn process(&self, session: &Session, target: &Target) -> Result<SyncOutcome> {
        let nickname = target.nickname.as_str();
        let mut record = self
            .pacer
            .execute("scrape profile", || self.scraper.scrape(session, nickname))
            .await?;
        record.source = target.provenance.clone();
        self.engine.sync(record).await
    }

    async fn write_status(&self, target: &Target, status: TargetStatus, remark: &str) -> Result<()> {
        let values = vec![status.to_string(), remark.to_string()];
        self.pacer
            .execute("write status", || {
                self.table
                    .update_cells(Region::RunList, target.row, QUEUE_STATUS_COLUMN, values.clone())
            })
            .await
    }
}

fn stamped(remark: &str) -> String {
    format!("{remark} @ {}", format_timestamp(Utc::now()))
}

/// Remaining time at the average pace so far. `None` until one target is done.
fn eta(elapsed: Duration, done: usize, planned: usize) -> Option<Duration> {
    if done == 0 {
        return None;
    }
    let remaining = planned.saturating_sub(done) as u32;
    Some(elapsed / done as u32 * remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(cells: &[(&str, &str)]) -> Vec<Vec<String>> {
        let mut rows = vec![vec!["Nickname".to_string(), "Status".to_string()]];
        rows.extend(
            cells
                .iter()
                .map(|(n, s)| vec![n.to_string(), s.to_string()]),
        );
        rows
    }

    #[test]
    fn pending_targets_keep_stored_order_and_rows() {
        let targets = PendingTargets::new(rows(&[
            ("zed", "Pending"),
            ("amy", "Done"),
            ("", "Pending"),
            ("bob", "⚡ pending"),
        ]));
        assert_eq!(targets.total(), 2);

        let got: Vec<(String, usize)> = targets.map(|t| (t.nickname, t.row)).collect();
        assert_eq!(got, vec![("zed".to_string(), 2), ("bob".to_string(), 5)]);
    }

    #[test]
    fn header_row_is_never_a_target() {
        let targets = PendingTargets::new(vec![vec!["Nickname".into(), "Pending".into()]]);
        assert_eq!(targets.total(), 0);
        assert_eq!(targets.count(), 0);
    }

    #[test]
    fn eta_scales_average_pace() {
        assert_eq!(eta(Duration::from_secs(10), 0, 5), None);
        assert_eq!(eta(Duration::from_secs(10), 2, 5), Some(Duration::from_secs(15)));
    }
}
