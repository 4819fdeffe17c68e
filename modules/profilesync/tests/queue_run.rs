//! End-to-end queue runs against the in-memory mocks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use portal_client::CookieJar;
use profilesync::pacer::{Pacer, PacerConfig};
use profilesync::queue::{QueueOptions, QueueProcessor};
use profilesync::session::Session;
use profilesync::session_store::{EphemeralSessionStore, FileSessionStore, SessionStore};
use profilesync::sync::SyncEngine;
use profilesync::testing::{record, MockScraper, MockSessionProvider, MockTable};
use profilesync::{run, Deps};
use profilesync_common::{Config, Region, SyncError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const STATUS: usize = 1;
const REMARKS: usize = 2;

fn pacer() -> Arc<Pacer> {
    Arc::new(Pacer::new(PacerConfig {
        min_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        cooldown: Duration::from_secs(60),
        max_retries: 2,
    }))
}

fn options() -> QueueOptions {
    QueueOptions {
        max_profiles: 0,
        batch_size: 0,
        batch_pause: Duration::ZERO,
        throttle_fatal: false,
    }
}

fn processor(table: Arc<MockTable>, scraper: Arc<MockScraper>, options: QueueOptions) -> QueueProcessor {
    let pacer = pacer();
    let engine = SyncEngine::new(table.clone(), pacer.clone());
    QueueProcessor::new(table, scraper, engine, pacer, options)
}

fn session() -> Session {
    let mut cookies = CookieJar::new();
    cookies.insert("sessionid", "test");
    Session::fresh("primary", cookies)
}

fn status(table: &MockTable, row: usize) -> String {
    table.cell(Region::RunList, row, STATUS)
}

fn remark(table: &MockTable, row: usize) -> String {
    table.cell(Region::RunList, row, REMARKS)
}

fn config(extra: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = [
        ("PORTAL_USERNAME", "alice"),
        ("PORTAL_PASSWORD", "pw"),
        ("GOOGLE_SHEET_URL", "sheet-id"),
        ("MIN_DELAY", "0"),
        ("MAX_DELAY", "0"),
        ("SESSION_PERSISTENCE", "ephemeral"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in extra {
        vars.insert(k.to_string(), v.to_string());
    }
    Config::from_map(&vars).unwrap()
}

// ---------------------------------------------------------------------------
// Queue processing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_profile_and_existing_duplicate_are_both_done() {
    let table = Arc::new(MockTable::with_queue(&[("alice", "Pending"), ("bob", "Pending")]));
    for nick in ["x1", "x2", "x3", "bob"] {
        table.push_row(Region::Profiles, record(nick).to_row());
    }
    let scraper = Arc::new(MockScraper::new());

    let stats = processor(table.clone(), scraper, options())
        .run(&session())
        .await
        .unwrap();

    assert_eq!(stats.new_profiles, 1);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(table.rows(Region::Profiles).len(), 6, "header + 4 existing + alice");

    assert_eq!(status(&table, 2), "Done");
    assert!(remark(&table, 2).starts_with("New profile"));
    assert_eq!(status(&table, 3), "Done");
    assert!(remark(&table, 3).starts_with("Duplicate (row 5)"));
    assert!(table.note(Region::Profiles, 5, 0).is_some());
}

#[tokio::test]
async fn same_nickname_twice_appends_once() {
    let table = Arc::new(MockTable::with_queue(&[("alice", "Pending"), ("alice", "Pending")]));
    let scraper = Arc::new(MockScraper::new());

    let stats = processor(table.clone(), scraper, options())
        .run(&session())
        .await
        .unwrap();

    assert_eq!(stats.new_profiles, 1);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(table.rows(Region::Profiles).len(), 2);
    assert!(remark(&table, 3).starts_with("Duplicate (row 2)"));
    assert!(table.note(Region::Profiles, 2, 0).is_some());
}

#[tokio::test]
async fn max_profiles_caps_attempts_and_leaves_rest_pending() {
    let queue: Vec<(String, &str)> = (0..10).map(|i| (format!("user{i}"), "Pending")).collect();
    let queue_refs: Vec<(&str, &str)> = queue.iter().map(|(n, s)| (n.as_str(), *s)).collect();
    let table = Arc::new(MockTable::with_queue(&queue_refs));
    // Attempted-but-failed still counts toward the cap.
    let scraper = Arc::new(MockScraper::new().on_not_found("user1"));

    let stats = processor(table.clone(), scraper.clone(), QueueOptions { max_profiles: 3, ..options() })
        .run(&session())
        .await
        .unwrap();

    assert_eq!(stats.processed, 3);
    assert_eq!(stats.skipped_by_cap, 7);
    assert_eq!(scraper.calls(), vec!["user0", "user1", "user2"]);
    for row in 5..=11 {
        assert_eq!(status(&table, row), "Pending", "row {row} untouched");
        assert_eq!(remark(&table, row), "");
    }
}

#[tokio::test]
async fn not_found_is_recorded_and_run_continues() {
    let table = Arc::new(MockTable::with_queue(&[("ghost", "Pending"), ("carol", "Pending")]));
    let scraper = Arc::new(MockScraper::new().on_not_found("ghost"));

    let stats = processor(table.clone(), scraper, options())
        .run(&session())
        .await
        .unwrap();

    assert_eq!(stats.errors, 1);
    assert_eq!(stats.new_profiles, 1);
    assert_eq!(status(&table, 2), "Error");
    assert_eq!(remark(&table, 2), "Not found");
    assert_eq!(status(&table, 3), "Done");
}

#[tokio::test]
async fn parse_errors_mark_target_error() {
    let table = Arc::new(MockTable::with_queue(&[("odd", "Pending")]));
    let scraper = Arc::new(MockScraper::new().on_parse_error("odd", "profile heading missing"));

    processor(table.clone(), scraper, options())
        .run(&session())
        .await
        .unwrap();

    assert_eq!(status(&table, 2), "Error");
    assert!(remark(&table, 2).starts_with("Parse error"));
}

#[tokio::test]
async fn only_pending_targets_are_processed() {
    let table = Arc::new(MockTable::with_queue(&[
        ("done", "Done"),
        ("failed", "Error"),
        ("todo", "pending"),
    ]));
    let scraper = Arc::new(MockScraper::new());

    processor(table.clone(), scraper.clone(), options())
        .run(&session())
        .await
        .unwrap();

    assert_eq!(scraper.calls(), vec!["todo"]);
    assert_eq!(status(&table, 2), "Done");
    assert_eq!(status(&table, 3), "Error");
}

#[tokio::test]
async fn provenance_is_written_into_source() {
    let table = Arc::new(MockTable::with_headers());
    table.push_row(
        Region::RunList,
        vec!["dana".into(), "Pending".into(), "".into(), "Tags".into()],
    );
    let scraper = Arc::new(MockScraper::new());

    processor(table.clone(), scraper, options())
        .run(&session())
        .await
        .unwrap();

    let source = Region::Profiles.column_index("SOURCE").unwrap();
    assert_eq!(table.cell(Region::Profiles, 2, source), "Tags");
}

#[tokio::test]
async fn indeterminate_append_marks_error_not_done() {
    let table = Arc::new(MockTable::with_queue(&[("alice", "Pending"), ("bob", "Pending")]));
    table.fail_next_append(SyncError::IndeterminateWrite("connection reset".into()));
    let scraper = Arc::new(MockScraper::new());

    let stats = processor(table.clone(), scraper, options())
        .run(&session())
        .await
        .unwrap();

    assert_eq!(status(&table, 2), "Error");
    assert_eq!(remark(&table, 2), "Write unconfirmed");
    assert_eq!(status(&table, 3), "Done");
    assert_eq!(stats.errors, 1);
}

#[tokio::test]
async fn failed_status_write_is_counted_not_fatal() {
    let table = Arc::new(MockTable::with_queue(&[("alice", "Pending"), ("bob", "Pending")]));
    table.fail_next_update(SyncError::Remote { status: 400, message: "bad range".into() });
    let scraper = Arc::new(MockScraper::new());

    let stats = processor(table.clone(), scraper, options())
        .run(&session())
        .await
        .unwrap();

    assert_eq!(stats.status_write_failures, 1);
    assert_eq!(stats.new_profiles, 2);
    assert_eq!(status(&table, 3), "Done");
}

// ---------------------------------------------------------------------------
// Pacing and throttling
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn batch_pause_is_inserted_between_batches() {
    let table = Arc::new(MockTable::with_queue(&[
        ("a", "Pending"),
        ("b", "Pending"),
        ("c", "Pending"),
        ("d", "Pending"),
        ("e", "Pending"),
    ]));
    let scraper = Arc::new(MockScraper::new());
    let options = QueueOptions {
        batch_size: 2,
        batch_pause: Duration::from_secs(10),
        ..options()
    };

    let start = tokio::time::Instant::now();
    processor(table, scraper, options).run(&session()).await.unwrap();

    // Pauses after the 2nd and 4th targets only.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(20));
    assert!(elapsed < Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn throttled_scrape_recovers_within_retry_budget() {
    let table = Arc::new(MockTable::with_queue(&[("alice", "Pending")]));
    let scraper = Arc::new(MockScraper::new().on_throttled("alice", 2));

    let stats = processor(table.clone(), scraper.clone(), options())
        .run(&session())
        .await
        .unwrap();

    assert_eq!(scraper.calls().len(), 3);
    assert_eq!(stats.new_profiles, 1);
    assert_eq!(status(&table, 2), "Done");
}

#[tokio::test(start_paused = true)]
async fn exhausted_throttling_is_recorded_and_run_continues() {
    let table = Arc::new(MockTable::with_queue(&[("alice", "Pending"), ("bob", "Pending")]));
    let scraper = Arc::new(MockScraper::new().on_throttled("alice", 10));

    let stats = processor(table.clone(), scraper, options())
        .run(&session())
        .await
        .unwrap();

    assert_eq!(status(&table, 2), "Error");
    assert_eq!(remark(&table, 2), "Throttled (2 retries)");
    assert_eq!(status(&table, 3), "Done");
    assert_eq!(stats.errors, 1);
}

#[tokio::test(start_paused = true)]
async fn fatal_throttling_aborts_after_recording_target() {
    let table = Arc::new(MockTable::with_queue(&[("alice", "Pending"), ("bob", "Pending")]));
    let scraper = Arc::new(MockScraper::new().on_throttled("alice", 10));
    let options = QueueOptions { throttle_fatal: true, ..options() };

    let err = processor(table.clone(), scraper, options)
        .run(&session())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::RemoteThrottled { attempts: 2 }));
    assert_eq!(status(&table, 2), "Error");
    assert_eq!(status(&table, 3), "Pending");
}

// ---------------------------------------------------------------------------
// Full run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_run_reuses_persisted_session() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileSessionStore::new(dir.path().join("session.json")));
    store.persist(&session()).unwrap();

    let table = Arc::new(MockTable::with_queue(&[("alice", "Pending")]));
    let sessions = Arc::new(MockSessionProvider::new().on_probe(Ok(true)));

    let stats = run(
        &config(&[]),
        Deps {
            sessions: sessions.clone(),
            scraper: Arc::new(MockScraper::new()),
            table: table.clone(),
            store,
        },
    )
    .await
    .unwrap();

    assert_eq!(sessions.login_calls(), 0);
    assert_eq!(stats.new_profiles, 1);
    assert_eq!(status(&table, 2), "Done");
}

#[tokio::test]
async fn full_run_bootstraps_an_empty_spreadsheet() {
    let table = Arc::new(MockTable::new());
    let sessions = Arc::new(MockSessionProvider::new().accept("alice"));

    let stats = run(
        &config(&[]),
        Deps {
            sessions,
            scraper: Arc::new(MockScraper::new()),
            table: table.clone(),
            store: Arc::new(EphemeralSessionStore::default()),
        },
    )
    .await
    .unwrap();

    assert_eq!(stats.processed, 0);
    assert_eq!(table.cell(Region::Profiles, 1, 0), "NICK NAME");
    assert_eq!(table.cell(Region::RunList, 1, 0), "Nickname");
}

#[tokio::test]
async fn authentication_failure_aborts_before_queue_is_touched() {
    let table = Arc::new(MockTable::with_queue(&[("alice", "Pending")]));
    let scraper = Arc::new(MockScraper::new());

    let err = run(
        &config(&[("PORTAL_USERNAME_2", "backup"), ("PORTAL_PASSWORD_2", "pw2")]),
        Deps {
            sessions: Arc::new(MockSessionProvider::new()),
            scraper: scraper.clone(),
            table: table.clone(),
            store: Arc::new(EphemeralSessionStore::default()),
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, SyncError::Authentication(_)));
    assert!(scraper.calls().is_empty());
    assert_eq!(status(&table, 2), "Pending");
}
