//! Online-mode runs against the in-memory mocks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use portal_client::CookieJar;
use profilesync::online::{OnlineOptions, OnlineProcessor};
use profilesync::pacer::{Pacer, PacerConfig};
use profilesync::session::Session;
use profilesync::session_store::EphemeralSessionStore;
use profilesync::sync::SyncEngine;
use profilesync::testing::{record, MockScraper, MockSessionProvider, MockTable};
use profilesync::{run_online, Deps};
use profilesync_common::{Config, Region, SyncError};

fn processor(table: Arc<MockTable>, scraper: Arc<MockScraper>, max_profiles: usize) -> OnlineProcessor {
    let pacer = Arc::new(Pacer::new(PacerConfig {
        min_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        cooldown: Duration::from_secs(60),
        max_retries: 2,
    }));
    let engine = SyncEngine::new(table.clone(), pacer.clone());
    let options = OnlineOptions {
        max_profiles,
        throttle_fatal: false,
    };
    OnlineProcessor::new(table, scraper, engine, pacer, options)
}

fn session() -> Session {
    let mut cookies = CookieJar::new();
    cookies.insert("sessionid", "test");
    Session::fresh("primary", cookies)
}

fn logged_nicknames(table: &MockTable) -> Vec<String> {
    table
        .rows(Region::OnlineLog)
        .iter()
        .skip(1)
        .map(|r| r[2].clone())
        .collect()
}

#[tokio::test]
async fn online_list_logs_presence_and_captures_new_profiles() {
    let table = Arc::new(MockTable::with_headers());
    table.push_row(Region::Profiles, record("bob").to_row());
    let scraper = Arc::new(MockScraper::new().on_online(&["zara", "bob", "ali"]));

    let stats = processor(table.clone(), scraper.clone(), 0)
        .run(&session(), None)
        .await
        .unwrap();

    assert_eq!(stats.processed, 3);
    assert_eq!(stats.presence_logged, 3);
    assert_eq!(stats.new_profiles, 2);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(scraper.calls(), vec!["zara", "ali"], "ledger members are not rescraped");

    let log = table.rows(Region::OnlineLog);
    assert_eq!(log[0], vec!["DATE", "TIME", "NICKNAME", "DATE/TIME"]);
    assert_eq!(logged_nicknames(&table), vec!["zara", "bob", "ali"]);

    let source = Region::Profiles.column_index("SOURCE").unwrap();
    let ledger = table.rows(Region::Profiles);
    assert_eq!(ledger.len(), 4);
    assert_eq!(ledger[2][0], "zara");
    assert_eq!(ledger[2][source], "Online");
}

#[tokio::test]
async fn cap_limits_online_nicknames() {
    let table = Arc::new(MockTable::with_headers());
    let scraper = Arc::new(MockScraper::new().on_online(&["a", "b", "c", "d"]));

    let stats = processor(table.clone(), scraper.clone(), 2)
        .run(&session(), None)
        .await
        .unwrap();

    assert_eq!(stats.processed, 2);
    assert_eq!(stats.skipped_by_cap, 2);
    assert_eq!(logged_nicknames(&table), vec!["a", "b"]);
}

#[tokio::test]
async fn provided_nicknames_replace_the_live_list() {
    let table = Arc::new(MockTable::with_headers());
    let scraper = Arc::new(MockScraper::new().on_online(&["ignored"]));

    processor(table.clone(), scraper.clone(), 0)
        .run(&session(), Some(vec!["kiran".into(), " kiran ".into()]))
        .await
        .unwrap();

    assert_eq!(scraper.calls(), vec!["kiran"]);
    assert_eq!(logged_nicknames(&table), vec!["kiran"]);
}

#[tokio::test]
async fn failed_profile_still_has_presence_and_run_continues() {
    let table = Arc::new(MockTable::with_headers());
    let scraper = Arc::new(
        MockScraper::new()
            .on_online(&["ghost", "ali"])
            .on_not_found("ghost"),
    );

    let stats = processor(table.clone(), scraper, 0)
        .run(&session(), None)
        .await
        .unwrap();

    assert_eq!(stats.errors, 1);
    assert_eq!(stats.new_profiles, 1);
    assert_eq!(logged_nicknames(&table), vec!["ghost", "ali"]);
}

#[tokio::test]
async fn failed_presence_write_is_counted_and_profile_captured() {
    let table = Arc::new(MockTable::with_headers());
    table.fail_next_append(SyncError::Remote {
        status: 400,
        message: "bad range".into(),
    });
    let scraper = Arc::new(MockScraper::new().on_online(&["zara"]));

    let stats = processor(table.clone(), scraper, 0)
        .run(&session(), None)
        .await
        .unwrap();

    assert_eq!(stats.status_write_failures, 1);
    assert_eq!(stats.presence_logged, 0);
    assert_eq!(stats.new_profiles, 1);
}

#[tokio::test]
async fn expired_session_while_listing_aborts() {
    let table = Arc::new(MockTable::with_headers());
    let scraper = Arc::new(
        MockScraper::new()
            .on_online_error(SyncError::Authentication("session expired mid-run".into())),
    );

    let err = processor(table.clone(), scraper.clone(), 0)
        .run(&session(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Authentication(_)));
    assert!(scraper.calls().is_empty());
}

#[tokio::test]
async fn full_online_run_authenticates_and_bootstraps() {
    let vars: HashMap<String, String> = [
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
    let config = Config::from_map(&vars).unwrap();

    let table = Arc::new(MockTable::new());
    let sessions = Arc::new(MockSessionProvider::new().accept("alice"));

    let stats = run_online(
        &config,
        Deps {
            sessions: sessions.clone(),
            scraper: Arc::new(MockScraper::new().on_online(&["zara"])),
            table: table.clone(),
            store: Arc::new(EphemeralSessionStore::default()),
        },
        None,
    )
    .await
    .unwrap();

    assert_eq!(sessions.login_calls(), 1);
    assert_eq!(stats.new_profiles, 1);
    assert_eq!(table.cell(Region::Profiles, 1, 0), "NICK NAME");
    assert_eq!(table.cell(Region::OnlineLog, 2, 2), "zara");
}
