pub mod auth;
pub mod online;
pub mod pacer;
pub mod queue;
pub mod session;
pub mod session_store;
pub mod sync;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

use std::sync::Arc;

use tracing::info;

use profilesync_common::{Config, Result, RunStats};

use crate::auth::Authenticator;
use crate::online::{OnlineOptions, OnlineProcessor};
use crate::pacer::{Pacer, PacerConfig};
use crate::queue::{QueueOptions, QueueProcessor};
use crate::session::Session;
use crate::session_store::SessionStore;
use crate::sync::SyncEngine;
use crate::traits::{ProfileScraper, RemoteTable, SessionProvider};

/// Collaborators for one run.
pub struct Deps {
    pub sessions: Arc<dyn SessionProvider>,
    pub scraper: Arc<dyn ProfileScraper>,
    pub table: Arc<dyn RemoteTable>,
    pub store: Arc<dyn SessionStore>,
}

/// One complete run: authenticate, prepare the spreadsheet, then work the
/// queue. Pacing state is created fresh here, so every run starts at the
/// baseline delay window.
pub async fn run(config: &Config, deps: Deps) -> Result<RunStats> {
    let (session, pacer, engine) = prepare(config, &deps).await?;
    let processor = QueueProcessor::new(
        deps.table,
        deps.scraper,
        engine,
        pacer,
        QueueOptions::from(config),
    );
    processor.run(&session).await
}

/// Online mode: log presence for everyone on the online list (or the given
/// nicknames) and capture the profiles the ledger doesn't have yet.
pub async fn run_online(
    config: &Config,
    deps: Deps,
    nicknames: Option<Vec<String>>,
) -> Result<RunStats> {
    let (session, pacer, engine) = prepare(config, &deps).await?;
    let processor = OnlineProcessor::new(
        deps.table,
        deps.scraper,
        engine,
        pacer,
        OnlineOptions::from(config),
    );
    processor.run(&session, nicknames).await
}

async fn prepare(config: &Config, deps: &Deps) -> Result<(Session, Arc<Pacer>, SyncEngine)> {
    let authenticator = Authenticator::new(
        deps.sessions.clone(),
        deps.store.clone(),
        config.credential_sets(),
    );
    let session = authenticator.authenticate().await?;
    info!(account = session.account.as_str(), "Session ready");

    let pacer = Arc::new(Pacer::new(PacerConfig::from(config)));
    let mut engine = SyncEngine::new(deps.table.clone(), pacer.clone());
    engine.bootstrap().await?;
    Ok((session, pacer, engine))
}
