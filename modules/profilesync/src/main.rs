use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use portal_client::PortalClient;
use profilesync::{session_store, Deps};
use profilesync_common::{Config, GoogleCredentials};
use sheets_client::{ServiceAccountKey, SheetsClient};

/// Sync queued platform profiles into the shared spreadsheet.
#[derive(Parser)]
#[command(name = "profilesync")]
struct Cli {
    /// Stop after this many targets (0 = no limit). Overrides MAX_PROFILES_PER_RUN.
    #[arg(long)]
    max_profiles: Option<usize>,

    /// Pause after every N targets (0 = never). Overrides BATCH_SIZE.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Scrape the online-users list instead of the queue, logging presence.
    #[arg(long)]
    online: bool,

    /// With --online: use these nicknames instead of fetching the list.
    #[arg(long, value_delimiter = ',', requires = "online")]
    nicknames: Option<Vec<String>>,

    /// Delete the persisted session and exit.
    #[arg(long)]
    clear_session: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("profilesync=info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(n) = cli.max_profiles {
        config.max_profiles = n;
    }
    if let Some(n) = cli.batch_size {
        config.batch_size = n;
    }
    config.log_redacted();

    let store = session_store::for_mode(config.persistence, &config.session_file);
    if cli.clear_session {
        store.clear()?;
        info!("Persisted session cleared");
        return Ok(());
    }

    let portal = Arc::new(PortalClient::new(&config.portal_base_url)?);
    let key = match &config.google_credentials {
        GoogleCredentials::File(path) => ServiceAccountKey::from_file(path)?,
        GoogleCredentials::Inline(json) => ServiceAccountKey::from_json(json)?,
    };
    let sheets = Arc::new(SheetsClient::new(&config.sheet_location, key)?);

    let deps = Deps {
        sessions: portal.clone(),
        scraper: portal,
        table: sheets,
        store,
    };
    let stats = if cli.online {
        info!("profilesync starting in online mode...");
        profilesync::run_online(&config, deps, cli.nicknames).await?
    } else {
        info!("profilesync starting...");
        profilesync::run(&config, deps).await?
    };

    info!("Run complete. {stats}");
    Ok(())
}
