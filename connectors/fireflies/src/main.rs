use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use shared::singer::{Catalog, SingerWriter};
use shared::telemetry::{self, TelemetryConfig};
use shared::State;
use std::path::PathBuf;
use tracing::{error, info};

use tap_fireflies::discover::discover;
use tap_fireflies::{FirefliesClient, StreamKind, SyncManager, TapConfig};

#[derive(Parser, Debug)]
#[command(name = "tap-fireflies")]
#[command(about = "Singer tap extracting users, transcripts and meetings from Fireflies.ai")]
struct Args {
    /// JSON config file. Falls back to FIREFLIES_* environment variables.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// State file written by a previous run
    #[arg(short, long)]
    state: Option<PathBuf>,

    /// Catalog selecting the streams to sync
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Print the catalog and exit
    #[arg(short, long)]
    discover: bool,

    /// Issue a single probe query and exit
    #[arg(long)]
    test_connection: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv().ok();

    let telemetry_config = TelemetryConfig::from_env("tap-fireflies");
    telemetry::init_telemetry(telemetry_config)?;

    let args = Args::parse();

    if args.discover {
        let catalog = discover()?;
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => TapConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => TapConfig::from_env().context("Failed to load config from environment")?,
    };
    info!("Starting Fireflies tap with {:?}", config);

    let client = FirefliesClient::new(&config)?;

    if args.test_connection {
        client.test_connection().await?;
        info!("Fireflies connection OK");
        return Ok(());
    }

    let mut state = match &args.state {
        Some(path) => State::load(path, |stream| {
            StreamKind::from_name(stream).and_then(|kind| kind.bookmark_key())
        })
        .with_context(|| format!("Failed to load state from {}", path.display()))?,
        None => State::default(),
    };

    let catalog = match &args.catalog {
        Some(path) => Catalog::load(path)
            .with_context(|| format!("Failed to load catalog from {}", path.display()))?,
        None => {
            let mut catalog = discover()?;
            catalog.select_all();
            catalog
        }
    };

    let stdout = std::io::stdout();
    let mut writer = SingerWriter::new(stdout.lock());

    let manager = SyncManager::new(&client, &config);
    let summary = manager.sync(&catalog, &mut state, &mut writer).await?;

    for stream in &summary.streams {
        info!(
            "Stream {}: fetched {}, emitted {}, status {:?}",
            stream.stream, stream.fetched, stream.emitted, stream.status
        );
    }

    if let Err(e) = summary.into_result() {
        error!("Sync finished with failures: {:#}", e);
        return Err(e);
    }

    info!("Sync complete, {} record(s) written", writer.records_written());
    Ok(())
}
