#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]

use fidx_config::{default_config_path, ConfigManager, ConfigWatcher};
use fidx_indexer::{FileIndexerService, IndexerEvent, MemoryStore};

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use tokio::{signal, sync::broadcast};
use tracing::{error, info, warn};

mod logging;
mod worker;

use worker::Worker;

const STORE_SNAPSHOT_NAME: &str = "store.json";

#[derive(Parser, Debug)]
#[command(name = "fidx-daemon", about = "Keeps a metadata index in sync with your folders")]
struct Cli {
	/// Indexer configuration file, written with the defaults if missing
	#[arg(long)]
	config: Option<PathBuf>,

	/// Where the store snapshot and the logs are kept
	#[arg(long)]
	data_dir: Option<PathBuf>,

	/// Start with indexing suspended
	#[arg(long)]
	suspended: bool,
}

fn default_data_dir() -> Result<PathBuf> {
	ProjectDirs::from("org", "fidx", "fidx")
		.map(|dirs| dirs.data_dir().to_path_buf())
		.context("unable to find the user's data directory")
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	let data_dir = cli.data_dir.map_or_else(default_data_dir, Ok)?;
	let _log_guard = logging::init(&data_dir.join("logs"))?;

	let config_path = cli.config.map_or_else(default_config_path, Ok)?;
	let config = ConfigManager::new(&config_path).await?;
	let config_watcher = ConfigWatcher::new(Arc::clone(&config))?;

	let snapshot_path = data_dir.join(STORE_SNAPSHOT_NAME);
	let store = Arc::new(MemoryStore::load(&snapshot_path).await?);

	let worker = Worker::new(
		config.get().await.extractor_command.as_deref(),
		Arc::clone(&store),
	);
	if worker.is_dry_run() {
		warn!("No extractor command configured, files will only be recorded;");
	}

	let service =
		FileIndexerService::start(Arc::clone(&config), Arc::clone(&store), Arc::new(worker), &data_dir)
			.await?;

	if cli.suspended {
		service.suspend().await?;
	}

	info!(
		config = %config_path.display(),
		data_dir = %data_dir.display(),
		records = store.len().await,
		"File indexer running;"
	);

	let mut events_rx = service.subscribe();

	loop {
		tokio::select! {
			res = signal::ctrl_c() => {
				res.context("failed to listen for ctrl-c")?;
				info!("Shutting down");
				break;
			}

			res = events_rx.recv() => match res {
				Ok(IndexerEvent::IndexingFinished) => {
					info!(records = store.len().await, "{}", service.status());

					if let Err(e) = store.save(&snapshot_path).await {
						error!(?e, "Failed to save store snapshot;");
					}
				}
				Ok(IndexerEvent::Suspended { .. }) => info!("{}", service.status()),
				Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
				Err(broadcast::error::RecvError::Closed) => break,
			},
		}
	}

	service.shutdown().await;
	config_watcher.shutdown().await;

	store
		.save(&snapshot_path)
		.await
		.context("failed to save store snapshot")?;

	Ok(())
}
