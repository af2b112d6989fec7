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
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use fidx_folder_rules::{FolderPolicy, DEFAULT_EXCLUDE_FILTERS};
use fidx_utils::error::FileIOError;

use std::{
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
	fs,
	sync::{watch, RwLock},
};
use tracing::{debug, info};

mod watcher;

pub use watcher::ConfigWatcher;

/// Name of the file, inside the configuration directory, holding the [`IndexerConfig`]
pub const INDEXER_CONFIG_NAME: &str = "indexer.json";

const CURRENT_VERSION: u32 = 1;

/// Default minimum free disk space, 200 MiB
pub const DEFAULT_MIN_DISK_SPACE: u64 = 200 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error(transparent)]
	SerdeJson(#[from] serde_json::Error),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("file system watcher error: {0}")]
	Watcher(#[from] notify::Error),
	#[error("unsupported indexer config version: {0}")]
	UnsupportedVersion(u32),
	#[error("unable to find the user's configuration directory")]
	NoConfigDir,
}

const fn skip_if_false(value: &bool) -> bool {
	!*value
}

/// Everything the file indexer reads from the user's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
	pub version: u32,
	/// Folders to index, recursively
	pub include_folders: Vec<PathBuf>,
	/// Folders, inside included ones, to skip
	pub exclude_folders: Vec<PathBuf>,
	/// Name globs (`*`, `?`) applied to file and folder names
	pub exclude_filters: Vec<String>,
	#[serde(skip_serializing_if = "skip_if_false")]
	pub index_hidden: bool,
	/// Indexing is suspended while the free space of the store's volume is at or below this, in bytes
	pub min_disk_space: u64,
	pub first_run: bool,
	#[serde(skip_serializing_if = "skip_if_false")]
	pub initial_update_disabled: bool,
	pub extraction_timeout_secs: u64,
	pub cleanup_batch_size: usize,
	/// How long the indexer runs at its slowest pace right after startup
	pub startup_throttle_secs: u64,
	/// User inactivity after which indexing runs at full speed, 0 never speeds up
	pub idle_timeout_secs: u64,
	/// Suspend indexing while the power manager asks to conserve resources, e.g. on battery
	pub suspend_on_battery: bool,
	/// Program and arguments of the external extraction worker, the file path is appended
	#[serde(skip_serializing_if = "Option::is_none")]
	pub extractor_command: Option<Vec<String>>,
}

impl Default for IndexerConfig {
	fn default() -> Self {
		Self {
			version: CURRENT_VERSION,
			include_folders: UserDirs::new()
				.map(|dirs| vec![dirs.home_dir().to_path_buf()])
				.unwrap_or_default(),
			exclude_folders: Vec::new(),
			exclude_filters: DEFAULT_EXCLUDE_FILTERS
				.iter()
				.map(ToString::to_string)
				.collect(),
			index_hidden: false,
			min_disk_space: DEFAULT_MIN_DISK_SPACE,
			first_run: true,
			initial_update_disabled: false,
			extraction_timeout_secs: 5 * 60,
			cleanup_batch_size: 20,
			startup_throttle_secs: 2 * 60,
			idle_timeout_secs: 2 * 60,
			suspend_on_battery: true,
			extractor_command: None,
		}
	}
}

impl IndexerConfig {
	/// Loads the config file at `path`, writing the defaults there first if it doesn't exist yet
	pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();

		match fs::read(path).await {
			Ok(bytes) => {
				let config = serde_json::from_slice::<Self>(&bytes)?;
				if config.version > CURRENT_VERSION {
					return Err(ConfigError::UnsupportedVersion(config.version));
				}

				debug!(path = %path.display(), "Loaded indexer config;");

				Ok(config)
			}

			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				info!(path = %path.display(), "No indexer config found, writing defaults;");
				let config = Self::default();
				config.save(path).await?;

				Ok(config)
			}

			Err(e) => Err(FileIOError::from((path, e, "Failed to read indexer config file")).into()),
		}
	}

	pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
		let path = path.as_ref();

		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| FileIOError::from((parent, e)))?;
		}

		fs::write(path, serde_json::to_vec_pretty(self)?)
			.await
			.map_err(|e| FileIOError::from((path, e)))?;

		Ok(())
	}

	/// Builds the immutable folder policy for this configuration
	#[must_use]
	pub fn folder_policy(&self) -> FolderPolicy {
		FolderPolicy::new(
			&self.include_folders,
			&self.exclude_folders,
			&self.exclude_filters,
			self.index_hidden,
		)
	}

	#[must_use]
	pub const fn extraction_timeout(&self) -> Duration {
		Duration::from_secs(self.extraction_timeout_secs)
	}

	#[must_use]
	pub const fn startup_throttle(&self) -> Duration {
		Duration::from_secs(self.startup_throttle_secs)
	}

	/// `None` when idle detection is turned off
	#[must_use]
	pub const fn idle_timeout(&self) -> Option<Duration> {
		if self.idle_timeout_secs == 0 {
			None
		} else {
			Some(Duration::from_secs(self.idle_timeout_secs))
		}
	}

	/// Only the fields that shape the folder policy, used to tell apart changes that require a rescan
	#[must_use]
	pub fn same_policy_as(&self, other: &Self) -> bool {
		self.include_folders == other.include_folders
			&& self.exclude_folders == other.exclude_folders
			&& self.exclude_filters == other.exclude_filters
			&& self.index_hidden == other.index_hidden
	}
}

/// Default location of the config file, inside the platform's configuration directory
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
	ProjectDirs::from("org", "fidx", "fidx")
		.map(|dirs| dirs.config_dir().join(INDEXER_CONFIG_NAME))
		.ok_or(ConfigError::NoConfigDir)
}

/// Owns the in-memory copy of the configuration and notifies subscribers of every change
#[derive(Debug)]
pub struct ConfigManager {
	config: RwLock<IndexerConfig>,
	config_file_path: PathBuf,
	config_watcher_tx: watch::Sender<IndexerConfig>,
}

impl ConfigManager {
	pub async fn new(config_file_path: impl AsRef<Path>) -> Result<Arc<Self>, ConfigError> {
		let config_file_path = config_file_path.as_ref().to_path_buf();

		let config = IndexerConfig::load(&config_file_path).await?;

		let (config_watcher_tx, _config_watcher_rx) = watch::channel(config.clone());

		Ok(Arc::new(Self {
			config: RwLock::new(config),
			config_file_path,
			config_watcher_tx,
		}))
	}

	/// Returns the current [`IndexerConfig`] in a read only state.
	pub async fn get(&self) -> IndexerConfig {
		self.config.read().await.clone()
	}

	#[must_use]
	pub fn path(&self) -> &Path {
		&self.config_file_path
	}

	/// Every value sent here is a configuration change
	#[must_use]
	pub fn subscribe(&self) -> watch::Receiver<IndexerConfig> {
		self.config_watcher_tx.subscribe()
	}

	/// Updates the configuration through a closure while holding the write lock, then saves and
	/// publishes it.
	pub async fn write<F: FnOnce(&mut IndexerConfig)>(
		&self,
		mutation_fn: F,
	) -> Result<IndexerConfig, ConfigError> {
		let mut config = self.config.write().await;

		mutation_fn(&mut config);

		config.save(&self.config_file_path).await?;

		self.publish(&config);

		Ok(config.clone())
	}

	/// Re-reads the file from disk, publishing it only if it differs from the current one.
	///
	/// Returns whether the configuration changed.
	pub async fn reload(&self) -> Result<bool, ConfigError> {
		let new_config = IndexerConfig::load(&self.config_file_path).await?;

		let mut config = self.config.write().await;
		if *config == new_config {
			return Ok(false);
		}

		*config = new_config;
		self.publish(&config);

		Ok(true)
	}

	fn publish(&self, config: &IndexerConfig) {
		self.config_watcher_tx.send_if_modified(|current| {
			let modified = current != config;
			if modified {
				*current = config.clone();
			}
			modified
		});
	}
}
