use crate::{
	monitor::{DiskSpaceMonitor, IdleMonitor, PowerMonitor},
	scheduler::{
		IndexerEvent, IndexerStatus, QueueSnapshot, Scheduler, SchedulerConfig, SchedulerHandle,
	},
	wait_stop_or_abort, wait_timer, Error, Extractor, IndexingSpeed, MetadataStore,
};

use fidx_config::{ConfigManager, IndexerConfig};
use fidx_folder_rules::FolderPolicy;
use fidx_utils::error::FileIOError;

use std::{
	path::{Path, PathBuf},
	sync::Arc,
};

use tokio::{
	fs, spawn,
	sync::{broadcast, watch},
	task::JoinHandle,
	time::sleep,
};
use tracing::{debug, error, info, instrument, warn};

/// Everything the file indexer runs, wired to the user's configuration.
///
/// Starts crawling slowly, speeds up once the startup period is over and follows
/// configuration changes by swapping the folder policy. Free disk space, user activity and
/// power management pace or pause the scheduler along the way.
#[derive(Debug)]
pub struct FileIndexerService {
	config: Arc<ConfigManager>,
	policy_rx: watch::Receiver<Arc<FolderPolicy>>,
	scheduler: Scheduler,
	handle: SchedulerHandle,
	stop_tx: async_channel::Sender<()>,
	supervisor: Option<JoinHandle<()>>,
}

impl FileIndexerService {
	/// `data_dir` is where the store lives, its volume is the one watched for free space
	pub async fn start<S: MetadataStore, E: Extractor>(
		config: Arc<ConfigManager>,
		store: Arc<S>,
		extractor: Arc<E>,
		data_dir: impl AsRef<Path>,
	) -> Result<Self, Error> {
		let current = config.get().await;

		let (policy_tx, policy_rx) = watch::channel(Arc::new(current.folder_policy()));

		let scheduler = Scheduler::spawn(
			store,
			extractor,
			policy_rx.clone(),
			SchedulerConfig {
				speed: IndexingSpeed::Throttled,
				..SchedulerConfig::from(&current)
			},
		);
		let handle = scheduler.handle();

		let monitors = Monitors {
			disk: DiskSpaceMonitor::spawn(handle.clone(), data_dir.as_ref(), current.min_disk_space),
			power: current
				.suspend_on_battery
				.then(|| PowerMonitor::spawn(handle.clone())),
			idle: None,
		};

		// subscribing before the first request, the first pass can't slip by
		let events_rx = handle.subscribe();

		if current.initial_update_disabled {
			info!("Initial update disabled, waiting for requests");
		} else {
			handle.request_full_rescan(false).await?;
		}

		let (stop_tx, stop_rx) = async_channel::bounded(1);

		let supervisor = spawn(supervise(
			Arc::clone(&config),
			handle.clone(),
			policy_tx,
			events_rx,
			stop_rx,
			current,
			monitors,
		));

		Ok(Self {
			config,
			policy_rx,
			scheduler,
			handle,
			stop_tx,
			supervisor: Some(supervisor),
		})
	}

	async fn resolve_folder(path: &Path) -> Option<PathBuf> {
		match fs::metadata(path).await {
			Ok(metadata) if metadata.is_dir() => Some(path.to_path_buf()),
			Ok(_) => path.parent().map(Path::to_path_buf),
			Err(e) => {
				debug!(
					"{}",
					FileIOError::from((path, e, "Ignoring folder update request"))
				);
				None
			}
		}
	}

	/// Queues a folder, or the folder holding a file, if the policy wants it indexed.
	///
	/// Returns whether something got queued.
	#[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
	pub async fn update_folder(
		&self,
		path: impl AsRef<Path>,
		recursive: bool,
		forced: bool,
	) -> Result<bool, Error> {
		let Some(folder) = Self::resolve_folder(path.as_ref()).await else {
			return Ok(false);
		};

		if !self.policy_rx.borrow().should_index_folder(&folder) {
			debug!(folder = %folder.display(), "Folder is not indexed, ignoring update request;");
			return Ok(false);
		}

		self.handle
			.request_folder_update(folder, recursive, forced)
			.await?;

		Ok(true)
	}

	/// Same as [`FileIndexerService::update_folder`] but regardless of the folder rules, only
	/// hidden entries and the exclude filters are skipped while crawling it
	pub async fn index_folder(
		&self,
		path: impl AsRef<Path>,
		recursive: bool,
		forced: bool,
	) -> Result<bool, Error> {
		let Some(folder) = Self::resolve_folder(path.as_ref()).await else {
			return Ok(false);
		};

		self.handle
			.request_folder_index(folder, recursive, forced)
			.await?;

		Ok(true)
	}

	pub async fn index_file(&self, path: impl AsRef<Path>) -> Result<(), Error> {
		self.handle.request_file_update(path).await
	}

	pub async fn update_all_folders(&self, forced: bool) -> Result<(), Error> {
		self.handle.request_full_rescan(forced).await
	}

	pub async fn suspend(&self) -> Result<(), Error> {
		self.handle.suspend().await
	}

	pub async fn resume(&self) -> Result<(), Error> {
		self.handle.resume().await
	}

	pub async fn set_speed(&self, speed: IndexingSpeed) -> Result<(), Error> {
		self.handle.set_speed(speed).await
	}

	pub async fn snapshot(&self) -> Result<QueueSnapshot, Error> {
		self.handle.snapshot().await
	}

	#[must_use]
	pub fn status(&self) -> IndexerStatus {
		self.handle.status()
	}

	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<IndexerEvent> {
		self.handle.subscribe()
	}

	#[must_use]
	pub fn scheduler(&self) -> SchedulerHandle {
		self.handle.clone()
	}

	/// The folder policy currently in effect
	#[must_use]
	pub fn policy(&self) -> Arc<FolderPolicy> {
		Arc::clone(&self.policy_rx.borrow())
	}

	#[must_use]
	pub fn config(&self) -> &Arc<ConfigManager> {
		&self.config
	}

	pub async fn shutdown(mut self) {
		if self.stop_tx.send(()).await.is_err() {
			warn!("File indexer supervisor already stopped;");
		}
		wait_stop_or_abort(self.supervisor.take(), "file indexer supervisor").await;

		self.scheduler.shutdown().await;

		info!("File indexer stopped");
	}
}

/// Resource watchers, owned by the supervisor as configuration changes start and stop them
#[derive(Debug)]
struct Monitors {
	disk: DiskSpaceMonitor,
	power: Option<PowerMonitor>,
	/// Only runs once the startup period is over
	idle: Option<IdleMonitor>,
}

impl Monitors {
	fn start_idle(&mut self, scheduler: &SchedulerHandle, config: &IndexerConfig) {
		self.idle = config
			.idle_timeout()
			.map(|idle_timeout| IdleMonitor::spawn(scheduler.clone(), idle_timeout));
	}

	async fn shutdown(self) {
		let Self { disk, power, idle } = self;

		disk.shutdown().await;
		if let Some(power) = power {
			power.shutdown().await;
		}
		if let Some(idle) = idle {
			idle.shutdown().await;
		}
	}
}

/// Follows configuration changes, startup pacing and the first run bookkeeping.
///
/// Stops when asked to or when the service, and with it the stop sender, is dropped.
async fn supervise(
	config: Arc<ConfigManager>,
	scheduler: SchedulerHandle,
	policy_tx: watch::Sender<Arc<FolderPolicy>>,
	mut events_rx: broadcast::Receiver<IndexerEvent>,
	stop_rx: async_channel::Receiver<()>,
	mut current: IndexerConfig,
	mut monitors: Monitors,
) {
	let mut config_rx = config.subscribe();
	let mut config_source_alive = true;

	let mut startup = Some(Box::pin(sleep(current.startup_throttle())));

	loop {
		tokio::select! {
			_ = stop_rx.recv() => break,

			res = config_rx.changed(), if config_source_alive => {
				if res.is_err() {
					config_source_alive = false;
					continue;
				}

				let new_config = config_rx.borrow_and_update().clone();

				if !new_config.same_policy_as(&current) {
					info!("Indexing configuration changed, rebuilding the folder policy");
					policy_tx.send_replace(Arc::new(new_config.folder_policy()));
				}

				let startup_over = startup.is_none();
				if let Err(e) =
					apply_settings(&scheduler, &mut monitors, &current, &new_config, startup_over).await
				{
					error!(?e, "Failed to apply the new indexing settings;");
					break;
				}

				current = new_config;
			}

			() = wait_timer(&mut startup) => {
				startup = None;
				debug!("Startup period over, speeding up indexing;");

				if let Err(e) = scheduler.set_speed(IndexingSpeed::Reduced).await {
					error!(?e, "Failed to leave the startup pace;");
					break;
				}

				monitors.start_idle(&scheduler, &current);
			}

			res = events_rx.recv() => match res {
				Ok(IndexerEvent::IndexingFinished) => {
					if current.first_run && !scheduler.is_suspended() {
						match config.write(|config| config.first_run = false).await {
							Ok(config) => {
								info!("First indexing run completed");
								current = config;
							}
							Err(e) => error!(?e, "Failed to save the first run completion;"),
						}
					}
				}
				Ok(_) => {}
				Err(broadcast::error::RecvError::Lagged(skipped)) => {
					debug!(skipped, "Supervisor lagged behind indexer events;");
				}
				Err(broadcast::error::RecvError::Closed) => break,
			},
		}
	}

	monitors.shutdown().await;

	debug!("File indexer supervisor stopped;");
}

/// Forwards the settings that don't shape the folder policy to whoever uses them
async fn apply_settings(
	scheduler: &SchedulerHandle,
	monitors: &mut Monitors,
	old: &IndexerConfig,
	new: &IndexerConfig,
	startup_over: bool,
) -> Result<(), Error> {
	if old.min_disk_space != new.min_disk_space {
		debug!(min_disk_space = new.min_disk_space, "Minimum disk space changed;");
		monitors.disk.set_min_disk_space(new.min_disk_space);
	}

	if old.extraction_timeout_secs != new.extraction_timeout_secs
		|| old.cleanup_batch_size != new.cleanup_batch_size
	{
		scheduler
			.reconfigure(new.extraction_timeout(), new.cleanup_batch_size)
			.await?;
	}

	if old.suspend_on_battery != new.suspend_on_battery {
		if let Some(power) = monitors.power.take() {
			power.shutdown().await;
		}
		if new.suspend_on_battery {
			monitors.power = Some(PowerMonitor::spawn(scheduler.clone()));
		}
	}

	if startup_over && old.idle_timeout_secs != new.idle_timeout_secs {
		if let Some(idle) = monitors.idle.take() {
			idle.shutdown().await;
		}
		monitors.start_idle(scheduler, new);
	}

	Ok(())
}
