use crate::{
	cleaner::{CleanerHandle, IndexCleaner},
	wait_stop_or_abort, wait_timer, Error, ExtractionError, Extractor, IndexingSpeed,
	MetadataStore, NonCriticalIndexerError,
};

use fidx_config::IndexerConfig;
use fidx_folder_rules::FolderPolicy;
use fidx_utils::{normalize_path, system_time_to_utc};

use std::{
	future::pending,
	mem,
	path::{Path, PathBuf},
	pin::Pin,
	sync::Arc,
	time::Duration,
};

use tokio::{
	fs, spawn,
	sync::{broadcast, oneshot, watch},
	task::JoinHandle,
	time::{sleep, timeout, Sleep},
};
use tracing::{debug, info, instrument, trace, warn};

mod analyzer;
mod queue;
mod status;

pub use queue::{DirFlags, DirQueue, DirQueueEntry, FileQueue, FileWorkEntry};
pub use status::{IndexerEvent, IndexerStatus};

const EVENTS_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
	/// Wall clock bound for a single extraction, the worker is killed past it
	pub extraction_timeout: Duration,
	pub cleanup_batch_size: usize,
	pub speed: IndexingSpeed,
	/// Start without scheduling anything until resumed
	pub suspended: bool,
	/// Run the index cleaner right away, not only after policy changes
	pub cleanup_on_start: bool,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			extraction_timeout: Duration::from_secs(300),
			cleanup_batch_size: 20,
			speed: IndexingSpeed::default(),
			suspended: false,
			cleanup_on_start: true,
		}
	}
}

impl From<&IndexerConfig> for SchedulerConfig {
	fn from(config: &IndexerConfig) -> Self {
		Self {
			extraction_timeout: config.extraction_timeout(),
			cleanup_batch_size: config.cleanup_batch_size,
			..Default::default()
		}
	}
}

/// Both work queues as they are at some point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
	pub dirs: Vec<DirQueueEntry>,
	pub files: Vec<FileWorkEntry>,
}

#[derive(Debug)]
enum SchedulerCommand {
	UpdateFolder { path: PathBuf, flags: DirFlags },
	UpdateAll { forced: bool },
	UpdateFile { path: PathBuf },
	Suspend,
	Resume,
	SetSpeed(IndexingSpeed),
	Reconfigure {
		extraction_timeout: Duration,
		cleanup_batch_size: usize,
	},
	Snapshot(oneshot::Sender<QueueSnapshot>),
}

/// Cheap to clone entry point to a running [`Scheduler`]
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
	commands_tx: async_channel::Sender<SchedulerCommand>,
	status_rx: watch::Receiver<IndexerStatus>,
	events_tx: broadcast::Sender<IndexerEvent>,
}

impl SchedulerHandle {
	async fn send(&self, command: SchedulerCommand) -> Result<(), Error> {
		self.commands_tx
			.send(command)
			.await
			.map_err(|_| Error::SchedulerGone)
	}

	/// Scans a folder ahead of everything discovered by rescans
	pub async fn request_folder_update(
		&self,
		path: impl AsRef<Path>,
		recursive: bool,
		forced: bool,
	) -> Result<(), Error> {
		self.send(SchedulerCommand::UpdateFolder {
			path: normalize_path(path),
			flags: request_flags(recursive, forced),
		})
		.await
	}

	/// Like [`SchedulerHandle::request_folder_update`], but the crawl ignores the folder rules
	/// and only checks entry names
	pub async fn request_folder_index(
		&self,
		path: impl AsRef<Path>,
		recursive: bool,
		forced: bool,
	) -> Result<(), Error> {
		self.send(SchedulerCommand::UpdateFolder {
			path: normalize_path(path),
			flags: request_flags(recursive, forced) | DirFlags::IGNORE_FOLDER_RULES,
		})
		.await
	}

	/// Drops every folder queued by a previous rescan and queues all include folders again
	pub async fn request_full_rescan(&self, forced: bool) -> Result<(), Error> {
		self.send(SchedulerCommand::UpdateAll { forced }).await
	}

	/// Extracts a single file as soon as possible, bypassing the speed delay
	pub async fn request_file_update(&self, path: impl AsRef<Path>) -> Result<(), Error> {
		self.send(SchedulerCommand::UpdateFile {
			path: normalize_path(path),
		})
		.await
	}

	pub async fn suspend(&self) -> Result<(), Error> {
		self.send(SchedulerCommand::Suspend).await
	}

	pub async fn resume(&self) -> Result<(), Error> {
		self.send(SchedulerCommand::Resume).await
	}

	pub async fn set_speed(&self, speed: IndexingSpeed) -> Result<(), Error> {
		self.send(SchedulerCommand::SetSpeed(speed)).await
	}

	/// The new batch size is used from the next cleaner run on
	pub async fn reconfigure(
		&self,
		extraction_timeout: Duration,
		cleanup_batch_size: usize,
	) -> Result<(), Error> {
		self.send(SchedulerCommand::Reconfigure {
			extraction_timeout,
			cleanup_batch_size,
		})
		.await
	}

	pub async fn snapshot(&self) -> Result<QueueSnapshot, Error> {
		let (tx, rx) = oneshot::channel();
		self.send(SchedulerCommand::Snapshot(tx)).await?;
		rx.await.map_err(|_| Error::SchedulerGone)
	}

	#[must_use]
	pub fn status(&self) -> IndexerStatus {
		self.status_rx.borrow().clone()
	}

	#[must_use]
	pub fn status_changes(&self) -> watch::Receiver<IndexerStatus> {
		self.status_rx.clone()
	}

	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<IndexerEvent> {
		self.events_tx.subscribe()
	}

	#[must_use]
	pub fn is_suspended(&self) -> bool {
		self.status_rx.borrow().suspended
	}
}

fn request_flags(recursive: bool, forced: bool) -> DirFlags {
	let mut flags = DirFlags::empty();
	flags.set(DirFlags::RECURSIVE, recursive);
	flags.set(DirFlags::FORCE_UPDATE, forced);
	flags
}

/// Keeps the metadata store in sync with the included folders, one small step at a time.
///
/// A single task owns both queues and the status, everything else talks to it through
/// a [`SchedulerHandle`].
#[derive(Debug)]
pub struct Scheduler {
	handle: SchedulerHandle,
	stop_tx: async_channel::Sender<()>,
	join_handle: Option<JoinHandle<()>>,
}

impl Scheduler {
	#[must_use]
	pub fn spawn<S: MetadataStore, E: Extractor>(
		store: Arc<S>,
		extractor: Arc<E>,
		mut policy_rx: watch::Receiver<Arc<FolderPolicy>>,
		config: SchedulerConfig,
	) -> Self {
		let (commands_tx, commands_rx) = async_channel::unbounded();
		let (stop_tx, stop_rx) = async_channel::bounded(1);
		let (events_tx, _) = broadcast::channel(EVENTS_CHANNEL_CAPACITY);

		let status = IndexerStatus {
			suspended: config.suspended,
			speed: config.speed,
			..Default::default()
		};
		let (status_tx, status_rx) = watch::channel(status.clone());

		let policy = Arc::clone(&policy_rx.borrow_and_update());

		let runner = Runner {
			store,
			extractor,
			policy,
			config,
			dirs: DirQueue::default(),
			files: FileQueue::default(),
			status,
			expedite: false,
			cleaner: None,
			timer: None,
			in_flight: None,
			status_tx,
			events_tx: events_tx.clone(),
		};

		Self {
			handle: SchedulerHandle {
				commands_tx,
				status_rx,
				events_tx,
			},
			stop_tx,
			join_handle: Some(spawn(runner.run(commands_rx, stop_rx, policy_rx))),
		}
	}

	#[must_use]
	pub fn handle(&self) -> SchedulerHandle {
		self.handle.clone()
	}

	/// Stops scheduling, aborts the running extraction and kills the cleaner
	pub async fn shutdown(mut self) {
		if self.stop_tx.send(()).await.is_err() {
			warn!("Indexing scheduler already stopped;");
		}

		wait_stop_or_abort(self.join_handle.take(), "indexing scheduler").await;
	}
}

impl Drop for Scheduler {
	fn drop(&mut self) {
		if let Some(handle) = self.join_handle.take() {
			handle.abort();
		}
	}
}

#[derive(Debug)]
struct InFlight {
	entry: FileWorkEntry,
	handle: JoinHandle<Result<(), ExtractionError>>,
}

async fn wait_extraction(in_flight: &mut Option<InFlight>) -> Result<(), ExtractionError> {
	match in_flight {
		Some(InFlight { handle, .. }) => handle.await.unwrap_or_else(|e| {
			Err(if e.is_panic() {
				ExtractionError::Panicked
			} else {
				ExtractionError::Other("extraction task cancelled".to_string())
			})
		}),
		None => pending().await,
	}
}

#[derive(Debug)]
struct Runner<S, E> {
	store: Arc<S>,
	extractor: Arc<E>,
	policy: Arc<FolderPolicy>,
	config: SchedulerConfig,

	dirs: DirQueue,
	files: FileQueue,
	status: IndexerStatus,

	/// A file request arrived while an extraction was running, skip the delay after it
	expedite: bool,
	cleaner: Option<CleanerHandle>,
	timer: Option<Pin<Box<Sleep>>>,
	in_flight: Option<InFlight>,

	status_tx: watch::Sender<IndexerStatus>,
	events_tx: broadcast::Sender<IndexerEvent>,
}

impl<S: MetadataStore, E: Extractor> Runner<S, E> {
	async fn run(
		mut self,
		commands_rx: async_channel::Receiver<SchedulerCommand>,
		stop_rx: async_channel::Receiver<()>,
		mut policy_rx: watch::Receiver<Arc<FolderPolicy>>,
	) {
		let mut policy_source_alive = true;

		if self.config.cleanup_on_start {
			self.restart_cleaner().await;
		}

		loop {
			tokio::select! {
				_ = stop_rx.recv() => break,

				res = commands_rx.recv() => match res {
					Ok(command) => self.handle_command(command).await,
					Err(_) => break,
				},

				res = policy_rx.changed(), if policy_source_alive => match res {
					Ok(()) => {
						let policy = Arc::clone(&policy_rx.borrow_and_update());
						self.policy_changed(policy).await;
					}
					Err(_) => {
						debug!("Folder policy source closed, keeping the last policy;");
						policy_source_alive = false;
					}
				},

				() = wait_timer(&mut self.timer) => {
					self.timer = None;
					self.step().await;
				}

				res = wait_extraction(&mut self.in_flight) => self.extraction_done(res),
			}
		}

		self.stop().await;
	}

	async fn stop(&mut self) {
		self.timer = None;

		if let Some(InFlight { entry, handle }) = self.in_flight.take() {
			debug!(path = %entry.path.display(), "Aborting running extraction;");
			handle.abort();
		}

		if let Some(cleaner) = self.cleaner.take() {
			cleaner.kill().await;
		}

		self.status.clear_current();
		self.status.indexing = false;
		self.publish_status();

		info!("Indexing scheduler stopped");
	}

	async fn handle_command(&mut self, command: SchedulerCommand) {
		match command {
			SchedulerCommand::UpdateFolder { path, flags } => {
				self.dirs
					.prepend(path, flags.difference(DirFlags::AUTO_DISCOVERED));
				self.schedule(self.status.speed.delay());
			}

			SchedulerCommand::UpdateAll { forced } => {
				self.queue_all_folders(forced);
				self.schedule(self.status.speed.delay());
			}

			SchedulerCommand::UpdateFile { path } => self.queue_file(path).await,

			SchedulerCommand::Suspend => self.suspend().await,

			SchedulerCommand::Resume => self.resume().await,

			SchedulerCommand::SetSpeed(speed) => {
				debug!(%speed, "Changing indexing speed;");
				self.status.speed = speed;
				if let Some(cleaner) = &self.cleaner {
					cleaner.set_delay(speed.delay()).await;
				}
				self.publish_status();
			}

			SchedulerCommand::Reconfigure {
				extraction_timeout,
				cleanup_batch_size,
			} => {
				debug!(?extraction_timeout, cleanup_batch_size, "Reconfiguring scheduler;");
				self.config.extraction_timeout = extraction_timeout;
				self.config.cleanup_batch_size = cleanup_batch_size;
			}

			SchedulerCommand::Snapshot(tx) => {
				if tx
					.send(QueueSnapshot {
						dirs: self.dirs.iter().cloned().collect(),
						files: self.files.iter().cloned().collect(),
					})
					.is_err()
				{
					trace!("Snapshot requester went away");
				}
			}
		}
	}

	fn emit(&self, event: IndexerEvent) {
		// nobody listening is fine
		let _ = self.events_tx.send(event);
	}

	fn publish_status(&self) {
		let modified = self.status_tx.send_if_modified(|status| {
			if *status == self.status {
				false
			} else {
				*status = self.status.clone();
				true
			}
		});

		if modified {
			self.emit(IndexerEvent::StatusChanged);
		}
	}

	fn set_indexing(&mut self, indexing: bool) {
		if self.status.indexing != indexing {
			self.status.indexing = indexing;
			self.publish_status();

			if indexing {
				info!("Indexing started");
				self.emit(IndexerEvent::IndexingStarted);
			} else {
				info!("Indexing finished");
				self.emit(IndexerEvent::IndexingFinished);
			}
		}
	}

	/// Arms the step timer, unless a step is already pending or running, or we're suspended
	fn schedule(&mut self, delay: Duration) {
		if self.timer.is_none() && self.in_flight.is_none() && !self.status.suspended {
			self.timer = Some(Box::pin(sleep(delay)));
		}
	}

	fn queue_all_folders(&mut self, forced: bool) {
		self.dirs.clear_by_flags(DirFlags::AUTO_DISCOVERED);

		let mut flags = DirFlags::RECURSIVE | DirFlags::AUTO_DISCOVERED;
		flags.set(DirFlags::FORCE_UPDATE, forced);

		for folder in self.policy.include_folders() {
			self.dirs.enqueue(folder, flags);
		}

		debug!(dirs = self.dirs.len(), forced, "Queued all folders for update;");
	}

	async fn queue_file(&mut self, path: PathBuf) {
		let (is_dir, modified_at) = match fs::metadata(&path).await {
			Ok(metadata) => (
				metadata.is_dir(),
				metadata.modified().ok().map(system_time_to_utc),
			),
			// the extractor takes care of files that are gone
			Err(_) => (false, None),
		};

		self.files.enqueue_front(FileWorkEntry {
			path,
			is_dir,
			modified_at,
		});

		if self.status.suspended {
			return;
		}

		if self.in_flight.is_some() {
			self.expedite = true;
		} else {
			self.timer = Some(Box::pin(sleep(Duration::ZERO)));
		}
	}

	async fn suspend(&mut self) {
		if self.status.suspended {
			return;
		}

		info!("Suspending indexing");

		self.status.suspended = true;
		self.timer = None;

		if let Some(cleaner) = &self.cleaner {
			cleaner.suspend().await;
		}

		self.publish_status();
		self.emit(IndexerEvent::Suspended { suspended: true });
	}

	async fn resume(&mut self) {
		if !self.status.suspended {
			return;
		}

		info!("Resuming indexing");

		self.status.suspended = false;

		if let Some(cleaner) = &self.cleaner {
			cleaner.resume().await;
		}

		if self.status.indexing || !self.dirs.is_empty() || !self.files.is_empty() {
			self.schedule(self.status.speed.delay());
		}

		self.publish_status();
		self.emit(IndexerEvent::Suspended { suspended: false });
	}

	async fn policy_changed(&mut self, policy: Arc<FolderPolicy>) {
		info!("Folder policy changed, rescanning all folders");

		self.policy = policy;
		self.queue_all_folders(false);
		self.schedule(self.status.speed.delay());

		self.restart_cleaner().await;
	}

	async fn restart_cleaner(&mut self) {
		if let Some(cleaner) = self.cleaner.take() {
			cleaner.kill().await;
		}

		self.cleaner = Some(
			IndexCleaner::new(
				Arc::clone(&self.store),
				&self.policy,
				self.config.cleanup_batch_size,
				self.events_tx.clone(),
			)
			.with_delay(self.status.speed.delay())
			.suspended(self.status.suspended)
			.spawn(),
		);
	}

	#[instrument(skip(self))]
	async fn step(&mut self) {
		self.set_indexing(true);

		if let Some(entry) = self.files.dequeue() {
			self.dispatch(entry);
			return;
		}

		if let Some(dir) = self.dirs.dequeue() {
			self.status.scanning(&dir.path, dir.flags);
			self.publish_status();
			self.emit(IndexerEvent::IndexingFolder {
				path: dir.path.clone(),
			});

			let errors = analyzer::analyze_directory(
				&*self.store,
				&self.policy,
				&dir,
				&mut self.dirs,
				&mut self.files,
			)
			.await;
			report_non_critical(&errors);

			self.status.clear_current();
			self.publish_status();

			self.schedule(self.status.speed.delay());
			return;
		}

		self.status.clear_current();
		self.set_indexing(false);
	}

	fn dispatch(&mut self, entry: FileWorkEntry) {
		trace!(path = %entry.path.display(), "Dispatching extraction");

		self.status.extracting(&entry.path);
		self.publish_status();
		self.emit(IndexerEvent::IndexingFile {
			path: entry.path.clone(),
		});

		let extractor = Arc::clone(&self.extractor);
		let extraction_timeout = self.config.extraction_timeout;
		let to_extract = entry.clone();

		let handle = spawn(async move {
			timeout(extraction_timeout, extractor.extract(&to_extract))
				.await
				.unwrap_or(Err(ExtractionError::TimedOut(extraction_timeout)))
		});

		self.in_flight = Some(InFlight { entry, handle });
	}

	fn extraction_done(&mut self, res: Result<(), ExtractionError>) {
		let Some(InFlight { entry, .. }) = self.in_flight.take() else {
			return;
		};

		if let Err(e) = res {
			let reason = e.to_string();
			warn!(
				"{}",
				NonCriticalIndexerError::Extraction {
					path: entry.path.clone().into_boxed_path(),
					source: e,
				}
			);
			self.emit(IndexerEvent::ExtractionFailed {
				path: entry.path,
				reason,
			});
		}

		self.status.clear_current();
		self.publish_status();

		let delay = if mem::take(&mut self.expedite) {
			Duration::ZERO
		} else {
			self.status.speed.delay()
		};
		self.schedule(delay);
	}
}

fn report_non_critical(errors: &[NonCriticalIndexerError]) {
	for e in errors {
		warn!(%e, "Non critical error while scanning directory;");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::{IndexedRecord, MemoryStore};

	use std::{collections::HashSet, fs as std_fs};

	use tracing_test::traced_test;

	/// Writes straight into the store, like a real worker would
	#[derive(Debug)]
	struct RecordingExtractor {
		store: Arc<MemoryStore>,
		stuck: HashSet<PathBuf>,
	}

	impl Extractor for RecordingExtractor {
		async fn extract(&self, entry: &FileWorkEntry) -> Result<(), ExtractionError> {
			if self.stuck.contains(&entry.path) {
				pending::<()>().await;
			}

			self.store.record_path(&entry.path, entry.modified_at).await;
			Ok(())
		}
	}

	fn tree() -> tempfile::TempDir {
		let root = tempfile::Builder::new().prefix("fidx").tempdir().unwrap();

		std_fs::write(root.path().join("a.txt"), b"a").unwrap();
		std_fs::write(root.path().join("b.tmp"), b"b").unwrap();
		std_fs::create_dir(root.path().join("docs")).unwrap();
		std_fs::write(root.path().join("docs/c.txt"), b"c").unwrap();

		root
	}

	fn policy_channel(
		include: &[&Path],
	) -> (
		watch::Sender<Arc<FolderPolicy>>,
		watch::Receiver<Arc<FolderPolicy>>,
	) {
		watch::channel(Arc::new(FolderPolicy::new(
			include,
			[] as [&str; 0],
			["*.tmp"],
			false,
		)))
	}

	fn test_config() -> SchedulerConfig {
		SchedulerConfig {
			cleanup_on_start: false,
			..Default::default()
		}
	}

	async fn wait_for(
		events_rx: &mut broadcast::Receiver<IndexerEvent>,
		wanted: impl Fn(&IndexerEvent) -> bool,
	) -> Vec<IndexerEvent> {
		let mut seen = Vec::new();

		timeout(Duration::from_secs(10), async {
			loop {
				match events_rx.recv().await {
					Ok(event) => {
						let done = wanted(&event);
						seen.push(event);
						if done {
							break;
						}
					}
					Err(broadcast::error::RecvError::Lagged(_)) => {}
					Err(broadcast::error::RecvError::Closed) => panic!("scheduler went away"),
				}
			}
		})
		.await
		.expect("timed out waiting for scheduler event");

		seen
	}

	fn runner(
		store: Arc<MemoryStore>,
		policy: Arc<FolderPolicy>,
		suspended: bool,
	) -> Runner<MemoryStore, RecordingExtractor> {
		let (status_tx, _) = watch::channel(IndexerStatus::default());
		let (events_tx, _) = broadcast::channel(16);

		Runner {
			extractor: Arc::new(RecordingExtractor {
				store: Arc::clone(&store),
				stuck: HashSet::new(),
			}),
			store,
			policy,
			config: test_config(),
			dirs: DirQueue::default(),
			files: FileQueue::default(),
			status: IndexerStatus {
				suspended,
				speed: IndexingSpeed::Throttled,
				..Default::default()
			},
			expedite: false,
			cleaner: None,
			timer: None,
			in_flight: None,
			status_tx,
			events_tx,
		}
	}

	fn queues<S, E>(runner: &Runner<S, E>) -> (Vec<DirQueueEntry>, Vec<FileWorkEntry>) {
		(
			runner.dirs.iter().cloned().collect(),
			runner.files.iter().cloned().collect(),
		)
	}

	#[tokio::test]
	#[traced_test]
	async fn full_rescan_indexes_included_files() {
		let root = tree();
		let store = Arc::new(MemoryStore::new());
		let (_policy_tx, policy_rx) = policy_channel(&[root.path()]);

		let scheduler = Scheduler::spawn(
			Arc::clone(&store),
			Arc::new(RecordingExtractor {
				store: Arc::clone(&store),
				stuck: HashSet::new(),
			}),
			policy_rx,
			test_config(),
		);
		let handle = scheduler.handle();
		let mut events_rx = handle.subscribe();

		handle.request_full_rescan(false).await.unwrap();

		let events = wait_for(&mut events_rx, |e| *e == IndexerEvent::IndexingFinished).await;
		assert!(events.contains(&IndexerEvent::IndexingStarted));
		assert!(events.contains(&IndexerEvent::IndexingFolder {
			path: root.path().join("docs")
		}));

		assert!(store.contains_path(root.path()).await);
		assert!(store.contains_path(root.path().join("a.txt")).await);
		assert!(store.contains_path(root.path().join("docs")).await);
		assert!(store.contains_path(root.path().join("docs/c.txt")).await);
		assert!(!store.contains_path(root.path().join("b.tmp")).await);

		let status = handle.status();
		assert!(!status.indexing);
		assert_eq!(status.to_string(), "File indexer is idle.");

		scheduler.shutdown().await;
	}

	#[tokio::test]
	#[traced_test]
	async fn deleted_file_is_removed_from_the_store() {
		let root = tree();
		let store = Arc::new(MemoryStore::with_records([
			IndexedRecord::for_path(root.path().join("old.txt"), None),
			IndexedRecord::for_path(root.path().join("a.txt"), None),
		]));
		let (_policy_tx, policy_rx) = policy_channel(&[root.path()]);

		let scheduler = Scheduler::spawn(
			Arc::clone(&store),
			Arc::new(RecordingExtractor {
				store: Arc::clone(&store),
				stuck: HashSet::new(),
			}),
			policy_rx,
			test_config(),
		);
		let handle = scheduler.handle();
		let mut events_rx = handle.subscribe();

		handle
			.request_folder_update(root.path(), false, false)
			.await
			.unwrap();
		wait_for(&mut events_rx, |e| *e == IndexerEvent::IndexingFinished).await;

		assert!(!store.contains_path(root.path().join("old.txt")).await);
		assert!(store.contains_path(root.path().join("a.txt")).await);
		// non recursive, the sub folder itself is indexed but not its content
		assert!(store.contains_path(root.path().join("docs")).await);
		assert!(!store.contains_path(root.path().join("docs/c.txt")).await);

		scheduler.shutdown().await;
	}

	#[tokio::test]
	#[traced_test]
	async fn stuck_extraction_times_out() {
		let root = tree();
		let store = Arc::new(MemoryStore::new());
		let (_policy_tx, policy_rx) = policy_channel(&[root.path()]);
		let stuck = root.path().join("docs/c.txt");

		let scheduler = Scheduler::spawn(
			Arc::clone(&store),
			Arc::new(RecordingExtractor {
				store: Arc::clone(&store),
				stuck: HashSet::from([stuck.clone()]),
			}),
			policy_rx,
			SchedulerConfig {
				extraction_timeout: Duration::from_millis(100),
				..test_config()
			},
		);
		let handle = scheduler.handle();
		let mut events_rx = handle.subscribe();

		handle.request_full_rescan(false).await.unwrap();

		let events = wait_for(&mut events_rx, |e| *e == IndexerEvent::IndexingFinished).await;
		assert!(events.iter().any(|e| matches!(
			e,
			IndexerEvent::ExtractionFailed { path, .. } if *path == stuck
		)));

		assert!(!store.contains_path(&stuck).await);
		assert!(store.contains_path(root.path().join("a.txt")).await);

		scheduler.shutdown().await;
	}

	#[tokio::test]
	#[traced_test]
	async fn policy_change_rescans_new_folders() {
		let first = tree();
		let second = tree();
		let store = Arc::new(MemoryStore::new());
		let (policy_tx, policy_rx) = policy_channel(&[first.path()]);

		let scheduler = Scheduler::spawn(
			Arc::clone(&store),
			Arc::new(RecordingExtractor {
				store: Arc::clone(&store),
				stuck: HashSet::new(),
			}),
			policy_rx,
			test_config(),
		);
		let handle = scheduler.handle();
		let mut events_rx = handle.subscribe();

		policy_tx
			.send(Arc::new(FolderPolicy::new(
				[first.path(), second.path()],
				[] as [&str; 0],
				["*.tmp"],
				false,
			)))
			.unwrap();

		wait_for(&mut events_rx, |e| *e == IndexerEvent::IndexingFinished).await;

		assert!(store.contains_path(first.path().join("a.txt")).await);
		assert!(store.contains_path(second.path().join("docs/c.txt")).await);

		scheduler.shutdown().await;
	}

	#[tokio::test]
	#[traced_test]
	async fn suspended_scheduler_only_queues() {
		let root = tree();
		let store = Arc::new(MemoryStore::new());
		let (_policy_tx, policy_rx) = policy_channel(&[root.path()]);

		let scheduler = Scheduler::spawn(
			Arc::clone(&store),
			Arc::new(RecordingExtractor {
				store: Arc::clone(&store),
				stuck: HashSet::new(),
			}),
			policy_rx,
			SchedulerConfig {
				suspended: true,
				..test_config()
			},
		);
		let handle = scheduler.handle();
		assert!(handle.is_suspended());
		assert_eq!(handle.status().to_string(), "File indexer is suspended.");

		handle.request_full_rescan(false).await.unwrap();
		handle
			.request_file_update(root.path().join("a.txt"))
			.await
			.unwrap();

		let snapshot = handle.snapshot().await.unwrap();
		assert_eq!(
			snapshot.dirs,
			vec![DirQueueEntry {
				path: root.path().to_path_buf(),
				flags: DirFlags::RECURSIVE | DirFlags::AUTO_DISCOVERED,
			}]
		);
		assert_eq!(snapshot.files.len(), 1);
		assert!(store.is_empty().await);

		let mut events_rx = handle.subscribe();
		handle.resume().await.unwrap();
		wait_for(&mut events_rx, |e| *e == IndexerEvent::IndexingFinished).await;
		assert!(store.contains_path(root.path().join("a.txt")).await);

		scheduler.shutdown().await;
	}

	#[tokio::test]
	async fn suspend_then_resume_keeps_the_queues() {
		let store = Arc::new(MemoryStore::new());
		let policy = Arc::new(FolderPolicy::new(["/a", "/b"], [] as [&str; 0], [] as [&str; 0], false));
		let mut runner = runner(store, policy, false);

		runner.queue_all_folders(false);
		runner.dirs.prepend("/a/x", DirFlags::RECURSIVE);
		runner.files.enqueue(FileWorkEntry {
			path: "/a/1.txt".into(),
			is_dir: false,
			modified_at: None,
		});
		runner.files.enqueue(FileWorkEntry {
			path: "/a".into(),
			is_dir: true,
			modified_at: None,
		});
		let before = queues(&runner);

		runner.handle_command(SchedulerCommand::Suspend).await;
		assert!(runner.timer.is_none());
		runner.handle_command(SchedulerCommand::Resume).await;

		assert_eq!(queues(&runner), before);
		assert!(runner.timer.is_some());
		assert!(!runner.status.suspended);
	}

	#[tokio::test]
	async fn folder_requests_go_ahead_of_rescans() {
		let store = Arc::new(MemoryStore::new());
		let policy = Arc::new(FolderPolicy::new(["/a", "/b"], [] as [&str; 0], [] as [&str; 0], false));
		let mut runner = runner(store, policy, true);

		runner.handle_command(SchedulerCommand::UpdateAll { forced: true }).await;
		runner
			.handle_command(SchedulerCommand::UpdateFolder {
				path: "/c".into(),
				flags: DirFlags::RECURSIVE | DirFlags::AUTO_DISCOVERED,
			})
			.await;

		let (dirs, _) = queues(&runner);
		let auto = DirFlags::RECURSIVE | DirFlags::AUTO_DISCOVERED | DirFlags::FORCE_UPDATE;
		assert_eq!(
			dirs,
			vec![
				DirQueueEntry {
					path: "/c".into(),
					flags: DirFlags::RECURSIVE,
				},
				DirQueueEntry {
					path: "/a".into(),
					flags: auto,
				},
				DirQueueEntry {
					path: "/b".into(),
					flags: auto,
				},
			]
		);

		// a new rescan only replaces what earlier rescans queued
		runner.handle_command(SchedulerCommand::UpdateAll { forced: false }).await;
		let (dirs, _) = queues(&runner);
		assert_eq!(dirs.len(), 3);
		assert_eq!(dirs[0].path, PathBuf::from("/c"));
		assert!(!dirs[1].flags.contains(DirFlags::FORCE_UPDATE));
	}

	#[tokio::test]
	async fn file_requests_skip_the_delay() {
		let store = Arc::new(MemoryStore::new());
		let policy = Arc::new(FolderPolicy::new(["/a"], [] as [&str; 0], [] as [&str; 0], false));
		let mut runner = runner(store, policy, false);

		runner.files.enqueue(FileWorkEntry {
			path: "/a/old.txt".into(),
			is_dir: false,
			modified_at: None,
		});

		runner
			.handle_command(SchedulerCommand::UpdateFile {
				path: "/a/new.txt".into(),
			})
			.await;

		let (_, files) = queues(&runner);
		assert_eq!(files[0].path, PathBuf::from("/a/new.txt"));
		let timer = runner.timer.as_ref().unwrap();
		assert!(timer.deadline() <= tokio::time::Instant::now());
	}

	#[tokio::test]
	async fn settings_follow_reconfiguration() {
		let store = Arc::new(MemoryStore::new());
		let policy = Arc::new(FolderPolicy::new(["/a"], [] as [&str; 0], [] as [&str; 0], false));
		let mut runner = runner(store, policy, false);

		runner
			.handle_command(SchedulerCommand::Reconfigure {
				extraction_timeout: Duration::from_secs(7),
				cleanup_batch_size: 3,
			})
			.await;

		assert_eq!(runner.config.extraction_timeout, Duration::from_secs(7));
		assert_eq!(runner.config.cleanup_batch_size, 3);
		// nothing to do, nothing scheduled
		assert!(runner.timer.is_none());
	}
}
