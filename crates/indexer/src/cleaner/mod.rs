use crate::{
	scheduler::IndexerEvent, store::RemovalTarget, wait_stop_or_abort, wait_timer, MetadataStore,
	RecordScheme,
};

use fidx_folder_rules::FolderPolicy;

use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};

use tokio::{spawn, sync::broadcast, task::JoinHandle, time::sleep};
use tracing::{debug, error, info, instrument, trace, warn};

mod predicate;

pub use predicate::{
	excluded_file_names, excluded_path_components, outside_included_folders, unreachable_records,
	Predicate,
};

/// A batch deletion failing this many times in a row gives up on its query
const MAX_CONSECUTIVE_REMOVAL_FAILURES: u8 = 3;

/// The kind of staleness a removal query hunts for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalCategory {
	OutsideIncludedFolders,
	LegacyScheme,
	ExcludedFileName,
	ExcludedPathComponent,
	Unreachable,
}

impl fmt::Display for RemovalCategory {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::OutsideIncludedFolders => "outside included folders",
			Self::LegacyScheme => "legacy scheme",
			Self::ExcludedFileName => "excluded file name",
			Self::ExcludedPathComponent => "excluded path component",
			Self::Unreachable => "unreachable",
		})
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemovalQuery {
	pub category: RemovalCategory,
	pub predicate: Predicate,
	/// Upper bound of records returned per call
	pub limit: usize,
}

/// Every query the cleaner runs, in order, for the given policy
#[must_use]
pub fn build_removal_queries(policy: &FolderPolicy, limit: usize) -> Vec<RemovalQuery> {
	let query = |category, predicate| RemovalQuery {
		category,
		predicate,
		limit,
	};

	let mut queries = vec![
		query(
			RemovalCategory::OutsideIncludedFolders,
			outside_included_folders(policy),
		),
		query(
			RemovalCategory::LegacyScheme,
			Predicate::Scheme(RecordScheme::Legacy),
		),
	];

	if let Some(predicate) = excluded_file_names(policy) {
		queries.push(query(RemovalCategory::ExcludedFileName, predicate));
	}

	if let Some(predicate) = excluded_path_components(policy) {
		queries.push(query(RemovalCategory::ExcludedPathComponent, predicate));
	}

	queries.push(query(RemovalCategory::Unreachable, unreachable_records()));

	queries
}

#[derive(Debug)]
enum CleanerCommand {
	Suspend,
	Resume,
	SetDelay(Duration),
	Kill,
}

enum BatchOutcome {
	Continue,
	Finished,
}

/// Removes everything from the store that the current policy doesn't want there anymore,
/// in small batches so it never holds the store for long.
///
/// The queries are built once from the policy; a configuration change means killing the
/// running cleaner and starting a new one, re-running an already satisfied query is a no-op.
#[derive(Debug)]
pub struct IndexCleaner<S> {
	store: Arc<S>,
	queries: VecDeque<RemovalQuery>,
	current: Option<RemovalQuery>,
	removal_failures: u8,
	delay: Duration,
	suspended: bool,
	events_tx: broadcast::Sender<IndexerEvent>,
}

impl<S: MetadataStore> IndexCleaner<S> {
	#[must_use]
	pub fn new(
		store: Arc<S>,
		policy: &FolderPolicy,
		batch_size: usize,
		events_tx: broadcast::Sender<IndexerEvent>,
	) -> Self {
		let mut queries = VecDeque::from(build_removal_queries(policy, batch_size.max(1)));
		let current = queries.pop_front();

		Self {
			store,
			queries,
			current,
			removal_failures: 0,
			delay: Duration::ZERO,
			suspended: false,
			events_tx,
		}
	}

	#[must_use]
	pub const fn with_delay(mut self, delay: Duration) -> Self {
		self.delay = delay;
		self
	}

	/// A suspended cleaner won't run its first batch before being resumed
	#[must_use]
	pub const fn suspended(mut self, suspended: bool) -> Self {
		self.suspended = suspended;
		self
	}

	#[must_use]
	pub fn spawn(self) -> CleanerHandle {
		let (commands_tx, commands_rx) = async_channel::unbounded();

		CleanerHandle {
			commands_tx,
			handle: Some(spawn(self.run(commands_rx))),
		}
	}

	fn advance(&mut self) {
		self.current = self.queries.pop_front();
		self.removal_failures = 0;

		if let Some(query) = &self.current {
			debug!(category = %query.category, "Moving on to the next removal query;");
		}
	}

	/// Runs the current query until it yields something, deleting one batch
	#[instrument(skip(self))]
	async fn clear_next_batch(&mut self) -> BatchOutcome {
		loop {
			let Some(query) = &self.current else {
				return BatchOutcome::Finished;
			};

			match self.store.find(query).await {
				Ok(ids) if !ids.is_empty() => {
					let count = ids.len();
					trace!(category = %query.category, count, "Removing stale records");

					match self
						.store
						.remove(ids.into_iter().map(RemovalTarget::Resource).collect())
						.await
					{
						Ok(()) => {
							self.removal_failures = 0;
							debug!(category = %query.category, count, "Removed stale records;");
						}
						Err(e) => {
							self.removal_failures += 1;
							error!(?e, category = %query.category, "Failed to remove stale records;");

							if self.removal_failures >= MAX_CONSECUTIVE_REMOVAL_FAILURES {
								warn!(
									category = %query.category,
									"Giving up on removal query after repeated failures;"
								);
								self.advance();
							}
						}
					}

					return BatchOutcome::Continue;
				}

				Ok(_) => self.advance(),

				Err(e) => {
					error!(?e, predicate = %query.predicate, "Removal query failed;");
					self.advance();
				}
			}
		}
	}

	async fn run(mut self, commands_rx: async_channel::Receiver<CleanerCommand>) {
		let mut timer = (!self.suspended).then(|| Box::pin(sleep(Duration::ZERO)));

		loop {
			tokio::select! {
				res = commands_rx.recv() => match res {
					Ok(CleanerCommand::Suspend) => {
						trace!("Suspending cleaner");
						self.suspended = true;
						timer = None;
					}

					Ok(CleanerCommand::Resume) => {
						if self.suspended {
							trace!("Resuming cleaner");
							self.suspended = false;
							timer = Some(Box::pin(sleep(Duration::ZERO)));
						}
					}

					Ok(CleanerCommand::SetDelay(delay)) => self.delay = delay,

					Ok(CleanerCommand::Kill) | Err(_) => {
						debug!("Cleaner killed;");
						return;
					}
				},

				() = wait_timer(&mut timer) => {
					timer = None;

					match self.clear_next_batch().await {
						BatchOutcome::Continue => {
							if !self.suspended {
								timer = Some(Box::pin(sleep(self.delay)));
							}
						}

						BatchOutcome::Finished => {
							info!("Index cleanup finished");
							// nobody listening is fine
							let _ = self.events_tx.send(IndexerEvent::CleanupFinished);
							return;
						}
					}
				}
			}
		}
	}
}

/// Controls a running [`IndexCleaner`], dropping it kills the cleaner
#[derive(Debug)]
pub struct CleanerHandle {
	commands_tx: async_channel::Sender<CleanerCommand>,
	handle: Option<JoinHandle<()>>,
}

impl CleanerHandle {
	async fn send(&self, command: CleanerCommand) {
		if self.commands_tx.send(command).await.is_err() {
			trace!("Cleaner already finished, command ignored");
		}
	}

	pub async fn suspend(&self) {
		self.send(CleanerCommand::Suspend).await;
	}

	pub async fn resume(&self) {
		self.send(CleanerCommand::Resume).await;
	}

	pub async fn set_delay(&self, delay: Duration) {
		self.send(CleanerCommand::SetDelay(delay)).await;
	}

	/// Stops the cleaner between two batches, aborting it if it doesn't comply in time
	pub async fn kill(mut self) {
		self.send(CleanerCommand::Kill).await;
		wait_stop_or_abort(self.handle.take(), "index cleaner").await;
	}
}

impl Drop for CleanerHandle {
	fn drop(&mut self) {
		if let Some(handle) = self.handle.take() {
			handle.abort();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::{IndexedRecord, MemoryStore};

	use std::path::Path;

	use tracing_test::traced_test;

	fn policy() -> FolderPolicy {
		FolderPolicy::new(["/a"], ["/a/b"], ["*.tmp", "node_modules"], false)
	}

	fn orphan() -> IndexedRecord {
		IndexedRecord {
			url: None,
			..IndexedRecord::for_path("/", None)
		}
	}

	async fn populated_store() -> Arc<MemoryStore> {
		let store = MemoryStore::new();

		for path in [
			"/a",
			"/a/c",
			"/a/c/keep.txt",
			"/a/b/x",
			"/a/b/y/z.txt",
			"/elsewhere/file",
			"/a/c/junk.tmp",
			"/a/app/node_modules/pkg/index.js",
		] {
			store.record_path(path, None).await;
		}

		store
			.upsert(IndexedRecord {
				scheme: RecordScheme::Legacy,
				..IndexedRecord::for_path("/a/c/legacy.txt", None)
			})
			.await;
		store.upsert(orphan()).await;

		Arc::new(store)
	}

	async fn remaining_paths(store: &MemoryStore) -> Vec<String> {
		let mut paths = store
			.records()
			.await
			.into_iter()
			.filter_map(|record| record.path().map(|path| path.display().to_string()))
			.collect::<Vec<_>>();
		paths.sort();
		paths
	}

	#[test]
	fn queries_come_in_category_order() {
		let categories = build_removal_queries(&policy(), 20)
			.into_iter()
			.map(|query| {
				assert_eq!(query.limit, 20);
				query.category
			})
			.collect::<Vec<_>>();

		assert_eq!(
			categories,
			vec![
				RemovalCategory::OutsideIncludedFolders,
				RemovalCategory::LegacyScheme,
				RemovalCategory::ExcludedFileName,
				RemovalCategory::ExcludedPathComponent,
				RemovalCategory::Unreachable,
			]
		);

		let without_filters =
			build_removal_queries(&FolderPolicy::new(["/a"], [] as [&str; 0], [] as [&str; 0], false), 20);
		assert_eq!(without_filters.len(), 3);
	}

	#[tokio::test]
	#[traced_test]
	async fn removes_every_stale_category() {
		let store = populated_store().await;
		let (events_tx, mut events_rx) = broadcast::channel(16);

		let _handle = IndexCleaner::new(Arc::clone(&store), &policy(), 20, events_tx).spawn();

		assert_eq!(events_rx.recv().await.unwrap(), IndexerEvent::CleanupFinished);
		assert_eq!(
			remaining_paths(&store).await,
			vec!["/a", "/a/c", "/a/c/keep.txt"]
		);
		assert!(!store.records().await.iter().any(|record| record.url.is_none()));
	}

	#[tokio::test]
	#[traced_test]
	async fn works_in_bounded_batches() {
		let store = Arc::new(MemoryStore::with_records(
			(0..45).map(|i| IndexedRecord::for_path(format!("/gone/{i}"), None)),
		));
		let (events_tx, _events_rx) = broadcast::channel(16);

		let mut cleaner = IndexCleaner::new(Arc::clone(&store), &policy(), 20, events_tx);

		assert!(matches!(cleaner.clear_next_batch().await, BatchOutcome::Continue));
		assert_eq!(store.len().await, 25);
		assert!(matches!(cleaner.clear_next_batch().await, BatchOutcome::Continue));
		assert!(matches!(cleaner.clear_next_batch().await, BatchOutcome::Continue));
		assert!(store.is_empty().await);
		assert!(matches!(cleaner.clear_next_batch().await, BatchOutcome::Finished));
	}

	#[tokio::test]
	#[traced_test]
	async fn suspended_cleaner_waits_for_resume() {
		let store = populated_store().await;
		let before = store.len().await;
		let (events_tx, mut events_rx) = broadcast::channel(16);

		let handle = IndexCleaner::new(Arc::clone(&store), &policy(), 1, events_tx)
			.suspended(true)
			.spawn();

		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(store.len().await, before);

		handle.resume().await;
		assert_eq!(events_rx.recv().await.unwrap(), IndexerEvent::CleanupFinished);
		assert_eq!(store.len().await, 3);
	}

	#[tokio::test]
	#[traced_test]
	async fn killed_cleaner_stops_between_batches() {
		let store = Arc::new(MemoryStore::with_records(
			(0..10).map(|i| IndexedRecord::for_path(format!("/gone/{i}"), None)),
		));
		let (events_tx, mut events_rx) = broadcast::channel(16);

		let handle = IndexCleaner::new(Arc::clone(&store), &policy(), 1, events_tx)
			.with_delay(Duration::from_secs(3600))
			.spawn();

		// first batch runs right away, the next one is an hour out
		while store.len().await == 10 {
			tokio::task::yield_now().await;
		}

		handle.kill().await;

		assert_eq!(store.len().await, 9);
		assert!(events_rx.try_recv().is_err());
	}

	#[tokio::test]
	#[traced_test]
	async fn dependents_go_along_with_their_parent() {
		let archive = IndexedRecord::for_path("/elsewhere/a.zip", None);
		let part = IndexedRecord {
			url: None,
			part_of: Some(archive.id),
			..IndexedRecord::for_path("/", None)
		};
		let store = Arc::new(MemoryStore::with_records([archive, part]));
		let (events_tx, _events_rx) = broadcast::channel(16);

		let mut cleaner = IndexCleaner::new(Arc::clone(&store), &policy(), 20, events_tx);
		while let BatchOutcome::Continue = cleaner.clear_next_batch().await {}

		assert!(store.is_empty().await);
		assert!(!store.contains_path(Path::new("/elsewhere/a.zip")).await);
	}
}
