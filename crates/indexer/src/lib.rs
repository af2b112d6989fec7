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

use fidx_utils::error::FileIOError;

use std::{future::pending, pin::Pin, time::Duration};

use thiserror::Error;
use tokio::{
	task::JoinHandle,
	time::{timeout, Sleep},
};
use tracing::error;

pub mod cleaner;
pub mod extractor;
pub mod monitor;
pub mod scheduler;
pub mod service;
pub mod store;

mod speed;

pub use cleaner::{CleanerHandle, IndexCleaner, Predicate, RemovalCategory, RemovalQuery};
pub use extractor::{ExtractionError, Extractor, ProcessExtractor};
pub use monitor::{DiskSpaceMonitor, IdleMonitor, PowerMonitor};
pub use scheduler::{
	DirFlags, DirQueueEntry, FileWorkEntry, IndexerEvent, IndexerStatus, QueueSnapshot,
	Scheduler, SchedulerConfig, SchedulerHandle,
};
pub use service::FileIndexerService;
pub use speed::IndexingSpeed;
pub use store::{
	IndexedRecord, MemoryStore, MetadataStore, RecordScheme, RemovalTarget, StoreError,
};

/// Bounded wait for background tasks to acknowledge a stop request before they get aborted
pub(crate) const STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum Error {
	#[error("the indexing scheduler is not running anymore")]
	SchedulerGone,
	#[error(transparent)]
	Store(#[from] StoreError),
	#[error(transparent)]
	Config(#[from] fidx_config::ConfigError),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
}

/// Errors the indexer recovers from by itself, they are only ever logged
#[derive(Error, Debug)]
pub enum NonCriticalIndexerError {
	#[error("failed to read directory entry: {0}")]
	FailedDirectoryEntry(FileIOError),
	#[error("failed to fetch metadata: {0}")]
	Metadata(FileIOError),
	#[error("metadata store query failed: {0}")]
	StoreQuery(StoreError),
	#[error("metadata store removal failed: {0}")]
	StoreRemoval(StoreError),
	#[error("extraction of <path='{}'> failed: {source}", .path.display())]
	Extraction {
		path: Box<std::path::Path>,
		#[source]
		source: ExtractionError,
	},
}

/// Waits for a task that was asked to stop, aborting it if it takes too long
pub(crate) async fn wait_stop_or_abort(maybe_handle: Option<JoinHandle<()>>, task: &str) {
	if let Some(handle) = maybe_handle {
		let abort_handle = handle.abort_handle();

		match timeout(STOP_TIMEOUT, handle).await {
			Ok(Ok(())) => { /* Stopped gracefully */ }
			Ok(Err(e)) => {
				if e.is_panic() {
					error!(%task, "Task panicked while stopping;");
				}
			}
			Err(_) => {
				error!(%task, "Task failed to gracefully stop in the allotted time, will force abortion;");
				abort_handle.abort();
			}
		}
	}
}

/// Resolves when the timer fires, never if there is no timer armed
pub(crate) async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
	match timer {
		Some(timer) => timer.await,
		None => pending().await,
	}
}
