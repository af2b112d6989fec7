use fidx_indexer::{ExtractionError, Extractor, FileWorkEntry, MemoryStore, ProcessExtractor};

use std::sync::Arc;

use tracing::trace;

/// Runs the configured extraction program, if any, then records the file in the store snapshot
#[derive(Debug)]
pub struct Worker {
	process: Option<ProcessExtractor>,
	store: Arc<MemoryStore>,
}

impl Worker {
	pub fn new(command: Option<&[String]>, store: Arc<MemoryStore>) -> Self {
		Self {
			process: command.and_then(ProcessExtractor::from_command_line),
			store,
		}
	}

	pub const fn is_dry_run(&self) -> bool {
		self.process.is_none()
	}
}

impl Extractor for Worker {
	async fn extract(&self, entry: &FileWorkEntry) -> Result<(), ExtractionError> {
		match &self.process {
			Some(process) => process.extract(entry).await?,
			None => trace!(path = %entry.path.display(), "Dry run, only recording"),
		}

		self.store.record_path(&entry.path, entry.modified_at).await;

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(path: &str) -> FileWorkEntry {
		FileWorkEntry {
			path: path.into(),
			is_dir: false,
			modified_at: None,
		}
	}

	#[tokio::test]
	async fn dry_run_only_records() {
		let store = Arc::new(MemoryStore::new());
		let worker = Worker::new(None, Arc::clone(&store));
		assert!(worker.is_dry_run());

		worker.extract(&entry("/data/a.txt")).await.unwrap();

		assert!(store.contains_path("/data/a.txt").await);
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn failed_extractions_are_not_recorded() {
		let store = Arc::new(MemoryStore::new());
		let worker = Worker::new(Some(&["false".to_string()]), Arc::clone(&store));
		assert!(!worker.is_dry_run());

		assert!(worker.extract(&entry("/data/a.txt")).await.is_err());
		assert!(store.is_empty().await);
	}
}
