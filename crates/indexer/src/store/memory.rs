use fidx_utils::error::FileIOError;

use std::{
	collections::{HashMap, HashSet},
	path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use tokio::{fs, sync::RwLock};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::cleaner::RemovalQuery;

use super::{IndexedRecord, MetadataStore, RemovalTarget, StoreError};

#[derive(Debug, Default)]
struct Records {
	by_id: HashMap<Uuid, IndexedRecord>,
	by_url: HashMap<PathBuf, Uuid>,
}

impl Records {
	fn insert(&mut self, record: IndexedRecord) {
		if let Some(url) = &record.url {
			if let Some(old_id) = self.by_url.insert(url.clone(), record.id) {
				if old_id != record.id {
					self.by_id.remove(&old_id);
				}
			}
		}
		self.by_id.insert(record.id, record);
	}

	fn remove(&mut self, id: &Uuid) -> Option<IndexedRecord> {
		let record = self.by_id.remove(id)?;
		if let Some(url) = &record.url {
			self.by_url.remove(url);
		}
		Some(record)
	}
}

/// Metadata store kept entirely in memory, optionally persisted as a JSON snapshot.
#[derive(Debug, Default)]
pub struct MemoryStore {
	records: RwLock<Records>,
}

impl MemoryStore {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with_records(records: impl IntoIterator<Item = IndexedRecord>) -> Self {
		let mut inner = Records::default();
		records.into_iter().for_each(|record| inner.insert(record));

		Self {
			records: RwLock::new(inner),
		}
	}

	/// Inserts a record, replacing whatever was stored for the same url
	pub async fn upsert(&self, record: IndexedRecord) {
		trace!(id = %record.id, url = ?record.url, "Upserting record");
		self.records.write().await.insert(record);
	}

	/// Records the extraction result for `path`, keeping the id if it was already indexed
	pub async fn record_path(&self, path: impl AsRef<Path>, modified_at: Option<DateTime<Utc>>) {
		let path = path.as_ref();
		let mut records = self.records.write().await;

		let record = match records.by_url.get(path).copied() {
			Some(id) => records.by_id.get(&id).cloned().map(|mut record| {
				record.modified_at = modified_at;
				record
			}),
			None => None,
		}
		.unwrap_or_else(|| IndexedRecord::for_path(path, modified_at));

		records.insert(record);
	}

	pub async fn get_by_path(&self, path: impl AsRef<Path>) -> Option<IndexedRecord> {
		let records = self.records.read().await;
		records
			.by_url
			.get(path.as_ref())
			.and_then(|id| records.by_id.get(id))
			.cloned()
	}

	pub async fn contains_path(&self, path: impl AsRef<Path>) -> bool {
		self.records.read().await.by_url.contains_key(path.as_ref())
	}

	pub async fn records(&self) -> Vec<IndexedRecord> {
		self.records.read().await.by_id.values().cloned().collect()
	}

	pub async fn len(&self) -> usize {
		self.records.read().await.by_id.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.records.read().await.by_id.is_empty()
	}

	/// Loads a snapshot written by [`MemoryStore::save`], a missing file is an empty store
	pub async fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
		let path = path.as_ref();

		match fs::read(path).await {
			Ok(bytes) => {
				let records = serde_json::from_slice::<Vec<IndexedRecord>>(&bytes)?;
				debug!(count = records.len(), path = %path.display(), "Loaded store snapshot;");
				Ok(Self::with_records(records))
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
			Err(e) => Err(FileIOError::from((path, e, "Failed to read store snapshot")).into()),
		}
	}

	pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
		let path = path.as_ref();
		let records = self.records().await;

		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| FileIOError::from((parent, e)))?;
		}

		fs::write(path, serde_json::to_vec(&records)?)
			.await
			.map_err(|e| FileIOError::from((path, e)))?;

		debug!(count = records.len(), path = %path.display(), "Saved store snapshot;");

		Ok(())
	}
}

impl MetadataStore for MemoryStore {
	async fn children(
		&self,
		dir: &Path,
	) -> Result<HashMap<PathBuf, Option<DateTime<Utc>>>, StoreError> {
		Ok(self
			.records
			.read()
			.await
			.by_id
			.values()
			.filter_map(|record| {
				record
					.url
					.as_ref()
					.filter(|url| url.parent() == Some(dir))
					.map(|url| (url.clone(), record.modified_at))
			})
			.collect())
	}

	async fn modified_at(&self, path: &Path) -> Result<Option<DateTime<Utc>>, StoreError> {
		let records = self.records.read().await;

		Ok(records
			.by_url
			.get(path)
			.and_then(|id| records.by_id.get(id))
			.and_then(|record| record.modified_at))
	}

	async fn remove(&self, targets: Vec<RemovalTarget>) -> Result<(), StoreError> {
		let mut records = self.records.write().await;

		let mut to_remove = targets
			.into_iter()
			.filter_map(|target| match target {
				RemovalTarget::Url(url) => records.by_url.get(&url).copied(),
				RemovalTarget::Resource(id) => Some(id),
			})
			.collect::<HashSet<_>>();

		// Dependent records go away with the record they are part of
		loop {
			let dependents = records
				.by_id
				.values()
				.filter(|record| {
					record
						.part_of
						.is_some_and(|parent| to_remove.contains(&parent))
						&& !to_remove.contains(&record.id)
				})
				.map(|record| record.id)
				.collect::<Vec<_>>();

			if dependents.is_empty() {
				break;
			}

			to_remove.extend(dependents);
		}

		for id in &to_remove {
			if let Some(record) = records.remove(id) {
				trace!(%id, url = ?record.url, "Removed record");
			}
		}

		Ok(())
	}

	async fn find(&self, query: &RemovalQuery) -> Result<Vec<Uuid>, StoreError> {
		Ok(self
			.records
			.read()
			.await
			.by_id
			.values()
			.filter(|record| query.predicate.matches(record))
			.take(query.limit)
			.map(|record| record.id)
			.collect())
	}
}
