use fidx_utils::error::FileIOError;

use std::{
	collections::HashMap,
	fmt,
	future::Future,
	path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::cleaner::RemovalQuery;

mod memory;

pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
	#[error("metadata store is unavailable: {0}")]
	Unavailable(String),
	#[error("metadata store query failed: {0}")]
	Query(String),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("failed to (de)serialize store snapshot: {0}")]
	Snapshot(#[from] serde_json::Error),
}

/// Storage scheme a record was written with; records from the old scheme are always reclaimed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordScheme {
	#[default]
	Current,
	Legacy,
}

impl fmt::Display for RecordScheme {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Current => "current",
			Self::Legacy => "legacy",
		})
	}
}

/// The store-agnostic view of a single metadata record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedRecord {
	pub id: Uuid,
	pub url: Option<PathBuf>,
	pub modified_at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub scheme: RecordScheme,
	/// Records without a url of their own hang from another record, like the parts of an archive
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub part_of: Option<Uuid>,
}

impl IndexedRecord {
	#[must_use]
	pub fn for_path(path: impl Into<PathBuf>, modified_at: Option<DateTime<Utc>>) -> Self {
		Self {
			id: Uuid::new_v4(),
			url: Some(path.into()),
			modified_at,
			scheme: RecordScheme::Current,
			part_of: None,
		}
	}

	#[must_use]
	pub fn path(&self) -> Option<&Path> {
		self.url.as_deref()
	}
}

/// Identifiers accepted by the batch removal primitive
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemovalTarget {
	Url(PathBuf),
	Resource(Uuid),
}

impl From<Uuid> for RemovalTarget {
	fn from(id: Uuid) -> Self {
		Self::Resource(id)
	}
}

impl From<PathBuf> for RemovalTarget {
	fn from(path: PathBuf) -> Self {
		Self::Url(path)
	}
}

/// The external metadata database the indexer keeps in sync with the file system.
pub trait MetadataStore: Send + Sync + fmt::Debug + 'static {
	/// Previously indexed direct children of `dir`, with their recorded modification times
	fn children(
		&self,
		dir: &Path,
	) -> impl Future<Output = Result<HashMap<PathBuf, Option<DateTime<Utc>>>, StoreError>> + Send;

	/// Recorded modification time of a single path, `None` if not indexed or never recorded
	fn modified_at(
		&self,
		path: &Path,
	) -> impl Future<Output = Result<Option<DateTime<Utc>>, StoreError>> + Send;

	/// Removes the targets and, recursively, every record depending on them
	fn remove(
		&self,
		targets: Vec<RemovalTarget>,
	) -> impl Future<Output = Result<(), StoreError>> + Send;

	/// At most `query.limit` records matching the query's predicate
	fn find(
		&self,
		query: &RemovalQuery,
	) -> impl Future<Output = Result<Vec<Uuid>, StoreError>> + Send;
}
