use crate::{store::RemovalTarget, MetadataStore, NonCriticalIndexerError};

use fidx_folder_rules::FolderPolicy;
use fidx_utils::{error::FileIOError, normalize_path, system_time_to_utc};

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use futures_concurrency::future::Join;
use tokio::fs;
use tokio_stream::{wrappers::ReadDirStream, StreamExt};
use tracing::{debug, instrument, trace};

use super::{DirFlags, DirQueue, DirQueueEntry, FileQueue, FileWorkEntry};

struct FoundEntry {
	path: PathBuf,
	is_dir: bool,
	is_symlink: bool,
	modified_at: Option<DateTime<Utc>>,
}

/// Modification times are compared with a small tolerance, some file systems and stores
/// don't keep sub-millisecond precision.
fn mtime_differs(on_disk: Option<DateTime<Utc>>, stored: Option<DateTime<Utc>>) -> bool {
	match (on_disk, stored) {
		(Some(on_disk), Some(stored)) => (on_disk - stored).abs() > Duration::milliseconds(1),
		(None, None) => false,
		_ => true,
	}
}

async fn read_entries(
	dir: &Path,
	errors: &mut Vec<NonCriticalIndexerError>,
) -> Result<Vec<FoundEntry>, FileIOError> {
	let mut read_dir_stream = ReadDirStream::new(
		fs::read_dir(dir)
			.await
			.map_err(|e| FileIOError::from((dir, e, "Failed to read directory")))?,
	);

	let mut found_paths = Vec::new();

	while let Some(res) = read_dir_stream.next().await {
		match res {
			Ok(dir_entry) => found_paths.push(dir_entry.path()),
			Err(e) => errors.push(NonCriticalIndexerError::FailedDirectoryEntry(
				FileIOError::from((dir, e)),
			)),
		}
	}

	// keeps recursion order stable across runs
	found_paths.sort();

	Ok(found_paths
		.into_iter()
		.map(|path| async move {
			let is_symlink = fs::symlink_metadata(&path)
				.await
				.map_err(|e| FileIOError::from((&path, e)))?
				.is_symlink();

			let metadata = fs::metadata(&path)
				.await
				.map_err(|e| FileIOError::from((&path, e)))?;

			Ok::<_, FileIOError>(FoundEntry {
				is_dir: metadata.is_dir(),
				is_symlink,
				modified_at: metadata.modified().ok().map(system_time_to_utc),
				path,
			})
		})
		.collect::<Vec<_>>()
		.join()
		.await
		.into_iter()
		.filter_map(|res| {
			res.map_err(|e| {
				if e.is_not_found() {
					trace!(%e, "Entry vanished while crawling");
				} else {
					errors.push(NonCriticalIndexerError::Metadata(e));
				}
			})
			.ok()
		})
		.collect())
}

/// Compares one directory on disk against what the store knows about it.
///
/// New and changed entries land in `files`, sub folders in `dirs` (when recursive) and
/// whatever the store remembers but shouldn't anymore is removed from it right away.
#[instrument(skip_all, fields(dir = %entry.path.display(), flags = ?entry.flags))]
pub(crate) async fn analyze_directory(
	store: &impl MetadataStore,
	policy: &FolderPolicy,
	entry: &DirQueueEntry,
	dirs: &mut DirQueue,
	files: &mut FileQueue,
) -> Vec<NonCriticalIndexerError> {
	let mut errors = Vec::new();

	let dir = normalize_path(&entry.path);
	let recursive = entry.flags.contains(DirFlags::RECURSIVE);
	let force_update = entry.flags.contains(DirFlags::FORCE_UPDATE);
	let ignore_folder_rules = entry.flags.contains(DirFlags::IGNORE_FOLDER_RULES);

	// the folder's own metadata first
	match fs::metadata(&dir).await {
		Ok(metadata) => {
			let modified_at = metadata.modified().ok().map(system_time_to_utc);

			match store.modified_at(&dir).await {
				Ok(stored) if !mtime_differs(modified_at, stored) => {}
				Ok(_) => files.enqueue(FileWorkEntry {
					path: dir.clone(),
					is_dir: true,
					modified_at,
				}),
				Err(e) => errors.push(NonCriticalIndexerError::StoreQuery(e)),
			}
		}
		Err(e) => errors.push(NonCriticalIndexerError::Metadata(FileIOError::from((
			&dir, e,
		)))),
	}

	let mut in_store = match store.children(&dir).await {
		Ok(children) => children,
		Err(e) => {
			// without the stored state every entry would look new
			errors.push(NonCriticalIndexerError::StoreQuery(e));
			return errors;
		}
	};

	let found = match read_entries(&dir, &mut errors).await {
		Ok(found) => found,
		Err(e) => {
			errors.push(NonCriticalIndexerError::FailedDirectoryEntry(e));
			return errors;
		}
	};

	let mut to_index = Vec::new();
	let mut to_delete = Vec::new();
	let mut sub_dirs = Vec::new();

	for FoundEntry {
		path,
		is_dir,
		is_symlink,
		modified_at,
	} in found
	{
		let indexable = if ignore_folder_rules {
			policy.accepts_name(&path)
		} else {
			policy.should_index_entry(&path, is_dir)
		};
		let stored = in_store.remove(&path);

		match stored {
			None if indexable => {
				trace!(path = %path.display(), "New entry");
				to_index.push(FileWorkEntry {
					path: path.clone(),
					is_dir,
					modified_at,
				});
			}
			Some(stored_at) if indexable => {
				if mtime_differs(modified_at, stored_at) || force_update {
					trace!(path = %path.display(), force_update, "Changed entry");
					to_index.push(FileWorkEntry {
						path: path.clone(),
						is_dir,
						modified_at,
					});
				}
			}
			Some(_) => to_delete.push(path.clone()),
			None => {}
		}

		if indexable
			&& recursive
			&& is_dir
			&& !is_symlink
			&& (ignore_folder_rules || policy.should_index_folder(&path))
		{
			sub_dirs.push(path);
		}
	}

	// gone from disk
	to_delete.extend(in_store.into_keys());

	if !to_delete.is_empty() {
		delete_entries(store, policy, to_delete, &mut errors).await;
	}

	debug!(
		to_index = to_index.len(),
		sub_dirs = sub_dirs.len(),
		"Analyzed directory;"
	);

	to_index.into_iter().for_each(|entry| files.enqueue(entry));

	// prepending in reverse keeps the sorted order at the queue's front
	for sub_dir in sub_dirs.into_iter().rev() {
		dirs.prepend(sub_dir, entry.flags);
	}

	errors
}

/// Removes stored entries along with everything the store remembers below them.
///
/// Only the store is walked, the entries are usually gone from disk already. Explicitly
/// included folders that still exist are left alone, they get their own scan.
pub(crate) async fn delete_entries(
	store: &impl MetadataStore,
	policy: &FolderPolicy,
	entries: Vec<PathBuf>,
	errors: &mut Vec<NonCriticalIndexerError>,
) {
	let mut targets = Vec::with_capacity(entries.len());
	let mut to_walk = entries;

	while let Some(path) = to_walk.pop() {
		match store.children(&path).await {
			Ok(children) => {
				for child in children.into_keys() {
					if !is_kept_include(policy, &child).await {
						to_walk.push(child);
					}
				}
			}
			Err(e) => errors.push(NonCriticalIndexerError::StoreQuery(e)),
		}

		targets.push(RemovalTarget::Url(path));
	}

	trace!(count = targets.len(), "Removing stored entries");

	if let Err(e) = store.remove(targets).await {
		errors.push(NonCriticalIndexerError::StoreRemoval(e));
	}
}

async fn is_kept_include(policy: &FolderPolicy, path: &Path) -> bool {
	policy.include_folders().any(|include| include == path)
		&& fs::try_exists(path).await.unwrap_or(false)
}
