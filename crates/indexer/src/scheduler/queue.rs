use std::{collections::VecDeque, path::PathBuf};

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

bitflags! {
	#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
	pub struct DirFlags: u8 {
		/// Sub folders get queued as they are found
		const RECURSIVE = 1 << 0;
		/// Entries are re-extracted even if their modification time didn't change
		const FORCE_UPDATE = 1 << 1;
		/// Queued by a full rescan rather than by an explicit request
		const AUTO_DISCOVERED = 1 << 2;
		/// Explicitly requested regardless of the folder rules, only names are still checked
		const IGNORE_FOLDER_RULES = 1 << 3;
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirQueueEntry {
	pub path: PathBuf,
	pub flags: DirFlags,
}

/// Directories waiting to be scanned.
///
/// Explicitly requested directories always sit ahead of auto discovered ones.
#[derive(Debug, Default, Clone)]
pub struct DirQueue {
	entries: VecDeque<DirQueueEntry>,
}

impl DirQueue {
	fn contains(&self, entry: &DirQueueEntry) -> bool {
		self.entries.iter().any(|queued| queued == entry)
	}

	/// Index of the first auto discovered entry, where the requested portion ends
	fn auto_boundary(&self) -> usize {
		self.entries
			.iter()
			.position(|entry| entry.flags.contains(DirFlags::AUTO_DISCOVERED))
			.unwrap_or(self.entries.len())
	}

	/// Requested entries go behind the other requested ones, auto discovered ones to the very back.
	///
	/// Returns `false` if the very same entry was already queued.
	pub fn enqueue(&mut self, path: impl Into<PathBuf>, flags: DirFlags) -> bool {
		let entry = DirQueueEntry {
			path: path.into(),
			flags,
		};

		if self.contains(&entry) {
			return false;
		}

		if flags.contains(DirFlags::AUTO_DISCOVERED) {
			self.entries.push_back(entry);
		} else {
			let idx = self.auto_boundary();
			self.entries.insert(idx, entry);
		}

		true
	}

	/// Requested entries go to the very front, auto discovered ones ahead of the other auto
	/// discovered ones but still behind every requested entry.
	///
	/// Returns `false` if the very same entry was already queued.
	pub fn prepend(&mut self, path: impl Into<PathBuf>, flags: DirFlags) -> bool {
		let entry = DirQueueEntry {
			path: path.into(),
			flags,
		};

		if self.contains(&entry) {
			return false;
		}

		if flags.contains(DirFlags::AUTO_DISCOVERED) {
			let idx = self.auto_boundary();
			self.entries.insert(idx, entry);
		} else {
			self.entries.push_front(entry);
		}

		true
	}

	/// Drops every entry sharing any flag with `mask`
	pub fn clear_by_flags(&mut self, mask: DirFlags) {
		self.entries.retain(|entry| !entry.flags.intersects(mask));
	}

	pub fn dequeue(&mut self) -> Option<DirQueueEntry> {
		self.entries.pop_front()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &DirQueueEntry> + '_ {
		self.entries.iter()
	}
}

/// Something that needs its metadata extracted, a file or a directory's own metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWorkEntry {
	pub path: PathBuf,
	pub is_dir: bool,
	pub modified_at: Option<DateTime<Utc>>,
}

/// Directories and files waiting for extraction.
///
/// Directory entries always form a contiguous prefix ahead of every file entry: they are
/// cheap and must never starve behind a long file backlog.
#[derive(Debug, Default, Clone)]
pub struct FileQueue {
	entries: VecDeque<FileWorkEntry>,
	dirs_count: usize,
}

enum Queued {
	No,
	/// Directories never get reordered
	AsDir,
	/// Already dropped from its old position
	AsFile,
}

impl FileQueue {
	fn take_queued(&mut self, entry: &FileWorkEntry) -> Queued {
		let Some(idx) = self
			.entries
			.iter()
			.position(|queued| queued.path == entry.path)
		else {
			return Queued::No;
		};

		if self.entries[idx].is_dir {
			return Queued::AsDir;
		}

		self.entries.remove(idx);
		Queued::AsFile
	}

	fn insert(&mut self, entry: FileWorkEntry, file_at_front: bool) {
		if entry.is_dir {
			self.entries.insert(self.dirs_count, entry);
			self.dirs_count += 1;
		} else if file_at_front {
			self.entries.insert(self.dirs_count, entry);
		} else {
			self.entries.push_back(entry);
		}
	}

	/// Queues an entry as found by a crawl.
	///
	/// Directories already queued keep their position, a file queued again moves to the
	/// front of the file portion.
	pub fn enqueue(&mut self, entry: FileWorkEntry) {
		match self.take_queued(&entry) {
			Queued::No => self.insert(entry, false),
			Queued::AsDir => {}
			Queued::AsFile => self.insert(entry, true),
		}
	}

	/// Queues a file ahead of every other file, for changes someone is waiting on.
	pub fn enqueue_front(&mut self, entry: FileWorkEntry) {
		match self.take_queued(&entry) {
			Queued::AsDir => {}
			Queued::No | Queued::AsFile => self.insert(entry, true),
		}
	}

	pub fn dequeue(&mut self) -> Option<FileWorkEntry> {
		let entry = self.entries.pop_front()?;
		if entry.is_dir {
			self.dirs_count -= 1;
		}

		Some(entry)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &FileWorkEntry> + '_ {
		self.entries.iter()
	}
}
