use std::{
	fmt,
	path::{Path, PathBuf},
};

use serde::Serialize;

use crate::IndexingSpeed;

use super::DirFlags;

/// Snapshot of what the scheduler is doing right now
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IndexerStatus {
	pub suspended: bool,
	pub indexing: bool,
	pub speed: IndexingSpeed,
	pub current_folder: Option<PathBuf>,
	pub current_file: Option<PathBuf>,
	pub current_flags: DirFlags,
}

impl IndexerStatus {
	pub(crate) fn scanning(&mut self, folder: &Path, flags: DirFlags) {
		self.current_folder = Some(folder.to_path_buf());
		self.current_file = None;
		self.current_flags = flags;
	}

	pub(crate) fn extracting(&mut self, file: &Path) {
		self.current_folder = file.parent().map(Path::to_path_buf);
		self.current_file = Some(file.to_path_buf());
		self.current_flags = DirFlags::empty();
	}

	pub(crate) fn clear_current(&mut self) {
		self.current_folder = None;
		self.current_file = None;
		self.current_flags = DirFlags::empty();
	}

	#[must_use]
	pub fn current_path(&self) -> Option<&Path> {
		self.current_file
			.as_deref()
			.or(self.current_folder.as_deref())
	}
}

/// Human readable status, the line shown to users
impl fmt::Display for IndexerStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.suspended {
			return write!(f, "File indexer is suspended.");
		}

		if !self.indexing {
			return write!(f, "File indexer is idle.");
		}

		let auto = self.current_flags.contains(DirFlags::AUTO_DISCOVERED);

		match (&self.current_folder, &self.current_file) {
			(None, _) if auto => write!(f, "Scanning for recent changes in files for desktop search"),
			(None, _) => write!(f, "Indexing files for desktop search."),
			(Some(folder), _) if auto => {
				write!(f, "Scanning for recent changes in {}", folder.display())
			}
			(Some(folder), None) => write!(f, "Indexing files in {}", folder.display()),
			(Some(_), Some(file)) => write!(f, "Indexing {}", file.display()),
		}
	}
}

/// Notifications broadcast by the scheduler and the cleaner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IndexerEvent {
	IndexingStarted,
	IndexingFinished,
	IndexingFolder { path: PathBuf },
	IndexingFile { path: PathBuf },
	ExtractionFailed { path: PathBuf, reason: String },
	StatusChanged,
	Suspended { suspended: bool },
	CleanupFinished,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn user_status_strings() {
		let mut status = IndexerStatus::default();
		assert_eq!(status.to_string(), "File indexer is idle.");

		status.indexing = true;
		assert_eq!(status.to_string(), "Indexing files for desktop search.");

		status.current_flags = DirFlags::AUTO_DISCOVERED;
		assert_eq!(
			status.to_string(),
			"Scanning for recent changes in files for desktop search"
		);

		status.scanning(Path::new("/home/u/docs"), DirFlags::AUTO_DISCOVERED);
		assert_eq!(
			status.to_string(),
			"Scanning for recent changes in /home/u/docs"
		);

		status.scanning(Path::new("/home/u/docs"), DirFlags::RECURSIVE);
		assert_eq!(status.to_string(), "Indexing files in /home/u/docs");

		status.extracting(Path::new("/home/u/docs/a.txt"));
		assert_eq!(status.to_string(), "Indexing /home/u/docs/a.txt");
		assert_eq!(status.current_folder.as_deref(), Some(Path::new("/home/u/docs")));
		assert_eq!(status.current_path(), Some(Path::new("/home/u/docs/a.txt")));

		status.suspended = true;
		assert_eq!(status.to_string(), "File indexer is suspended.");
	}
}
