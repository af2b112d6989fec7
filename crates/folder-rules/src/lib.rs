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

use fidx_utils::{is_hidden_path, normalize_path};

use std::path::Path;

use thiserror::Error;

mod defaults;
mod filters;
mod rule_table;

pub use defaults::DEFAULT_EXCLUDE_FILTERS;
pub use filters::{ExcludeFilter, ExcludeFilters};
pub use rule_table::{FolderRule, RuleMatch, RuleTable};

#[derive(Error, Debug)]
pub enum FolderRulesError {
	#[error("glob builder error: {0}")]
	Glob(#[from] globset::Error),
}

/// Decides which folders and files get indexed.
///
/// A policy is an immutable snapshot of the configuration: it is rebuilt as a whole
/// and swapped whenever the configuration changes, readers never see a half-built one.
#[derive(Debug, Clone, Default)]
pub struct FolderPolicy {
	rules: RuleTable,
	filters: ExcludeFilters,
	index_hidden: bool,
}

impl FolderPolicy {
	#[must_use]
	pub fn new(
		include_folders: impl IntoIterator<Item = impl AsRef<Path>>,
		exclude_folders: impl IntoIterator<Item = impl AsRef<Path>>,
		exclude_filters: impl IntoIterator<Item = impl AsRef<str>>,
		index_hidden: bool,
	) -> Self {
		let filters = ExcludeFilters::new(exclude_filters);

		// a nested include stays when the lookup through its parent would reject it
		let rules = RuleTable::rebuild_with(include_folders, exclude_folders, |path, below| {
			(!index_hidden && is_hidden_path(path))
				|| below.iter().any(|name| filters.is_excluded(name))
		});

		Self {
			rules,
			filters,
			index_hidden,
		}
	}

	/// Explicitly included folders are always indexed, even if hidden or matched by a filter.
	/// Their descendants still go through the hidden and name checks.
	#[must_use]
	pub fn should_index_folder(&self, path: impl AsRef<Path>) -> bool {
		let path = normalize_path(path);

		match self.rules.lookup(&path) {
			Some(RuleMatch {
				include: true,
				exact: true,
			}) => true,

			Some(RuleMatch {
				include: true,
				exact: false,
			}) => {
				if !self.index_hidden && is_hidden_path(&path) {
					return false;
				}

				path.file_name()
					.map_or(true, |name| !self.filters.is_excluded(name))
			}

			Some(RuleMatch { include: false, .. }) | None => false,
		}
	}

	/// Decision for a file: its folder must be indexed, and its own name must pass the
	/// hidden check and the exclude filters.
	#[must_use]
	pub fn should_index_path(&self, path: impl AsRef<Path>) -> bool {
		let path = normalize_path(path);

		let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) else {
			return self.should_index_folder(&path);
		};

		if !self.should_index_folder(parent) {
			return false;
		}

		self.accepts_name(&path)
	}

	/// Only the entry's own name: the hidden check and the exclude filters, no folder rules
	#[must_use]
	pub fn accepts_name(&self, path: impl AsRef<Path>) -> bool {
		path.as_ref().file_name().map_or(false, |name| {
			(self.index_hidden || !is_hidden_path(name)) && !self.filters.is_excluded(name)
		})
	}

	/// Dispatches on the kind of entry, as seen while crawling
	#[must_use]
	pub fn should_index_entry(&self, path: impl AsRef<Path>, is_dir: bool) -> bool {
		if is_dir {
			self.should_index_folder(path)
		} else {
			self.should_index_path(path)
		}
	}

	#[must_use]
	pub const fn rules(&self) -> &RuleTable {
		&self.rules
	}

	#[must_use]
	pub const fn filters(&self) -> &ExcludeFilters {
		&self.filters
	}

	#[must_use]
	pub const fn index_hidden(&self) -> bool {
		self.index_hidden
	}

	pub fn include_folders(&self) -> impl Iterator<Item = &Path> + '_ {
		self.rules.include_folders()
	}

	pub fn exclude_folders(&self) -> impl Iterator<Item = &Path> + '_ {
		self.rules.exclude_folders()
	}
}
