use std::{ffi::OsStr, fmt, path::Path};

use globset::{Glob, GlobMatcher, GlobSet, GlobSetBuilder};
use tracing::warn;

use super::FolderRulesError;

/// A single name pattern (`*`, `?`) matched against the last component of a path only.
#[derive(Debug, Clone)]
pub struct ExcludeFilter {
	pattern: String,
	matcher: GlobMatcher,
}

impl ExcludeFilter {
	pub fn new(pattern: impl Into<String>) -> Result<Self, FolderRulesError> {
		let pattern = pattern.into();
		let matcher = Glob::new(&pattern)?.compile_matcher();

		Ok(Self { pattern, matcher })
	}

	#[must_use]
	pub fn pattern(&self) -> &str {
		&self.pattern
	}

	#[must_use]
	pub fn is_match(&self, name: impl AsRef<OsStr>) -> bool {
		self.matcher.is_match(Path::new(name.as_ref()))
	}
}

impl PartialEq for ExcludeFilter {
	fn eq(&self, other: &Self) -> bool {
		self.pattern == other.pattern
	}
}

impl Eq for ExcludeFilter {}

impl fmt::Display for ExcludeFilter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.pattern)
	}
}

/// All configured exclude filters, compiled into a single [`GlobSet`].
///
/// Patterns that fail to compile are logged and dropped, so a bad entry in the
/// configuration never disables indexing as a whole.
#[derive(Debug, Clone)]
pub struct ExcludeFilters {
	filters: Vec<ExcludeFilter>,
	glob_set: GlobSet,
}

impl Default for ExcludeFilters {
	fn default() -> Self {
		Self {
			filters: Vec::new(),
			glob_set: GlobSet::empty(),
		}
	}
}

impl ExcludeFilters {
	#[must_use]
	pub fn new(patterns: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
		let mut filters = Vec::<ExcludeFilter>::new();

		for pattern in patterns {
			let pattern = pattern.as_ref().trim();
			if pattern.is_empty() || filters.iter().any(|filter| filter.pattern == pattern) {
				continue;
			}

			match ExcludeFilter::new(pattern) {
				Ok(filter) => filters.push(filter),
				Err(e) => warn!(%pattern, ?e, "Dropping invalid exclude filter;"),
			}
		}

		let glob_set = filters
			.iter()
			.filter_map(|filter| Glob::new(&filter.pattern).ok())
			.fold(&mut GlobSetBuilder::new(), |builder, glob| builder.add(glob))
			.build()
			.unwrap_or_else(|e| {
				// Every glob here already compiled on its own, so this is unexpected
				warn!(?e, "Failed to build exclude filters set, no name will be filtered;");
				GlobSet::empty()
			});

		Self { filters, glob_set }
	}

	/// `true` if `name` matches any of the exclude filters
	#[must_use]
	pub fn is_excluded(&self, name: impl AsRef<OsStr>) -> bool {
		self.glob_set.is_match(Path::new(name.as_ref()))
	}

	#[must_use]
	pub fn filters(&self) -> &[ExcludeFilter] {
		&self.filters
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.filters.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use tracing_test::traced_test;

	#[test]
	fn matches_names_only() {
		let filters = ExcludeFilters::new(["*.tmp", "node_modules", "core.?"]);

		assert!(filters.is_excluded("b.tmp"));
		assert!(filters.is_excluded("node_modules"));
		assert!(filters.is_excluded("core.1"));
		assert!(!filters.is_excluded("core.12"));
		assert!(!filters.is_excluded("a.txt"));
		assert!(!filters.is_excluded("my_node_modules"));
	}

	#[test]
	#[traced_test]
	fn invalid_patterns_are_dropped() {
		let filters = ExcludeFilters::new(["*.tmp", "[unclosed", "", "*.tmp"]);

		assert_eq!(filters.filters().len(), 1);
		assert_eq!(filters.filters()[0].pattern(), "*.tmp");
		assert!(filters.is_excluded("x.tmp"));
		assert!(logs_contain("Dropping invalid exclude filter"));
	}

	#[test]
	fn single_filter_matching() {
		let filter = ExcludeFilter::new("*.o").unwrap();

		assert!(filter.is_match("main.o"));
		assert!(!filter.is_match("main.rs"));
		assert_eq!(filter.to_string(), "*.o");
	}
}
