use fidx_utils::normalize_path;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRule {
	pub path: PathBuf,
	pub include: bool,
}

/// Outcome of looking a path up in a [`RuleTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleMatch {
	pub include: bool,
	/// The path is the rule's own folder and not one of its descendants
	pub exact: bool,
}

/// Sorted, de-duplicated and non-redundant list of folder rules.
///
/// Tables are never mutated, a configuration change builds a brand new one with [`RuleTable::rebuild`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTable {
	rules: Vec<FolderRule>,
}

impl RuleTable {
	#[must_use]
	pub fn rebuild(
		include_paths: impl IntoIterator<Item = impl AsRef<Path>>,
		exclude_paths: impl IntoIterator<Item = impl AsRef<Path>>,
	) -> Self {
		Self::rebuild_with(include_paths, exclude_paths, |_, _| false)
	}

	/// Same as [`RuleTable::rebuild`], but an include nested in another include is kept
	/// when a crawl coming from the enclosing include would filter it out on the way, as
	/// only an exact include match lets such a folder in. `rejected_by_name` gets the full
	/// path of the nested include and the part of it below the enclosing include.
	#[must_use]
	pub fn rebuild_with(
		include_paths: impl IntoIterator<Item = impl AsRef<Path>>,
		exclude_paths: impl IntoIterator<Item = impl AsRef<Path>>,
		rejected_by_name: impl Fn(&Path, &Path) -> bool,
	) -> Self {
		let mut rules = include_paths
			.into_iter()
			.map(|path| FolderRule {
				path: normalize_path(path),
				include: true,
			})
			.chain(exclude_paths.into_iter().map(|path| FolderRule {
				path: normalize_path(path),
				include: false,
			}))
			.filter(|rule| !rule.path.as_os_str().is_empty())
			.collect::<Vec<_>>();

		// Component-wise ordering keeps every subtree contiguous, includes sort ahead of
		// excludes on the same path so dedup keeps the include
		rules.sort_by(|a, b| {
			a.path
				.cmp(&b.path)
				.then_with(|| b.include.cmp(&a.include))
		});
		rules.dedup_by(|next, kept| next.path == kept.path);

		remove_redundant(&mut rules, rejected_by_name);

		Self { rules }
	}

	/// Longest-prefix-wins lookup: scanning backward over the ascending table
	/// finds the most specific enclosing rule first.
	#[must_use]
	pub fn lookup(&self, path: impl AsRef<Path>) -> Option<RuleMatch> {
		let path = normalize_path(path);

		self.rules
			.iter()
			.rev()
			.find(|rule| path.starts_with(&rule.path))
			.map(|rule| RuleMatch {
				include: rule.include,
				exact: path == rule.path,
			})
	}

	#[must_use]
	pub fn rules(&self) -> &[FolderRule] {
		&self.rules
	}

	pub fn include_folders(&self) -> impl Iterator<Item = &Path> + '_ {
		self.rules
			.iter()
			.filter(|rule| rule.include)
			.map(|rule| rule.path.as_path())
	}

	pub fn exclude_folders(&self) -> impl Iterator<Item = &Path> + '_ {
		self.rules
			.iter()
			.filter(|rule| !rule.include)
			.map(|rule| rule.path.as_path())
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.rules.is_empty()
	}
}

/// Drops every rule that repeats the decision of its nearest enclosing rule.
///
/// Rules are visited parents first, so a removed parent is already gone when
/// its children are checked. Rules without any enclosing rule are always kept.
fn remove_redundant(rules: &mut Vec<FolderRule>, rejected_by_name: impl Fn(&Path, &Path) -> bool) {
	let mut idx = 0;
	while idx < rules.len() {
		let candidate = &rules[idx];

		let redundant = rules[..idx]
			.iter()
			.rev()
			.find(|rule| candidate.path.starts_with(&rule.path))
			.is_some_and(|parent| {
				parent.include == candidate.include
					&& !(candidate.include
						&& candidate
							.path
							.strip_prefix(&parent.path)
							.is_ok_and(|below| rejected_by_name(&candidate.path, below)))
			});

		if redundant {
			rules.remove(idx);
		} else {
			idx += 1;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn table(include: &[&str], exclude: &[&str]) -> RuleTable {
		RuleTable::rebuild(include.iter(), exclude.iter())
	}

	fn rule(path: &str, include: bool) -> FolderRule {
		FolderRule {
			path: PathBuf::from(path),
			include,
		}
	}

	#[test]
	fn sorted_and_normalized() {
		let table = table(&["/home/user/", "/data"], &["/home/user/tmp/"]);

		assert_eq!(
			table.rules(),
			&[
				rule("/data", true),
				rule("/home/user", true),
				rule("/home/user/tmp", false),
			]
		);
	}

	#[test]
	fn empty_paths_are_dropped() {
		let table = table(&["", "/a"], &[""]);

		assert_eq!(table.rules(), &[rule("/a", true)]);
	}

	#[test]
	fn nested_repetitions_are_redundant() {
		let table = table(
			&["/a", "/a/b/c", "/a/d"],
			&["/a/b", "/a/b/c/e", "/a/b/c/e/f"],
		);

		assert_eq!(
			table.rules(),
			&[
				rule("/a", true),
				rule("/a/b", false),
				rule("/a/b/c", true),
				rule("/a/b/c/e", false),
			]
		);
	}

	#[test]
	fn top_level_rules_are_never_redundant() {
		let table = table(&["/a/b/c"], &["/a/b", "/x"]);

		assert_eq!(
			table.rules(),
			&[rule("/a/b", false), rule("/a/b/c", true), rule("/x", false)]
		);
		assert_eq!(
			table.lookup("/a/b/c/d"),
			Some(RuleMatch {
				include: true,
				exact: false
			})
		);
		assert_eq!(
			table.lookup("/a/b/d"),
			Some(RuleMatch {
				include: false,
				exact: false
			})
		);
	}

	#[test]
	fn nested_includes_rejected_by_name_are_kept() {
		let table = RuleTable::rebuild_with(
			["/a", "/a/.hidden", "/a/docs", "/a/.cache/x", "/a/.hidden/y"],
			[] as [&str; 0],
			|_, below| {
				below
					.iter()
					.any(|name| name.to_string_lossy().starts_with('.'))
			},
		);

		assert_eq!(
			table.rules(),
			&[
				rule("/a", true),
				rule("/a/.cache/x", true),
				rule("/a/.hidden", true),
			]
		);
	}

	#[test]
	fn nested_includes_see_their_full_path() {
		let hidden_anywhere = |path: &Path, _: &Path| {
			path.iter()
				.any(|name| name.to_string_lossy().starts_with('.'))
		};

		let table = RuleTable::rebuild_with(
			["/a", "/a/.hidden", "/a/.hidden/sub", "/a/docs"],
			[] as [&str; 0],
			hidden_anywhere,
		);

		assert_eq!(
			table.rules(),
			&[
				rule("/a", true),
				rule("/a/.hidden", true),
				rule("/a/.hidden/sub", true),
			]
		);
	}

	#[test]
	fn include_wins_on_duplicated_paths() {
		let table = table(&["/a", "/a/"], &["/a"]);

		assert_eq!(table.rules(), &[rule("/a", true)]);
	}

	#[test]
	fn longest_prefix_wins() {
		let table = table(&["/a", "/a/b/c"], &["/a/b"]);

		assert_eq!(
			table.lookup("/a/b/c"),
			Some(RuleMatch {
				include: true,
				exact: true
			})
		);
		assert_eq!(
			table.lookup("/a/b/x"),
			Some(RuleMatch {
				include: false,
				exact: false
			})
		);
		assert_eq!(
			table.lookup("/a/bc"),
			Some(RuleMatch {
				include: true,
				exact: false
			})
		);
		assert_eq!(table.lookup("/b"), None);
	}

	#[test]
	fn prefix_match_is_per_component() {
		let table = table(&["/home/user"], &[] as &[&str]);

		assert!(table.lookup("/home/user/docs").is_some());
		assert!(table.lookup("/home/user2/docs").is_none());
	}

	#[test]
	fn subtrees_stay_contiguous() {
		let table = table(&["/a", "/a-b"], &["/a/b"]);

		assert_eq!(
			table.rules(),
			&[rule("/a", true), rule("/a/b", false), rule("/a-b", true)]
		);
	}

	#[test]
	fn rebuild_is_deterministic() {
		let include = ["/a", "/a/b/c", "/z", "/m/n"];
		let exclude = ["/a/b", "/z/y", "/m"];

		let first = RuleTable::rebuild(include, exclude);
		let second = RuleTable::rebuild(include.iter().rev(), exclude.iter().rev());

		assert_eq!(first, second);
		for path in ["/a/b/c/d", "/a/b/x", "/z/y/w", "/m/n/o", "/m/o", "/q"] {
			assert_eq!(first.lookup(path), second.lookup(path), "{path}");
		}
	}
}
