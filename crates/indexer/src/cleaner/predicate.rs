use crate::{store::RecordScheme, IndexedRecord};

use fidx_folder_rules::{ExcludeFilter, FolderPolicy, FolderRule};

use std::{
	collections::HashSet,
	fmt,
	path::{Component, Path, PathBuf},
};

/// Declarative match over stored records, evaluated by the store backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
	True,
	All(Vec<Predicate>),
	Any(Vec<Predicate>),
	Not(Box<Predicate>),
	/// The record's url is exactly this path
	UrlIs(PathBuf),
	/// The record's url lies strictly below this folder
	UrlUnder(PathBuf),
	HasUrl,
	/// The record hangs from another record
	IsPartOf,
	Scheme(RecordScheme),
	FileNameMatches(ExcludeFilter),
	/// Some folder component of the url, the file name aside, matches
	PathComponentMatches(ExcludeFilter),
	/// Same as [`Predicate::PathComponentMatches`], looking only at the part of the url
	/// below `folder`
	PathComponentMatchesBelow {
		folder: PathBuf,
		filter: ExcludeFilter,
	},
}

#[allow(clippy::should_implement_trait)]
impl Predicate {
	#[must_use]
	pub fn not(predicate: Self) -> Self {
		Self::Not(Box::new(predicate))
	}

	#[must_use]
	pub fn matches(&self, record: &IndexedRecord) -> bool {
		match self {
			Self::True => true,
			Self::All(predicates) => predicates.iter().all(|p| p.matches(record)),
			Self::Any(predicates) => predicates.iter().any(|p| p.matches(record)),
			Self::Not(predicate) => !predicate.matches(record),
			Self::UrlIs(path) => record.path() == Some(path.as_path()),
			Self::UrlUnder(folder) => record
				.path()
				.is_some_and(|url| url != folder && url.starts_with(folder)),
			Self::HasUrl => record.url.is_some(),
			Self::IsPartOf => record.part_of.is_some(),
			Self::Scheme(scheme) => record.scheme == *scheme,
			Self::FileNameMatches(filter) => record
				.path()
				.and_then(Path::file_name)
				.is_some_and(|name| filter.is_match(name)),
			Self::PathComponentMatches(filter) => record
				.path()
				.and_then(Path::parent)
				.is_some_and(|folders| any_component_matches(folders, filter)),
			Self::PathComponentMatchesBelow { folder, filter } => record
				.path()
				.and_then(|url| url.strip_prefix(folder).ok())
				.and_then(Path::parent)
				.is_some_and(|folders| any_component_matches(folders, filter)),
		}
	}
}

fn any_component_matches(path: &Path, filter: &ExcludeFilter) -> bool {
	path.components().any(|component| match component {
		Component::Normal(name) => filter.is_match(name),
		_ => false,
	})
}

fn join(f: &mut fmt::Formatter<'_>, predicates: &[Predicate], operator: &str) -> fmt::Result {
	write!(f, "(")?;
	for (i, predicate) in predicates.iter().enumerate() {
		if i > 0 {
			write!(f, " {operator} ")?;
		}
		write!(f, "{predicate}")?;
	}
	write!(f, ")")
}

impl fmt::Display for Predicate {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::True => write!(f, "true"),
			Self::All(predicates) => join(f, predicates, "&&"),
			Self::Any(predicates) => join(f, predicates, "||"),
			Self::Not(predicate) => write!(f, "!{predicate}"),
			Self::UrlIs(path) => write!(f, "url == '{}'", path.display()),
			Self::UrlUnder(path) => write!(f, "url under '{}/'", path.display()),
			Self::HasUrl => write!(f, "has url"),
			Self::IsPartOf => write!(f, "is part of"),
			Self::Scheme(scheme) => write!(f, "scheme == {scheme}"),
			Self::FileNameMatches(filter) => write!(f, "file name ~ '{filter}'"),
			Self::PathComponentMatches(filter) => write!(f, "url ~ '/{filter}/'"),
			Self::PathComponentMatchesBelow { folder, filter } => {
				write!(f, "url below '{}/' ~ '/{filter}/'", folder.display())
			}
		}
	}
}

/// Keeps the include folders themselves out of any removal
fn spare_include_folders<'a>(folders: impl IntoIterator<Item = &'a Path>) -> Vec<Predicate> {
	let mut seen = HashSet::new();

	folders
		.into_iter()
		.filter(|folder| seen.insert(*folder))
		.map(|folder| Predicate::not(Predicate::UrlIs(folder.to_path_buf())))
		.collect()
}

/// One nesting level: an include matches everything outside it or in any of its nested
/// excludes, an exclude matches everything inside it but outside its nested includes.
fn folder_sub_predicate(rules: &[&FolderRule], index: &mut usize) -> Predicate {
	let FolderRule { path, include } = rules[*index];
	*index += 1;

	let mut sub_predicates = vec![if *include {
		Predicate::not(Predicate::UrlUnder(path.clone()))
	} else {
		Predicate::UrlUnder(path.clone())
	}];

	while *index < rules.len() && rules[*index].path.starts_with(path) {
		sub_predicates.push(folder_sub_predicate(rules, index));
	}

	if sub_predicates.len() == 1 {
		sub_predicates.swap_remove(0)
	} else if *include {
		Predicate::Any(sub_predicates)
	} else {
		Predicate::All(sub_predicates)
	}
}

/// Records whose url lies outside of what the folder rules currently include.
///
/// Nested includes directly below another include and top level excludes add nothing
/// here, everything they cover is already decided by the surrounding rules.
#[must_use]
pub fn outside_included_folders(policy: &FolderPolicy) -> Predicate {
	let rules = policy.rules().rules();

	let relevant = rules
		.iter()
		.enumerate()
		.filter(|(i, rule)| {
			let enclosing = rules[..*i]
				.iter()
				.rev()
				.find(|candidate| rule.path.starts_with(&candidate.path));

			match enclosing {
				Some(enclosing) => !(rule.include && enclosing.include),
				None => rule.include,
			}
		})
		.map(|(_, rule)| rule)
		.collect::<Vec<_>>();

	let mut predicates = vec![Predicate::HasUrl];
	predicates.extend(spare_include_folders(policy.include_folders()));

	let mut index = 0;
	while index < relevant.len() {
		predicates.push(folder_sub_predicate(&relevant, &mut index));
	}

	Predicate::All(predicates)
}

/// Records whose file name matches an exclude filter, `None` without filters
#[must_use]
pub fn excluded_file_names(policy: &FolderPolicy) -> Option<Predicate> {
	let filters = policy.filters().filters();
	if filters.is_empty() {
		return None;
	}

	let mut predicates = vec![Predicate::HasUrl];
	predicates.extend(spare_include_folders(policy.include_folders()));
	predicates.push(Predicate::Any(
		filters
			.iter()
			.cloned()
			.map(Predicate::FileNameMatches)
			.collect(),
	));

	Some(Predicate::All(predicates))
}

/// Records living in some folder whose name matches an exclude filter, `None` without filters.
///
/// Include folders which themselves have such a component in their path only lose the
/// records where the component shows up again below them.
#[must_use]
pub fn excluded_path_components(policy: &FolderPolicy) -> Option<Predicate> {
	let filters = policy.filters().filters();
	if filters.is_empty() {
		return None;
	}

	let mut special_folders = Vec::new();

	let per_filter = filters
		.iter()
		.map(|filter| {
			let mut terms = vec![Predicate::PathComponentMatches(filter.clone())];

			for folder in policy
				.include_folders()
				.filter(|folder| any_component_matches(folder, filter))
			{
				special_folders.push(folder);
				terms.push(Predicate::Any(vec![
					Predicate::not(Predicate::UrlUnder(folder.to_path_buf())),
					Predicate::PathComponentMatchesBelow {
						folder: folder.to_path_buf(),
						filter: filter.clone(),
					},
				]));
			}

			if terms.len() == 1 {
				terms.swap_remove(0)
			} else {
				Predicate::All(terms)
			}
		})
		.collect::<Vec<_>>();

	let mut predicates = vec![Predicate::HasUrl];
	predicates.extend(spare_include_folders(special_folders));
	predicates.push(Predicate::Any(per_filter));

	Some(Predicate::All(predicates))
}

/// Records with no url at all that don't belong to another record either
#[must_use]
pub fn unreachable_records() -> Predicate {
	Predicate::All(vec![
		Predicate::not(Predicate::HasUrl),
		Predicate::not(Predicate::IsPartOf),
	])
}
