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

use std::{
	path::{Component, Path, PathBuf},
	time::SystemTime,
};

use chrono::{DateTime, Utc};

pub mod error;

/// Lexically normalizes a path: trailing separators and `.` components are dropped,
/// an empty input stays empty.
///
/// No filesystem access happens here, so symlinks and `..` are kept as they are.
#[must_use]
pub fn normalize_path(path: impl AsRef<Path>) -> PathBuf {
	path.as_ref()
		.components()
		.filter(|component| !matches!(component, Component::CurDir))
		.collect()
}

/// A path is hidden if any of its components, up to the filesystem root, is a dot-prefixed name
#[must_use]
pub fn is_hidden_path(path: impl AsRef<Path>) -> bool {
	path.as_ref().components().any(|component| {
		matches!(
			component,
			Component::Normal(name) if name.as_encoded_bytes().first() == Some(&b'.')
		)
	})
}

#[must_use]
pub fn system_time_to_utc(time: SystemTime) -> DateTime<Utc> {
	DateTime::<Utc>::from(time)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn normalization_strips_trailing_separators() {
		assert_eq!(normalize_path("/home/user/"), PathBuf::from("/home/user"));
		assert_eq!(normalize_path("/home/./user"), PathBuf::from("/home/user"));
		assert_eq!(normalize_path(""), PathBuf::new());
	}

	#[test]
	fn hidden_paths() {
		assert!(is_hidden_path("/home/user/.config"));
		assert!(is_hidden_path("/home/.user/docs/file.txt"));
		assert!(!is_hidden_path("/home/user/docs/file.txt"));
		assert!(!is_hidden_path("/home/user/./docs"));
		assert!(!is_hidden_path("/home/user/../docs"));
	}
}
