use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// How fast the scheduler and the cleaner move from one step to the next.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingSpeed {
	/// No delay between steps
	#[default]
	Full,
	/// A short pause between steps, for when the user is working
	Reduced,
	/// Snail pace, right after startup or under heavy load
	Throttled,
}

impl IndexingSpeed {
	#[must_use]
	pub const fn delay(self) -> Duration {
		match self {
			Self::Full => Duration::ZERO,
			Self::Reduced => Duration::from_millis(500),
			Self::Throttled => Duration::from_millis(3000),
		}
	}
}

impl fmt::Display for IndexingSpeed {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Full => "full",
			Self::Reduced => "reduced",
			Self::Throttled => "throttled",
		})
	}
}
