use std::{
	ffi::OsString,
	fmt,
	future::Future,
	process::Stdio,
	time::Duration,
};

use thiserror::Error;
use tokio::process::Command;
use tracing::{instrument, trace};

use crate::scheduler::FileWorkEntry;

#[derive(Error, Debug)]
pub enum ExtractionError {
	#[error("failed to spawn extraction worker: {0}")]
	Spawn(#[from] std::io::Error),
	#[error("extraction worker exited with code {code}: {stderr}")]
	ExitCode { code: i32, stderr: String },
	#[error("extraction worker crashed")]
	Crashed,
	#[error("extraction took longer than {0:?} and was aborted")]
	TimedOut(Duration),
	#[error("extraction worker panicked")]
	Panicked,
	#[error("{0}")]
	Other(String),
}

/// The external worker that reads one file and writes its metadata to the store.
///
/// Dropping the returned future must abort the extraction, that's how timeouts are enforced.
pub trait Extractor: Send + Sync + fmt::Debug + 'static {
	fn extract(
		&self,
		entry: &FileWorkEntry,
	) -> impl Future<Output = Result<(), ExtractionError>> + Send;
}

/// Runs an external program once per file, with the file path appended to its arguments.
#[derive(Debug, Clone)]
pub struct ProcessExtractor {
	program: OsString,
	args: Vec<OsString>,
}

impl ProcessExtractor {
	#[must_use]
	pub fn new(
		program: impl Into<OsString>,
		args: impl IntoIterator<Item = impl Into<OsString>>,
	) -> Self {
		Self {
			program: program.into(),
			args: args.into_iter().map(Into::into).collect(),
		}
	}

	/// Builds an extractor from a `[program, args...]` command line, `None` if it's empty
	#[must_use]
	pub fn from_command_line(command: &[String]) -> Option<Self> {
		command
			.split_first()
			.map(|(program, args)| Self::new(program, args))
	}
}

impl Extractor for ProcessExtractor {
	#[instrument(skip_all, fields(path = %entry.path.display()), err)]
	async fn extract(&self, entry: &FileWorkEntry) -> Result<(), ExtractionError> {
		let output = Command::new(&self.program)
			.args(&self.args)
			.arg(&entry.path)
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.output()
			.await?;

		match output.status.code() {
			Some(0) => {
				trace!("Extraction worker finished");
				Ok(())
			}
			Some(code) => Err(ExtractionError::ExitCode {
				code,
				stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
			}),
			None => Err(ExtractionError::Crashed),
		}
	}
}
