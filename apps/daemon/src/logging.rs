use std::path::Path;

use anyhow::Context;
use tracing_appender::{
	non_blocking::WorkerGuard,
	rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "fidx_indexer=info,fidx_config=info,fidx_daemon=info";

/// Logs to stdout and to a daily rotated file in `logs_dir`.
///
/// Keep the returned guard alive for as long as logs should reach the file.
pub fn init(logs_dir: &Path) -> anyhow::Result<WorkerGuard> {
	std::fs::create_dir_all(logs_dir)
		.with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

	let (file_writer, guard) = tracing_appender::non_blocking(RollingFileAppender::new(
		Rotation::DAILY,
		logs_dir,
		"fidx-daemon.log",
	));

	tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
		.with(fmt::layer().with_target(true).with_writer(std::io::stdout))
		.with(
			fmt::layer()
				.with_target(true)
				.with_ansi(false)
				.with_writer(file_writer),
		)
		.try_init()
		.context("failed to initialize tracing")?;

	Ok(guard)
}
