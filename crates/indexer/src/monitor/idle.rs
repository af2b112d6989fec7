use crate::{scheduler::SchedulerHandle, IndexingSpeed};

use std::{
	future::Future,
	path::{Path, PathBuf},
	time::{Duration, SystemTime},
};

use tokio::{
	fs,
	time::{interval, MissedTickBehavior},
};
use tokio_stream::{wrappers::ReadDirStream, StreamExt};
use tracing::{debug, error, info, warn};

use super::MonitorTask;

const CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Source of the time since the user last did something
pub trait IdleTimeSource: Send + 'static {
	/// `None` if it can't be determined
	fn idle_time(&self) -> impl Future<Output = Option<Duration>> + Send;
}

/// Idle time of the most recently used terminal, from the access times of the terminal
/// devices like `w` reports it
#[derive(Debug, Clone)]
pub struct TerminalIdleSource {
	devices_dir: PathBuf,
}

impl Default for TerminalIdleSource {
	fn default() -> Self {
		Self::new("/dev/pts")
	}
}

impl TerminalIdleSource {
	#[must_use]
	pub fn new(devices_dir: impl AsRef<Path>) -> Self {
		Self {
			devices_dir: devices_dir.as_ref().to_path_buf(),
		}
	}
}

impl IdleTimeSource for TerminalIdleSource {
	async fn idle_time(&self) -> Option<Duration> {
		let mut read_dir_stream = ReadDirStream::new(
			fs::read_dir(&self.devices_dir)
				.await
				.map_err(|e| debug!(?e, dir = %self.devices_dir.display(), "No terminal devices;"))
				.ok()?,
		);

		let mut last_access = None;

		while let Some(res) = read_dir_stream.next().await {
			let Ok(dir_entry) = res else {
				continue;
			};

			// ptmx is the multiplexer, not a terminal
			if dir_entry.file_name() == "ptmx" {
				continue;
			}

			if let Some(accessed) = dir_entry
				.metadata()
				.await
				.ok()
				.and_then(|metadata| metadata.accessed().ok())
			{
				last_access = last_access.max(Some(accessed));
			}
		}

		last_access.map(|accessed| {
			SystemTime::now()
				.duration_since(accessed)
				.unwrap_or_default()
		})
	}
}

/// Lets indexing run at full speed while the user is away, back to the reduced speed as
/// soon as they return.
#[derive(Debug)]
pub struct IdleMonitor {
	task: MonitorTask,
}

impl IdleMonitor {
	#[must_use]
	pub fn spawn(scheduler: SchedulerHandle, idle_timeout: Duration) -> Self {
		Self::spawn_with_source(
			scheduler,
			TerminalIdleSource::default(),
			idle_timeout,
			CHECK_INTERVAL,
		)
	}

	#[must_use]
	pub fn spawn_with_source(
		scheduler: SchedulerHandle,
		source: impl IdleTimeSource,
		idle_timeout: Duration,
		check_interval: Duration,
	) -> Self {
		Self {
			task: MonitorTask::spawn("idle monitor", |stop_rx| {
				run(scheduler, source, idle_timeout, check_interval, stop_rx)
			}),
		}
	}

	#[must_use]
	pub fn is_finished(&self) -> bool {
		self.task.is_finished()
	}

	pub async fn shutdown(self) {
		self.task.shutdown().await;
	}
}

async fn run(
	scheduler: SchedulerHandle,
	source: impl IdleTimeSource,
	idle_timeout: Duration,
	check_interval: Duration,
	stop_rx: async_channel::Receiver<()>,
) {
	let mut check = interval(check_interval);
	check.set_missed_tick_behavior(MissedTickBehavior::Skip);

	let mut user_away = false;

	loop {
		tokio::select! {
			_ = stop_rx.recv() => break,

			_ = check.tick() => {
				let Some(idle_time) = source.idle_time().await else {
					warn!("Unable to determine user idle time, idle detection disabled;");
					break;
				};

				let res = if idle_time >= idle_timeout && !user_away {
					info!(?idle_time, "User is idle, indexing at full speed");
					user_away = true;
					scheduler.set_speed(IndexingSpeed::Full).await
				} else if idle_time < idle_timeout && user_away {
					info!("User is back, reducing indexing speed");
					user_away = false;
					scheduler.set_speed(IndexingSpeed::Reduced).await
				} else {
					Ok(())
				};

				if let Err(e) = res {
					error!(?e, "Idle monitor lost its scheduler;");
					break;
				}
			}
		}
	}

	debug!("Idle monitor stopped;");
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::monitor::test_utils::{scheduler, wait_status};

	use std::sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	};

	use tokio::time::timeout;
	use tracing_test::traced_test;

	const UNKNOWN: u64 = u64::MAX;

	/// Idle time in seconds
	#[derive(Debug, Clone, Default)]
	struct FakeSource(Arc<AtomicU64>);

	impl FakeSource {
		fn set(&self, idle_secs: u64) {
			self.0.store(idle_secs, Ordering::SeqCst);
		}
	}

	impl IdleTimeSource for FakeSource {
		async fn idle_time(&self) -> Option<Duration> {
			let idle_secs = self.0.load(Ordering::SeqCst);
			(idle_secs != UNKNOWN).then(|| Duration::from_secs(idle_secs))
		}
	}

	#[tokio::test]
	#[traced_test]
	async fn full_speed_while_the_user_is_away() {
		let scheduler = scheduler();
		let handle = scheduler.handle();
		let source = FakeSource::default();

		let monitor = IdleMonitor::spawn_with_source(
			handle.clone(),
			source.clone(),
			Duration::from_secs(120),
			Duration::from_millis(10),
		);

		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(handle.status().speed, IndexingSpeed::Reduced);

		source.set(121);
		wait_status(&handle, |status| status.speed == IndexingSpeed::Full).await;

		source.set(3);
		wait_status(&handle, |status| status.speed == IndexingSpeed::Reduced).await;

		monitor.shutdown().await;
		scheduler.shutdown().await;
	}

	#[tokio::test]
	#[traced_test]
	async fn unknown_idle_time_stops_monitoring() {
		let scheduler = scheduler();
		let source = FakeSource::default();
		source.set(UNKNOWN);

		let monitor = IdleMonitor::spawn_with_source(
			scheduler.handle(),
			source,
			Duration::from_secs(120),
			Duration::from_millis(10),
		);

		timeout(Duration::from_secs(5), async {
			while !monitor.is_finished() {
				tokio::time::sleep(Duration::from_millis(10)).await;
			}
		})
		.await
		.expect("monitor should stop by itself");

		assert_eq!(scheduler.handle().status().speed, IndexingSpeed::Reduced);
		assert!(logs_contain("idle detection disabled"));

		scheduler.shutdown().await;
	}

	#[tokio::test]
	async fn terminal_access_times() {
		let devices = tempfile::Builder::new().prefix("fidx").tempdir().unwrap();

		let source = TerminalIdleSource::new(devices.path());
		assert_eq!(source.idle_time().await, None);

		std::fs::write(devices.path().join("0"), b"").unwrap();
		let idle_time = source.idle_time().await.unwrap();
		assert!(idle_time < Duration::from_secs(60), "{idle_time:?}");

		assert_eq!(
			TerminalIdleSource::new(devices.path().join("missing"))
				.idle_time()
				.await,
			None
		);
	}
}
