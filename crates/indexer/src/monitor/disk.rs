use crate::scheduler::SchedulerHandle;

use std::{
	future::Future,
	path::{Path, PathBuf},
	time::Duration,
};

use sysinfo::{DiskExt, System, SystemExt};
use tokio::{
	sync::watch,
	task::spawn_blocking,
	time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use super::MonitorTask;

const CHECK_INTERVAL: Duration = Duration::from_secs(20);

/// Source of the free space figure the monitor works with
pub trait FreeSpaceSource: Send + 'static {
	/// Available bytes, `None` if it can't be determined
	fn available_space(&self) -> impl Future<Output = Option<u64>> + Send;
}

/// Free space of the volume mounted closest to a path
#[derive(Debug, Clone)]
pub struct VolumeSource {
	path: PathBuf,
}

impl VolumeSource {
	#[must_use]
	pub fn new(path: impl AsRef<Path>) -> Self {
		Self {
			path: path.as_ref().to_path_buf(),
		}
	}
}

impl FreeSpaceSource for VolumeSource {
	async fn available_space(&self) -> Option<u64> {
		let path = self.path.clone();

		spawn_blocking(move || {
			let mut sys = System::new();
			sys.refresh_disks_list();

			sys.disks()
				.iter()
				.filter(|disk| path.starts_with(disk.mount_point()))
				.max_by_key(|disk| disk.mount_point().components().count())
				.map(DiskExt::available_space)
		})
		.await
		.map_err(|e| error!(?e, "Free space check panicked;"))
		.ok()
		.flatten()
	}
}

/// Suspends indexing while the volume holding the store runs low on space, resuming it once
/// there is room again.
#[derive(Debug)]
pub struct DiskSpaceMonitor {
	task: MonitorTask,
	min_disk_space_tx: watch::Sender<u64>,
}

impl DiskSpaceMonitor {
	#[must_use]
	pub fn spawn(scheduler: SchedulerHandle, data_dir: impl AsRef<Path>, min_disk_space: u64) -> Self {
		Self::spawn_with_source(
			scheduler,
			VolumeSource::new(data_dir),
			min_disk_space,
			CHECK_INTERVAL,
		)
	}

	#[must_use]
	pub fn spawn_with_source(
		scheduler: SchedulerHandle,
		source: impl FreeSpaceSource,
		min_disk_space: u64,
		check_interval: Duration,
	) -> Self {
		let (min_disk_space_tx, min_disk_space_rx) = watch::channel(min_disk_space);

		Self {
			task: MonitorTask::spawn("disk space monitor", |stop_rx| {
				run(scheduler, source, min_disk_space_rx, check_interval, stop_rx)
			}),
			min_disk_space_tx,
		}
	}

	/// Takes effect on the next check
	pub fn set_min_disk_space(&self, min_disk_space: u64) {
		self.min_disk_space_tx.send_replace(min_disk_space);
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
	source: impl FreeSpaceSource,
	min_disk_space_rx: watch::Receiver<u64>,
	check_interval: Duration,
	stop_rx: async_channel::Receiver<()>,
) {
	let mut check = interval(check_interval);
	check.set_missed_tick_behavior(MissedTickBehavior::Skip);

	// only ever resume what we suspended ourselves
	let mut suspended_by_us = false;

	loop {
		tokio::select! {
			_ = stop_rx.recv() => break,

			_ = check.tick() => {
				let Some(available) = source.available_space().await else {
					warn!("Unable to determine free disk space, disk space monitoring disabled;");
					break;
				};

				let min_disk_space = *min_disk_space_rx.borrow();

				let res = if available <= min_disk_space {
					if scheduler.is_suspended() {
						Ok(())
					} else {
						warn!(available, min_disk_space, "Running low on disk space, suspending indexing;");
						suspended_by_us = true;
						scheduler.suspend().await
					}
				} else if suspended_by_us {
					info!(available, "Disk space available again, resuming indexing");
					suspended_by_us = false;
					scheduler.resume().await
				} else {
					Ok(())
				};

				if let Err(e) = res {
					error!(?e, "Disk space monitor lost its scheduler;");
					break;
				}
			}
		}
	}

	debug!("Disk space monitor stopped;");
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

	#[derive(Debug, Clone, Default)]
	struct FakeSource(Arc<AtomicU64>);

	impl FakeSource {
		fn set(&self, available: u64) {
			self.0.store(available, Ordering::SeqCst);
		}
	}

	impl FreeSpaceSource for FakeSource {
		async fn available_space(&self) -> Option<u64> {
			let available = self.0.load(Ordering::SeqCst);
			(available != UNKNOWN).then_some(available)
		}
	}

	#[tokio::test]
	#[traced_test]
	async fn low_space_suspends_and_recovery_resumes() {
		let scheduler = scheduler();
		let handle = scheduler.handle();
		let source = FakeSource::default();
		source.set(10);

		let monitor = DiskSpaceMonitor::spawn_with_source(
			handle.clone(),
			source.clone(),
			100,
			Duration::from_millis(10),
		);

		wait_status(&handle, |status| status.suspended).await;

		source.set(1000);
		wait_status(&handle, |status| !status.suspended).await;

		monitor.shutdown().await;
		scheduler.shutdown().await;
	}

	#[tokio::test]
	#[traced_test]
	async fn threshold_changes_apply_while_running() {
		let scheduler = scheduler();
		let handle = scheduler.handle();
		let source = FakeSource::default();
		source.set(500);

		let monitor = DiskSpaceMonitor::spawn_with_source(
			handle.clone(),
			source,
			100,
			Duration::from_millis(10),
		);

		tokio::time::sleep(Duration::from_millis(50)).await;
		assert!(!handle.is_suspended());

		monitor.set_min_disk_space(1000);
		wait_status(&handle, |status| status.suspended).await;

		monitor.set_min_disk_space(0);
		wait_status(&handle, |status| !status.suspended).await;

		monitor.shutdown().await;
		scheduler.shutdown().await;
	}

	#[tokio::test]
	#[traced_test]
	async fn user_suspension_is_left_alone() {
		let scheduler = scheduler();
		let handle = scheduler.handle();
		handle.suspend().await.unwrap();
		wait_status(&handle, |status| status.suspended).await;

		let source = FakeSource::default();
		source.set(10);

		let monitor = DiskSpaceMonitor::spawn_with_source(
			handle.clone(),
			source.clone(),
			100,
			Duration::from_millis(10),
		);

		tokio::time::sleep(Duration::from_millis(50)).await;
		source.set(1000);
		tokio::time::sleep(Duration::from_millis(50)).await;

		assert!(handle.is_suspended());

		monitor.shutdown().await;
		scheduler.shutdown().await;
	}

	#[tokio::test]
	#[traced_test]
	async fn unknown_space_stops_monitoring() {
		let scheduler = scheduler();
		let source = FakeSource::default();
		source.set(UNKNOWN);

		let monitor = DiskSpaceMonitor::spawn_with_source(
			scheduler.handle(),
			source,
			100,
			Duration::from_millis(10),
		);

		timeout(Duration::from_secs(5), async {
			while !monitor.is_finished() {
				tokio::time::sleep(Duration::from_millis(10)).await;
			}
		})
		.await
		.expect("monitor should stop by itself");

		assert!(!scheduler.handle().is_suspended());
		assert!(logs_contain("disk space monitoring disabled"));

		scheduler.shutdown().await;
	}
}
