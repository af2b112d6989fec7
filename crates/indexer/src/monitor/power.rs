use crate::scheduler::SchedulerHandle;

use std::{
	future::Future,
	path::{Path, PathBuf},
	time::Duration,
};

use tokio::{
	fs,
	time::{interval, MissedTickBehavior},
};
use tokio_stream::{wrappers::ReadDirStream, StreamExt};
use tracing::{debug, error, info, warn};

use super::MonitorTask;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Source of the power manager's wish to save energy
pub trait PowerStateSource: Send + 'static {
	/// `None` if the power state can't be determined
	fn conserve_resources(&self) -> impl Future<Output = Option<bool>> + Send;
}

/// Reads the kernel's power supply class: resources are conserved while running from a
/// discharging battery with no mains adapter online.
#[derive(Debug, Clone)]
pub struct PowerSupplySource {
	supplies_dir: PathBuf,
}

impl Default for PowerSupplySource {
	fn default() -> Self {
		Self::new("/sys/class/power_supply")
	}
}

impl PowerSupplySource {
	#[must_use]
	pub fn new(supplies_dir: impl AsRef<Path>) -> Self {
		Self {
			supplies_dir: supplies_dir.as_ref().to_path_buf(),
		}
	}
}

async fn read_attribute(supply: &Path, name: &str) -> Option<String> {
	fs::read_to_string(supply.join(name))
		.await
		.ok()
		.map(|value| value.trim().to_string())
}

impl PowerStateSource for PowerSupplySource {
	async fn conserve_resources(&self) -> Option<bool> {
		let mut read_dir_stream = ReadDirStream::new(
			fs::read_dir(&self.supplies_dir)
				.await
				.map_err(|e| debug!(?e, dir = %self.supplies_dir.display(), "No power supplies;"))
				.ok()?,
		);

		let mut found = false;
		let mut on_mains = false;
		let mut discharging = false;

		while let Some(res) = read_dir_stream.next().await {
			let Ok(dir_entry) = res else {
				continue;
			};
			let supply = dir_entry.path();

			match read_attribute(&supply, "type").await.as_deref() {
				Some("Mains") => {
					found = true;
					on_mains |= read_attribute(&supply, "online").await.as_deref() == Some("1");
				}
				Some("Battery") => {
					found = true;
					discharging |=
						read_attribute(&supply, "status").await.as_deref() == Some("Discharging");
				}
				_ => {}
			}
		}

		found.then_some(discharging && !on_mains)
	}
}

/// Suspends indexing while the power manager asks applications to conserve resources, and
/// resumes it afterwards unless somebody else suspended it in the meantime.
#[derive(Debug)]
pub struct PowerMonitor {
	task: MonitorTask,
}

impl PowerMonitor {
	#[must_use]
	pub fn spawn(scheduler: SchedulerHandle) -> Self {
		Self::spawn_with_source(scheduler, PowerSupplySource::default(), CHECK_INTERVAL)
	}

	#[must_use]
	pub fn spawn_with_source(
		scheduler: SchedulerHandle,
		source: impl PowerStateSource,
		check_interval: Duration,
	) -> Self {
		Self {
			task: MonitorTask::spawn("power monitor", |stop_rx| {
				run(scheduler, source, check_interval, stop_rx)
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
	source: impl PowerStateSource,
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
				let Some(conserve_resources) = source.conserve_resources().await else {
					warn!("Unable to determine the power state, power management disabled;");
					break;
				};

				let res = if conserve_resources {
					if suspended_by_us || scheduler.is_suspended() {
						Ok(())
					} else {
						info!("Suspending indexing to conserve resources");
						suspended_by_us = true;
						scheduler.suspend().await
					}
				} else if suspended_by_us {
					info!("Power restored, resuming indexing");
					suspended_by_us = false;
					scheduler.resume().await
				} else {
					Ok(())
				};

				if let Err(e) = res {
					error!(?e, "Power monitor lost its scheduler;");
					break;
				}
			}
		}
	}

	debug!("Power monitor stopped;");
}
