//! Background watchers pacing or pausing the scheduler from the state of the system: free
//! disk space, user activity and power management.

use crate::wait_stop_or_abort;

use std::future::Future;

use tokio::{spawn, task::JoinHandle};
use tracing::debug;

mod disk;
mod idle;
mod power;

pub use disk::{DiskSpaceMonitor, FreeSpaceSource, VolumeSource};
pub use idle::{IdleMonitor, IdleTimeSource, TerminalIdleSource};
pub use power::{PowerMonitor, PowerStateSource, PowerSupplySource};

/// A polling task stopped through its own channel, aborted if dropped while running
#[derive(Debug)]
struct MonitorTask {
	name: &'static str,
	stop_tx: async_channel::Sender<()>,
	handle: Option<JoinHandle<()>>,
}

impl MonitorTask {
	fn spawn<F>(name: &'static str, run: impl FnOnce(async_channel::Receiver<()>) -> F) -> Self
	where
		F: Future<Output = ()> + Send + 'static,
	{
		let (stop_tx, stop_rx) = async_channel::bounded(1);

		Self {
			name,
			stop_tx,
			handle: Some(spawn(run(stop_rx))),
		}
	}

	fn is_finished(&self) -> bool {
		self.handle.as_ref().map_or(true, JoinHandle::is_finished)
	}

	async fn shutdown(mut self) {
		if self.stop_tx.send(()).await.is_err() {
			debug!(monitor = self.name, "Monitor already stopped;");
		}

		wait_stop_or_abort(self.handle.take(), self.name).await;
	}
}

impl Drop for MonitorTask {
	fn drop(&mut self) {
		if let Some(handle) = self.handle.take() {
			handle.abort();
		}
	}
}
