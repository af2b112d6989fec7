use std::{
	path::{Path, PathBuf},
	pin::pin,
	sync::Arc,
	time::Duration,
};

use async_channel as chan;
use futures::StreamExt;
use futures_concurrency::stream::Merge;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::{
	spawn,
	task::JoinHandle,
	time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, info, trace, warn, Instrument};

use super::{ConfigError, ConfigManager};

const HUNDRED_MILLIS: Duration = Duration::from_millis(100);

/// Editors write files in bursts (truncate, write, rename, chmod...), only reload once things settle
const DEBOUNCE: Duration = Duration::from_millis(300);

/// Watches the config file and reloads the [`ConfigManager`] whenever it changes on disk.
///
/// The parent directory is watched instead of the file itself, so atomic replacements
/// through a rename are also noticed.
#[derive(Debug)]
pub struct ConfigWatcher {
	_watcher: RecommendedWatcher,
	handle: Option<JoinHandle<()>>,
	stop_tx: chan::Sender<()>,
}

impl ConfigWatcher {
	pub fn new(manager: Arc<ConfigManager>) -> Result<Self, ConfigError> {
		let config_path = manager.path().to_path_buf();
		let watched_dir = config_path
			.parent()
			.map_or_else(|| PathBuf::from("."), Path::to_path_buf);

		let (events_tx, events_rx) = chan::unbounded();
		let (stop_tx, stop_rx) = chan::bounded(1);

		let mut watcher = RecommendedWatcher::new(
			move |result| {
				if !events_tx.is_closed() {
					// SAFETY: we are not blocking the thread as this is an unbounded channel
					if events_tx.send_blocking(result).is_err() {
						error!("Unable to send config file event to the watcher task;");
					}
				}
			},
			Config::default(),
		)?;

		watcher.watch(&watched_dir, RecursiveMode::NonRecursive)?;

		trace!(path = %config_path.display(), "Now watching indexer config");

		let handle = spawn(
			handle_watch_events(manager, config_path, events_rx, stop_rx).in_current_span(),
		);

		Ok(Self {
			_watcher: watcher,
			handle: Some(handle),
			stop_tx,
		})
	}

	pub async fn shutdown(mut self) {
		if let Some(handle) = self.handle.take() {
			if self.stop_tx.send(()).await.is_err() {
				warn!("Config watcher task was already gone;");
			}

			if let Err(e) = handle.await {
				error!(?e, "Failed to join config watcher task;");
			}
		}
	}
}

impl Drop for ConfigWatcher {
	fn drop(&mut self) {
		if let Some(handle) = self.handle.take() {
			handle.abort();
		}
	}
}

async fn handle_watch_events(
	manager: Arc<ConfigManager>,
	config_path: PathBuf,
	events_rx: chan::Receiver<notify::Result<Event>>,
	stop_rx: chan::Receiver<()>,
) {
	enum StreamMessage {
		NewEvent(notify::Result<Event>),
		Tick,
		Stop,
	}

	let mut tick_interval = interval_at(Instant::now() + HUNDRED_MILLIS, HUNDRED_MILLIS);
	tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

	let mut msg_stream = pin!((
		events_rx.map(StreamMessage::NewEvent),
		IntervalStream::new(tick_interval).map(|_| StreamMessage::Tick),
		stop_rx.map(|()| StreamMessage::Stop),
	)
		.merge());

	let mut pending_since = None::<Instant>;

	while let Some(msg) = msg_stream.next().await {
		match msg {
			StreamMessage::NewEvent(Ok(event)) => {
				if touches_config(&event, &config_path) {
					trace!(?event, "Config file event;");
					pending_since = Some(Instant::now());
				}
			}

			StreamMessage::NewEvent(Err(e)) => error!(?e, "Config watcher error;"),

			StreamMessage::Tick => {
				if pending_since.is_some_and(|since| since.elapsed() >= DEBOUNCE) {
					pending_since = None;

					match manager.reload().await {
						Ok(true) => info!("Indexer config changed on disk, reloaded"),
						Ok(false) => debug!("Indexer config file touched without changes"),
						// The previous configuration stays active
						Err(e) => error!(?e, "Failed to reload indexer config;"),
					}
				}
			}

			StreamMessage::Stop => {
				debug!("Stopping config watcher");
				break;
			}
		}
	}
}

fn touches_config(event: &Event, config_path: &Path) -> bool {
	matches!(
		event.kind,
		EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
	) && event.paths.iter().any(|path| path == config_path)
}

#[cfg(test)]
mod tests {
	use super::*;

	use crate::{IndexerConfig, INDEXER_CONFIG_NAME};

	use notify::event::{CreateKind, ModifyKind};

	#[test]
	fn only_config_file_events_count() {
		let config_path = Path::new("/etc/fidx/indexer.json");

		let event = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(config_path.into());
		assert!(touches_config(&event, config_path));

		let other = Event::new(EventKind::Create(CreateKind::File))
			.add_path(PathBuf::from("/etc/fidx/other.json"));
		assert!(!touches_config(&other, config_path));

		let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
			.add_path(config_path.into());
		assert!(!touches_config(&access, config_path));
	}

	#[tokio::test(flavor = "multi_thread")]
	async fn external_edits_are_published() {
		let dir = tempfile::Builder::new().prefix("fidx").tempdir().unwrap();
		// Canonicalized as some platforms report events through resolved paths
		let path = dir.path().canonicalize().unwrap().join(INDEXER_CONFIG_NAME);

		let manager = ConfigManager::new(&path).await.unwrap();
		let mut rx = manager.subscribe();
		let watcher = ConfigWatcher::new(Arc::clone(&manager)).unwrap();

		let mut edited = IndexerConfig::default();
		edited.exclude_filters = vec!["*.bak".into()];
		edited.save(&path).await.unwrap();

		tokio::time::timeout(Duration::from_secs(10), rx.changed())
			.await
			.expect("config change was not noticed")
			.unwrap();

		assert_eq!(rx.borrow().exclude_filters, vec!["*.bak".to_string()]);

		watcher.shutdown().await;
	}
}
