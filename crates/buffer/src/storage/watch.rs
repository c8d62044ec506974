//! Per-document source watcher.
//!
//! A plain ticker thread: stat the backing file on an interval, classify,
//! and hand detected changes to the application's handler. The handler runs
//! on the watcher thread with no document lock held.

use std::time::Duration;

use tracing::{debug, warn};

use crate::document::Document;

/// Spawns the watcher thread for `doc`. The thread exits when the
/// document's shutdown flag is set.
pub(crate) fn spawn_watcher(doc: Document, interval: Duration) -> std::thread::JoinHandle<()> {
	std::thread::Builder::new()
		.name(format!("vellum-watch-{}", doc.id().0))
		.spawn(move || {
			debug!(doc = doc.id().0, ?interval, "watcher started");
			loop {
				std::thread::park_timeout(interval);
				if doc.is_shut_down() {
					break;
				}
				if let Err(e) = doc.poll_source() {
					warn!(doc = doc.id().0, error = %e, "source check failed");
				}
			}
			debug!(doc = doc.id().0, "watcher stopped");
		})
		.expect("failed to spawn watcher thread")
}
