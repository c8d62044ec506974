//! Background maintenance.
//!
//! One ticker thread per library: every interval it chills toward the
//! soft limit at the `UnusedData` level, then advances the tick watermark
//! that level compares access stamps against. Candidate collection holds
//! the library lock only to snapshot the document list; per-document locks
//! are taken briefly per victim.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{debug, trace};
use vellum_primitives::ChillLevel;

use super::LibShared;

pub(crate) fn spawn(shared: Arc<LibShared>, interval: Duration) -> std::thread::JoinHandle<()> {
	std::thread::Builder::new()
		.name("vellum-maintenance".to_string())
		.spawn(move || {
			debug!(?interval, "maintenance started");
			loop {
				std::thread::park_timeout(interval);
				if shared.shutdown.load(Ordering::Relaxed) {
					break;
				}
				let report = shared.chill_run(
					ChillLevel::UnusedData,
					shared.options.chill_budget,
					Some(shared.options.memory_soft_limit),
				);
				// Advancing the clock here makes "not accessed since the
				// previous tick" hold for leaves that were never read at
				// all.
				let now = shared.clock.fetch_add(1, Ordering::Relaxed) + 1;
				shared.last_tick.store(now, Ordering::Relaxed);
				trace!(moved = report.moved, freed = report.bytes_freed, "maintenance tick");
			}
			debug!("maintenance stopped");
		})
		.expect("failed to spawn maintenance thread")
}
