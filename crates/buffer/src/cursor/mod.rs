//! Cursors: multi-coordinate positions that ride along with edits.
//!
//! A cursor carries all four coordinates of its position (byte, code point,
//! line, code point within line) and keeps them consistent on every move.
//! It remembers where it was at each (fork, revision) it has observed, so
//! history navigation can put it back; versions it never saw clamp it to
//! the document bounds instead.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use tracing::trace;
use vellum_primitives::{Coordinates, CursorMode, Error, Result, Version};

mod region;

pub(crate) use region::Region;

/// Identifier of a cursor within its document.
///
/// Handed to callers as a stable token; removing the cursor detaches it and
/// later operations fail with `CursorNotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorId(pub u64);

/// The ready flag of one cursor: a mutex-protected bool with broadcast on
/// signal. Lazily loaded documents park readers here until the loader
/// reaches their position.
#[derive(Debug, Default)]
pub(crate) struct ReadyGate {
	ready: Mutex<bool>,
	cond: Condvar,
}

impl ReadyGate {
	pub fn new(ready: bool) -> Self {
		Self {
			ready: Mutex::new(ready),
			cond: Condvar::new(),
		}
	}

	pub fn is_ready(&self) -> bool {
		*self.ready.lock()
	}

	pub fn set(&self, ready: bool) {
		let mut guard = self.ready.lock();
		*guard = ready;
		if ready {
			self.cond.notify_all();
		}
	}

	/// Blocks until the gate is signaled ready.
	pub fn wait(&self) {
		let mut guard = self.ready.lock();
		while !*guard {
			self.cond.wait(&mut guard);
		}
	}

	/// Bounded wait. A zero timeout probes the flag and fails with
	/// `NotReady`; a positive timeout fails with `Timeout` when it runs
	/// out.
	pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
		let mut guard = self.ready.lock();
		if *guard {
			return Ok(());
		}
		if timeout.is_zero() {
			return Err(Error::NotReady);
		}
		let deadline = std::time::Instant::now() + timeout;
		while !*guard {
			if self.cond.wait_until(&mut guard, deadline).timed_out() {
				return if *guard { Ok(()) } else { Err(Error::Timeout) };
			}
		}
		Ok(())
	}
}

/// Document-side state of one cursor.
#[derive(Debug)]
pub(crate) struct CursorState {
	pub coords: Coordinates,
	pub mode: CursorMode,
	/// Sparse record of this cursor's position at versions it observed.
	pub history: FxHashMap<Version, Coordinates>,
	pub last_observed: Version,
	pub region: Option<Region>,
	pub ready: Arc<ReadyGate>,
	/// Byte target of a seek past the loaded extent, resolved by the
	/// loader.
	pub pending: Option<usize>,
}

impl CursorState {
	pub fn new(mode: CursorMode, at: Version, ready: bool) -> Self {
		let mut history = FxHashMap::default();
		history.insert(at, Coordinates::ZERO);
		Self {
			coords: Coordinates::ZERO,
			mode,
			history,
			last_observed: at,
			region: None,
			ready: Arc::new(ReadyGate::new(ready)),
			pending: None,
		}
	}

	/// Records the current coordinates against `at` and makes it the last
	/// observed version.
	pub fn remember(&mut self, at: Version) {
		self.history.insert(at, self.coords);
		self.last_observed = at;
	}

	/// Restores the recorded position for `at`, or clamps to `total_bytes`
	/// when this cursor never observed that version. Returns `true` when a
	/// recorded position was found.
	pub fn restore(&mut self, at: Version, total_bytes: usize) -> bool {
		match self.history.get(&at) {
			Some(&coords) => {
				self.coords = coords;
				self.last_observed = at;
				true
			}
			None => {
				trace!(at = %at, byte = self.coords.byte, "cursor clamp");
				self.coords.byte = self.coords.byte.min(total_bytes);
				self.last_observed = at;
				false
			}
		}
	}
}

/// New byte position of a cursor after `n` bytes are inserted at `point`.
///
/// A cursor exactly at the point advances when `insert_before` is false and
/// holds still otherwise.
pub(crate) fn adjust_byte_for_insert(byte: usize, point: usize, n: usize, insert_before: bool) -> usize {
	if byte > point || (byte == point && !insert_before) {
		byte + n
	} else {
		byte
	}
}

/// New byte position of a cursor after `[a, b)` is deleted: positions
/// inside the range collapse to its start.
pub(crate) fn adjust_byte_for_delete(byte: usize, a: usize, b: usize) -> usize {
	if byte <= a {
		byte
	} else if byte <= b {
		a
	} else {
		byte - (b - a)
	}
}
