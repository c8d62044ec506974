//! Document - an editable, versioned buffer.
//!
//! # Purpose
//!
//! - Owns: the node registry, the fork table and revision index, the cursor
//!   set, the decoration cache, and the source-tracking state of its
//!   backing file.
//! - Exposes: reads and address conversion, cursor-routed mutation, the
//!   decoration API, history navigation, transactions, and the storage
//!   lifecycle hooks the library drives.
//!
//! A [`Document`] is a cheap cloneable handle; all state sits behind one
//! reader-writer lock. Read operations take the read lock and are lock-free
//! at the snapshot level once a root reference is obtained; mutations and
//! navigation take the write lock and publish a new revision before
//! releasing it.

use std::ops::Range;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::trace;
use vellum_primitives::{
	Address, ChangeHandler, Coordinates, CursorMode, Error, ForkId, LoadingStyle, ReadyThreshold,
	Result, StorageState, TextMetrics, TrustLevel, Version,
};

use crate::cursor::{CursorId, CursorState};
use crate::decoration::DecorationCache;
use crate::fs::{FileHandle, FileSystem};
use crate::history::{ForkInfo, ForkTable, RevisionIndex, Transaction};
use crate::library::LibShared;
use crate::rope::{NodeId, Registry, TreeRead, needs_rebalance};
use crate::storage::ColdStorage;
use crate::storage::trust::SourceTracking;

mod io;
pub(crate) mod loader;
mod mutation;
mod navigate;
mod query;
mod source;
#[cfg(test)]
mod tests;

pub(crate) use io::DocIo;

/// Counter for generating unique document IDs.
static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a document within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(pub u64);

impl DocumentId {
	/// Generates a new unique document ID.
	pub(crate) fn next() -> Self {
		Self(NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed))
	}
}

/// Hash identity of the backing file's final span, recorded whenever the
/// file is read in a trusted state (open, append absorption, reload).
/// Unlike the tree, this survives arbitrary local edits.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TailRecord {
	pub offset: u64,
	pub len: usize,
	pub hash: u64,
}

/// Backing-file state of a path-sourced document.
#[derive(Debug)]
pub(crate) struct SourceState {
	pub path: PathBuf,
	/// Read handle kept open for warm fetches and tail reads.
	pub handle: FileHandle,
	pub tracking: SourceTracking,
	/// Tree position where the recorded file content currently ends.
	/// Slides with local edits like any other anchored position.
	pub eof_byte: usize,
	/// The file's tail span as last read; verification basis when local
	/// edits have rebuilt the leaf straddling the recorded end of file.
	pub tail: Option<TailRecord>,
}

/// Progress of a lazily loaded document.
#[derive(Debug, Default)]
pub(crate) struct LoadState {
	pub complete: bool,
}

pub(crate) struct DocumentInner {
	pub registry: Registry,
	pub forks: ForkTable,
	pub revisions: RevisionIndex,
	pub dedup: FxHashMap<(NodeId, NodeId), NodeId>,
	/// The one current (fork, revision).
	pub current: Version,
	/// Root node at the effective version (includes pending transaction
	/// state).
	pub root: NodeId,
	/// Aggregates of the effective root. Always equal to the root
	/// snapshot's metrics.
	pub totals: TextMetrics,
	pub cursors: FxHashMap<CursorId, CursorState>,
	pub next_cursor: u64,
	pub txn: Option<Transaction>,
	pub source: Option<SourceState>,
	pub load: LoadState,
	pub append_policy: vellum_primitives::AppendPolicy,
	pub read_ahead: ReadyThreshold,
}

impl DocumentInner {
	/// The version reads and writes resolve against: the pending revision
	/// while a transaction is active, the current version otherwise.
	pub fn read_at(&self) -> Version {
		match &self.txn {
			Some(txn) => Version::new(self.current.fork, txn.pending),
			None => self.current,
		}
	}

	pub fn cursor(&self, id: CursorId) -> Result<&CursorState> {
		self.cursors.get(&id).ok_or(Error::CursorNotFound)
	}

	pub fn cursor_mut(&mut self, id: CursorId) -> Result<&mut CursorState> {
		self.cursors.get_mut(&id).ok_or(Error::CursorNotFound)
	}
}

pub(crate) struct DocShared {
	pub id: DocumentId,
	/// Cold-storage folder name, document-unique.
	pub folder: String,
	pub inner: RwLock<DocumentInner>,
	/// Decoration lookup hints; guarded separately so read operations can
	/// repair them.
	pub cache: Mutex<DecorationCache>,
	pub fs: Arc<dyn FileSystem>,
	pub cold: Option<Arc<dyn ColdStorage>>,
	pub loading_style: LoadingStyle,
	pub change_handler: Option<ChangeHandler>,
	/// Serializes seek+read pairs on the shared backing-file handle.
	pub file_lock: Mutex<()>,
	/// Library-wide access clock for LRU ordering.
	pub clock: Arc<AtomicU64>,
	/// Library-wide resident-byte gauge.
	pub resident: Arc<AtomicUsize>,
	/// Library-wide memory-pressure flag.
	pub pressure: Arc<AtomicBool>,
	pub hard_limit: usize,
	pub max_leaf: usize,
	pub grace_window: usize,
	pub rebalance_budget: usize,
	pub shutdown: AtomicBool,
	pub watcher: Mutex<Option<std::thread::JoinHandle<()>>>,
	pub loader: Mutex<Option<std::thread::JoinHandle<()>>>,
	/// Owning library, for cross-document hard-limit eviction.
	pub library: Weak<LibShared>,
}

/// Handle to an open document.
#[derive(Clone)]
pub struct Document {
	pub(crate) shared: Arc<DocShared>,
}

impl Document {
	pub fn id(&self) -> DocumentId {
		self.shared.id
	}

	/// The document's cold-storage folder name.
	pub fn folder(&self) -> &str {
		&self.shared.folder
	}

	/// Total bytes, code points, and newlines at the effective version.
	pub fn totals(&self) -> TextMetrics {
		self.shared.inner.read().totals
	}

	/// The current (fork, revision).
	pub fn current_version(&self) -> Version {
		self.shared.inner.read().current
	}

	/// Every fork ever created, with its branch point and highest revision.
	pub fn list_forks(&self) -> Vec<(ForkId, ForkInfo)> {
		self.shared.inner.read().forks.list()
	}

	/// Whether a transaction is active.
	pub fn in_transaction(&self) -> bool {
		self.shared.inner.read().txn.is_some()
	}

	/// The configured read-ahead threshold for lazy loading.
	pub fn read_ahead(&self) -> ReadyThreshold {
		self.shared.inner.read().read_ahead
	}

	/// Bytes of `range` at the effective version.
	pub fn read(&self, range: Range<usize>) -> Result<Vec<u8>> {
		let inner = self.shared.inner.read();
		let io = DocIo::new(&self.shared, &inner);
		inner.tree(&io).read_range(inner.root, range)
	}

	/// UTF-8 text of `range` at the effective version.
	pub fn read_to_string(&self, range: Range<usize>) -> Result<String> {
		let bytes = self.read(range)?;
		String::from_utf8(bytes)
			.map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
	}

	/// Full coordinates of the position named by `addr`.
	pub fn convert(&self, addr: Address) -> Result<Coordinates> {
		let inner = self.shared.inner.read();
		let io = DocIo::new(&self.shared, &inner);
		let tree = inner.tree(&io);
		let byte = tree.resolve_address(inner.root, addr)?;
		tree.coords_of_byte(inner.root, byte)
	}

	/// Where the leaf holding `byte` physically keeps its payload.
	pub fn storage_state_at(&self, byte: usize) -> Result<StorageState> {
		let inner = self.shared.inner.read();
		let io = DocIo::new(&self.shared, &inner);
		let hit = inner.tree(&io).leaf_at_byte(inner.root, byte)?;
		Ok(hit.snap.as_leaf().expect("descent ends at a leaf").storage_state())
	}

	/// Trust level of the leaf holding `byte`.
	pub fn trust_at(&self, byte: usize) -> Result<TrustLevel> {
		let inner = self.shared.inner.read();
		let io = DocIo::new(&self.shared, &inner);
		let hit = inner.tree(&io).leaf_at_byte(inner.root, byte)?;
		let leaf = hit.snap.as_leaf().expect("descent ends at a leaf");
		Ok(match &inner.source {
			Some(src) => src.tracking.leaf_trust(leaf),
			None => TrustLevel::Full,
		})
	}

	/// Whether any node's children differ in height by more than two.
	pub fn needs_rebalance(&self) -> bool {
		let inner = self.shared.inner.read();
		let io = DocIo::new(&self.shared, &inner);
		needs_rebalance(&inner.tree(&io), inner.root)
	}

	/// Fails with `MemoryPressure` when the library is over its hard limit
	/// and chilling could not reduce it. Callers check this before
	/// memory-intensive operations.
	pub fn check_memory_pressure(&self) -> Result<()> {
		if self.shared.pressure.load(Ordering::Relaxed) {
			Err(Error::MemoryPressure)
		} else {
			Ok(())
		}
	}

	// --- cursors ---

	/// Creates a cursor at position 0.
	pub fn create_cursor(&self, mode: CursorMode) -> Result<CursorId> {
		let mut inner = self.shared.inner.write();
		let id = CursorId(inner.next_cursor);
		inner.next_cursor += 1;
		let at = inner.read_at();
		let cursor = CursorState::new(mode, at, inner.position_ready(0));
		inner.cursors.insert(id, cursor);
		trace!(doc = self.shared.id.0, cursor = id.0, "cursor created");
		Ok(id)
	}

	/// Detaches a cursor. Subsequent operations on it fail with
	/// `CursorNotFound`.
	pub fn remove_cursor(&self, id: CursorId) -> Result<()> {
		let mut inner = self.shared.inner.write();
		inner.cursors.remove(&id).ok_or(Error::CursorNotFound)?;
		trace!(doc = self.shared.id.0, cursor = id.0, "cursor removed");
		Ok(())
	}

	/// The cursor's current coordinates.
	pub fn cursor_position(&self, id: CursorId) -> Result<Coordinates> {
		Ok(self.shared.inner.read().cursor(id)?.coords)
	}

	/// The cursor's mode.
	pub fn cursor_mode(&self, id: CursorId) -> Result<CursorMode> {
		Ok(self.shared.inner.read().cursor(id)?.mode)
	}

	/// Moves a cursor to `addr`, returning its new coordinates.
	///
	/// While a lazy load is still running, a byte address past the loaded
	/// extent parks the cursor not-ready until the loader reaches it.
	pub fn seek_cursor(&self, id: CursorId, addr: Address) -> Result<Coordinates> {
		let mut inner = self.shared.inner.write();
		inner.cursor(id)?;
		let at = inner.read_at();

		if !inner.load.complete
			&& let Address::Byte(byte) = addr
			&& byte > inner.totals.bytes
		{
			let cursor = inner.cursor_mut(id)?;
			cursor.pending = Some(byte);
			cursor.coords = Coordinates {
				byte,
				..Coordinates::ZERO
			};
			cursor.ready.set(false);
			return Ok(cursor.coords);
		}

		let coords = {
			let io = DocIo::new(&self.shared, &inner);
			let tree = inner.tree(&io);
			let byte = tree.resolve_address(inner.root, addr)?;
			tree.coords_of_byte(inner.root, byte)?
		};
		let ready = inner.position_ready(coords.byte);
		let cursor = inner.cursor_mut(id)?;
		cursor.coords = coords;
		cursor.pending = None;
		cursor.remember(at);
		cursor.ready.set(ready);
		Ok(coords)
	}

	/// Blocks until the cursor's position is loaded.
	pub fn wait_ready(&self, id: CursorId) -> Result<()> {
		let gate = self.shared.inner.read().cursor(id)?.ready.clone();
		gate.wait();
		Ok(())
	}

	/// Bounded wait for readiness: zero probes (`NotReady`), positive
	/// bounds (`Timeout`). For an unbounded wait use [`wait_ready`].
	///
	/// [`wait_ready`]: Self::wait_ready
	pub fn wait_ready_timeout(&self, id: CursorId, timeout: Duration) -> Result<()> {
		let gate = self.shared.inner.read().cursor(id)?.ready.clone();
		gate.wait_timeout(timeout)
	}

	// --- lifecycle plumbing ---

	pub(crate) fn is_shut_down(&self) -> bool {
		self.shared.shutdown.load(Ordering::Relaxed)
	}

	/// Stops background threads and waits for them.
	pub(crate) fn shut_down(&self) {
		self.shared.shutdown.store(true, Ordering::Relaxed);
		for slot in [&self.shared.watcher, &self.shared.loader] {
			if let Some(handle) = slot.lock().take() {
				handle.thread().unpark();
				let _ = handle.join();
			}
		}
	}
}

impl DocumentInner {
	/// Read view of the tree at the effective version.
	pub fn tree<'a>(&'a self, io: &'a DocIo<'a>) -> TreeRead<'a> {
		TreeRead {
			reg: &self.registry,
			forks: &self.forks,
			io,
			at: self.read_at(),
		}
	}

	/// Whether a byte position is within the loaded extent.
	pub fn position_ready(&self, byte: usize) -> bool {
		self.load.complete || byte <= self.totals.bytes
	}

	/// Re-evaluates every cursor's ready gate against the loaded extent,
	/// resolving parked seeks the loader has reached.
	pub fn refresh_ready(&mut self, shared: &DocShared) {
		let totals = self.totals;
		let complete = self.load.complete;
		let at = self.read_at();
		let mut resolved: Vec<(CursorId, usize)> = Vec::new();
		for (&id, cursor) in &mut self.cursors {
			match cursor.pending {
				Some(target) if complete || target <= totals.bytes => {
					resolved.push((id, target.min(totals.bytes)));
				}
				Some(_) => cursor.ready.set(false),
				None => cursor.ready.set(complete || cursor.coords.byte <= totals.bytes),
			}
		}
		for (id, byte) in resolved {
			let coords = {
				let io = DocIo::new(shared, self);
				self.tree(&io).coords_of_byte(self.root, byte)
			};
			if let Ok(coords) = coords
				&& let Some(cursor) = self.cursors.get_mut(&id)
			{
				cursor.coords = coords;
				cursor.pending = None;
				cursor.remember(at);
				cursor.ready.set(true);
			}
		}
	}
}
