//! Leaf snapshots and their tiered payload cell.
//!
//! A leaf snapshot's metrics, line-start table, and decoration list are
//! immutable once published. The payload itself lives in a small locked
//! cell so the storage lifecycle can move it between tiers without touching
//! the tree: chilling swaps the owned bytes for cold-storage coordinates,
//! thawing swaps them back. Warm leaves never own their bytes at all; they
//! record where in the backing file the bytes live.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use vellum_primitives::metrics::{self, LineStart};
use vellum_primitives::{StorageState, TextMetrics};

use crate::decoration::Decoration;

/// Where a leaf's payload currently is.
#[derive(Debug, Clone)]
pub(crate) enum LeafStore {
	/// Owned, in memory.
	Memory(Arc<[u8]>),
	/// In the backing file at the snapshot's `original_file_offset`.
	Warm,
	/// In the library's cold store under this block id.
	Cold { block: Arc<str> },
}

#[derive(Debug)]
pub(crate) struct LeafSnapshot {
	pub metrics: TextMetrics,
	/// Line starts relative to the leaf, first entry always (0, 0).
	pub line_starts: Vec<LineStart>,
	/// Sorted by offset, then key.
	pub decorations: Vec<Decoration>,
	/// Offset of this span in the backing file, for warm leaves.
	pub original_file_offset: Option<u64>,
	/// seahash of the payload.
	pub hash: Option<u64>,
	store: Mutex<LeafStore>,
	/// Clock stamp of the last payload access; 0 means never accessed.
	access: AtomicU64,
	/// Source-change counter value at the last warm verification.
	verified_at: AtomicU64,
}

impl LeafSnapshot {
	/// Builds a memory-resident leaf from `bytes`, scanning its metrics.
	/// `decorations` must already be leaf-relative and sorted.
	pub fn from_bytes(bytes: &[u8], decorations: Vec<Decoration>) -> Self {
		let (metrics, line_starts) = metrics::scan(bytes);
		Self {
			metrics,
			line_starts,
			decorations,
			original_file_offset: None,
			hash: Some(seahash::hash(bytes)),
			store: Mutex::new(LeafStore::Memory(Arc::from(bytes))),
			access: AtomicU64::new(0),
			verified_at: AtomicU64::new(0),
		}
	}

	/// Builds a warm leaf: metrics were scanned while streaming the backing
	/// file, but the payload stays on disk.
	pub fn warm(
		metrics: TextMetrics,
		line_starts: Vec<LineStart>,
		file_offset: u64,
		hash: u64,
	) -> Self {
		Self {
			metrics,
			line_starts,
			decorations: Vec::new(),
			original_file_offset: Some(file_offset),
			hash: Some(hash),
			store: Mutex::new(LeafStore::Warm),
			access: AtomicU64::new(0),
			verified_at: AtomicU64::new(0),
		}
	}

	/// New snapshot with the same payload and metrics but a different
	/// decoration list. A non-memory payload is first pulled into memory by
	/// the caller and passed here.
	pub fn with_decorations(&self, payload: Arc<[u8]>, decorations: Vec<Decoration>) -> Self {
		Self {
			metrics: self.metrics,
			line_starts: self.line_starts.clone(),
			decorations,
			original_file_offset: self.original_file_offset,
			hash: self.hash,
			store: Mutex::new(LeafStore::Memory(payload)),
			access: AtomicU64::new(self.access.load(Ordering::Relaxed)),
			verified_at: AtomicU64::new(self.verified_at.load(Ordering::Relaxed)),
		}
	}

	pub fn storage_state(&self) -> StorageState {
		match &*self.store.lock() {
			LeafStore::Memory(_) => StorageState::Memory,
			LeafStore::Warm => StorageState::Warm,
			LeafStore::Cold { .. } => StorageState::Cold,
		}
	}

	/// The payload, when memory-resident.
	pub fn payload_if_memory(&self) -> Option<Arc<[u8]>> {
		match &*self.store.lock() {
			LeafStore::Memory(bytes) => Some(bytes.clone()),
			_ => None,
		}
	}

	/// The cold block id, when chilled.
	pub fn cold_block(&self) -> Option<Arc<str>> {
		match &*self.store.lock() {
			LeafStore::Cold { block } => Some(block.clone()),
			_ => None,
		}
	}

	/// Nulls the payload, recording the cold block it moved to. Returns the
	/// bytes freed, or `None` if the leaf was not memory-resident.
	pub fn set_cold(&self, block: Arc<str>) -> Option<usize> {
		let mut store = self.store.lock();
		match &*store {
			LeafStore::Memory(bytes) => {
				let freed = bytes.len();
				*store = LeafStore::Cold { block };
				Some(freed)
			}
			_ => None,
		}
	}

	/// Reinstates a thawed payload.
	pub fn set_memory(&self, bytes: Arc<[u8]>) {
		*self.store.lock() = LeafStore::Memory(bytes);
	}

	/// Records a payload access for LRU ordering.
	pub fn touch(&self, stamp: u64) {
		self.access.store(stamp, Ordering::Relaxed);
	}

	pub fn access_stamp(&self) -> u64 {
		self.access.load(Ordering::Relaxed)
	}

	pub fn verified_at(&self) -> u64 {
		self.verified_at.load(Ordering::Relaxed)
	}

	pub fn mark_verified(&self, counter: u64) {
		self.verified_at.store(counter, Ordering::Relaxed);
	}
}
