//! Optimized edit regions.
//!
//! A region is a per-cursor scratch buffer for a bounded span of the
//! document. While it exists, the tree still holds the span's original
//! bytes; edits land in the region's buffer and only reach the tree when
//! the region dissolves, as a single revision. The grace window around the
//! content bounds decides how far an edit may stray before the region is
//! dissolved and recreated elsewhere.

use vellum_primitives::TextMetrics;

use crate::decoration::{Decoration, RemovedDecoration, splice_decorations};

#[derive(Debug)]
pub(crate) struct Region {
	/// Absolute position of the region's first byte. Edits inside the
	/// region never move it.
	pub tree_start: usize,
	/// Length of the original span still sitting in the tree.
	pub tree_len: usize,
	/// Working copy of the span's content.
	pub buffer: Vec<u8>,
	/// Decorations absorbed from the span, relative to the buffer start.
	pub decorations: Vec<Decoration>,
	/// Grace window in tree coordinates (end adjusts by the buffer delta
	/// for logical checks).
	pub grace_start: usize,
	pub grace_end: usize,
	/// Created while a transaction was active; rollback discards it.
	pub txn_owned: bool,
}

impl Region {
	pub fn new(
		tree_start: usize,
		bytes: Vec<u8>,
		decorations: Vec<Decoration>,
		grace_start: usize,
		grace_end: usize,
	) -> Self {
		Self {
			tree_start,
			tree_len: bytes.len(),
			buffer: bytes,
			decorations,
			grace_start,
			grace_end,
			txn_owned: false,
		}
	}

	/// How many bytes the buffer has grown (or shrunk) relative to the
	/// original span.
	pub fn delta(&self) -> isize {
		self.buffer.len() as isize - self.tree_len as isize
	}

	/// Logical position just past the region's content.
	pub fn logical_end(&self) -> usize {
		self.tree_start + self.buffer.len()
	}

	/// Whether a logical position falls within the region's content span
	/// (boundaries included).
	pub fn contains_logical(&self, pos: usize) -> bool {
		pos >= self.tree_start && pos <= self.logical_end()
	}

	/// Whether a logical position falls within the grace window.
	pub fn grace_contains_logical(&self, pos: usize) -> bool {
		let end = self.grace_end.saturating_add_signed(self.delta());
		pos >= self.grace_start && pos <= end
	}

	/// Splices the buffer: replaces local range `[a, b)` with `insert`,
	/// sliding region decorations by the shared rule. Returns decorations
	/// deleted by the edit.
	pub fn edit(
		&mut self,
		a: usize,
		b: usize,
		insert: &[u8],
		insert_before: bool,
	) -> Vec<RemovedDecoration> {
		debug_assert!(a <= b && b <= self.buffer.len());
		self.buffer.splice(a..b, insert.iter().copied());
		let decorations = std::mem::take(&mut self.decorations);
		let (kept, removed) = splice_decorations(decorations, a, b, insert.len(), insert_before);
		self.decorations = kept;
		removed
	}

	/// Absorbs `bytes` (and their decorations, relative to the extension
	/// start) from the tree to the right of the current span.
	pub fn extend_right(&mut self, bytes: &[u8], decorations: Vec<Decoration>) {
		let base = self.buffer.len();
		self.buffer.extend_from_slice(bytes);
		self.tree_len += bytes.len();
		self.decorations.extend(decorations.into_iter().map(|d| Decoration {
			key: d.key,
			offset: base + d.offset,
		}));
	}

	/// Absorbs `bytes` from the tree to the left of the current span.
	pub fn extend_left(&mut self, bytes: &[u8], decorations: Vec<Decoration>) {
		let shift = bytes.len();
		let mut buffer = bytes.to_vec();
		buffer.extend_from_slice(&self.buffer);
		self.buffer = buffer;
		self.tree_start -= shift;
		self.tree_len += shift;
		for d in &mut self.decorations {
			d.offset += shift;
		}
		self.decorations.extend(decorations);
	}

	/// Whether the buffer outgrew one leaf and should flush to the tree.
	pub fn needs_flush(&self, max_leaf: usize) -> bool {
		self.buffer.len() > max_leaf
	}

	/// Metrics of the current buffer content.
	pub fn metrics(&self) -> TextMetrics {
		vellum_primitives::metrics::scan(&self.buffer).0
	}
}
