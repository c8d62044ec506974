//! Tree reads and structural mutation.
//!
//! All mutation funnels through [`TreeOps::splice`]: replace the byte range
//! `[a, b)` with new bytes. Insertion is a splice with an empty range,
//! deletion a splice with empty replacement, and a region dissolve is both
//! at once. The splice rebuilds only the path from affected leaves to the
//! root; untouched subtrees are shared by id into the new version.
//!
//! Decoration sliding happens here because it is defined by the splice:
//! markers before the range stay, markers inside a deleted range come out,
//! markers at the boundary follow the `insert_before` anchor rule, and
//! markers after the range slide by the length delta.

use std::ops::Range;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::trace;
use vellum_primitives::metrics;
use vellum_primitives::{Address, Coordinates, Error, Result, TextMetrics, Version};

use crate::decoration::{Decoration, RemovedDecoration, sort_decorations, splice_decorations};
use crate::history::ForkTable;
use crate::rope::{LeafSnapshot, NodeId, PayloadFetch, Registry, Snapshot};

/// Read-only view of one version of a tree.
pub(crate) struct TreeRead<'a> {
	pub reg: &'a Registry,
	pub forks: &'a ForkTable,
	pub io: &'a dyn PayloadFetch,
	pub at: Version,
}

/// The leaf containing a byte position.
pub(crate) struct LeafHit {
	pub id: NodeId,
	pub snap: Arc<Snapshot>,
	/// Absolute byte offset of the leaf's first byte.
	pub start: usize,
	/// Position within the leaf.
	pub local: usize,
	/// Metrics of everything before the leaf.
	pub prefix: TextMetrics,
}

impl<'a> TreeRead<'a> {
	pub(crate) fn resolve(&self, id: NodeId) -> Arc<Snapshot> {
		self.reg.snapshot_at(self.forks, id, self.at)
	}

	pub fn metrics(&self, root: NodeId) -> TextMetrics {
		self.resolve(root).metrics()
	}

	/// Descends to the leaf containing `byte`. A position on a leaf
	/// boundary resolves to the right leaf; the document end resolves to
	/// the last leaf.
	pub fn leaf_at_byte(&self, root: NodeId, byte: usize) -> Result<LeafHit> {
		let mut snap = self.resolve(root);
		if byte > snap.metrics().bytes {
			return Err(Error::InvalidPosition);
		}
		let mut id = root;
		let mut prefix = TextMetrics::ZERO;
		loop {
			match &*snap {
				Snapshot::Internal(node) => {
					let left = self.resolve(node.left);
					let lm = left.metrics();
					if byte < prefix.bytes + lm.bytes {
						id = node.left;
						snap = left;
					} else {
						prefix += lm;
						id = node.right;
						snap = self.resolve(node.right);
					}
				}
				Snapshot::Leaf(_) => {
					let local = byte - prefix.bytes;
					return Ok(LeafHit {
						id,
						snap,
						start: prefix.bytes,
						local,
						prefix,
					});
				}
			}
		}
	}

	/// Bytes of `range`, assembled across leaves.
	pub fn read_range(&self, root: NodeId, range: Range<usize>) -> Result<Vec<u8>> {
		let total = self.metrics(root).bytes;
		if range.start > range.end || range.end > total {
			return Err(Error::InvalidPosition);
		}
		let mut out = Vec::with_capacity(range.end - range.start);
		self.read_rec(root, 0, &range, &mut out)?;
		Ok(out)
	}

	fn read_rec(&self, id: NodeId, start: usize, range: &Range<usize>, out: &mut Vec<u8>) -> Result<()> {
		let snap = self.resolve(id);
		let end = start + snap.metrics().bytes;
		if range.end <= start || range.start >= end {
			return Ok(());
		}
		match &*snap {
			Snapshot::Internal(node) => {
				let mid = start + self.resolve(node.left).metrics().bytes;
				self.read_rec(node.left, start, range, out)?;
				self.read_rec(node.right, mid, range, out)?;
			}
			Snapshot::Leaf(leaf) => {
				let payload = self.io.fetch(leaf)?;
				let lo = range.start.max(start) - start;
				let hi = range.end.min(end) - start;
				out.extend_from_slice(&payload[lo..hi]);
			}
		}
		Ok(())
	}

	/// Code-point offset and line number of a byte position.
	pub fn chars_line_at_byte(&self, root: NodeId, byte: usize) -> Result<(usize, usize)> {
		let hit = self.leaf_at_byte(root, byte)?;
		let leaf = hit.snap.as_leaf().expect("descent ends at a leaf");
		let local_chars = if hit.local == 0 {
			0
		} else if hit.local == leaf.metrics.bytes {
			leaf.metrics.chars
		} else {
			let payload = self.io.fetch(leaf)?;
			metrics::count_chars(&payload[..hit.local])
		};
		let line_in_leaf = leaf
			.line_starts
			.partition_point(|ls| ls.byte <= hit.local)
			- 1;
		Ok((
			hit.prefix.chars + local_chars,
			hit.prefix.newlines + line_in_leaf,
		))
	}

	/// Absolute byte offset of the start of `line`.
	pub fn line_start_byte(&self, root: NodeId, line: usize) -> Result<usize> {
		let mut snap = self.resolve(root);
		if line > snap.metrics().newlines {
			return Err(Error::InvalidPosition);
		}
		let mut n = line;
		let mut prefix_bytes = 0usize;
		loop {
			match &*snap {
				Snapshot::Internal(node) => {
					let left = self.resolve(node.left);
					let lm = left.metrics();
					if n <= lm.newlines {
						snap = left;
					} else {
						n -= lm.newlines;
						prefix_bytes += lm.bytes;
						snap = self.resolve(node.right);
					}
				}
				Snapshot::Leaf(leaf) => {
					return Ok(prefix_bytes + leaf.line_starts[n].byte);
				}
			}
		}
	}

	/// Byte offset of the `chars`-th code point.
	pub fn byte_of_char(&self, root: NodeId, chars: usize) -> Result<usize> {
		let mut snap = self.resolve(root);
		if chars > snap.metrics().chars {
			return Err(Error::InvalidPosition);
		}
		let mut n = chars;
		let mut prefix_bytes = 0usize;
		loop {
			match &*snap {
				Snapshot::Internal(node) => {
					let left = self.resolve(node.left);
					let lm = left.metrics();
					if n < lm.chars {
						snap = left;
					} else {
						n -= lm.chars;
						prefix_bytes += lm.bytes;
						snap = self.resolve(node.right);
					}
				}
				Snapshot::Leaf(leaf) => {
					if n == 0 {
						return Ok(prefix_bytes);
					}
					if n == leaf.metrics.chars {
						return Ok(prefix_bytes + leaf.metrics.bytes);
					}
					let payload = self.io.fetch(leaf)?;
					let local = metrics::char_to_byte(&payload, n).ok_or(Error::InvalidPosition)?;
					return Ok(prefix_bytes + local);
				}
			}
		}
	}

	/// Byte offset of code point `chars` within `line`.
	pub fn byte_of_line_char(&self, root: NodeId, line: usize, chars: usize) -> Result<usize> {
		let total = self.metrics(root);
		let line_start = self.line_start_byte(root, line)?;
		let (start_chars, _) = self.chars_line_at_byte(root, line_start)?;
		let target = start_chars + chars;
		if target > total.chars {
			return Err(Error::InvalidPosition);
		}
		let byte = self.byte_of_char(root, target)?;
		let line_end = if line < total.newlines {
			self.line_start_byte(root, line + 1)?
		} else {
			total.bytes
		};
		if byte > line_end {
			return Err(Error::InvalidPosition);
		}
		Ok(byte)
	}

	/// Byte position named by `addr`.
	pub fn resolve_address(&self, root: NodeId, addr: Address) -> Result<usize> {
		match addr {
			Address::Byte(byte) => {
				if byte > self.metrics(root).bytes {
					return Err(Error::InvalidPosition);
				}
				Ok(byte)
			}
			Address::Char(chars) => self.byte_of_char(root, chars),
			Address::LineChar { line, chars } => self.byte_of_line_char(root, line, chars),
		}
	}

	/// All four coordinates of a byte position.
	pub fn coords_of_byte(&self, root: NodeId, byte: usize) -> Result<Coordinates> {
		let (chars, line) = self.chars_line_at_byte(root, byte)?;
		let line_start = self.line_start_byte(root, line)?;
		let (start_chars, _) = self.chars_line_at_byte(root, line_start)?;
		Ok(Coordinates {
			byte,
			chars,
			line,
			line_chars: chars - start_chars,
		})
	}

	/// In-order list of `(id, snapshot, absolute start)` for every leaf.
	pub fn leaves(&self, root: NodeId) -> Vec<(NodeId, Arc<Snapshot>, usize)> {
		let mut out = Vec::new();
		self.leaves_rec(root, 0, &mut out);
		out
	}

	fn leaves_rec(&self, id: NodeId, start: usize, out: &mut Vec<(NodeId, Arc<Snapshot>, usize)>) {
		let snap = self.resolve(id);
		match &*snap {
			Snapshot::Internal(node) => {
				let mid = start + self.resolve(node.left).metrics().bytes;
				self.leaves_rec(node.left, start, out);
				self.leaves_rec(node.right, mid, out);
			}
			Snapshot::Leaf(_) => out.push((id, snap, start)),
		}
	}

	/// Locates a decoration by key with a full traversal.
	pub fn find_decoration(&self, root: NodeId, key: &str) -> Option<(NodeId, usize, usize)> {
		self.find_decoration_rec(root, 0, key)
	}

	/// In-order search for the leaf with a known id. Used when a position
	/// alone cannot name the leaf (boundary-attached decorations).
	pub fn leaf_hit_by_id(&self, root: NodeId, target: NodeId) -> Option<LeafHit> {
		self.leaf_hit_by_id_rec(root, TextMetrics::ZERO, target)
	}

	fn leaf_hit_by_id_rec(
		&self,
		id: NodeId,
		prefix: TextMetrics,
		target: NodeId,
	) -> Option<LeafHit> {
		let snap = self.resolve(id);
		match &*snap {
			Snapshot::Internal(node) => {
				let lm = self.resolve(node.left).metrics();
				self.leaf_hit_by_id_rec(node.left, prefix, target)
					.or_else(|| self.leaf_hit_by_id_rec(node.right, prefix + lm, target))
			}
			Snapshot::Leaf(_) if id == target => Some(LeafHit {
				id,
				snap,
				start: prefix.bytes,
				local: 0,
				prefix,
			}),
			Snapshot::Leaf(_) => None,
		}
	}

	fn find_decoration_rec(&self, id: NodeId, start: usize, key: &str) -> Option<(NodeId, usize, usize)> {
		let snap = self.resolve(id);
		match &*snap {
			Snapshot::Internal(node) => {
				let mid = start + self.resolve(node.left).metrics().bytes;
				self.find_decoration_rec(node.left, start, key)
					.or_else(|| self.find_decoration_rec(node.right, mid, key))
			}
			Snapshot::Leaf(leaf) => leaf
				.decorations
				.iter()
				.find(|d| d.key.as_ref() == key)
				.map(|d| (id, d.offset, start + d.offset)),
		}
	}

	/// All decorations whose absolute position is in `range`, in document
	/// order.
	pub fn decorations_in_range(&self, root: NodeId, range: Range<usize>) -> Vec<(Arc<str>, usize)> {
		let mut out = Vec::new();
		self.decorations_rec(root, 0, &range, &mut out);
		out
	}

	fn decorations_rec(
		&self,
		id: NodeId,
		start: usize,
		range: &Range<usize>,
		out: &mut Vec<(Arc<str>, usize)>,
	) {
		let snap = self.resolve(id);
		let end = start + snap.metrics().bytes;
		// A boundary decoration can sit at offset == len, so prune with a
		// closed upper bound.
		if end < range.start || start >= range.end {
			return;
		}
		match &*snap {
			Snapshot::Internal(node) => {
				let mid = start + self.resolve(node.left).metrics().bytes;
				self.decorations_rec(node.left, start, range, out);
				self.decorations_rec(node.right, mid, range, out);
			}
			Snapshot::Leaf(leaf) => {
				for d in &leaf.decorations {
					let abs = start + d.offset;
					if abs >= range.start && abs < range.end {
						out.push((d.key.clone(), abs));
					}
				}
			}
		}
	}
}

/// The affected span of a splice, with the boundary-inclusion rules that
/// make the `insert_before` anchor semantics come out right.
///
/// A marker at the splice position may be attached to the leaf ending there
/// (offset == leaf length) or the leaf starting there (offset 0). Selecting
/// the leaf on the side the anchor rule needs lets one local rule handle
/// both attachments: the other side's leaf is untouched and its markers
/// move (or hold still) purely through aggregate shifts.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Zone {
	/// Replace `[a, b)`, b > a. Includes the leaf ending at `a` so markers
	/// sitting exactly at `a` are collected; excludes the leaf starting at
	/// `b` so markers there slide by the length delta on their own.
	Delete { a: usize, b: usize },
	/// Insert at `a` anchoring markers before the new bytes: the leaf
	/// ending at `a` takes the insert.
	InsertBefore { a: usize },
	/// Insert at `a` keeping markers at `a` in place: the leaf starting at
	/// `a` takes the insert.
	InsertAfter { a: usize, total: usize },
}

impl Zone {
	fn touches(&self, s: usize, e: usize) -> bool {
		match *self {
			Zone::Delete { a, b } => e >= a && s < b,
			Zone::InsertBefore { a } => (s < a && e >= a) || (a == 0 && s == 0),
			Zone::InsertAfter { a, total } => {
				if a == total {
					e == total
				} else {
					s <= a && e > a
				}
			}
		}
	}

	fn start(&self) -> usize {
		match *self {
			Zone::Delete { a, .. } => a,
			Zone::InsertBefore { a } => a,
			Zone::InsertAfter { a, .. } => a,
		}
	}
}

/// Result of a splice.
pub(crate) struct SpliceOutcome {
	pub root: NodeId,
	/// Decorations removed from inside the deleted range, offsets relative
	/// to the range start.
	pub removed: Vec<RemovedDecoration>,
	/// Metrics of the deleted bytes.
	pub removed_metrics: TextMetrics,
	/// Metrics of the inserted bytes.
	pub inserted_metrics: TextMetrics,
}

/// Mutation context: reads the tree at `read_at`, publishes new snapshots
/// at `write_at`.
pub(crate) struct TreeOps<'a> {
	pub reg: &'a mut Registry,
	pub forks: &'a ForkTable,
	pub dedup: &'a mut FxHashMap<(NodeId, NodeId), NodeId>,
	pub io: &'a dyn PayloadFetch,
	pub read_at: Version,
	pub write_at: Version,
	pub max_leaf: usize,
	pub rebalance_budget: usize,
}

impl<'a> TreeOps<'a> {
	pub(crate) fn read(&self) -> TreeRead<'_> {
		TreeRead {
			reg: self.reg,
			forks: self.forks,
			io: self.io,
			at: self.read_at,
		}
	}

	pub(crate) fn resolve_new(&self, id: NodeId) -> Arc<Snapshot> {
		self.reg.snapshot_at(self.forks, id, self.write_at)
	}

	/// Builds a tree over `bytes`, chunked into leaves of at most
	/// `max_leaf` bytes. Used for initial loads.
	pub fn build_from_bytes(&mut self, bytes: &[u8]) -> NodeId {
		let cuts = chunk_cuts(bytes, self.max_leaf);
		let ids: Vec<NodeId> = cuts
			.windows(2)
			.map(|w| {
				self.reg.insert(
					self.write_at,
					Snapshot::Leaf(LeafSnapshot::from_bytes(&bytes[w[0]..w[1]], Vec::new())),
				)
			})
			.collect();
		self.build_balanced(&ids)
	}

	/// Builds a balanced tree over existing nodes.
	pub fn build_balanced(&mut self, ids: &[NodeId]) -> NodeId {
		match ids.len() {
			0 => self
				.reg
				.insert(self.write_at, Snapshot::Leaf(LeafSnapshot::from_bytes(&[], Vec::new()))),
			1 => ids[0],
			n => {
				let left = self.build_balanced(&ids[..n / 2]);
				let right = self.build_balanced(&ids[n / 2..]);
				self.concat(left, right)
			}
		}
	}

	/// Creates (or reuses) the internal node over `(left, right)`.
	///
	/// Reuse through the dedup table is sound because a node id is only
	/// republished with unchanged metrics (decoration updates, storage
	/// moves); identical children therefore imply identical aggregates.
	pub fn make_internal(&mut self, left: NodeId, right: NodeId) -> NodeId {
		if let Some(&id) = self.dedup.get(&(left, right))
			&& let Some(snap) = self.reg.try_snapshot_at(self.forks, id, self.write_at)
			&& let Some(node) = snap.as_internal()
			&& node.left == left
			&& node.right == right
		{
			return id;
		}
		let ls = self.resolve_new(left);
		let rs = self.resolve_new(right);
		let snap = Snapshot::Internal(super::InternalSnapshot {
			left,
			right,
			metrics: ls.metrics() + rs.metrics(),
			height: ls.height().max(rs.height()) + 1,
		});
		let id = self.reg.insert(self.write_at, snap);
		self.dedup.insert((left, right), id);
		id
	}

	/// Joins two subtrees. A pair of small memory-resident leaves merges
	/// into one leaf to limit fragmentation.
	pub fn concat(&mut self, left: NodeId, right: NodeId) -> NodeId {
		let ls = self.resolve_new(left);
		let rs = self.resolve_new(right);
		if let (Some(ll), Some(rl)) = (ls.as_leaf(), rs.as_leaf())
			&& ll.metrics.bytes + rl.metrics.bytes < self.max_leaf / 2
			&& let (Some(lp), Some(rp)) = (ll.payload_if_memory(), rl.payload_if_memory())
		{
			let mut bytes = Vec::with_capacity(lp.len() + rp.len());
			bytes.extend_from_slice(&lp);
			bytes.extend_from_slice(&rp);
			let mut decorations = ll.decorations.clone();
			decorations.extend(rl.decorations.iter().map(|d| Decoration {
				key: d.key.clone(),
				offset: d.offset + lp.len(),
			}));
			trace!(left = ?left, right = ?right, bytes = bytes.len(), "leaf merge");
			return self
				.reg
				.insert(self.write_at, Snapshot::Leaf(LeafSnapshot::from_bytes(&bytes, decorations)));
		}
		self.make_internal(left, right)
	}

	/// Replaces `range` with `insert`, sliding decorations and splitting
	/// oversized leaves. `insert_decs` are decorations for the inserted
	/// span, relative to its start (used by region dissolution).
	pub fn splice(
		&mut self,
		root: NodeId,
		range: Range<usize>,
		insert: &[u8],
		insert_before: bool,
		insert_decs: &[Decoration],
	) -> Result<SpliceOutcome> {
		let total = self.read().metrics(root).bytes;
		if range.start > range.end || range.end > total {
			return Err(Error::InvalidPosition);
		}
		let a = range.start;
		let b = range.end;
		let n = insert.len();
		let deleting = b > a;
		let zone = if deleting {
			Zone::Delete { a, b }
		} else if insert_before {
			Zone::InsertBefore { a }
		} else {
			Zone::InsertAfter { a, total }
		};

		let mut left: Vec<NodeId> = Vec::new();
		let mut mid: Vec<(Arc<Snapshot>, usize)> = Vec::new();
		let mut right: Vec<NodeId> = Vec::new();
		self.partition(root, 0, zone, &mut left, &mut mid, &mut right);
		debug_assert!(!mid.is_empty(), "splice zone selected no leaves");

		let mid_start = mid[0].1;
		let local_a = a - mid_start;

		// Fetch payloads only for the boundary leaves whose bytes partly
		// survive; a leaf wholly inside the deleted range contributes its
		// pre-computed metrics and decorations without being thawed.
		let mut removed_metrics = TextMetrics::ZERO;
		let mut prefix_bytes: Vec<u8> = Vec::new();
		let mut suffix_bytes: Vec<u8> = Vec::new();
		let mut abs_decs: Vec<(Arc<str>, usize)> = Vec::new();
		for (snap, start) in &mid {
			let leaf = snap.as_leaf().expect("partition collects only leaves");
			for d in &leaf.decorations {
				abs_decs.push((d.key.clone(), start + d.offset));
			}
			let s = *start;
			let e = s + leaf.metrics.bytes;
			let ov_lo = a.max(s);
			let ov_hi = b.min(e);
			if deleting && ov_lo == s && ov_hi == e {
				removed_metrics += leaf.metrics;
				continue;
			}
			let payload = self.io.fetch(leaf)?;
			if a > s {
				prefix_bytes.extend_from_slice(&payload[..a.min(e) - s]);
			}
			if e > b {
				suffix_bytes.extend_from_slice(&payload[b.max(s) - s..]);
			}
			if deleting && ov_hi > ov_lo {
				removed_metrics += metrics::scan(&payload[ov_lo - s..ov_hi - s]).0;
			}
		}
		let inserted_metrics = metrics::scan(insert).0;

		let mut new_bytes = Vec::with_capacity(prefix_bytes.len() + n + suffix_bytes.len());
		new_bytes.extend_from_slice(&prefix_bytes);
		new_bytes.extend_from_slice(insert);
		new_bytes.extend_from_slice(&suffix_bytes);

		let (kept_abs, removed) = splice_decorations(
			abs_decs.into_iter().map(|(key, pos)| Decoration { key, offset: pos }),
			a,
			b,
			n,
			insert_before,
		);
		let mut kept: Vec<Decoration> = kept_abs
			.into_iter()
			.map(|d| Decoration {
				key: d.key,
				offset: d.offset - mid_start,
			})
			.collect();
		for d in insert_decs {
			kept.push(Decoration {
				key: d.key.clone(),
				offset: local_a + d.offset,
			});
		}
		sort_decorations(&mut kept);

		let mid_ids = self.build_leaves(&new_bytes, kept, left.is_empty() && right.is_empty());

		let mut seq = left;
		seq.extend(mid_ids);
		seq.extend(right);
		let mut root = match seq.split_first() {
			None => self
				.reg
				.insert(self.write_at, Snapshot::Leaf(LeafSnapshot::from_bytes(&[], Vec::new()))),
			Some((&first, rest)) => {
				let mut acc = first;
				for &id in rest {
					acc = self.concat(acc, id);
				}
				acc
			}
		};
		let mut budget = self.rebalance_budget;
		root = self.rebalance_path(root, a, &mut budget);

		trace!(
			at = %self.write_at,
			range = ?(a..b),
			inserted = n,
			removed_decorations = removed.len(),
			"splice"
		);
		Ok(SpliceOutcome {
			root,
			removed,
			removed_metrics,
			inserted_metrics,
		})
	}

	/// In-order walk splitting the tree into untouched prefix subtrees, the
	/// affected leaves, and untouched suffix subtrees. Side assignment goes
	/// by traversal order, not position: a zero-width leaf sitting exactly
	/// on the splice point must stay on whichever side of the affected
	/// leaves it occupies in document order, which also gives its
	/// decorations the correct anchor behavior.
	fn partition(
		&self,
		id: NodeId,
		start: usize,
		zone: Zone,
		left: &mut Vec<NodeId>,
		mid: &mut Vec<(Arc<Snapshot>, usize)>,
		right: &mut Vec<NodeId>,
	) {
		let snap = self.read().resolve(id);
		let end = start + snap.metrics().bytes;
		if !zone.touches(start, end) {
			if mid.is_empty() {
				left.push(id);
			} else {
				right.push(id);
			}
			return;
		}
		match &*snap {
			Snapshot::Internal(node) => {
				let mid_pos = start + self.read().resolve(node.left).metrics().bytes;
				self.partition(node.left, start, zone, left, mid, right);
				self.partition(node.right, mid_pos, zone, left, mid, right);
			}
			Snapshot::Leaf(_) => mid.push((snap, start)),
		}
	}

	/// Builds replacement leaves for spliced content. An empty result with
	/// surviving decorations keeps a single empty leaf to carry them; an
	/// empty result for an empty document keeps one empty leaf as root.
	fn build_leaves(&mut self, bytes: &[u8], decorations: Vec<Decoration>, whole_doc: bool) -> Vec<NodeId> {
		if bytes.is_empty() {
			if decorations.is_empty() && !whole_doc {
				return Vec::new();
			}
			return vec![
				self.reg
					.insert(self.write_at, Snapshot::Leaf(LeafSnapshot::from_bytes(&[], decorations))),
			];
		}
		let cuts = chunk_cuts(bytes, self.max_leaf);
		let mut out = Vec::with_capacity(cuts.len() - 1);
		let mut decs = decorations.into_iter().peekable();
		for (i, w) in cuts.windows(2).enumerate() {
			let (cs, ce) = (w[0], w[1]);
			let last = ce == bytes.len();
			let mut leaf_decs: SmallVec<[Decoration; 4]> = SmallVec::new();
			// A decoration on a chunk boundary attaches to the left chunk
			// (offset == length); the first chunk also takes offset 0.
			while let Some(d) = decs.peek() {
				let take = if last {
					true
				} else if i == 0 {
					d.offset <= ce
				} else {
					d.offset > cs && d.offset <= ce
				};
				if !take {
					break;
				}
				let d = decs.next().expect("peeked");
				leaf_decs.push(Decoration {
					key: d.key,
					offset: d.offset - cs,
				});
			}
			out.push(self.reg.insert(
				self.write_at,
				Snapshot::Leaf(LeafSnapshot::from_bytes(&bytes[cs..ce], leaf_decs.into_vec())),
			));
		}
		out
	}

	/// Republishes a leaf under its existing id with a new decoration list.
	/// The payload must already be in memory (callers thaw first).
	pub fn update_leaf_decorations(
		&mut self,
		id: NodeId,
		leaf: &LeafSnapshot,
		payload: Arc<[u8]>,
		mut decorations: Vec<Decoration>,
	) {
		sort_decorations(&mut decorations);
		let snap = leaf.with_decorations(payload, decorations);
		self.reg.republish(id, self.write_at, Snapshot::Leaf(snap));
	}

}

/// Cut points splitting `bytes` into chunks of at most `max` bytes, each
/// ending on a code-point boundary.
fn chunk_cuts(bytes: &[u8], max: usize) -> Vec<usize> {
	if bytes.len() <= max {
		return vec![0, bytes.len()];
	}
	let pieces = bytes.len().div_ceil(max);
	let target = bytes.len().div_ceil(pieces);
	let mut cuts = vec![0];
	let mut s = 0;
	while bytes.len() - s > max {
		let mut e = metrics::floor_char_boundary(bytes, s + target);
		if e <= s {
			e = s + 1;
			while e < bytes.len() && !metrics::is_char_boundary(bytes[e]) {
				e += 1;
			}
		}
		cuts.push(e);
		s = e;
	}
	cuts.push(bytes.len());
	cuts
}
