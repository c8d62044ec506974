//! The mutation path.
//!
//! Every content change flows cursor -> mutation entry -> splice -> cursor
//! adjustment -> revision record. Human-mode cursors stage their edits in
//! an optimized region and only the region's dissolution reaches the tree;
//! process-mode cursors splice directly unless an explicit region covers
//! the edit.

use std::ops::Range;
use std::sync::Arc;

use tracing::{debug, trace};
use vellum_primitives::{Address, Coordinates, CursorMode, Error, Result, TextMetrics, Version};

use crate::cursor::{CursorId, Region, adjust_byte_for_delete, adjust_byte_for_insert};
use crate::decoration::{Decoration, RemovedDecoration, sort_decorations};
use crate::document::{DocIo, DocShared, Document, DocumentInner};
use crate::history::RevisionInfo;
use crate::rope::{LeafHit, PayloadFetch, SpliceOutcome, TreeOps, TreeRead};
use crate::storage::chill;

/// How a committed edit moves positions around it.
#[derive(Debug, Clone, Copy)]
pub(crate) enum EditKind {
	Insert {
		at: usize,
		n: usize,
		insert_before: bool,
	},
	Delete {
		a: usize,
		b: usize,
	},
	Replace {
		a: usize,
		b: usize,
		n: usize,
	},
}

impl EditKind {
	fn adjust(self, byte: usize) -> usize {
		match self {
			EditKind::Insert { at, n, insert_before } => {
				adjust_byte_for_insert(byte, at, n, insert_before)
			}
			EditKind::Delete { a, b } => adjust_byte_for_delete(byte, a, b),
			EditKind::Replace { a, b, n } => {
				adjust_byte_for_insert(adjust_byte_for_delete(byte, a, b), a, n, true)
			}
		}
	}

	/// Adjustment for boundary anchors that must never ride an insertion
	/// at their own position, such as the tracked end of the recorded file
	/// content: bytes typed exactly there are not file content.
	fn adjust_anchor(self, byte: usize) -> usize {
		match self {
			EditKind::Insert { at, n, .. } => adjust_byte_for_insert(byte, at, n, true),
			EditKind::Delete { a, b } => adjust_byte_for_delete(byte, a, b),
			EditKind::Replace { a, b, n } => {
				adjust_byte_for_insert(adjust_byte_for_delete(byte, a, b), a, n, true)
			}
		}
	}
}

impl Document {
	/// Inserts `bytes` at the cursor's position. `insert_before` picks the
	/// anchor side for markers and cursors sitting exactly there.
	pub fn insert(&self, id: CursorId, bytes: &[u8], insert_before: bool) -> Result<()> {
		if bytes.is_empty() {
			return Ok(());
		}
		let mut inner = self.shared.inner.write();
		self.route_edit(&mut inner, id, 0, bytes, insert_before)?;
		Ok(())
	}

	/// Deletes `n` bytes forward from the cursor's position, returning the
	/// decorations that were inside the deleted range.
	pub fn delete(&self, id: CursorId, n: usize) -> Result<Vec<RemovedDecoration>> {
		if n == 0 {
			return Ok(Vec::new());
		}
		let mut inner = self.shared.inner.write();
		self.route_edit(&mut inner, id, n, &[], false)
	}

	/// Dissolves every active region into the tree as one revision.
	/// Returns whether anything was dissolved.
	pub fn checkpoint(&self) -> Result<bool> {
		let mut inner = self.shared.inner.write();
		checkpoint_inner(&self.shared, &mut inner)
	}

	/// Creates (or replaces) the cursor's region over `bounds`. A previous
	/// region dissolves to the tree first.
	pub fn begin_region(&self, id: CursorId, bounds: Range<usize>) -> Result<()> {
		let mut inner = self.shared.inner.write();
		if bounds.start > bounds.end || bounds.end > inner.totals.bytes {
			return Err(Error::InvalidPosition);
		}
		inner.cursor(id)?;
		if inner.cursor(id)?.region.is_some() {
			dissolve_region_inner(&self.shared, &mut inner, id)?;
		}
		create_region_inner(&self.shared, &mut inner, id, bounds.start, Some(bounds))
	}

	/// Writes the cursor's region back to the tree as a revision.
	pub fn dissolve_region(&self, id: CursorId) -> Result<()> {
		let mut inner = self.shared.inner.write();
		inner.cursor(id)?;
		dissolve_region_inner(&self.shared, &mut inner, id)
	}

	/// Abandons the cursor's region without writing it back.
	pub fn discard_region(&self, id: CursorId) -> Result<()> {
		let mut inner = self.shared.inner.write();
		let cursor = inner.cursor_mut(id)?;
		if cursor.region.take().is_some() {
			debug!(doc = self.shared.id.0, cursor = id.0, "region discarded");
		}
		Ok(())
	}

	/// Rebuilds the whole tree as a balanced binary tree. Explicit and
	/// expensive; records a revision with no content change.
	pub fn force_rebalance(&self) -> Result<()> {
		let mut inner = self.shared.inner.write();
		checkpoint_inner(&self.shared, &mut inner)?;
		let (write_at, pre_cursors) = begin_revision(&self.shared, &mut inner);
		let root = inner.root;
		let new_root = {
			let io = DocIo::new(&self.shared, &inner);
			let read_at = inner.read_at();
			let inner = &mut *inner;
			let mut ops = TreeOps {
				reg: &mut inner.registry,
				forks: &inner.forks,
				dedup: &mut inner.dedup,
				io: &io,
				read_at,
				write_at,
				max_leaf: self.shared.max_leaf,
				rebalance_budget: self.shared.rebalance_budget,
			};
			ops.force_rebalance(root)
		};
		inner.root = new_root;
		for cursor in inner.cursors.values_mut() {
			cursor.remember(write_at);
		}
		record_revision(&mut inner, write_at, None, false, pre_cursors);
		Ok(())
	}

	/// Routes one edit through the cursor's region machinery or straight
	/// to the tree.
	fn route_edit(
		&self,
		inner: &mut DocumentInner,
		id: CursorId,
		delete_len: usize,
		insert: &[u8],
		insert_before: bool,
	) -> Result<Vec<RemovedDecoration>> {
		let cursor = inner.cursor(id)?;
		if cursor.pending.is_some() {
			return Err(Error::NotReady);
		}
		let byte = cursor.coords.byte;
		let mode = cursor.mode;
		let has_region = cursor.region.is_some();

		if has_region {
			let end = byte + delete_len;
			let in_grace = {
				let region = inner.cursor(id)?.region.as_ref().expect("checked");
				region.grace_contains_logical(byte) && region.grace_contains_logical(end)
			};
			if in_grace {
				return region_edit(&self.shared, inner, id, byte, delete_len, insert, insert_before);
			}
			dissolve_region_inner(&self.shared, inner, id)?;
		}

		if mode == CursorMode::Human {
			create_region_inner(&self.shared, inner, id, byte, None)?;
			return region_edit(&self.shared, inner, id, byte, delete_len, insert, insert_before);
		}

		let kind = if insert.is_empty() {
			EditKind::Delete {
				a: byte,
				b: byte + delete_len,
			}
		} else if delete_len == 0 {
			EditKind::Insert {
				at: byte,
				n: insert.len(),
				insert_before,
			}
		} else {
			EditKind::Replace {
				a: byte,
				b: byte + delete_len,
				n: insert.len(),
			}
		};
		commit_edit(
			&self.shared,
			inner,
			byte..byte + delete_len,
			insert,
			insert_before,
			&[],
			kind,
			None,
			None,
		)
	}
}

/// Allocates the revision an edit will publish as, auto-forking when the
/// document is not at its fork's newest revision. Returns the version and
/// the pre-mutation cursor snapshot.
pub(crate) fn begin_revision(
	_shared: &DocShared,
	inner: &mut DocumentInner,
) -> (Version, Vec<(CursorId, Coordinates)>) {
	let pre_cursors: Vec<(CursorId, Coordinates)> =
		inner.cursors.iter().map(|(&id, c)| (id, c.coords)).collect();
	if let Some(txn) = &inner.txn {
		return (Version::new(inner.current.fork, txn.pending), pre_cursors);
	}
	super::navigate::ensure_at_head(inner);
	(
		Version::new(inner.current.fork, inner.current.rev + 1),
		pre_cursors,
	)
}

/// Publishes a finished revision, or just marks the active transaction
/// dirty when one is pending.
pub(crate) fn record_revision(
	inner: &mut DocumentInner,
	write_at: Version,
	name: Option<String>,
	has_changes: bool,
	pre_cursors: Vec<(CursorId, Coordinates)>,
) {
	if let Some(txn) = &mut inner.txn {
		if has_changes {
			txn.has_mutations = true;
		}
		return;
	}
	inner.revisions.record(
		write_at,
		RevisionInfo {
			name,
			has_changes,
			root: inner.root,
			cursors: pre_cursors,
		},
	);
	inner.forks.bump_highest(write_at.fork, write_at.rev);
	inner.current = write_at;
}

/// Runs one splice against the tree at `write_at`.
pub(crate) fn run_splice(
	shared: &DocShared,
	inner: &mut DocumentInner,
	write_at: Version,
	range: Range<usize>,
	insert: &[u8],
	insert_before: bool,
	insert_decs: &[Decoration],
) -> Result<SpliceOutcome> {
	let io = DocIo::new(shared, inner);
	let read_at = inner.read_at();
	let root = inner.root;
	let inner = &mut *inner;
	let mut ops = TreeOps {
		reg: &mut inner.registry,
		forks: &inner.forks,
		dedup: &mut inner.dedup,
		io: &io,
		read_at,
		write_at,
		max_leaf: shared.max_leaf,
		rebalance_budget: shared.rebalance_budget,
	};
	ops.splice(root, range, insert, insert_before, insert_decs)
}

/// Applies a splice outcome to the document: new root, new totals, cursor
/// and region adjustment, decoration-cache invalidation.
///
/// `skip_adjust` names a cursor whose byte position already reflects the
/// edit (the owner of a dissolving region).
pub(crate) fn apply_outcome(
	shared: &DocShared,
	inner: &mut DocumentInner,
	write_at: Version,
	outcome: &SpliceOutcome,
	kind: EditKind,
	skip_adjust: Option<CursorId>,
) {
	inner.root = outcome.root;
	inner.totals = TextMetrics {
		bytes: inner.totals.bytes - outcome.removed_metrics.bytes + outcome.inserted_metrics.bytes,
		chars: inner.totals.chars - outcome.removed_metrics.chars + outcome.inserted_metrics.chars,
		newlines: inner.totals.newlines - outcome.removed_metrics.newlines
			+ outcome.inserted_metrics.newlines,
	};

	// The recorded end of file slides with edits like any other anchor.
	if let Some(src) = inner.source.as_mut() {
		src.eof_byte = kind.adjust_anchor(src.eof_byte);
	}

	// Shift regions sitting after the edit; their tree coordinates live in
	// the same space the splice just rewrote.
	for cursor in inner.cursors.values_mut() {
		if let Some(region) = &mut cursor.region {
			region.tree_start = kind.adjust(region.tree_start);
			region.grace_start = kind.adjust(region.grace_start);
			region.grace_end = kind.adjust(region.grace_end);
		}
	}

	// First pass: new byte positions. Second pass: full coordinates from
	// the new tree (region owners recompute through their buffer instead).
	let mut moved: Vec<(CursorId, usize, bool)> = Vec::new();
	for (&id, cursor) in &inner.cursors {
		let byte = if Some(id) == skip_adjust {
			cursor.coords.byte
		} else {
			kind.adjust(cursor.coords.byte)
		};
		moved.push((id, byte, cursor.region.is_some()));
	}
	for (id, byte, owns_region) in moved {
		let coords = if owns_region {
			region_owner_coords(shared, inner, id, byte)
		} else {
			let io = DocIo::new(shared, inner);
			let tree = TreeRead {
				reg: &inner.registry,
				forks: &inner.forks,
				io: &io,
				at: write_at,
			};
			tree.coords_of_byte(inner.root, byte).ok()
		};
		if let Some(cursor) = inner.cursors.get_mut(&id) {
			if let Some(coords) = coords {
				cursor.coords = coords;
			} else {
				cursor.coords.byte = byte;
			}
			cursor.remember(write_at);
		}
	}

	let mut cache = shared.cache.lock();
	for removed in &outcome.removed {
		cache.forget(&removed.key);
	}
}

/// Validates, dissolves colliding regions, and commits one direct tree
/// edit as (part of) a revision.
#[allow(clippy::too_many_arguments)]
pub(crate) fn commit_edit(
	shared: &DocShared,
	inner: &mut DocumentInner,
	range: Range<usize>,
	insert: &[u8],
	insert_before: bool,
	insert_decs: &[Decoration],
	kind: EditKind,
	name: Option<String>,
	skip_adjust: Option<CursorId>,
) -> Result<Vec<RemovedDecoration>> {
	if range.start > range.end || range.end > inner.totals.bytes {
		return Err(Error::InvalidPosition);
	}

	// A direct edit falling inside another cursor's staged region would
	// edit bytes the region is about to overwrite; dissolve it first.
	loop {
		let colliding = inner.cursors.iter().find_map(|(&cid, c)| {
			c.region.as_ref().and_then(|r| {
				let r_end = r.tree_start + r.tree_len;
				(Some(cid) != skip_adjust && range.start < r_end && range.end > r.tree_start)
					.then_some(cid)
			})
		});
		match colliding {
			Some(cid) => dissolve_region_inner(shared, inner, cid)?,
			None => break,
		}
	}

	let (write_at, pre_cursors) = begin_revision(shared, inner);
	let outcome = run_splice(shared, inner, write_at, range, insert, insert_before, insert_decs)?;
	apply_outcome(shared, inner, write_at, &outcome, kind, skip_adjust);
	record_revision(inner, write_at, name, true, pre_cursors);
	chill::enforce_hard_limit(shared, inner);
	Ok(outcome.removed)
}

/// Creates a region for `id`. `explicit` supplies the content bounds;
/// otherwise they are centered on `byte`.
pub(crate) fn create_region_inner(
	shared: &DocShared,
	inner: &mut DocumentInner,
	id: CursorId,
	byte: usize,
	explicit: Option<Range<usize>>,
) -> Result<()> {
	let total = inner.totals.bytes;
	let w = shared.grace_window;
	let (start, end) = match explicit {
		Some(r) => (r.start, r.end),
		None => (byte.saturating_sub(w / 4), (byte + w / 4).min(total)),
	};
	let grace_start = start.saturating_sub(w / 2);
	let grace_end = (end + w / 2).min(total);

	// Two regions may not overlap: dissolve any whose grace window crosses
	// this one's span.
	loop {
		let colliding = inner.cursors.iter().find_map(|(&cid, c)| {
			c.region.as_ref().and_then(|r| {
				let r_end = r.grace_end.saturating_add_signed(r.delta());
				(cid != id && grace_start < r_end && grace_end > r.grace_start).then_some(cid)
			})
		});
		match colliding {
			Some(cid) => dissolve_region_inner(shared, inner, cid)?,
			None => break,
		}
	}

	let (bytes, mut decorations) = {
		let io = DocIo::new(shared, inner);
		let tree = inner.tree(&io);
		let bytes = tree.read_range(inner.root, start..end)?;
		let decorations: Vec<Decoration> = tree
			.decorations_in_range(inner.root, start..end)
			.into_iter()
			.map(|(key, abs)| Decoration {
				key,
				offset: abs - start,
			})
			.collect();
		(bytes, decorations)
	};
	sort_decorations(&mut decorations);

	let txn_owned = inner.txn.is_some();
	let cursor = inner.cursor_mut(id)?;
	let mut region = Region::new(start, bytes, decorations, grace_start, grace_end);
	region.txn_owned = txn_owned;
	cursor.region = Some(region);
	debug!(
		doc = shared.id.0,
		cursor = id.0,
		start,
		end,
		grace_start,
		grace_end,
		"region created"
	);
	Ok(())
}

/// Applies one edit to the cursor's region buffer, extending the region
/// over tree bytes when the edit lands in the grace window but outside the
/// current content bounds.
pub(crate) fn region_edit(
	shared: &DocShared,
	inner: &mut DocumentInner,
	id: CursorId,
	byte: usize,
	delete_len: usize,
	insert: &[u8],
	insert_before: bool,
) -> Result<Vec<RemovedDecoration>> {
	// Extend left.
	let tree_start = inner.cursor(id)?.region.as_ref().expect("region exists").tree_start;
	if byte < tree_start {
		let (bytes, decs) = read_span_with_decorations(shared, inner, byte..tree_start)?;
		let cursor = inner.cursor_mut(id)?;
		cursor
			.region
			.as_mut()
			.expect("region exists")
			.extend_left(&bytes, decs);
	}
	// Extend right.
	let (logical_end, delta) = {
		let region = inner.cursor(id)?.region.as_ref().expect("region exists");
		(region.logical_end(), region.delta())
	};
	let edit_end = byte + delete_len;
	if edit_end > logical_end {
		let tree_lo = logical_end.saturating_add_signed(-delta);
		let tree_hi = edit_end.saturating_add_signed(-delta);
		let (bytes, decs) = read_span_with_decorations(shared, inner, tree_lo..tree_hi)?;
		let cursor = inner.cursor_mut(id)?;
		cursor
			.region
			.as_mut()
			.expect("region exists")
			.extend_right(&bytes, decs);
	}

	let removed = {
		let region = inner.cursor_mut(id)?.region.as_mut().expect("region exists");
		let local_a = byte - region.tree_start;
		region.edit(local_a, local_a + delete_len, insert, insert_before)
	};

	// The owner's own position follows the same anchor rules.
	let kind = if insert.is_empty() {
		EditKind::Delete {
			a: byte,
			b: byte + delete_len,
		}
	} else if delete_len == 0 {
		EditKind::Insert {
			at: byte,
			n: insert.len(),
			insert_before,
		}
	} else {
		EditKind::Replace {
			a: byte,
			b: byte + delete_len,
			n: insert.len(),
		}
	};
	let new_byte = kind.adjust(byte);
	if let Some(coords) = region_owner_coords(shared, inner, id, new_byte) {
		inner.cursor_mut(id)?.coords = coords;
	} else {
		inner.cursor_mut(id)?.coords.byte = new_byte;
	}

	{
		let mut cache = shared.cache.lock();
		for r in &removed {
			cache.forget(&r.key);
		}
	}
	trace!(
		doc = shared.id.0,
		cursor = id.0,
		byte,
		delete_len,
		inserted = insert.len(),
		"region edit"
	);

	let needs_flush = inner
		.cursor(id)?
		.region
		.as_ref()
		.expect("region exists")
		.needs_flush(shared.max_leaf);
	if needs_flush {
		let (grace_start, grace_end) = {
			let region = inner.cursor(id)?.region.as_ref().expect("region exists");
			(
				region.grace_start,
				region.grace_end.saturating_add_signed(region.delta()),
			)
		};
		let at = inner.cursor(id)?.coords.byte;
		dissolve_region_inner(shared, inner, id)?;
		create_region_inner(shared, inner, id, at, Some(at..at))?;
		let total_bytes = inner.totals.bytes;
		if let Some(region) = &mut inner.cursor_mut(id)?.region {
			region.grace_start = grace_start;
			region.grace_end = grace_end.min(total_bytes);
		}
		debug!(doc = shared.id.0, cursor = id.0, "region flushed");
	}

	Ok(removed)
}

fn read_span_with_decorations(
	shared: &DocShared,
	inner: &DocumentInner,
	range: Range<usize>,
) -> Result<(Vec<u8>, Vec<Decoration>)> {
	let io = DocIo::new(shared, inner);
	let tree = inner.tree(&io);
	let bytes = tree.read_range(inner.root, range.clone())?;
	let decs = tree
		.decorations_in_range(inner.root, range.clone())
		.into_iter()
		.map(|(key, abs)| Decoration {
			key,
			offset: abs - range.start,
		})
		.collect();
	Ok((bytes, decs))
}

/// Writes the cursor's region back to the tree as a revision of its own.
pub(crate) fn dissolve_region_inner(
	shared: &DocShared,
	inner: &mut DocumentInner,
	id: CursorId,
) -> Result<()> {
	let Some(region) = inner.cursor_mut(id)?.region.take() else {
		return Ok(());
	};
	let range = region.tree_start..region.tree_start + region.tree_len;
	let kind = EditKind::Replace {
		a: range.start,
		b: range.end,
		n: region.buffer.len(),
	};
	debug!(
		doc = shared.id.0,
		cursor = id.0,
		?range,
		bytes = region.buffer.len(),
		"region dissolve"
	);
	commit_edit(
		shared,
		inner,
		range,
		&region.buffer,
		true,
		&region.decorations,
		kind,
		None,
		Some(id),
	)?;
	Ok(())
}

/// Dissolves all active regions as a single revision. Returns whether any
/// region was dissolved.
pub(crate) fn checkpoint_inner(shared: &DocShared, inner: &mut DocumentInner) -> Result<bool> {
	let mut ids: Vec<(CursorId, usize)> = inner
		.cursors
		.iter()
		.filter_map(|(&id, c)| c.region.as_ref().map(|r| (id, r.tree_start)))
		.collect();
	if ids.is_empty() {
		return Ok(false);
	}
	// Right-to-left keeps earlier regions' tree coordinates stable while
	// later ones splice.
	ids.sort_by(|a, b| b.1.cmp(&a.1));

	let (write_at, pre_cursors) = begin_revision(shared, inner);
	for (id, _) in ids {
		let Some(region) = inner.cursor_mut(id)?.region.take() else {
			continue;
		};
		let range = region.tree_start..region.tree_start + region.tree_len;
		let kind = EditKind::Replace {
			a: range.start,
			b: range.end,
			n: region.buffer.len(),
		};
		let outcome = run_splice(
			shared,
			inner,
			write_at,
			range,
			&region.buffer,
			true,
			&region.decorations,
		)?;
		apply_outcome(shared, inner, write_at, &outcome, kind, Some(id));
	}
	record_revision(inner, write_at, None, true, pre_cursors);
	chill::enforce_hard_limit(shared, inner);
	debug!(doc = shared.id.0, at = %write_at, "checkpoint");
	Ok(true)
}

/// Logical coordinates of a region owner's byte position, composed from
/// the tree coordinates at the region start plus the buffer prefix.
pub(crate) fn region_owner_coords(
	shared: &DocShared,
	inner: &DocumentInner,
	id: CursorId,
	byte: usize,
) -> Option<Coordinates> {
	let cursor = inner.cursors.get(&id)?;
	let region = cursor.region.as_ref()?;
	if byte < region.tree_start || byte > region.logical_end() {
		return None;
	}
	let io = DocIo::new(shared, inner);
	let start = inner
		.tree(&io)
		.coords_of_byte(inner.root, region.tree_start)
		.ok()?;
	let local = byte - region.tree_start;
	let (prefix, _) = vellum_primitives::metrics::scan(&region.buffer[..local]);
	let line = start.line + prefix.newlines;
	let line_chars = if prefix.newlines == 0 {
		start.line_chars + prefix.chars
	} else {
		let tail_start = region.buffer[..local]
			.iter()
			.rposition(|&b| b == b'\n')
			.map(|i| i + 1)
			.unwrap_or(0);
		vellum_primitives::metrics::count_chars(&region.buffer[tail_start..local])
	};
	Some(Coordinates {
		byte,
		chars: start.chars + prefix.chars,
		line,
		line_chars,
	})
}

impl Document {
	/// Applies a batch of decoration changes as one revision.
	///
	/// A `None` address deletes the key. Deletions apply before additions;
	/// adding an existing key moves it. Any invalid address aborts the
	/// whole batch with no change. Active regions are checkpointed first.
	pub fn decorate(&self, batch: &[(&str, Option<Address>)]) -> Result<()> {
		let mut inner = self.shared.inner.write();
		checkpoint_inner(&self.shared, &mut inner)?;
		decorate_inner(&self.shared, &mut inner, batch)?;
		Ok(())
	}
}

pub(crate) fn decorate_inner(
	shared: &DocShared,
	inner: &mut DocumentInner,
	batch: &[(&str, Option<Address>)],
) -> Result<()> {
	// Validate every address up front; the batch is all-or-nothing.
	let mut additions: Vec<(Arc<str>, usize)> = Vec::new();
	let mut deletions: Vec<Arc<str>> = Vec::new();
	{
		let io = DocIo::new(shared, inner);
		let tree = inner.tree(&io);
		for (key, addr) in batch {
			match addr {
				Some(addr) => {
					let byte = tree.resolve_address(inner.root, *addr)?;
					additions.push((Arc::from(*key), byte));
				}
				None => deletions.push(Arc::from(*key)),
			}
		}
	}
	if additions.is_empty() && deletions.is_empty() {
		return Ok(());
	}

	let (write_at, pre_cursors) = begin_revision(shared, inner);

	// Per-leaf aggregation: start from the current decoration list of each
	// touched leaf, apply removals, then additions.
	struct LeafEdit {
		hit: LeafHit,
		decorations: Vec<Decoration>,
	}
	let mut edits: Vec<LeafEdit> = Vec::new();

	{
		let io = DocIo::new(shared, inner);
		let tree = inner.tree(&io);
		let mut cache = shared.cache.lock();

		let mut removal_keys: Vec<Arc<str>> = deletions.clone();
		removal_keys.extend(additions.iter().map(|(k, _)| k.clone()));
		for key in &removal_keys {
			let Some((node, _, _)) = locate_decoration(&tree, inner.root, &mut cache, key) else {
				continue;
			};
			let Some(hit) = tree.leaf_hit_by_id(inner.root, node) else {
				continue;
			};
			let entry = edits.iter_mut().find(|e| e.hit.id == hit.id);
			let entry = match entry {
				Some(e) => e,
				None => {
					let decorations = hit
						.snap
						.as_leaf()
						.expect("decoration lives on a leaf")
						.decorations
						.clone();
					edits.push(LeafEdit { hit, decorations });
					edits.last_mut().expect("just pushed")
				}
			};
			entry.decorations.retain(|d| d.key != *key);
			cache.forget(key);
		}

		for (key, byte) in &additions {
			let hit = tree.leaf_at_byte(inner.root, *byte)?;
			let rel = hit.local;
			let abs = *byte;
			let entry = edits.iter_mut().find(|e| e.hit.id == hit.id);
			let entry = match entry {
				Some(e) => e,
				None => {
					let decorations = hit
						.snap
						.as_leaf()
						.expect("descent ends at a leaf")
						.decorations
						.clone();
					edits.push(LeafEdit { hit, decorations });
					edits.last_mut().expect("just pushed")
				}
			};
			entry.decorations.push(Decoration {
				key: key.clone(),
				offset: rel,
			});
			cache.record(key.clone(), entry.hit.id, rel, abs);
		}
	}

	// Republish the touched leaves under the new revision.
	for edit in edits {
		let payload = {
			let io = DocIo::new(shared, inner);
			io.fetch(edit.hit.snap.as_leaf().expect("leaf"))?
		};
		let io = DocIo::new(shared, inner);
		let read_at = inner.read_at();
		let inner_mut = &mut *inner;
		let mut ops = TreeOps {
			reg: &mut inner_mut.registry,
			forks: &inner_mut.forks,
			dedup: &mut inner_mut.dedup,
			io: &io,
			read_at,
			write_at,
			max_leaf: shared.max_leaf,
			rebalance_budget: shared.rebalance_budget,
		};
		ops.update_leaf_decorations(
			edit.hit.id,
			edit.hit.snap.as_leaf().expect("leaf"),
			payload,
			edit.decorations,
		);
	}

	for cursor in inner.cursors.values_mut() {
		cursor.remember(write_at);
	}
	record_revision(inner, write_at, None, true, pre_cursors);
	trace!(doc = shared.id.0, at = %write_at, "decorate batch");
	Ok(())
}

/// Finds a decoration by key: cache hint first, full traversal on a miss
/// (repairing the hint).
pub(crate) fn locate_decoration(
	tree: &TreeRead<'_>,
	root: crate::rope::NodeId,
	cache: &mut crate::decoration::DecorationCache,
	key: &str,
) -> Option<(crate::rope::NodeId, usize, usize)> {
	if let Some(entry) = cache.get(key)
		&& let Ok(hit) = tree.leaf_at_byte(root, entry.abs)
		&& hit.id == entry.node
		&& let Some(leaf) = hit.snap.as_leaf()
		&& leaf
			.decorations
			.iter()
			.any(|d| d.key.as_ref() == key && hit.start + d.offset == entry.abs)
	{
		return Some((entry.node, entry.abs - hit.start, entry.abs));
	}
	let found = tree.find_decoration(root, key)?;
	cache.record(Arc::from(key), found.0, found.1, found.2);
	Some(found)
}
