//! Chill: evicting leaf payloads to cold storage.
//!
//! Candidates are memory-resident leaf snapshots ordered least recently
//! accessed first (never-accessed leaves lead). The chill level decides
//! which snapshots are eligible, from only-inactive-forks up to every
//! memory leaf. Moving a leaf encodes payload plus decorations, hands the
//! block to the cold store, and nulls the payload in place - no new
//! revision, the tree does not change.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use rustc_hash::FxHashSet;
use tracing::{debug, warn};
use vellum_primitives::{ChillLevel, LoadingStyle, Result, Version};

use crate::document::{DocIo, DocShared, Document, DocumentInner};
use crate::rope::{NodeId, Snapshot};
use crate::storage::encode_block;

/// One chillable leaf snapshot.
pub(crate) struct Candidate {
	pub node: NodeId,
	pub at: Version,
	pub snap: Arc<Snapshot>,
	pub stamp: u64,
}

/// Collects this document's chillable snapshots at `level`, sorted least
/// recently accessed first.
pub(crate) fn collect_candidates(
	shared: &DocShared,
	inner: &DocumentInner,
	level: ChillLevel,
	watermark: u64,
) -> Vec<Candidate> {
	if shared.loading_style == LoadingStyle::MemoryOnly || shared.cold.is_none() {
		return Vec::new();
	}

	// Leaves of the current tree, by snapshot identity.
	let current: FxHashSet<usize> = {
		let io = DocIo::new(shared, inner);
		inner
			.tree(&io)
			.leaves(inner.root)
			.into_iter()
			.map(|(_, snap, _)| Arc::as_ptr(&snap) as usize)
			.collect()
	};
	let current_fork = inner.current.fork;

	let mut out = Vec::new();
	inner.registry.for_each_snapshot(|node, at, snap| {
		let Some(leaf) = snap.as_leaf() else {
			return;
		};
		if leaf.metrics.bytes == 0 || leaf.payload_if_memory().is_none() {
			return;
		}
		let in_current = current.contains(&(Arc::as_ptr(snap) as usize));
		let stamp = leaf.access_stamp();
		let eligible = match level {
			ChillLevel::InactiveForks => !in_current && at.fork != current_fork,
			ChillLevel::OldHistory => !in_current,
			ChillLevel::UnusedData => !in_current || stamp < watermark,
			ChillLevel::Everything => true,
		};
		if eligible {
			out.push(Candidate {
				node,
				at,
				snap: snap.clone(),
				stamp,
			});
		}
	});
	out.sort_by_key(|c| c.stamp);
	out
}

/// Moves one candidate to cold storage. Returns the bytes freed (0 when
/// another thread got there first).
pub(crate) fn chill_snapshot(shared: &DocShared, candidate: &Candidate) -> Result<usize> {
	let cold = shared
		.cold
		.as_ref()
		.expect("candidates only collected with a cold backend");
	let leaf = candidate
		.snap
		.as_leaf()
		.expect("candidates are leaf snapshots");
	let Some(payload) = leaf.payload_if_memory() else {
		return Ok(0);
	};
	let block = format!(
		"n{}-f{}-r{}",
		candidate.node.0, candidate.at.fork, candidate.at.rev
	);
	let bytes = encode_block(&payload, &leaf.decorations);
	cold.put(&shared.folder, &block, &bytes)?;
	let freed = leaf.set_cold(Arc::from(block.as_str())).unwrap_or(0);
	shared.resident.fetch_sub(freed, Ordering::Relaxed);
	debug!(doc = shared.id.0, block = %block, freed, "leaf chilled");
	Ok(freed)
}

/// A chillable snapshot together with the document that owns it: either
/// the mutating document (whose lock the caller already holds) or another
/// live document in the library.
enum Victim<'a> {
	Own(&'a DocShared),
	Other(Document),
}

impl Victim<'_> {
	fn shared(&self) -> &DocShared {
		match self {
			Victim::Own(shared) => shared,
			Victim::Other(doc) => &doc.shared,
		}
	}
}

/// Post-mutation hard-limit enforcement: evict memory leaves, least
/// recently accessed first across all live documents, until the library is
/// back under its hard limit or nothing is left to move. Sets the
/// memory-pressure flag when the limit cannot be met, clears it when it
/// can.
///
/// The caller holds the mutating document's write lock, so every other
/// lock here is taken non-blockingly: a document busy mutating enforces
/// the limit itself when its own edit commits.
pub(crate) fn enforce_hard_limit(shared: &DocShared, inner: &mut DocumentInner) {
	if shared.resident.load(Ordering::Relaxed) <= shared.hard_limit {
		shared.pressure.store(false, Ordering::Relaxed);
		return;
	}

	let mut pool: Vec<(Victim<'_>, Candidate)> =
		collect_candidates(shared, inner, ChillLevel::Everything, u64::MAX)
			.into_iter()
			.map(|c| (Victim::Own(shared), c))
			.collect();
	if let Some(library) = shared.library.upgrade()
		&& let Some(docs) = library.docs.try_read()
	{
		for doc in docs.iter() {
			if doc.shared.id == shared.id {
				continue;
			}
			let Some(other) = doc.shared.inner.try_read() else {
				continue;
			};
			for candidate in
				collect_candidates(&doc.shared, &other, ChillLevel::Everything, u64::MAX)
			{
				pool.push((Victim::Other(doc.clone()), candidate));
			}
		}
	}
	pool.sort_by_key(|(_, c)| c.stamp);

	for (victim, candidate) in &pool {
		match chill_snapshot(victim.shared(), candidate) {
			Ok(_) => {
				if shared.resident.load(Ordering::Relaxed) <= shared.hard_limit {
					shared.pressure.store(false, Ordering::Relaxed);
					return;
				}
			}
			Err(e) => {
				warn!(doc = victim.shared().id.0, error = %e, "hard-limit chill failed");
				break;
			}
		}
	}
	warn!(
		doc = shared.id.0,
		resident = shared.resident.load(Ordering::Relaxed),
		hard_limit = shared.hard_limit,
		"memory hard limit not reducible"
	);
	shared.pressure.store(true, Ordering::Relaxed);
}
