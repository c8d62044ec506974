//! The rope node store.
//!
//! A document's content is a persistent binary tree of nodes. Nodes are
//! identified by [`NodeId`] and live in an append-only [`Registry`]; each
//! node maps (fork, revision) keys to immutable [`Snapshot`]s, so every
//! historical tree stays reachable without copying unchanged subtrees.
//!
//! Snapshot resolution at a version takes the node's snapshot with the
//! greatest revision at or below the requested one on the requested fork,
//! falling back through the fork's ancestry to the branch point. A node
//! that cannot be resolved at a version it is referenced from is a fatal
//! invariant violation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rustc_hash::FxHashMap;
use vellum_primitives::{ForkId, Revision, TextMetrics, Version};

use crate::history::ForkTable;

mod balance;
mod leaf;
#[cfg(test)]
mod tests;
mod tree;

pub(crate) use balance::needs_rebalance;
pub(crate) use leaf::LeafSnapshot;
pub(crate) use tree::{LeafHit, SpliceOutcome, TreeOps, TreeRead};

/// Identifier of a node within one document's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
	/// Placeholder id for not-yet-initialized fields.
	#[cfg(test)]
	pub(crate) const SENTINEL: NodeId = NodeId(u32::MAX);
}

/// An internal node's snapshot: two children plus their combined metrics.
#[derive(Debug, Clone)]
pub(crate) struct InternalSnapshot {
	pub left: NodeId,
	pub right: NodeId,
	pub metrics: TextMetrics,
	/// Height of the subtree rooted here; leaves have height 0.
	pub height: u8,
}

/// Immutable per-version record of one node.
#[derive(Debug)]
pub(crate) enum Snapshot {
	Leaf(LeafSnapshot),
	Internal(InternalSnapshot),
}

impl Snapshot {
	pub fn metrics(&self) -> TextMetrics {
		match self {
			Snapshot::Leaf(leaf) => leaf.metrics,
			Snapshot::Internal(node) => node.metrics,
		}
	}

	pub fn height(&self) -> u8 {
		match self {
			Snapshot::Leaf(_) => 0,
			Snapshot::Internal(node) => node.height,
		}
	}

	pub fn as_leaf(&self) -> Option<&LeafSnapshot> {
		match self {
			Snapshot::Leaf(leaf) => Some(leaf),
			Snapshot::Internal(_) => None,
		}
	}

	pub fn as_internal(&self) -> Option<&InternalSnapshot> {
		match self {
			Snapshot::Internal(node) => Some(node),
			Snapshot::Leaf(_) => None,
		}
	}
}

/// Fetches a leaf's payload regardless of storage tier.
///
/// The document supplies an implementation that thaws cold blocks and reads
/// warm spans from the backing file; tests use a memory-only stub.
pub(crate) trait PayloadFetch {
	fn fetch(&self, leaf: &LeafSnapshot) -> vellum_primitives::Result<Arc<[u8]>>;
}

/// [`PayloadFetch`] for trees whose leaves are always memory-resident.
#[cfg(test)]
pub(crate) struct MemoryFetch;

#[cfg(test)]
impl PayloadFetch for MemoryFetch {
	fn fetch(&self, leaf: &LeafSnapshot) -> vellum_primitives::Result<Arc<[u8]>> {
		leaf.payload_if_memory()
			.ok_or(vellum_primitives::Error::NotReady)
	}
}

#[derive(Debug, Default)]
struct Node {
	/// Per-fork snapshot lists, sorted by revision.
	history: FxHashMap<ForkId, Vec<(Revision, Arc<Snapshot>)>>,
}

/// Append-only store of a document's nodes.
///
/// Nodes never leave the registry; cold-storage eviction moves payloads out
/// of leaf snapshots, not the snapshots themselves. The registry keeps the
/// shared resident-byte gauge current as memory payloads come and go.
#[derive(Debug, Default)]
pub(crate) struct Registry {
	nodes: Vec<Node>,
	resident: Arc<AtomicUsize>,
}

impl Registry {
	pub fn new(resident: Arc<AtomicUsize>) -> Self {
		Self {
			nodes: Vec::new(),
			resident,
		}
	}

	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	fn credit(&self, snap: &Snapshot) {
		if let Snapshot::Leaf(leaf) = snap
			&& let Some(payload) = leaf.payload_if_memory()
		{
			self.resident.fetch_add(payload.len(), Ordering::Relaxed);
		}
	}

	/// Allocates a fresh node and publishes its first snapshot.
	pub fn insert(&mut self, at: Version, snap: Snapshot) -> NodeId {
		self.credit(&snap);
		let id = NodeId(self.nodes.len() as u32);
		let mut node = Node::default();
		node.history.insert(at.fork, vec![(at.rev, Arc::new(snap))]);
		self.nodes.push(node);
		id
	}

	/// Publishes (or replaces) a node's snapshot at exactly `at`.
	///
	/// Replacement at the same key happens when a transaction or the lazy
	/// loader amends a revision that has not been published to readers yet.
	pub fn republish(&mut self, id: NodeId, at: Version, snap: Snapshot) {
		self.credit(&snap);
		let resident = self.resident.clone();
		let list = self.nodes[id.0 as usize]
			.history
			.entry(at.fork)
			.or_default();
		match list.binary_search_by(|e| e.0.cmp(&at.rev)) {
			Ok(i) => {
				if let Snapshot::Leaf(leaf) = &*list[i].1
					&& let Some(payload) = leaf.payload_if_memory()
				{
					resident.fetch_sub(payload.len(), Ordering::Relaxed);
				}
				list[i].1 = Arc::new(snap);
			}
			Err(i) => list.insert(i, (at.rev, Arc::new(snap))),
		}
	}

	/// Removes every snapshot published at exactly `at`. Used to unpublish
	/// the pending revision of a rolled-back transaction so a later commit
	/// of the same revision number cannot resolve to stale state.
	pub fn purge(&mut self, at: Version) {
		for node in &mut self.nodes {
			if let Some(list) = node.history.get_mut(&at.fork)
				&& let Ok(i) = list.binary_search_by(|e| e.0.cmp(&at.rev))
			{
				let (_, snap) = list.remove(i);
				if let Snapshot::Leaf(leaf) = &*snap
					&& let Some(payload) = leaf.payload_if_memory()
				{
					self.resident.fetch_sub(payload.len(), Ordering::Relaxed);
				}
			}
		}
	}

	/// Resolves a node's snapshot at `at`, or `None` when the node has no
	/// snapshot on the version's ancestry.
	pub fn try_snapshot_at(
		&self,
		forks: &ForkTable,
		id: NodeId,
		at: Version,
	) -> Option<Arc<Snapshot>> {
		let node = self.nodes.get(id.0 as usize)?;
		let mut at = at;
		loop {
			if let Some(list) = node.history.get(&at.fork) {
				let found = match list.binary_search_by(|e| e.0.cmp(&at.rev)) {
					Ok(i) => Some(i),
					Err(0) => None,
					Err(i) => Some(i - 1),
				};
				if let Some(i) = found {
					return Some(list[i].1.clone());
				}
			}
			if at.fork == ForkId::ROOT {
				return None;
			}
			at = forks.parent_point(at.fork);
		}
	}

	/// Resolves a node's snapshot at `at`. A miss is a broken tree and
	/// aborts.
	pub fn snapshot_at(&self, forks: &ForkTable, id: NodeId, at: Version) -> Arc<Snapshot> {
		self.try_snapshot_at(forks, id, at)
			.unwrap_or_else(|| panic!("node {id:?} unresolvable at {at}: corrupt tree"))
	}

	/// Visits every published snapshot of every node.
	pub fn for_each_snapshot(&self, mut f: impl FnMut(NodeId, Version, &Arc<Snapshot>)) {
		for (i, node) in self.nodes.iter().enumerate() {
			for (&fork, list) in &node.history {
				for (rev, snap) in list {
					f(NodeId(i as u32), Version::new(fork, *rev), snap);
				}
			}
		}
	}
}
