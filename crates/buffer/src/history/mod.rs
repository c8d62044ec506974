//! The version graph: forks, revisions, and navigation.
//!
//! Every mutation commits a revision on some fork. Editing while not at the
//! fork's newest revision forks the graph instead of discarding history, so
//! every state a document has ever been in stays reachable. Navigation
//! restores the recorded root and lets cursors restore or clamp.

use rustc_hash::FxHashMap;
use tracing::trace;
use vellum_primitives::{Coordinates, Error, ForkId, Result, Revision, Version};

use crate::cursor::CursorId;
use crate::rope::NodeId;

mod transaction;

pub(crate) use transaction::{Transaction, TransactionOutcome};

/// Public description of one fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkInfo {
	/// Fork this one branched from. The root fork is its own parent.
	pub parent_fork: ForkId,
	/// Revision of the parent fork at the branch point.
	pub parent_rev: Revision,
	/// Highest revision ever committed on this fork. Never decreases.
	pub highest_revision: Revision,
}

/// The fork table. Fork ids are dense indices; an entry exists for every
/// fork ever created.
#[derive(Debug)]
pub(crate) struct ForkTable {
	forks: Vec<ForkInfo>,
}

impl ForkTable {
	pub fn new() -> Self {
		Self {
			forks: vec![ForkInfo {
				parent_fork: ForkId::ROOT,
				parent_rev: 0,
				highest_revision: 0,
			}],
		}
	}

	pub fn get(&self, fork: ForkId) -> Result<&ForkInfo> {
		self.forks
			.get(fork.0 as usize)
			.ok_or(Error::ForkNotFound(fork))
	}

	/// The (parent fork, parent revision) a fork branched from.
	pub fn parent_point(&self, fork: ForkId) -> Version {
		let info = &self.forks[fork.0 as usize];
		Version::new(info.parent_fork, info.parent_rev)
	}

	/// Allocates a new fork branching from `parent`.
	pub fn create(&mut self, parent: Version) -> ForkId {
		let id = ForkId(self.forks.len() as u32);
		self.forks.push(ForkInfo {
			parent_fork: parent.fork,
			parent_rev: parent.rev,
			highest_revision: 0,
		});
		trace!(fork = %id, parent = %parent, "fork created");
		id
	}

	/// Raises a fork's highest revision. A lower value is ignored.
	pub fn bump_highest(&mut self, fork: ForkId, rev: Revision) {
		let info = &mut self.forks[fork.0 as usize];
		if rev > info.highest_revision {
			info.highest_revision = rev;
		}
	}

	pub fn list(&self) -> Vec<(ForkId, ForkInfo)> {
		self.forks
			.iter()
			.enumerate()
			.map(|(i, info)| (ForkId(i as u32), *info))
			.collect()
	}

	/// Ancestor chain of `fork` up to the root, including `fork` itself.
	fn ancestry(&self, fork: ForkId) -> Vec<ForkId> {
		let mut chain = Vec::new();
		let mut cur = fork;
		loop {
			chain.push(cur);
			if cur == ForkId::ROOT {
				return chain;
			}
			cur = self.forks[cur.0 as usize].parent_fork;
		}
	}

	/// The revision shared by `a` and `b`, used by fork seeks.
	///
	/// When one fork descends from the other, this is the branch point of
	/// the chain member closest to the ancestor. Sibling forks (same parent
	/// fork) share the earlier of their two divergence points. Unrelated
	/// forks fall back to revision 0, which is always defined.
	pub fn common_revision(&self, a: ForkId, b: ForkId) -> Revision {
		if a == b {
			return self.forks[a.0 as usize].highest_revision;
		}
		let chain_a = self.ancestry(a);
		let chain_b = self.ancestry(b);

		// b descends from a: the chain member directly branching off a
		// names the branch point.
		if let Some(i) = chain_b.iter().position(|&f| f == a)
			&& i > 0
		{
			return self.forks[chain_b[i - 1].0 as usize].parent_rev;
		}
		if let Some(i) = chain_a.iter().position(|&f| f == b)
			&& i > 0
		{
			return self.forks[chain_a[i - 1].0 as usize].parent_rev;
		}

		let pa = &self.forks[a.0 as usize];
		let pb = &self.forks[b.0 as usize];
		if pa.parent_fork == pb.parent_fork {
			return pa.parent_rev.min(pb.parent_rev);
		}
		0
	}
}

/// Recorded state of one committed revision.
#[derive(Debug, Clone)]
pub(crate) struct RevisionInfo {
	/// Optional descriptive name (from a named transaction).
	pub name: Option<String>,
	/// Whether the revision contains mutations.
	pub has_changes: bool,
	/// Root node at this revision.
	pub root: NodeId,
	/// Cursor positions just before the mutation that created the revision.
	pub cursors: Vec<(CursorId, Coordinates)>,
}

/// Index from (fork, revision) to its recorded state. Revision 0 of every
/// fork has an entry.
#[derive(Debug, Default)]
pub(crate) struct RevisionIndex {
	map: FxHashMap<Version, RevisionInfo>,
}

impl RevisionIndex {
	pub fn record(&mut self, at: Version, info: RevisionInfo) {
		trace!(at = %at, root = ?info.root, has_changes = info.has_changes, "revision recorded");
		self.map.insert(at, info);
	}

	pub fn get(&self, at: Version) -> Option<&RevisionInfo> {
		self.map.get(&at)
	}

	pub fn get_mut(&mut self, at: Version) -> Option<&mut RevisionInfo> {
		self.map.get_mut(&at)
	}
}
