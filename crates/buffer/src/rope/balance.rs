//! Approximate balancing.
//!
//! The tree carries no strict balance invariant. Mutations pay for a
//! bounded number of single rotations along the mutated path; anything
//! worse is left for an explicit full rebuild.

use tracing::trace;

use crate::rope::{NodeId, TreeOps, TreeRead};

impl<'a> TreeOps<'a> {
	/// Walks toward `pos` performing single rotations where a node's
	/// children differ in height by more than two, visiting at most
	/// `budget` nodes.
	pub fn rebalance_path(&mut self, id: NodeId, pos: usize, budget: &mut usize) -> NodeId {
		if *budget == 0 {
			return id;
		}
		let snap = self.resolve_new(id);
		let Some(node) = snap.as_internal() else {
			return id;
		};
		*budget -= 1;
		let lm = self.resolve_new(node.left).metrics();
		let (left, right) = if pos < lm.bytes {
			(self.rebalance_path(node.left, pos, budget), node.right)
		} else {
			(
				node.left,
				self.rebalance_path(node.right, pos - lm.bytes, budget),
			)
		};
		self.balance_once(left, right)
	}

	fn balance_once(&mut self, left: NodeId, right: NodeId) -> NodeId {
		let hl = self.resolve_new(left).height();
		let hr = self.resolve_new(right).height();
		if hr > hl + 2 {
			let rs = self.resolve_new(right);
			let r = rs.as_internal().expect("height > 2 implies internal");
			let (rl, rr) = (r.left, r.right);
			trace!(?left, ?right, "rotate left");
			let new_left = self.make_internal(left, rl);
			self.make_internal(new_left, rr)
		} else if hl > hr + 2 {
			let ls = self.resolve_new(left);
			let l = ls.as_internal().expect("height > 2 implies internal");
			let (ll, lr) = (l.left, l.right);
			trace!(?left, ?right, "rotate right");
			let new_right = self.make_internal(lr, right);
			self.make_internal(ll, new_right)
		} else {
			self.make_internal(left, right)
		}
	}

	/// Rebuilds the whole tree as a balanced binary tree over the existing
	/// leaves, in order.
	pub fn force_rebalance(&mut self, root: NodeId) -> NodeId {
		let leaves: Vec<NodeId> = self
			.read()
			.leaves(root)
			.into_iter()
			.map(|(id, _, _)| id)
			.collect();
		trace!(leaves = leaves.len(), "force rebalance");
		self.build_balanced(&leaves)
	}
}

/// Whether any node of the tree has children whose heights differ by more
/// than two.
pub(crate) fn needs_rebalance(read: &TreeRead<'_>, root: NodeId) -> bool {
	let snap = read.resolve(root);
	let Some(node) = snap.as_internal() else {
		return false;
	};
	let hl = read.resolve(node.left).height();
	let hr = read.resolve(node.right).height();
	if hl.abs_diff(hr) > 2 {
		return true;
	}
	needs_rebalance(read, node.left) || needs_rebalance(read, node.right)
}
