//! Transaction bookkeeping.
//!
//! A transaction batches mutations into one revision. Nesting is a depth
//! counter; a rollback anywhere poisons the whole transaction, and the
//! actual restore happens when the outermost level exits.

use vellum_primitives::{Coordinates, Error, Result, Revision, TextMetrics, Version};

use crate::cursor::CursorId;
use crate::rope::NodeId;

/// State captured when the outermost transaction starts, restored on
/// rollback.
#[derive(Debug, Clone)]
pub(crate) struct Transaction {
	depth: u32,
	poisoned: bool,
	/// Revision the transaction will publish as.
	pub pending: Revision,
	pub has_mutations: bool,
	pub name: Option<String>,
	pub pre_root: NodeId,
	pub pre_version: Version,
	pub pre_totals: TextMetrics,
	pub pre_cursors: Vec<(CursorId, Coordinates)>,
	/// Tracked end-of-file position of a path source, if any.
	pub pre_eof: Option<usize>,
}

/// What the document must do after a commit or rollback call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransactionOutcome {
	/// Still nested; nothing to do.
	StillActive,
	/// Outermost commit: publish the pending revision.
	Publish,
	/// Outermost exit after a rollback: restore the pre-transaction state.
	Restore,
}

impl Transaction {
	pub fn new(
		name: Option<String>,
		pending: Revision,
		pre_root: NodeId,
		pre_version: Version,
		pre_totals: TextMetrics,
		pre_cursors: Vec<(CursorId, Coordinates)>,
		pre_eof: Option<usize>,
	) -> Self {
		Self {
			depth: 1,
			poisoned: false,
			pending,
			has_mutations: false,
			name,
			pre_root,
			pre_version,
			pre_totals,
			pre_cursors,
			pre_eof,
		}
	}

	pub fn depth(&self) -> u32 {
		self.depth
	}

	pub fn is_poisoned(&self) -> bool {
		self.poisoned
	}

	/// Inner `begin` while already active.
	pub fn enter(&mut self) {
		self.depth += 1;
	}

	/// A commit call. At depth 0 the caller publishes, unless the
	/// transaction was poisoned by an inner rollback.
	pub fn commit(&mut self) -> Result<TransactionOutcome> {
		self.depth -= 1;
		if self.depth > 0 {
			return Ok(TransactionOutcome::StillActive);
		}
		if self.poisoned {
			Err(Error::TransactionPoisoned)
		} else {
			Ok(TransactionOutcome::Publish)
		}
	}

	/// A rollback call. Poisons the transaction; at depth 0 the caller
	/// restores the captured state.
	pub fn rollback(&mut self) -> TransactionOutcome {
		self.poisoned = true;
		self.depth -= 1;
		if self.depth > 0 {
			TransactionOutcome::StillActive
		} else {
			TransactionOutcome::Restore
		}
	}
}
