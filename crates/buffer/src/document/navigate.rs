//! History navigation and transactions.

use tracing::debug;
use vellum_primitives::{Error, ForkId, Result, Revision, Version};

use crate::document::{DocIo, DocShared, Document, DocumentInner};
use crate::history::{RevisionInfo, Transaction, TransactionOutcome};
use crate::rope::TreeRead;
use crate::storage::chill;

use super::mutation::{checkpoint_inner, dissolve_region_inner};

impl Document {
	/// Moves to revision `rev` within the current fork.
	///
	/// Active regions are checkpointed first (their own revision). Fails
	/// with `TransactionPending` while a transaction is active and
	/// `RevisionNotFound` past the fork's highest revision.
	pub fn undo_seek(&self, rev: Revision) -> Result<()> {
		let mut inner = self.shared.inner.write();
		if inner.txn.is_some() {
			return Err(Error::TransactionPending);
		}
		checkpoint_inner(&self.shared, &mut inner)?;
		let fork = inner.current.fork;
		let highest = inner.forks.get(fork)?.highest_revision;
		if rev > highest {
			return Err(Error::RevisionNotFound(rev));
		}
		seek_to(&self.shared, &mut inner, Version::new(fork, rev))
	}

	/// Switches to fork `fork`, landing on the revision both forks share.
	///
	/// The common revision is the branch point when one fork descends from
	/// the other, the earlier divergence point for sibling forks, and 0
	/// for unrelated forks (revision 0 of every fork is always defined).
	pub fn fork_seek(&self, fork: ForkId) -> Result<()> {
		let mut inner = self.shared.inner.write();
		if inner.txn.is_some() {
			return Err(Error::TransactionPending);
		}
		checkpoint_inner(&self.shared, &mut inner)?;
		let highest = inner.forks.get(fork)?.highest_revision;
		let common = inner.forks.common_revision(inner.current.fork, fork);
		seek_to(&self.shared, &mut inner, Version::new(fork, common.min(highest)))
	}

	/// Starts a transaction (or nests one level deeper).
	///
	/// The outermost start checkpoints active regions and, when the
	/// document is not at HEAD, auto-forks so the pending revision lands
	/// on the new fork.
	pub fn begin_transaction(&self, name: Option<&str>) -> Result<()> {
		let mut inner = self.shared.inner.write();
		if let Some(txn) = &mut inner.txn {
			txn.enter();
			return Ok(());
		}
		checkpoint_inner(&self.shared, &mut inner)?;
		ensure_at_head(&mut inner);
		let pending = inner.current.rev + 1;
		let pre_cursors = inner
			.cursors
			.iter()
			.map(|(&id, c)| (id, c.coords))
			.collect();
		let pre_eof = inner.source.as_ref().map(|s| s.eof_byte);
		inner.txn = Some(Transaction::new(
			name.map(String::from),
			pending,
			inner.root,
			inner.current,
			inner.totals,
			pre_cursors,
			pre_eof,
		));
		debug!(doc = self.shared.id.0, pending, "transaction started");
		Ok(())
	}

	/// Commits one transaction level. The outermost commit publishes the
	/// pending revision - even an empty transaction produces one - after
	/// dissolving regions created inside the transaction.
	pub fn commit_transaction(&self) -> Result<Version> {
		let mut inner = self.shared.inner.write();
		let Some(txn) = &inner.txn else {
			return Err(Error::NoTransaction);
		};
		let closing = txn.depth() == 1;
		let poisoned = txn.is_poisoned();
		let pending = Version::new(inner.current.fork, txn.pending);

		if closing && !poisoned {
			let owned: Vec<_> = inner
				.cursors
				.iter()
				.filter_map(|(&id, c)| {
					c.region.as_ref().and_then(|r| r.txn_owned.then_some(id))
				})
				.collect();
			for id in owned {
				dissolve_region_inner(&self.shared, &mut inner, id)?;
			}
		}

		let outcome = inner.txn.as_mut().expect("checked above").commit();
		match outcome {
			Ok(TransactionOutcome::StillActive) => Ok(pending),
			Ok(TransactionOutcome::Publish) => {
				let txn = inner.txn.take().expect("publishing");
				let root = inner.root;
				inner.revisions.record(
					pending,
					RevisionInfo {
						name: txn.name,
						has_changes: txn.has_mutations,
						root,
						cursors: txn.pre_cursors,
					},
				);
				inner.forks.bump_highest(pending.fork, pending.rev);
				inner.current = pending;
				for cursor in inner.cursors.values_mut() {
					cursor.remember(pending);
				}
				chill::enforce_hard_limit(&self.shared, &mut inner);
				debug!(doc = self.shared.id.0, at = %pending, "transaction committed");
				Ok(pending)
			}
			Ok(TransactionOutcome::Restore) => unreachable!("commit never restores"),
			Err(e) => {
				if inner.txn.as_ref().is_some_and(|t| t.depth() == 0) {
					restore_rollback(&self.shared, &mut inner);
				}
				Err(e)
			}
		}
	}

	/// Rolls back one transaction level, poisoning the whole transaction.
	/// When the outermost level exits, the pre-transaction state comes
	/// back: root, version, cursor positions; regions are discarded.
	pub fn rollback_transaction(&self) -> Result<()> {
		let mut inner = self.shared.inner.write();
		let Some(txn) = &mut inner.txn else {
			return Err(Error::NoTransaction);
		};
		match txn.rollback() {
			TransactionOutcome::StillActive => Ok(()),
			TransactionOutcome::Restore => {
				restore_rollback(&self.shared, &mut inner);
				Ok(())
			}
			TransactionOutcome::Publish => unreachable!("rollback never publishes"),
		}
	}
}

/// Auto-forks when the document is not at its fork's newest revision.
pub(crate) fn ensure_at_head(inner: &mut DocumentInner) {
	let highest = inner
		.forks
		.get(inner.current.fork)
		.expect("current fork exists")
		.highest_revision;
	if inner.current.rev == highest {
		return;
	}
	let pre_cursors = inner
		.cursors
		.iter()
		.map(|(&id, c)| (id, c.coords))
		.collect();
	let fork = inner.forks.create(inner.current);
	inner.revisions.record(
		Version::new(fork, 0),
		RevisionInfo {
			name: None,
			has_changes: false,
			root: inner.root,
			cursors: pre_cursors,
		},
	);
	inner.current = Version::new(fork, 0);
	debug!(fork = %fork, "auto-fork");
}

fn seek_to(shared: &DocShared, inner: &mut DocumentInner, target: Version) -> Result<()> {
	let info = inner
		.revisions
		.get(target)
		.ok_or(Error::RevisionNotFound(target.rev))?;
	let root = info.root;
	inner.current = target;
	inner.root = root;
	let totals = {
		let io = DocIo::new(shared, inner);
		TreeRead {
			reg: &inner.registry,
			forks: &inner.forks,
			io: &io,
			at: target,
		}
		.metrics(root)
	};
	inner.totals = totals;
	if let Some(src) = inner.source.as_mut() {
		// Navigation replaces content wholesale; the clamped position is a
		// best guess, and the recorded tail span stays the verification
		// basis when it no longer names the straddling leaf.
		src.eof_byte = src.eof_byte.min(totals.bytes);
	}

	// Restore each cursor from its history, clamping the ones that never
	// observed this version, then fill in full coordinates for the
	// clamped ones.
	let mut clamped: Vec<(crate::cursor::CursorId, usize)> = Vec::new();
	for (&id, cursor) in &mut inner.cursors {
		if !cursor.restore(target, totals.bytes) {
			clamped.push((id, cursor.coords.byte));
		}
	}
	for (id, byte) in clamped {
		let coords = {
			let io = DocIo::new(shared, inner);
			inner.tree(&io).coords_of_byte(root, byte)
		};
		if let Ok(coords) = coords
			&& let Some(cursor) = inner.cursors.get_mut(&id)
		{
			cursor.coords = coords;
		}
	}
	inner.refresh_ready(shared);
	shared.cache.lock().clear();
	debug!(at = %target, bytes = totals.bytes, "seek");
	Ok(())
}

fn restore_rollback(shared: &DocShared, inner: &mut DocumentInner) {
	let txn = inner.txn.take().expect("rollback with transaction");
	let pending = Version::new(txn.pre_version.fork, txn.pending);
	inner.registry.purge(pending);
	inner.root = txn.pre_root;
	inner.totals = txn.pre_totals;
	inner.current = txn.pre_version;
	if let (Some(src), Some(eof)) = (inner.source.as_mut(), txn.pre_eof) {
		src.eof_byte = eof;
	}
	for cursor in inner.cursors.values_mut() {
		cursor.region = None;
		cursor.history.remove(&pending);
	}
	let total_bytes = inner.totals.bytes;
	for (id, coords) in txn.pre_cursors {
		if let Some(cursor) = inner.cursors.get_mut(&id) {
			cursor.coords = coords;
			cursor.last_observed = txn.pre_version;
		}
	}
	// Cursors created inside the transaction have no recorded position;
	// clamp them.
	for cursor in inner.cursors.values_mut() {
		if cursor.coords.byte > total_bytes {
			cursor.coords.byte = total_bytes;
		}
	}
	shared.cache.lock().clear();
	debug!(doc = shared.id.0, back_to = %txn.pre_version, "transaction rolled back");
}
