//! Warm-storage trust tracking.
//!
//! The backing file can change under us. Every detected metadata change
//! bumps a document-level counter; each warm leaf remembers the counter
//! value at its last successful hash verification. A leaf's trust level
//! falls out of comparing the two, plus whether the application has been
//! told about an unresolved change.

use vellum_primitives::{SourceChange, TrustLevel};

use crate::fs::SourceMetadata;
use crate::rope::LeafSnapshot;

/// Document-side record of the backing file's identity.
#[derive(Debug, Clone)]
pub(crate) struct SourceTracking {
	/// Metadata matching the content the document was built from. Updated
	/// when an append is absorbed or a change is acknowledged.
	pub recorded: SourceMetadata,
	/// Metadata seen by the most recent check; drives counter bumps.
	pub last_seen: SourceMetadata,
	/// Incremented on every detected metadata change.
	pub change_counter: u64,
	/// The application was notified of a change and has not resolved it.
	pub suspended: bool,
}

impl SourceTracking {
	pub fn new(meta: SourceMetadata) -> Self {
		Self {
			recorded: meta,
			last_seen: meta,
			change_counter: 0,
			suspended: false,
		}
	}

	/// Folds a fresh stat into the tracking state, returning the
	/// classification relative to the recorded content.
	pub fn observe(&mut self, meta: Option<SourceMetadata>) -> SourceChange {
		let change = classify(&self.recorded, meta);
		if let Some(meta) = meta {
			if meta != self.last_seen {
				self.change_counter += 1;
				self.last_seen = meta;
			}
		} else if self.last_seen.size != u64::MAX {
			// First observation of the deletion.
			self.change_counter += 1;
			self.last_seen.size = u64::MAX;
		}
		change
	}

	/// Trust level of one leaf under this tracking state.
	pub fn leaf_trust(&self, leaf: &LeafSnapshot) -> TrustLevel {
		if self.change_counter == 0 {
			TrustLevel::Full
		} else if leaf.verified_at() == self.change_counter {
			TrustLevel::Verified
		} else if self.suspended {
			TrustLevel::Suspended
		} else {
			TrustLevel::Stale
		}
	}
}

/// Classifies a stat result against the recorded state of the backing
/// file.
pub(crate) fn classify(recorded: &SourceMetadata, now: Option<SourceMetadata>) -> SourceChange {
	let Some(now) = now else {
		return SourceChange::Deleted;
	};
	if now.inode != recorded.inode {
		return SourceChange::Replaced;
	}
	if now.size < recorded.size {
		return SourceChange::Truncated;
	}
	if now.size > recorded.size {
		return SourceChange::Appended {
			bytes: now.size - recorded.size,
		};
	}
	if now.mtime != recorded.mtime {
		return SourceChange::Modified;
	}
	SourceChange::Unchanged
}
