//! Key-to-leaf lookup hints.
//!
//! The cache is a hint, never a source of truth: every use validates the
//! entry against the actual leaf at the current version and repairs the
//! entry on a miss.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::rope::NodeId;

/// Cached guess for where a decoration key lives.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CacheEntry {
	pub node: NodeId,
	/// Leaf-relative offset at the time the entry was written.
	pub rel: usize,
	/// Absolute byte position at the time the entry was written.
	pub abs: usize,
}

#[derive(Debug, Default)]
pub(crate) struct DecorationCache {
	entries: FxHashMap<Arc<str>, CacheEntry>,
}

impl DecorationCache {
	pub fn get(&self, key: &str) -> Option<CacheEntry> {
		self.entries.get(key).copied()
	}

	pub fn record(&mut self, key: Arc<str>, node: NodeId, rel: usize, abs: usize) {
		self.entries.insert(key, CacheEntry { node, rel, abs });
	}

	pub fn forget(&mut self, key: &str) {
		self.entries.remove(key);
	}

	pub fn clear(&mut self) {
		self.entries.clear();
	}
}
