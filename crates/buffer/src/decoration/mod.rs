//! Decorations - named position markers that survive edits.
//!
//! A decoration is a `(key, position)` pair attached to the leaf that holds
//! the position, with the offset stored relative to the leaf's start. The
//! sliding rules under insertion and deletion live in the rope's splice
//! path; this module holds the value types, the lookup cache, and the dump
//! format.

use std::sync::Arc;

mod cache;
mod dump;

pub(crate) use cache::DecorationCache;
pub use dump::{format_dump, parse_dump};

/// A named position marker, leaf-relative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoration {
	pub key: Arc<str>,
	/// Byte offset relative to the owning leaf's start.
	pub offset: usize,
}

/// A decoration removed by a deletion, positioned relative to the start of
/// the deleted range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedDecoration {
	pub key: Arc<str>,
	/// Byte offset within the deleted range.
	pub offset: usize,
}

/// One record of a decoration dump: a key and its absolute byte position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpRecord {
	pub key: String,
	pub position: usize,
}

/// Keeps a decoration list sorted by offset, then key.
pub(crate) fn sort_decorations(decorations: &mut [Decoration]) {
	decorations.sort_by(|a, b| a.offset.cmp(&b.offset).then_with(|| a.key.cmp(&b.key)));
}

/// Applies the splice sliding rule to a decoration list: the range `[a, b)`
/// is replaced by `n` new bytes.
///
/// Markers before `a` hold still. Markers inside a deleted range, including
/// one exactly at `a`, come out with offsets relative to `a`. For a pure
/// insertion, a marker exactly at the insert point slides only when
/// `insert_before` says the new bytes go before it. Everything at or past
/// `b` shifts by the length delta, which lands a marker at `b` right after
/// the replacement.
///
/// Offsets in and out share one coordinate space; returned kept offsets are
/// post-splice.
pub(crate) fn splice_decorations(
	decorations: impl IntoIterator<Item = Decoration>,
	a: usize,
	b: usize,
	n: usize,
	insert_before: bool,
) -> (Vec<Decoration>, Vec<RemovedDecoration>) {
	let deleting = b > a;
	let mut kept = Vec::new();
	let mut removed = Vec::new();
	for d in decorations {
		let pos = d.offset;
		if pos < a {
			kept.push(d);
		} else if deleting && pos < b {
			removed.push(RemovedDecoration {
				key: d.key,
				offset: pos - a,
			});
		} else if !deleting && pos == a {
			let offset = if insert_before { pos + n } else { pos };
			kept.push(Decoration { key: d.key, offset });
		} else {
			kept.push(Decoration {
				key: d.key,
				offset: pos - (b - a) + n,
			});
		}
	}
	(kept, removed)
}
