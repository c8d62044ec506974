//! Tiered storage: the cold store interface and the block codec.
//!
//! A leaf's payload lives in one of three tiers - process memory, the
//! backing file ("warm"), or the library's cold store. Chilling encodes a
//! leaf's payload together with its decoration list and hands the block to
//! a [`ColdStorage`] backend under `(folder, block)` keys; folders are
//! document-unique, blocks are derived from the snapshot's identity.

use std::path::PathBuf;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use vellum_primitives::{Error, Result};

use crate::decoration::Decoration;

pub(crate) mod chill;
#[cfg(test)]
mod tests;
pub(crate) mod trust;
pub(crate) mod watch;

/// Blob store for chilled leaf payloads.
///
/// Implementations must be safe to call from any thread; the library shares
/// one backend across all documents.
pub trait ColdStorage: Send + Sync {
	fn put(&self, folder: &str, block: &str, bytes: &[u8]) -> Result<()>;
	fn get(&self, folder: &str, block: &str) -> Result<Vec<u8>>;
	fn delete(&self, folder: &str, block: &str) -> Result<()>;
}

/// [`ColdStorage`] held in memory, for tests and scratch use.
#[derive(Default)]
pub struct MemoryColdStorage {
	blocks: Mutex<FxHashMap<(String, String), Vec<u8>>>,
}

impl MemoryColdStorage {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of blocks stored under `folder`.
	pub fn block_count(&self, folder: &str) -> usize {
		self.blocks
			.lock()
			.keys()
			.filter(|(f, _)| f == folder)
			.count()
	}
}

impl ColdStorage for MemoryColdStorage {
	fn put(&self, folder: &str, block: &str, bytes: &[u8]) -> Result<()> {
		self.blocks
			.lock()
			.insert((folder.to_string(), block.to_string()), bytes.to_vec());
		Ok(())
	}

	fn get(&self, folder: &str, block: &str) -> Result<Vec<u8>> {
		self.blocks
			.lock()
			.get(&(folder.to_string(), block.to_string()))
			.cloned()
			.ok_or_else(|| Error::Io(std::io::Error::from(std::io::ErrorKind::NotFound)))
	}

	fn delete(&self, folder: &str, block: &str) -> Result<()> {
		self.blocks
			.lock()
			.remove(&(folder.to_string(), block.to_string()));
		Ok(())
	}
}

/// [`ColdStorage`] backed by a directory tree: one file per block under
/// `root/folder/block`.
pub struct DirColdStorage {
	root: PathBuf,
}

impl DirColdStorage {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}
}

impl ColdStorage for DirColdStorage {
	fn put(&self, folder: &str, block: &str, bytes: &[u8]) -> Result<()> {
		let dir = self.root.join(folder);
		std::fs::create_dir_all(&dir)?;
		std::fs::write(dir.join(block), bytes)?;
		Ok(())
	}

	fn get(&self, folder: &str, block: &str) -> Result<Vec<u8>> {
		Ok(std::fs::read(self.root.join(folder).join(block))?)
	}

	fn delete(&self, folder: &str, block: &str) -> Result<()> {
		std::fs::remove_file(self.root.join(folder).join(block))?;
		Ok(())
	}
}

/// On-cold-storage form of one chilled leaf.
#[derive(Serialize, Deserialize)]
struct ColdBlock {
	decorations: Vec<(String, u64)>,
	payload: Vec<u8>,
}

/// Encodes a leaf's payload and decoration list into a cold block.
pub(crate) fn encode_block(payload: &[u8], decorations: &[Decoration]) -> Vec<u8> {
	let block = ColdBlock {
		decorations: decorations
			.iter()
			.map(|d| (d.key.to_string(), d.offset as u64))
			.collect(),
		payload: payload.to_vec(),
	};
	postcard::to_allocvec(&block).expect("cold block serialization cannot fail")
}

/// Decodes a cold block back into its payload bytes.
pub(crate) fn decode_block(bytes: &[u8]) -> Result<Vec<u8>> {
	let block: ColdBlock = postcard::from_bytes(bytes).map_err(|e| {
		Error::Io(std::io::Error::new(
			std::io::ErrorKind::InvalidData,
			format!("corrupt cold block: {e}"),
		))
	})?;
	Ok(block.payload)
}
