//! Payload resolution across storage tiers.
//!
//! Every tree read that needs leaf bytes goes through [`DocIo`]: memory
//! payloads come back directly, cold blocks are fetched from the cold store
//! and reinstated on the snapshot, warm spans are read from the backing
//! file and verified against the recorded hash when the source has changed
//! since the leaf was last trusted.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::trace;
use vellum_primitives::{Error, Result};

use crate::document::{DocShared, DocumentInner};
use crate::fs::FileHandle;
use crate::rope::{LeafSnapshot, PayloadFetch};
use crate::storage::decode_block;

struct WarmContext {
	handle: FileHandle,
	change_counter: u64,
}

pub(crate) struct DocIo<'a> {
	shared: &'a DocShared,
	warm: Option<WarmContext>,
}

impl<'a> DocIo<'a> {
	pub fn new(shared: &'a DocShared, inner: &DocumentInner) -> Self {
		Self {
			shared,
			warm: inner.source.as_ref().map(|src| WarmContext {
				handle: src.handle,
				change_counter: src.tracking.change_counter,
			}),
		}
	}
}

impl PayloadFetch for DocIo<'_> {
	fn fetch(&self, leaf: &LeafSnapshot) -> Result<Arc<[u8]>> {
		let stamp = self.shared.clock.fetch_add(1, Ordering::Relaxed) + 1;

		if let Some(payload) = leaf.payload_if_memory() {
			leaf.touch(stamp);
			return Ok(payload);
		}

		if let Some(block) = leaf.cold_block() {
			let cold = self.shared.cold.as_ref().ok_or(Error::NotSupported)?;
			let bytes = cold.get(&self.shared.folder, &block)?;
			let payload: Arc<[u8]> = decode_block(&bytes)?.into();
			trace!(doc = self.shared.id.0, %block, bytes = payload.len(), "thaw");
			self.shared
				.resident
				.fetch_add(payload.len(), Ordering::Relaxed);
			leaf.set_memory(payload.clone());
			leaf.touch(stamp);
			return Ok(payload);
		}

		// Warm: the leaf references the backing file and never owns its
		// bytes in memory.
		let warm = self.warm.as_ref().ok_or(Error::FileNotOpen)?;
		let offset = leaf.original_file_offset.ok_or(Error::FileNotOpen)?;
		let bytes = {
			let _io = self.shared.file_lock.lock();
			self.shared.fs.seek(warm.handle, offset)?;
			self.shared.fs.read(warm.handle, leaf.metrics.bytes)?
		};
		if bytes.len() != leaf.metrics.bytes {
			return Err(Error::WarmStorageMismatch);
		}
		if warm.change_counter > leaf.verified_at() {
			match leaf.hash {
				Some(hash) if seahash::hash(&bytes) == hash => {
					leaf.mark_verified(warm.change_counter);
				}
				_ => return Err(Error::WarmStorageMismatch),
			}
		}
		Ok(Arc::from(bytes))
	}
}
