//! Backing-file change handling.
//!
//! A path-sourced document records its file's identity at open. Explicit
//! checks (and the watcher's periodic ones) stat the file, classify the
//! difference, and bump the change counter warm reads verify against.
//! Detected growth can be absorbed as an append when the bytes straddling
//! the original end of file still hash to what was recorded.

use std::sync::atomic::Ordering;

use tracing::{debug, warn};
use vellum_primitives::{AppendPolicy, Error, Result, SourceChange, SourceResolution};

use crate::document::{DocIo, DocShared, Document, DocumentInner, TailRecord};
use crate::fs::{FileHandle, SourceMetadata};
use crate::storage::trust::SourceTracking;

use super::mutation::{EditKind, commit_edit};

impl Document {
	/// Stats the backing file and classifies any change. Appends are
	/// absorbed here when the append policy says so; other changes only
	/// update the trust state. Documents without a path source fail with
	/// `NoDataSource`.
	pub fn check_source(&self) -> Result<SourceChange> {
		let mut inner = self.shared.inner.write();
		let src = inner.source.as_mut().ok_or(Error::NoDataSource)?;
		let meta = stat(&self.shared, &src.path)?;
		let change = src.tracking.observe(meta);
		if change == SourceChange::Unchanged {
			return Ok(change);
		}
		debug!(doc = self.shared.id.0, ?change, "source change");

		if let SourceChange::Appended { bytes } = change {
			let policy = inner.append_policy;
			let absorb = matches!(policy, AppendPolicy::Once | AppendPolicy::Continuous);
			if absorb {
				if verify_tail(&self.shared, &inner)? {
					let meta = meta.expect("appended implies the file exists");
					absorb_append(&self.shared, &mut inner, meta, bytes)?;
					if policy == AppendPolicy::Once {
						inner.append_policy = AppendPolicy::Ask;
					}
				} else {
					warn!(doc = self.shared.id.0, "append tail verification failed");
					if let Some(src) = inner.source.as_mut() {
						src.tracking.suspended = true;
					}
					return Ok(SourceChange::Modified);
				}
			}
		}
		Ok(change)
	}

	/// One watcher tick: check, then notify the handler (outside the
	/// document lock) for changes the policy wants surfaced.
	pub(crate) fn poll_source(&self) -> Result<()> {
		let change = self.check_source()?;
		let notify = match change {
			SourceChange::Unchanged => false,
			SourceChange::Appended { .. } => {
				let policy = self.shared.inner.read().append_policy;
				matches!(policy, AppendPolicy::Ask | AppendPolicy::Never)
			}
			_ => true,
		};
		if !notify {
			return Ok(());
		}
		{
			let mut inner = self.shared.inner.write();
			if let Some(src) = inner.source.as_mut() {
				src.tracking.suspended = true;
			}
		}
		if let Some(handler) = &self.shared.change_handler {
			handler(change);
		}
		Ok(())
	}

	/// Resolves an acknowledged source change: either reload content from
	/// disk as a new revision, or adopt the in-memory version as canonical
	/// by pulling every warm leaf into memory. Both reset the change
	/// counter.
	pub fn acknowledge_source_change(&self, resolution: SourceResolution) -> Result<()> {
		let mut inner = self.shared.inner.write();
		inner.source.as_ref().ok_or(Error::NoDataSource)?;
		match resolution {
			SourceResolution::ReloadFromDisk => {
				let (path, handle) = {
					let src = inner.source.as_ref().expect("checked");
					(src.path.clone(), src.handle)
				};
				let meta = self
					.shared
					.fs
					.metadata(&path)?;
				let bytes = {
					let _io = self.shared.file_lock.lock();
					self.shared.fs.seek(handle, 0)?;
					self.shared.fs.read(handle, meta.size as usize)?
				};
				let total = inner.totals.bytes;
				commit_edit(
					&self.shared,
					&mut inner,
					0..total,
					&bytes,
					false,
					&[],
					EditKind::Replace {
						a: 0,
						b: total,
						n: bytes.len(),
					},
					Some("reload".to_string()),
					None,
				)?;
				let tail = record_tail(&self.shared, handle, meta.size)?;
				if let Some(src) = inner.source.as_mut() {
					src.tracking = SourceTracking::new(meta);
					src.eof_byte = bytes.len();
					src.tail = tail;
				}
				debug!(doc = self.shared.id.0, bytes = bytes.len(), "reloaded from disk");
			}
			SourceResolution::KeepMemory => {
				thaw_all_warm(&self.shared, &mut inner)?;
				let (path, handle) = {
					let src = inner.source.as_ref().expect("checked");
					(src.path.clone(), src.handle)
				};
				let meta = stat(&self.shared, &path)?;
				let tail = match meta {
					Some(meta) => record_tail(&self.shared, handle, meta.size)?,
					None => None,
				};
				let total = inner.totals.bytes;
				if let Some(src) = inner.source.as_mut() {
					src.eof_byte = total;
					src.tail = tail;
					match meta {
						Some(meta) => src.tracking = SourceTracking::new(meta),
						None => {
							src.tracking.change_counter = 0;
							src.tracking.suspended = false;
						}
					}
				}
				debug!(doc = self.shared.id.0, "memory version adopted");
			}
		}
		Ok(())
	}
}

fn stat(shared: &DocShared, path: &std::path::Path) -> Result<Option<SourceMetadata>> {
	match shared.fs.metadata(path) {
		Ok(meta) => Ok(Some(meta)),
		Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(e),
	}
}

/// Records the identity of the file's last span (at most one leaf's
/// worth), for verifying later growth after local edits.
pub(crate) fn record_tail(
	shared: &DocShared,
	handle: FileHandle,
	size: u64,
) -> Result<Option<TailRecord>> {
	if size == 0 {
		return Ok(None);
	}
	let len = (size as usize).min(shared.max_leaf);
	let offset = size - len as u64;
	let bytes = {
		let _io = shared.file_lock.lock();
		shared.fs.seek(handle, offset)?;
		shared.fs.read(handle, len)?
	};
	if bytes.len() != len {
		return Ok(None);
	}
	Ok(Some(TailRecord {
		offset,
		len,
		hash: seahash::hash(&bytes),
	}))
}

/// Verifies the bytes straddling the recorded end of file against their
/// recorded hash.
///
/// The first choice is the live leaf at the tracked end-of-file position -
/// its file span must end exactly at the recorded size, so a leaf rebuilt
/// by local edits (which has no file span) never vouches for disk state.
/// In that case the span recorded when the file was last read is checked
/// directly. A file that was empty when recorded has nothing to corrupt.
fn verify_tail(shared: &DocShared, inner: &DocumentInner) -> Result<bool> {
	let src = inner.source.as_ref().expect("caller checked");
	let recorded_size = src.tracking.recorded.size;
	if recorded_size == 0 {
		return Ok(true);
	}

	{
		let io = DocIo::new(shared, inner);
		let tree = inner.tree(&io);
		if src.eof_byte > 0
			&& let Ok(hit) = tree.leaf_at_byte(inner.root, src.eof_byte - 1)
			&& let Some(leaf) = hit.snap.as_leaf()
			&& let (Some(offset), Some(hash)) = (leaf.original_file_offset, leaf.hash)
			&& offset + leaf.metrics.bytes as u64 == recorded_size
		{
			let bytes = {
				let _io = shared.file_lock.lock();
				shared.fs.seek(src.handle, offset)?;
				shared.fs.read(src.handle, leaf.metrics.bytes)?
			};
			return Ok(bytes.len() == leaf.metrics.bytes && seahash::hash(&bytes) == hash);
		}
	}

	let Some(tail) = src.tail else {
		return Ok(false);
	};
	let bytes = {
		let _io = shared.file_lock.lock();
		shared.fs.seek(src.handle, tail.offset)?;
		shared.fs.read(src.handle, tail.len)?
	};
	Ok(bytes.len() == tail.len && seahash::hash(&bytes) == tail.hash)
}

/// Reads the appended tail and commits it to the end of the document.
fn absorb_append(
	shared: &DocShared,
	inner: &mut DocumentInner,
	meta: SourceMetadata,
	appended: u64,
) -> Result<()> {
	let (handle, old_size) = {
		let src = inner.source.as_ref().expect("caller checked");
		(src.handle, src.tracking.recorded.size)
	};
	let bytes = {
		let _io = shared.file_lock.lock();
		shared.fs.seek(handle, old_size)?;
		shared.fs.read(handle, appended as usize)?
	};
	let total = inner.totals.bytes;
	commit_edit(
		shared,
		inner,
		total..total,
		&bytes,
		false,
		&[],
		EditKind::Insert {
			at: total,
			n: bytes.len(),
			insert_before: false,
		},
		Some("append".to_string()),
		None,
	)?;
	let new_total = inner.totals.bytes;
	let tail = record_tail(shared, handle, meta.size)?;
	if let Some(src) = inner.source.as_mut() {
		src.tracking.recorded = meta;
		// The absorbed bytes extend the recorded content to the document
		// end; future growth is verified against the new tail.
		src.eof_byte = new_total;
		src.tail = tail;
	}
	debug!(doc = shared.id.0, bytes = bytes.len(), "append absorbed");
	Ok(())
}

/// Pulls every warm leaf's bytes into memory, trusting current disk
/// content (length-checked only).
fn thaw_all_warm(shared: &DocShared, inner: &mut DocumentInner) -> Result<()> {
	let src = inner.source.as_ref().ok_or(Error::NoDataSource)?;
	let handle = src.handle;
	let mut thawed = 0usize;
	let mut failed = false;
	inner.registry.for_each_snapshot(|_, _, snap| {
		let Some(leaf) = snap.as_leaf() else { return };
		if failed
			|| leaf.payload_if_memory().is_some()
			|| leaf.cold_block().is_some()
			|| leaf.original_file_offset.is_none()
		{
			return;
		}
		let offset = leaf.original_file_offset.expect("checked");
		let bytes = {
			let _io = shared.file_lock.lock();
			if shared.fs.seek(handle, offset).is_err() {
				failed = true;
				return;
			}
			match shared.fs.read(handle, leaf.metrics.bytes) {
				Ok(b) => b,
				Err(_) => {
					failed = true;
					return;
				}
			}
		};
		if bytes.len() != leaf.metrics.bytes {
			failed = true;
			return;
		}
		let payload: std::sync::Arc<[u8]> = bytes.into();
		shared.resident.fetch_add(payload.len(), Ordering::Relaxed);
		leaf.set_memory(payload);
		thawed += 1;
	});
	if failed {
		return Err(Error::WarmStorageMismatch);
	}
	debug!(doc = shared.id.0, thawed, "warm leaves pulled into memory");
	Ok(())
}
