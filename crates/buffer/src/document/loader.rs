//! Initial content loading.
//!
//! A document loads from exactly one source: a string, a byte slice, a
//! file path, or a channel of byte chunks. Channel sources load lazily:
//! `open` returns once the configured ready threshold is met and a loader
//! thread keeps appending chunks, amending revision 0 in place so the
//! fully loaded content is what `undo_seek(0)` restores. Loading appends
//! are not undoable.

use std::sync::mpsc::Receiver;
use std::time::Duration;

use tracing::{debug, trace};
use vellum_primitives::{Error, LoadingStyle, ReadyThreshold, Result, TextMetrics, Version};

use crate::document::{DocIo, DocShared, Document, DocumentInner};
use crate::fs::{FileHandle, FileMode};
use crate::rope::{LeafSnapshot, Snapshot, TreeOps};
use crate::storage::trust::SourceTracking;

use super::SourceState;
use super::mutation::run_splice;

/// Whether the loaded totals satisfy a ready threshold.
pub(crate) fn threshold_met(totals: TextMetrics, threshold: ReadyThreshold) -> bool {
	match threshold {
		ReadyThreshold::Whole => false,
		ReadyThreshold::Bytes(n) => totals.bytes >= n,
		ReadyThreshold::Chars(n) => totals.chars >= n,
		ReadyThreshold::Lines(n) => totals.newlines >= n,
	}
}

/// Replaces the initial empty root with content built from `bytes`,
/// amending revision 0.
pub(crate) fn load_bytes(shared: &DocShared, inner: &mut DocumentInner, bytes: &[u8]) {
	let at = Version::ORIGIN;
	let root = {
		let io = DocIo::new(shared, inner);
		let inner = &mut *inner;
		let mut ops = TreeOps {
			reg: &mut inner.registry,
			forks: &inner.forks,
			dedup: &mut inner.dedup,
			io: &io,
			read_at: at,
			write_at: at,
			max_leaf: shared.max_leaf,
			rebalance_budget: shared.rebalance_budget,
		};
		ops.build_from_bytes(bytes)
	};
	finish_root_swap(shared, inner, at, root);
}

/// Builds a warm tree over a file: metrics are scanned while streaming,
/// payloads stay on disk.
pub(crate) fn load_warm(
	shared: &DocShared,
	inner: &mut DocumentInner,
	handle: FileHandle,
	size: u64,
) -> Result<()> {
	let at = Version::ORIGIN;
	let mut leaves = Vec::new();
	let mut carry: Vec<u8> = Vec::new();
	let mut file_offset = 0u64;
	let mut read_pos = 0u64;

	shared.fs.seek(handle, 0)?;
	loop {
		let want = shared.max_leaf - carry.len();
		let chunk = shared.fs.read(handle, want)?;
		let at_eof = read_pos + chunk.len() as u64 >= size || chunk.is_empty();
		read_pos += chunk.len() as u64;
		carry.extend_from_slice(&chunk);
		if carry.is_empty() {
			break;
		}
		let cut = if at_eof {
			carry.len()
		} else {
			let cut = vellum_primitives::metrics::floor_char_boundary(&carry, carry.len());
			if cut == 0 { carry.len() } else { cut }
		};
		let piece = &carry[..cut];
		let (metrics, line_starts) = vellum_primitives::metrics::scan(piece);
		let hash = seahash::hash(piece);
		leaves.push(inner.registry.insert(
			at,
			Snapshot::Leaf(LeafSnapshot::warm(metrics, line_starts, file_offset, hash)),
		));
		file_offset += cut as u64;
		carry.drain(..cut);
		if at_eof && carry.is_empty() {
			break;
		}
	}

	let root = {
		let io = DocIo::new(shared, inner);
		let inner = &mut *inner;
		let mut ops = TreeOps {
			reg: &mut inner.registry,
			forks: &inner.forks,
			dedup: &mut inner.dedup,
			io: &io,
			read_at: at,
			write_at: at,
			max_leaf: shared.max_leaf,
			rebalance_budget: shared.rebalance_budget,
		};
		ops.build_balanced(&leaves)
	};
	finish_root_swap(shared, inner, at, root);
	Ok(())
}

/// Opens a path source, loading per the document's loading style.
pub(crate) fn load_path(
	shared: &DocShared,
	inner: &mut DocumentInner,
	path: &std::path::Path,
) -> Result<()> {
	let meta = shared.fs.metadata(path)?;
	let handle = shared.fs.open(path, FileMode::Read)?;
	match shared.loading_style {
		LoadingStyle::AllTiers => load_warm(shared, inner, handle, meta.size)?,
		LoadingStyle::MemoryOnly | LoadingStyle::ColdAndMemory => {
			shared.fs.seek(handle, 0)?;
			let bytes = shared.fs.read(handle, meta.size as usize)?;
			load_bytes(shared, inner, &bytes);
		}
	}
	let tail = super::source::record_tail(shared, handle, meta.size)?;
	inner.source = Some(SourceState {
		path: path.to_path_buf(),
		handle,
		tracking: SourceTracking::new(meta),
		eof_byte: inner.totals.bytes,
		tail,
	});
	inner.load.complete = true;
	Ok(())
}

/// Appends one chunk of loaded content, amending the current revision in
/// place. Cursor positions do not move; readiness is re-evaluated.
pub(crate) fn append_amend(shared: &DocShared, inner: &mut DocumentInner, bytes: &[u8]) -> Result<()> {
	let at = inner.current;
	let total = inner.totals.bytes;
	let outcome = run_splice(shared, inner, at, total..total, bytes, false, &[])?;
	inner.root = outcome.root;
	inner.totals = TextMetrics {
		bytes: inner.totals.bytes + outcome.inserted_metrics.bytes,
		chars: inner.totals.chars + outcome.inserted_metrics.chars,
		newlines: inner.totals.newlines + outcome.inserted_metrics.newlines,
	};
	if let Some(info) = inner.revisions.get_mut(at) {
		info.root = inner.root;
	}
	inner.refresh_ready(shared);
	trace!(doc = shared.id.0, bytes = bytes.len(), total = inner.totals.bytes, "load append");
	Ok(())
}

/// Consumes the channel synchronously until `ready` is satisfied (or the
/// channel closes). Returns the receiver when loading must continue in the
/// background.
pub(crate) fn load_channel_until_ready(
	shared: &DocShared,
	inner: &mut DocumentInner,
	rx: Receiver<Vec<u8>>,
	ready: ReadyThreshold,
) -> Result<Option<Receiver<Vec<u8>>>> {
	loop {
		if threshold_met(inner.totals, ready) {
			return Ok(Some(rx));
		}
		match rx.recv() {
			Ok(chunk) => append_amend(shared, inner, &chunk)?,
			Err(_) => {
				inner.load.complete = true;
				inner.refresh_ready(shared);
				return Ok(None);
			}
		}
	}
}

/// Background loader for the remainder of a channel source.
pub(crate) fn spawn_loader(doc: Document, rx: Receiver<Vec<u8>>) -> std::thread::JoinHandle<()> {
	std::thread::Builder::new()
		.name(format!("vellum-load-{}", doc.id().0))
		.spawn(move || {
			debug!(doc = doc.id().0, "loader started");
			loop {
				if doc.is_shut_down() {
					break;
				}
				match rx.recv() {
					Ok(chunk) => loop {
						{
							let mut inner = doc.shared.inner.write();
							// Amending under an open transaction would be
							// undone by its rollback; wait it out.
							if inner.txn.is_none() {
								if let Err(e) = append_amend(&doc.shared, &mut inner, &chunk) {
									tracing::warn!(doc = doc.id().0, error = %e, "load append failed");
								}
								break;
							}
						}
						std::thread::sleep(Duration::from_millis(1));
						if doc.is_shut_down() {
							return;
						}
					},
					Err(_) => break,
				}
			}
			let mut inner = doc.shared.inner.write();
			inner.load.complete = true;
			inner.refresh_ready(&doc.shared);
			debug!(doc = doc.id().0, total = inner.totals.bytes, "load complete");
		})
		.expect("failed to spawn loader thread")
}

fn finish_root_swap(shared: &DocShared, inner: &mut DocumentInner, at: Version, root: crate::rope::NodeId) {
	inner.root = root;
	let totals = {
		let io = DocIo::new(shared, inner);
		inner.tree(&io).metrics(root)
	};
	inner.totals = totals;
	if let Some(info) = inner.revisions.get_mut(at) {
		info.root = root;
	}
}

/// Validates that exactly one data source is configured.
pub(crate) fn validate_source(options: &vellum_primitives::DocumentOptions) -> Result<()> {
	let count = options.path.is_some() as usize
		+ options.bytes.is_some() as usize
		+ options.text.is_some() as usize
		+ options.channel.is_some() as usize;
	match count {
		0 => Err(Error::NoDataSource),
		1 => Ok(()),
		_ => Err(Error::MultipleDataSources),
	}
}
