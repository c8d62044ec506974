//! Decoration queries.
//!
//! Positions are reported in logical space: while optimized regions are
//! active, decorations absorbed into a region are answered from the region
//! buffer and tree decorations past a region shift by the region's growth,
//! so callers always see positions consistent with the edits made so far.

use std::ops::Range;
use std::sync::Arc;

use vellum_primitives::{
	Address, Coordinates, DecorationSource, Error, Result, TextMetrics, metrics,
};

use crate::cursor::Region;
use crate::decoration::{DumpRecord, parse_dump};
use crate::document::{DocIo, DocShared, Document, DocumentInner};
use crate::fs::FileMode;

use super::mutation::locate_decoration;

/// Sorted view of the active regions for position translation.
struct Overlay<'a> {
	regions: Vec<&'a Region>,
}

impl<'a> Overlay<'a> {
	fn new(inner: &'a DocumentInner) -> Self {
		let mut regions: Vec<&Region> = inner
			.cursors
			.values()
			.filter_map(|c| c.region.as_ref())
			.collect();
		regions.sort_by_key(|r| r.tree_start);
		Self { regions }
	}

	fn is_empty(&self) -> bool {
		self.regions.is_empty()
	}

	/// Logical position of a tree position, or `None` when a region's
	/// staged copy supersedes it.
	fn logical(&self, tree_pos: usize) -> Option<usize> {
		let mut shift = 0isize;
		for region in &self.regions {
			if tree_pos >= region.tree_start + region.tree_len {
				shift += region.delta();
			} else if tree_pos >= region.tree_start {
				return None;
			}
		}
		Some(tree_pos.saturating_add_signed(shift))
	}

	/// `(logical start, region)` pairs in document order.
	fn regions_logical(&self) -> Vec<(usize, &'a Region)> {
		let mut shift = 0isize;
		let mut out = Vec::with_capacity(self.regions.len());
		for region in &self.regions {
			out.push((region.tree_start.saturating_add_signed(shift), *region));
			shift += region.delta();
		}
		out
	}
}

impl Document {
	/// The decoration's position in all three address modes.
	pub fn decoration_position(&self, key: &str) -> Result<Coordinates> {
		let inner = self.shared.inner.read();
		let overlay = Overlay::new(&inner);

		// Region-staged decorations answer from the buffer.
		for (logical_start, region) in overlay.regions_logical() {
			if let Some(d) = region.decorations.iter().find(|d| d.key.as_ref() == key) {
				return coords_at_logical(&self.shared, &inner, logical_start + d.offset);
			}
		}

		let found = {
			let io = DocIo::new(&self.shared, &inner);
			let tree = inner.tree(&io);
			let mut cache = self.shared.cache.lock();
			locate_decoration(&tree, inner.root, &mut cache, key)
		};
		let Some((_, _, abs)) = found else {
			return Err(Error::InvalidPosition);
		};
		let logical = overlay.logical(abs).ok_or(Error::InvalidPosition)?;
		coords_at_logical(&self.shared, &inner, logical)
	}

	/// All decorations with logical position in `range`, in document
	/// order.
	pub fn decorations_in_range(&self, range: Range<usize>) -> Result<Vec<DumpRecord>> {
		let inner = self.shared.inner.read();
		Ok(collect_decorations(&self.shared, &inner, range))
	}

	/// Decorations whose position falls within line `line`'s byte extent.
	pub fn decorations_on_line(&self, line: usize) -> Result<Vec<DumpRecord>> {
		let inner = self.shared.inner.read();
		let (start, end) = {
			let io = DocIo::new(&self.shared, &inner);
			let tree = inner.tree(&io);
			let start = tree.line_start_byte(inner.root, line)?;
			let end = if line < inner.totals.newlines {
				tree.line_start_byte(inner.root, line + 1)?
			} else {
				inner.totals.bytes + 1
			};
			(start, end)
		};
		let overlay = Overlay::new(&inner);
		let start = overlay.logical(start).unwrap_or(start);
		let end = overlay.logical(end).unwrap_or(end);
		Ok(collect_decorations(&self.shared, &inner, start..end))
	}

	/// Every decoration in the document, in order.
	pub fn dump_decorations(&self) -> Result<Vec<DumpRecord>> {
		let inner = self.shared.inner.read();
		let end = logical_total(&inner) + 1;
		Ok(collect_decorations(&self.shared, &inner, 0..end))
	}

	/// Imports `(key, byte_position)` records as one decoration batch.
	/// Returns the number of records applied.
	pub fn import_decorations(&self, source: DecorationSource) -> Result<usize> {
		let records = self.load_decoration_records(source)?;
		let batch: Vec<(&str, Option<Address>)> = records
			.iter()
			.map(|(key, pos)| (key.as_str(), Some(Address::Byte(*pos))))
			.collect();
		self.decorate(&batch)?;
		Ok(records.len())
	}

	pub(crate) fn load_decoration_records(
		&self,
		source: DecorationSource,
	) -> Result<Vec<(String, usize)>> {
		match source {
			DecorationSource::List(records) => Ok(records),
			DecorationSource::Inline(text) => parse_dump(&text),
			DecorationSource::Channel(rx) => Ok(rx.into_iter().collect()),
			DecorationSource::Path(path) => {
				let fs = &self.shared.fs;
				let handle = fs.open(&path, FileMode::Read)?;
				let size = fs.size(handle)? as usize;
				let bytes = fs.read(handle, size)?;
				fs.close(handle)?;
				let text = String::from_utf8(bytes).map_err(|e| {
					Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
				})?;
				parse_dump(&text)
			}
		}
	}
}

/// Document length in logical space.
fn logical_total(inner: &DocumentInner) -> usize {
	let delta: isize = inner
		.cursors
		.values()
		.filter_map(|c| c.region.as_ref())
		.map(|r| r.delta())
		.sum();
	inner.totals.bytes.saturating_add_signed(delta)
}

fn collect_decorations(
	shared: &DocShared,
	inner: &DocumentInner,
	range: Range<usize>,
) -> Vec<DumpRecord> {
	let overlay = Overlay::new(inner);
	let mut out: Vec<(Arc<str>, usize)> = Vec::new();

	{
		let io = DocIo::new(shared, inner);
		let tree = inner.tree(&io);
		for (key, abs) in tree.decorations_in_range(inner.root, 0..inner.totals.bytes + 1) {
			if let Some(logical) = overlay.logical(abs)
				&& logical >= range.start
				&& logical < range.end
			{
				out.push((key, logical));
			}
		}
	}
	for (logical_start, region) in overlay.regions_logical() {
		for d in &region.decorations {
			let logical = logical_start + d.offset;
			if logical >= range.start && logical < range.end {
				out.push((d.key.clone(), logical));
			}
		}
	}

	out.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
	out.into_iter()
		.map(|(key, position)| DumpRecord {
			key: key.to_string(),
			position,
		})
		.collect()
}

/// Coordinates of a logical position, accounting for active regions.
fn coords_at_logical(
	shared: &DocShared,
	inner: &DocumentInner,
	logical: usize,
) -> Result<Coordinates> {
	let overlay = Overlay::new(inner);
	if overlay.is_empty() {
		let io = DocIo::new(shared, inner);
		return inner.tree(&io).coords_of_byte(inner.root, logical);
	}

	// Walk regions in order, accumulating the metric difference between
	// each staged buffer and the tree span it shadows.
	let mut char_shift = 0isize;
	let mut line_shift = 0isize;
	let mut tree_shift = 0isize;
	for (logical_start, region) in overlay.regions_logical() {
		let logical_end = logical_start + region.buffer.len();
		if logical < logical_start {
			break;
		}
		if logical <= logical_end {
			// Inside this region: tree coordinates at the region start
			// plus the buffer prefix.
			let io = DocIo::new(shared, inner);
			let start = inner.tree(&io).coords_of_byte(inner.root, region.tree_start)?;
			let local = logical - logical_start;
			let (prefix, _) = metrics::scan(&region.buffer[..local]);
			let line_chars = if prefix.newlines == 0 {
				start.line_chars + prefix.chars
			} else {
				tail_chars(&region.buffer[..local])
			};
			return Ok(Coordinates {
				byte: logical,
				chars: (start.chars + prefix.chars).saturating_add_signed(char_shift),
				line: (start.line + prefix.newlines).saturating_add_signed(line_shift),
				line_chars,
			});
		}
		let span = span_metrics(shared, inner, region)?;
		let buffer = region.metrics();
		char_shift += buffer.chars as isize - span.chars as isize;
		line_shift += buffer.newlines as isize - span.newlines as isize;
		tree_shift += region.delta();
	}

	let tree_pos = logical.saturating_add_signed(-tree_shift);
	let io = DocIo::new(shared, inner);
	let coords = inner.tree(&io).coords_of_byte(inner.root, tree_pos)?;
	Ok(Coordinates {
		byte: logical,
		chars: coords.chars.saturating_add_signed(char_shift),
		line: coords.line.saturating_add_signed(line_shift),
		line_chars: coords.line_chars,
	})
}

fn span_metrics(shared: &DocShared, inner: &DocumentInner, region: &Region) -> Result<TextMetrics> {
	let io = DocIo::new(shared, inner);
	let bytes = inner.tree(&io).read_range(
		inner.root,
		region.tree_start..region.tree_start + region.tree_len,
	)?;
	Ok(metrics::scan(&bytes).0)
}

fn tail_chars(buffer: &[u8]) -> usize {
	let tail_start = buffer
		.iter()
		.rposition(|&b| b == b'\n')
		.map(|i| i + 1)
		.unwrap_or(0);
	metrics::count_chars(&buffer[tail_start..])
}
