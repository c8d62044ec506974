//! Decoration dump format.
//!
//! One record per line: `key<TAB>byte_position`. Keys may not contain tabs
//! or newlines. Blank lines are ignored on import.

use vellum_primitives::{Error, Result};

use super::DumpRecord;

/// Serializes records into dump text.
pub fn format_dump(records: &[DumpRecord]) -> String {
	let mut out = String::new();
	for r in records {
		out.push_str(&r.key);
		out.push('\t');
		out.push_str(&r.position.to_string());
		out.push('\n');
	}
	out
}

/// Parses dump text into `(key, position)` pairs.
pub fn parse_dump(text: &str) -> Result<Vec<(String, usize)>> {
	let mut out = Vec::new();
	for line in text.lines() {
		if line.is_empty() {
			continue;
		}
		let (key, pos) = line.rsplit_once('\t').ok_or(Error::InvalidPosition)?;
		let pos = pos.parse::<usize>().map_err(|_| Error::InvalidPosition)?;
		if key.is_empty() {
			return Err(Error::InvalidPosition);
		}
		out.push((key.to_string(), pos));
	}
	Ok(out)
}
