//! Text metrics: byte, code-point, and newline aggregates.
//!
//! Every node in the buffer tree carries a [`TextMetrics`] aggregate so that
//! positions can be located by byte, code point, or line in O(log n). Leaves
//! additionally carry a [`LineStart`] table mapping line numbers within the
//! leaf to the byte and code-point offsets of the line's first byte.

use std::ops::{Add, AddAssign};

/// Aggregate metrics for a span of text.
///
/// `chars` counts Unicode scalar values (code points), not grapheme clusters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextMetrics {
	/// Number of bytes.
	pub bytes: usize,
	/// Number of code points.
	pub chars: usize,
	/// Number of `\n` bytes.
	pub newlines: usize,
}

impl TextMetrics {
	pub const ZERO: TextMetrics = TextMetrics {
		bytes: 0,
		chars: 0,
		newlines: 0,
	};
}

impl Add for TextMetrics {
	type Output = TextMetrics;

	fn add(self, rhs: TextMetrics) -> TextMetrics {
		TextMetrics {
			bytes: self.bytes + rhs.bytes,
			chars: self.chars + rhs.chars,
			newlines: self.newlines + rhs.newlines,
		}
	}
}

impl AddAssign for TextMetrics {
	fn add_assign(&mut self, rhs: TextMetrics) {
		self.bytes += rhs.bytes;
		self.chars += rhs.chars;
		self.newlines += rhs.newlines;
	}
}

/// Byte and code-point offset of a line's first byte, relative to the start
/// of the span the table belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineStart {
	pub byte: usize,
	pub chars: usize,
}

/// Returns `true` if `b` is the first byte of a UTF-8 code point.
#[inline]
pub fn is_char_boundary(b: u8) -> bool {
	// Continuation bytes are 0b10xx_xxxx.
	(b as i8) >= -0x40
}

/// Largest index ≤ `at` that falls on a code-point boundary of `bytes`.
pub fn floor_char_boundary(bytes: &[u8], at: usize) -> usize {
	let mut i = at.min(bytes.len());
	while i > 0 && i < bytes.len() && !is_char_boundary(bytes[i]) {
		i -= 1;
	}
	i
}

/// Counts code points in `bytes`.
pub fn count_chars(bytes: &[u8]) -> usize {
	bytes.iter().filter(|&&b| is_char_boundary(b)).count()
}

/// Scans `bytes`, producing its metrics and line-start table.
///
/// The table always begins with `(0, 0)` and gains one entry after every
/// `\n`, so a trailing newline produces an entry equal to the span's length.
pub fn scan(bytes: &[u8]) -> (TextMetrics, Vec<LineStart>) {
	let mut chars = 0usize;
	let mut newlines = 0usize;
	let mut line_starts = vec![LineStart { byte: 0, chars: 0 }];

	for (i, &b) in bytes.iter().enumerate() {
		if is_char_boundary(b) {
			chars += 1;
		}
		if b == b'\n' {
			newlines += 1;
			line_starts.push(LineStart {
				byte: i + 1,
				chars,
			});
		}
	}

	(
		TextMetrics {
			bytes: bytes.len(),
			chars,
			newlines,
		},
		line_starts,
	)
}

/// Byte offset of the `chars`-th code point of `bytes`.
///
/// `chars` equal to the total code-point count maps to `bytes.len()`.
/// Returns `None` when `chars` exceeds the count.
pub fn char_to_byte(bytes: &[u8], chars: usize) -> Option<usize> {
	if chars == 0 {
		return Some(0);
	}
	let mut seen = 0usize;
	for (i, &b) in bytes.iter().enumerate() {
		if is_char_boundary(b) {
			if seen == chars {
				return Some(i);
			}
			seen += 1;
		}
	}
	(seen == chars).then_some(bytes.len())
}
