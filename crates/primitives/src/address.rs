//! Positions within a document.
//!
//! A position can be addressed three ways: by byte offset, by code-point
//! offset, or by line and code-point-within-line. [`Coordinates`] carries all
//! four numbers for one logical position; cursors keep them consistent on
//! every move.

/// A position in one of the three addressing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address {
	/// Byte offset from the start of the document.
	Byte(usize),
	/// Code-point offset from the start of the document.
	Char(usize),
	/// Line number and code-point offset within that line, both 0-based.
	LineChar { line: usize, chars: usize },
}

/// The four coordinates of one logical position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Coordinates {
	/// Byte offset from document start.
	pub byte: usize,
	/// Code-point offset from document start.
	pub chars: usize,
	/// 0-based line number.
	pub line: usize,
	/// Code-point offset within the line.
	pub line_chars: usize,
}

impl Coordinates {
	pub const ZERO: Coordinates = Coordinates {
		byte: 0,
		chars: 0,
		line: 0,
		line_chars: 0,
	};
}

impl From<Coordinates> for Address {
	fn from(c: Coordinates) -> Address {
		Address::Byte(c.byte)
	}
}
