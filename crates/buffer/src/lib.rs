//! vellum-buffer - an editable, versioned text buffer.
//!
//! # Purpose
//!
//! - Owns: the rope node store, the fork/revision graph, decorations,
//!   cursors with optimized edit regions, and the tiered storage lifecycle.
//! - Exposes: [`Library`] as the entry point, [`Document`] handles for
//!   editing and navigation, and the pluggable [`FileSystem`] and
//!   [`ColdStorage`] interfaces.
//!
//! A [`Library`] owns cold storage, the default file system, the set of live
//! documents, and background maintenance. Each [`Document`] owns its tree,
//! its history, its cursors, and its source-tracking state. Mutations commit
//! revisions; navigating away from HEAD and editing forks the history
//! instead of discarding it.
//!
//! ```no_run
//! use vellum_buffer::Library;
//! use vellum_primitives::{Address, DocumentOptions, LibraryOptions};
//!
//! # fn main() -> vellum_primitives::Result<()> {
//! let library = Library::new(LibraryOptions::default())?;
//! let doc = library.open(DocumentOptions::from_text("Hello World"))?;
//! let cursor = doc.create_cursor(Default::default())?;
//! doc.seek_cursor(cursor, Address::Byte(5))?;
//! doc.insert(cursor, b" there", false)?;
//! assert_eq!(doc.read_to_string(0..doc.totals().bytes)?, "Hello there World");
//! doc.undo_seek(0)?;
//! assert_eq!(doc.read_to_string(0..doc.totals().bytes)?, "Hello World");
//! # Ok(())
//! # }
//! ```

pub mod cursor;
pub mod decoration;
pub mod document;
pub mod fs;
pub mod history;
pub mod library;
pub mod rope;
pub mod storage;

pub use cursor::CursorId;
pub use decoration::{DumpRecord, RemovedDecoration};
pub use document::{Document, DocumentId};
pub use fs::{FileHandle, FileMode, FileSystem, MemoryFileSystem, SourceMetadata, StdFileSystem};
pub use history::ForkInfo;
pub use library::{ChillReport, Library};
pub use storage::{ColdStorage, DirColdStorage, MemoryColdStorage};
