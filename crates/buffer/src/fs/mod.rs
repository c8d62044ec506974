//! Pluggable file system interface.
//!
//! Documents reach their backing files exclusively through [`FileSystem`],
//! so tests and embedders can substitute their own storage. Handles are
//! opaque tokens; a handle that was closed (or never opened) fails with
//! [`Error::FileNotOpen`].

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use vellum_primitives::{Error, Result};

mod memory;
#[cfg(test)]
mod tests;

pub use memory::MemoryFileSystem;

/// Opaque token for an open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub u64);

/// Access mode for [`FileSystem::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
	Read,
	Write,
	ReadWrite,
}

/// Identity metadata of a backing file, used for source-change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceMetadata {
	/// File size in bytes.
	pub size: u64,
	/// Last modification time.
	pub mtime: SystemTime,
	/// Inode (or equivalent identity) when the platform exposes one.
	pub inode: Option<u64>,
}

/// File system operations a document needs from its backing store.
///
/// All operations are callable from any thread; implementations synchronize
/// internally. `read` returns fewer bytes than requested only at EOF.
pub trait FileSystem: Send + Sync {
	fn open(&self, path: &Path, mode: FileMode) -> Result<FileHandle>;
	fn seek(&self, handle: FileHandle, offset: u64) -> Result<()>;
	fn read(&self, handle: FileHandle, n: usize) -> Result<Vec<u8>>;
	fn write(&self, handle: FileHandle, bytes: &[u8]) -> Result<usize>;
	fn truncate(&self, handle: FileHandle, size: u64) -> Result<()>;
	fn size(&self, handle: FileHandle) -> Result<u64>;
	fn close(&self, handle: FileHandle) -> Result<()>;
	/// Whether the handle's position is at or past end of file.
	fn at_eof(&self, handle: FileHandle) -> Result<bool>;
	/// Stats `path` without opening it.
	fn metadata(&self, path: &Path) -> Result<SourceMetadata>;

	/// Checksum of a block, when the backend can compute one more cheaply
	/// than reading the bytes. Backends without the capability keep the
	/// default.
	fn block_checksum(&self, _handle: FileHandle, _offset: u64, _len: usize) -> Result<u64> {
		Err(Error::NotSupported)
	}
}

struct OpenFile {
	file: File,
	pos: u64,
}

/// [`FileSystem`] backed by `std::fs`.
#[derive(Default)]
pub struct StdFileSystem {
	next: AtomicU64,
	open: Mutex<FxHashMap<u64, OpenFile>>,
}

impl StdFileSystem {
	pub fn new() -> Self {
		Self::default()
	}

	fn with_file<T>(&self, handle: FileHandle, f: impl FnOnce(&mut OpenFile) -> Result<T>) -> Result<T> {
		let mut open = self.open.lock();
		let entry = open.get_mut(&handle.0).ok_or(Error::FileNotOpen)?;
		f(entry)
	}
}

impl FileSystem for StdFileSystem {
	fn open(&self, path: &Path, mode: FileMode) -> Result<FileHandle> {
		let file = match mode {
			FileMode::Read => OpenOptions::new().read(true).open(path)?,
			FileMode::Write => OpenOptions::new().write(true).create(true).open(path)?,
			FileMode::ReadWrite => OpenOptions::new().read(true).write(true).create(true).open(path)?,
		};
		let id = self.next.fetch_add(1, Ordering::Relaxed);
		self.open.lock().insert(id, OpenFile { file, pos: 0 });
		Ok(FileHandle(id))
	}

	fn seek(&self, handle: FileHandle, offset: u64) -> Result<()> {
		self.with_file(handle, |f| {
			f.file.seek(SeekFrom::Start(offset))?;
			f.pos = offset;
			Ok(())
		})
	}

	fn read(&self, handle: FileHandle, n: usize) -> Result<Vec<u8>> {
		self.with_file(handle, |f| {
			let mut buf = vec![0u8; n];
			let mut filled = 0;
			while filled < n {
				let got = f.file.read(&mut buf[filled..])?;
				if got == 0 {
					break;
				}
				filled += got;
			}
			buf.truncate(filled);
			f.pos += filled as u64;
			Ok(buf)
		})
	}

	fn write(&self, handle: FileHandle, bytes: &[u8]) -> Result<usize> {
		self.with_file(handle, |f| {
			f.file.write_all(bytes)?;
			f.pos += bytes.len() as u64;
			Ok(bytes.len())
		})
	}

	fn truncate(&self, handle: FileHandle, size: u64) -> Result<()> {
		self.with_file(handle, |f| {
			f.file.set_len(size)?;
			Ok(())
		})
	}

	fn size(&self, handle: FileHandle) -> Result<u64> {
		self.with_file(handle, |f| Ok(f.file.metadata()?.len()))
	}

	fn close(&self, handle: FileHandle) -> Result<()> {
		self.open
			.lock()
			.remove(&handle.0)
			.map(|_| ())
			.ok_or(Error::FileNotOpen)
	}

	fn at_eof(&self, handle: FileHandle) -> Result<bool> {
		self.with_file(handle, |f| Ok(f.pos >= f.file.metadata()?.len()))
	}

	fn metadata(&self, path: &Path) -> Result<SourceMetadata> {
		let meta = std::fs::metadata(path)?;
		Ok(SourceMetadata {
			size: meta.len(),
			mtime: meta.modified()?,
			inode: inode_of(&meta),
		})
	}
}

#[cfg(unix)]
fn inode_of(meta: &std::fs::Metadata) -> Option<u64> {
	use std::os::unix::fs::MetadataExt;
	Some(meta.ino())
}

#[cfg(not(unix))]
fn inode_of(_meta: &std::fs::Metadata) -> Option<u64> {
	None
}
