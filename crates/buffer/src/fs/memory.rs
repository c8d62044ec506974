//! In-memory file system for tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use vellum_primitives::{Error, Result};

use super::{FileHandle, FileMode, FileSystem, SourceMetadata};

struct MemFile {
	data: Vec<u8>,
	mtime: u64,
	inode: u64,
}

struct MemHandle {
	file: Arc<Mutex<MemFile>>,
	pos: u64,
	mode: FileMode,
}

/// A [`FileSystem`] held entirely in memory.
///
/// Besides the trait surface it exposes mutation helpers so tests can
/// simulate external changes to a backing file (overwrite, append, replace,
/// delete) and observe the resulting trust transitions.
#[derive(Default)]
pub struct MemoryFileSystem {
	files: Mutex<FxHashMap<PathBuf, Arc<Mutex<MemFile>>>>,
	handles: Mutex<FxHashMap<u64, MemHandle>>,
	next_handle: AtomicU64,
	next_inode: AtomicU64,
	clock: AtomicU64,
}

impl MemoryFileSystem {
	pub fn new() -> Self {
		Self::default()
	}

	fn tick(&self) -> u64 {
		self.clock.fetch_add(1, Ordering::Relaxed) + 1
	}

	/// Creates or overwrites `path`, keeping its inode but bumping mtime.
	pub fn put_file(&self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) {
		let mtime = self.tick();
		let mut files = self.files.lock();
		match files.entry(path.into()) {
			std::collections::hash_map::Entry::Occupied(e) => {
				let mut f = e.get().lock();
				f.data = data.into();
				f.mtime = mtime;
			}
			std::collections::hash_map::Entry::Vacant(e) => {
				e.insert(Arc::new(Mutex::new(MemFile {
					data: data.into(),
					mtime,
					inode: self.next_inode.fetch_add(1, Ordering::Relaxed) + 1,
				})));
			}
		}
	}

	/// Appends to an existing file, bumping mtime.
	pub fn append_file(&self, path: impl AsRef<Path>, data: &[u8]) {
		let mtime = self.tick();
		if let Some(f) = self.files.lock().get(path.as_ref()) {
			let mut f = f.lock();
			f.data.extend_from_slice(data);
			f.mtime = mtime;
		}
	}

	/// Replaces a file wholesale: new content, new inode.
	pub fn replace_file(&self, path: impl Into<PathBuf>, data: impl Into<Vec<u8>>) {
		let mtime = self.tick();
		self.files.lock().insert(
			path.into(),
			Arc::new(Mutex::new(MemFile {
				data: data.into(),
				mtime,
				inode: self.next_inode.fetch_add(1, Ordering::Relaxed) + 1,
			})),
		);
	}

	/// Rewrites a byte range in place, bumping mtime but not size or inode.
	pub fn corrupt_file(&self, path: impl AsRef<Path>, offset: usize, data: &[u8]) {
		let mtime = self.tick();
		if let Some(f) = self.files.lock().get(path.as_ref()) {
			let mut f = f.lock();
			f.data[offset..offset + data.len()].copy_from_slice(data);
			f.mtime = mtime;
		}
	}

	/// Removes a file.
	pub fn delete_file(&self, path: impl AsRef<Path>) {
		self.files.lock().remove(path.as_ref());
	}

	fn with_handle<T>(&self, handle: FileHandle, f: impl FnOnce(&mut MemHandle) -> Result<T>) -> Result<T> {
		let mut handles = self.handles.lock();
		let entry = handles.get_mut(&handle.0).ok_or(Error::FileNotOpen)?;
		f(entry)
	}
}

impl FileSystem for MemoryFileSystem {
	fn open(&self, path: &Path, mode: FileMode) -> Result<FileHandle> {
		let file = {
			let mut files = self.files.lock();
			match files.get(path) {
				Some(f) => f.clone(),
				None if mode == FileMode::Read => {
					return Err(Error::Io(std::io::Error::from(std::io::ErrorKind::NotFound)));
				}
				None => {
					let f = Arc::new(Mutex::new(MemFile {
						data: Vec::new(),
						mtime: self.clock.load(Ordering::Relaxed),
						inode: self.next_inode.fetch_add(1, Ordering::Relaxed) + 1,
					}));
					files.insert(path.to_path_buf(), f.clone());
					f
				}
			}
		};
		let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
		self.handles.lock().insert(id, MemHandle { file, pos: 0, mode });
		Ok(FileHandle(id))
	}

	fn seek(&self, handle: FileHandle, offset: u64) -> Result<()> {
		self.with_handle(handle, |h| {
			h.pos = offset;
			Ok(())
		})
	}

	fn read(&self, handle: FileHandle, n: usize) -> Result<Vec<u8>> {
		self.with_handle(handle, |h| {
			let file = h.file.lock();
			let start = (h.pos as usize).min(file.data.len());
			let end = (start + n).min(file.data.len());
			let out = file.data[start..end].to_vec();
			h.pos = end as u64;
			Ok(out)
		})
	}

	fn write(&self, handle: FileHandle, bytes: &[u8]) -> Result<usize> {
		self.with_handle(handle, |h| {
			if h.mode == FileMode::Read {
				return Err(Error::NotSupported);
			}
			let mut file = h.file.lock();
			let start = h.pos as usize;
			if file.data.len() < start + bytes.len() {
				file.data.resize(start + bytes.len(), 0);
			}
			file.data[start..start + bytes.len()].copy_from_slice(bytes);
			h.pos += bytes.len() as u64;
			Ok(bytes.len())
		})
	}

	fn truncate(&self, handle: FileHandle, size: u64) -> Result<()> {
		self.with_handle(handle, |h| {
			h.file.lock().data.truncate(size as usize);
			Ok(())
		})
	}

	fn size(&self, handle: FileHandle) -> Result<u64> {
		self.with_handle(handle, |h| Ok(h.file.lock().data.len() as u64))
	}

	fn close(&self, handle: FileHandle) -> Result<()> {
		self.handles
			.lock()
			.remove(&handle.0)
			.map(|_| ())
			.ok_or(Error::FileNotOpen)
	}

	fn at_eof(&self, handle: FileHandle) -> Result<bool> {
		self.with_handle(handle, |h| Ok(h.pos >= h.file.lock().data.len() as u64))
	}

	fn metadata(&self, path: &Path) -> Result<SourceMetadata> {
		let files = self.files.lock();
		let file = files
			.get(path)
			.ok_or_else(|| Error::Io(std::io::Error::from(std::io::ErrorKind::NotFound)))?
			.lock();
		Ok(SourceMetadata {
			size: file.data.len() as u64,
			mtime: SystemTime::UNIX_EPOCH + Duration::from_secs(file.mtime),
			inode: Some(file.inode),
		})
	}
}
