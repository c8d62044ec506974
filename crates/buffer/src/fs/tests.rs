use std::io::Write;
use std::path::Path;

use vellum_primitives::Error;

use super::*;

#[test]
fn std_fs_read_and_seek() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("data.txt");
	std::fs::File::create(&path)
		.unwrap()
		.write_all(b"Hello World")
		.unwrap();

	let fs = StdFileSystem::new();
	let h = fs.open(&path, FileMode::Read).unwrap();
	assert_eq!(fs.size(h).unwrap(), 11);
	assert!(!fs.at_eof(h).unwrap());

	fs.seek(h, 6).unwrap();
	assert_eq!(fs.read(h, 5).unwrap(), b"World");
	assert!(fs.at_eof(h).unwrap());

	fs.close(h).unwrap();
	assert!(matches!(fs.read(h, 1), Err(Error::FileNotOpen)));
}

#[test]
fn std_fs_metadata_tracks_size() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("meta.txt");
	std::fs::write(&path, b"abc").unwrap();

	let fs = StdFileSystem::new();
	let meta = fs.metadata(&path).unwrap();
	assert_eq!(meta.size, 3);
	#[cfg(unix)]
	assert!(meta.inode.is_some());
}

#[test]
fn block_checksum_defaults_to_not_supported() {
	let fs = MemoryFileSystem::new();
	fs.put_file("/a", b"abc".to_vec());
	let h = fs.open(Path::new("/a"), FileMode::Read).unwrap();
	assert!(matches!(fs.block_checksum(h, 0, 3), Err(Error::NotSupported)));
}

#[test]
fn memory_fs_short_read_at_eof() {
	let fs = MemoryFileSystem::new();
	fs.put_file("/a", b"abcdef".to_vec());
	let h = fs.open(Path::new("/a"), FileMode::Read).unwrap();
	fs.seek(h, 4).unwrap();
	assert_eq!(fs.read(h, 10).unwrap(), b"ef");
	assert!(fs.at_eof(h).unwrap());
}

#[test]
fn memory_fs_replace_changes_inode() {
	let fs = MemoryFileSystem::new();
	fs.put_file("/a", b"one".to_vec());
	let before = fs.metadata(Path::new("/a")).unwrap();
	fs.put_file("/a", b"two".to_vec());
	let overwritten = fs.metadata(Path::new("/a")).unwrap();
	fs.replace_file("/a", b"three".to_vec());
	let replaced = fs.metadata(Path::new("/a")).unwrap();

	assert_eq!(before.inode, overwritten.inode);
	assert_ne!(before.inode, replaced.inode);
	assert!(overwritten.mtime > before.mtime);
}

#[test]
fn memory_fs_missing_file() {
	let fs = MemoryFileSystem::new();
	assert!(fs.open(Path::new("/missing"), FileMode::Read).is_err());
	assert!(fs.metadata(Path::new("/missing")).is_err());
}
