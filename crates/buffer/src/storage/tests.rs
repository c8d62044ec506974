use std::time::{Duration, SystemTime};

use vellum_primitives::{SourceChange, TrustLevel};

use super::trust::{SourceTracking, classify};
use super::*;
use crate::decoration::Decoration;
use crate::fs::SourceMetadata;
use crate::rope::LeafSnapshot;

fn meta(size: u64, mtime: u64, inode: u64) -> SourceMetadata {
	SourceMetadata {
		size,
		mtime: SystemTime::UNIX_EPOCH + Duration::from_secs(mtime),
		inode: Some(inode),
	}
}

#[test]
fn cold_block_round_trip() {
	let decorations = vec![
		Decoration {
			key: "a".into(),
			offset: 0,
		},
		Decoration {
			key: "b".into(),
			offset: 7,
		},
	];
	let encoded = encode_block(b"payload bytes", &decorations);
	assert_eq!(decode_block(&encoded).unwrap(), b"payload bytes");
}

#[test]
fn decode_rejects_garbage() {
	assert!(decode_block(&[0xff, 0xff, 0xff, 0xff, 0xff]).is_err());
}

#[test]
fn memory_cold_storage_crud() {
	let store = MemoryColdStorage::new();
	store.put("doc-1", "n0", b"one").unwrap();
	store.put("doc-1", "n1", b"two").unwrap();
	store.put("doc-2", "n0", b"three").unwrap();

	assert_eq!(store.block_count("doc-1"), 2);
	assert_eq!(store.get("doc-1", "n1").unwrap(), b"two");
	store.delete("doc-1", "n1").unwrap();
	assert!(store.get("doc-1", "n1").is_err());
	assert_eq!(store.block_count("doc-1"), 1);
}

#[test]
fn dir_cold_storage_persists_blocks() {
	let dir = tempfile::tempdir().unwrap();
	let store = DirColdStorage::new(dir.path());
	store.put("doc-9", "n3-f0-r1", b"chilled").unwrap();
	assert_eq!(store.get("doc-9", "n3-f0-r1").unwrap(), b"chilled");
	assert!(dir.path().join("doc-9").join("n3-f0-r1").exists());
	store.delete("doc-9", "n3-f0-r1").unwrap();
	assert!(store.get("doc-9", "n3-f0-r1").is_err());
}

#[test]
fn classify_covers_all_transitions() {
	let recorded = meta(100, 10, 1);
	assert_eq!(classify(&recorded, None), SourceChange::Deleted);
	assert_eq!(classify(&recorded, Some(meta(100, 10, 2))), SourceChange::Replaced);
	assert_eq!(classify(&recorded, Some(meta(50, 11, 1))), SourceChange::Truncated);
	assert_eq!(
		classify(&recorded, Some(meta(130, 11, 1))),
		SourceChange::Appended { bytes: 30 }
	);
	assert_eq!(classify(&recorded, Some(meta(100, 11, 1))), SourceChange::Modified);
	assert_eq!(classify(&recorded, Some(meta(100, 10, 1))), SourceChange::Unchanged);
}

#[test]
fn tracking_counter_bumps_once_per_observation() {
	let mut tracking = SourceTracking::new(meta(100, 10, 1));
	assert_eq!(tracking.change_counter, 0);

	assert_eq!(tracking.observe(Some(meta(100, 11, 1))), SourceChange::Modified);
	assert_eq!(tracking.change_counter, 1);
	// Same metadata again: still modified relative to recorded, but no
	// new change detected.
	assert_eq!(tracking.observe(Some(meta(100, 11, 1))), SourceChange::Modified);
	assert_eq!(tracking.change_counter, 1);

	assert_eq!(tracking.observe(Some(meta(100, 12, 1))), SourceChange::Modified);
	assert_eq!(tracking.change_counter, 2);
}

#[test]
fn trust_levels_derive_from_counters() {
	let leaf = LeafSnapshot::from_bytes(b"abc", Vec::new());
	let mut tracking = SourceTracking::new(meta(3, 1, 1));

	assert_eq!(tracking.leaf_trust(&leaf), TrustLevel::Full);

	tracking.observe(Some(meta(3, 2, 1)));
	assert_eq!(tracking.leaf_trust(&leaf), TrustLevel::Stale);

	leaf.mark_verified(tracking.change_counter);
	assert_eq!(tracking.leaf_trust(&leaf), TrustLevel::Verified);

	tracking.observe(Some(meta(3, 3, 1)));
	tracking.suspended = true;
	assert_eq!(tracking.leaf_trust(&leaf), TrustLevel::Suspended);
}
