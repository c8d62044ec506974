use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use vellum_primitives::{
	Address, AppendPolicy, ChillLevel, CursorMode, DecorationSource, DocumentOptions, Error,
	ForkId, LibraryOptions, LoadingStyle, ReadyThreshold, SourceChange, SourceResolution,
	StorageState, TrustLevel,
};

use crate::fs::{FileSystem, MemoryFileSystem};
use crate::library::Library;
use crate::storage::{ColdStorage, MemoryColdStorage};

fn test_library() -> (Library, Arc<MemoryColdStorage>, Arc<MemoryFileSystem>) {
	let cold = Arc::new(MemoryColdStorage::new());
	let fs = Arc::new(MemoryFileSystem::new());
	let cold_dyn: Arc<dyn ColdStorage> = cold.clone();
	let fs_dyn: Arc<dyn FileSystem> = fs.clone();
	let library = Library::with_backends(LibraryOptions::default(), fs_dyn, Some(cold_dyn)).unwrap();
	(library, cold, fs)
}

fn content(doc: &crate::document::Document) -> String {
	doc.read_to_string(0..doc.totals().bytes).unwrap()
}

#[test]
fn s1_basic_insert_and_undo() {
	let (library, _, _) = test_library();
	let doc = library.open(DocumentOptions::from_text("Hello World")).unwrap();
	let cursor = doc.create_cursor(CursorMode::Process).unwrap();
	doc.seek_cursor(cursor, Address::Byte(5)).unwrap();
	doc.insert(cursor, b" XYZ", false).unwrap();

	assert_eq!(content(&doc), "Hello XYZ World");
	assert_eq!(doc.totals().bytes, 15);
	assert_eq!(doc.current_version().rev, 1);

	doc.undo_seek(0).unwrap();
	assert_eq!(content(&doc), "Hello World");
	let totals = doc.totals();
	assert_eq!((totals.bytes, totals.chars, totals.newlines), (11, 11, 0));
}

#[test]
fn s2_auto_fork_on_edit_off_head() {
	let (library, _, _) = test_library();
	let doc = library.open(DocumentOptions::from_text("ABCD")).unwrap();
	let cursor = doc.create_cursor(CursorMode::Process).unwrap();

	doc.insert(cursor, b"X", false).unwrap();
	assert_eq!(content(&doc), "XABCD");
	doc.undo_seek(0).unwrap();
	doc.seek_cursor(cursor, Address::Byte(0)).unwrap();
	doc.insert(cursor, b"Y", false).unwrap();

	assert_eq!(doc.current_version().fork, ForkId(1));
	assert_eq!(content(&doc), "YABCD");

	let forks = doc.list_forks();
	assert_eq!(forks.len(), 2);
	let (_, root_fork) = forks[0];
	assert_eq!(root_fork.highest_revision, 1);
	let (_, fork1) = forks[1];
	assert_eq!(fork1.parent_fork, ForkId::ROOT);
	assert_eq!(fork1.parent_rev, 0);
	assert_eq!(fork1.highest_revision, 1);
}

#[test]
fn s3_decoration_sliding_with_insert_before() {
	let (library, _, _) = test_library();
	let doc = library.open(DocumentOptions::from_text("ABCDEFGH")).unwrap();
	doc.decorate(&[
		("before", Some(Address::Byte(3))),
		("at", Some(Address::Byte(4))),
		("after", Some(Address::Byte(5))),
	])
	.unwrap();

	let cursor = doc.create_cursor(CursorMode::Process).unwrap();
	doc.seek_cursor(cursor, Address::Byte(4)).unwrap();
	doc.insert(cursor, b"XX", true).unwrap();

	assert_eq!(content(&doc), "ABCDXXEFGH");
	assert_eq!(doc.decoration_position("before").unwrap().byte, 3);
	assert_eq!(doc.decoration_position("at").unwrap().byte, 6);
	assert_eq!(doc.decoration_position("after").unwrap().byte, 7);
}

#[test]
fn s4_delete_returns_inside_decorations() {
	let (library, _, _) = test_library();
	let doc = library
		.open(DocumentOptions::from_text("[0]Hel[3]lo [5]Wor[8][A]ld"))
		.unwrap();
	doc.decorate(&[
		("mark_0", Some(Address::Byte(0))),
		("mark_3", Some(Address::Byte(6))),
		("mark_5", Some(Address::Byte(12))),
		("mark_8", Some(Address::Byte(18))),
		("mark_A", Some(Address::Byte(24))),
	])
	.unwrap();

	let cursor = doc.create_cursor(CursorMode::Process).unwrap();
	doc.seek_cursor(cursor, Address::Byte(6)).unwrap();
	let removed = doc.delete(cursor, 9).unwrap();

	assert_eq!(content(&doc), "[0]HelWor[8][A]ld");
	let mut removed_keys: Vec<&str> = removed.iter().map(|r| r.key.as_ref()).collect();
	removed_keys.sort();
	assert_eq!(removed_keys, vec!["mark_3", "mark_5"]);

	assert_eq!(doc.decoration_position("mark_0").unwrap().byte, 0);
	assert_eq!(doc.decoration_position("mark_8").unwrap().byte, 9);
	assert_eq!(doc.decoration_position("mark_A").unwrap().byte, 15);
	assert!(doc.decoration_position("mark_3").is_err());
}

#[test]
fn s5_transaction_rollback_preserves_decorations() {
	let (library, _, _) = test_library();
	let doc = library.open(DocumentOptions::from_text("START")).unwrap();
	doc.decorate(&[("mark_2", Some(Address::Byte(2)))]).unwrap();

	let cursor = doc.create_cursor(CursorMode::Process).unwrap();
	doc.begin_transaction(None).unwrap();
	doc.seek_cursor(cursor, Address::Byte(0)).unwrap();
	doc.insert(cursor, b"XXX", false).unwrap();
	assert_eq!(doc.decoration_position("mark_2").unwrap().byte, 5);

	doc.rollback_transaction().unwrap();
	assert_eq!(content(&doc), "START");
	assert_eq!(doc.decoration_position("mark_2").unwrap().byte, 2);
}

#[test]
fn s6_chill_then_read_round_trip() {
	let (library, cold, _) = test_library();
	let doc = library
		.open(
			DocumentOptions::from_text("Hello Beautiful World")
				.with_loading_style(LoadingStyle::ColdAndMemory),
		)
		.unwrap();

	let report = library.chill(ChillLevel::Everything, 64).unwrap();
	assert!(report.moved >= 1);
	assert!(cold.block_count(doc.folder()) >= 1);
	assert_eq!(doc.storage_state_at(0).unwrap(), StorageState::Cold);

	assert_eq!(doc.read_to_string(0..21).unwrap(), "Hello Beautiful World");
	assert_eq!(doc.storage_state_at(0).unwrap(), StorageState::Memory);
}

#[test]
fn undo_seek_restores_totals_per_revision() {
	let (library, _, _) = test_library();
	let doc = library.open(DocumentOptions::from_text("one\n")).unwrap();
	let cursor = doc.create_cursor(CursorMode::Process).unwrap();
	doc.seek_cursor(cursor, Address::Byte(4)).unwrap();
	doc.insert(cursor, b"two\n", false).unwrap();
	doc.insert(cursor, b"three\n", false).unwrap();
	assert_eq!(doc.totals().newlines, 3);

	doc.undo_seek(1).unwrap();
	let totals = doc.totals();
	assert_eq!(totals.bytes, 8);
	assert_eq!(totals.newlines, 2);
	assert_eq!(content(&doc), "one\ntwo\n");

	doc.undo_seek(0).unwrap();
	assert_eq!(content(&doc), "one\n");

	// Redo: the revisions are still there.
	doc.undo_seek(2).unwrap();
	assert_eq!(content(&doc), "one\ntwo\nthree\n");

	assert!(matches!(doc.undo_seek(7), Err(Error::RevisionNotFound(7))));
}

#[test]
fn cursor_position_restored_on_navigation() {
	let (library, _, _) = test_library();
	let doc = library.open(DocumentOptions::from_text("Hello World")).unwrap();
	let cursor = doc.create_cursor(CursorMode::Process).unwrap();
	doc.seek_cursor(cursor, Address::Byte(5)).unwrap();
	doc.insert(cursor, b"!!", false).unwrap();
	assert_eq!(doc.cursor_position(cursor).unwrap().byte, 7);

	doc.undo_seek(0).unwrap();
	assert_eq!(doc.cursor_position(cursor).unwrap().byte, 5);
	doc.undo_seek(1).unwrap();
	assert_eq!(doc.cursor_position(cursor).unwrap().byte, 7);
}

#[test]
fn other_cursors_adjust_on_mutation() {
	let (library, _, _) = test_library();
	let doc = library.open(DocumentOptions::from_text("0123456789")).unwrap();
	let a = doc.create_cursor(CursorMode::Process).unwrap();
	let b = doc.create_cursor(CursorMode::Process).unwrap();
	let c = doc.create_cursor(CursorMode::Process).unwrap();
	doc.seek_cursor(a, Address::Byte(2)).unwrap();
	doc.seek_cursor(b, Address::Byte(2)).unwrap();
	doc.seek_cursor(c, Address::Byte(8)).unwrap();

	// Insert at 2 anchored before the position: cursors there hold still.
	doc.insert(a, b"xx", true).unwrap();
	assert_eq!(doc.cursor_position(a).unwrap().byte, 2);
	assert_eq!(doc.cursor_position(b).unwrap().byte, 2);
	assert_eq!(doc.cursor_position(c).unwrap().byte, 10);

	// Insert at 2 anchored after the position: cursors there advance.
	doc.insert(a, b"yy", false).unwrap();
	assert_eq!(doc.cursor_position(a).unwrap().byte, 4);
	assert_eq!(doc.cursor_position(b).unwrap().byte, 4);

	// Cursors inside a deleted range collapse to its start.
	doc.seek_cursor(a, Address::Byte(1)).unwrap();
	doc.seek_cursor(b, Address::Byte(5)).unwrap();
	doc.delete(a, 6).unwrap();
	assert_eq!(doc.cursor_position(b).unwrap().byte, 1);

	doc.remove_cursor(b).unwrap();
	assert!(matches!(doc.cursor_position(b), Err(Error::CursorNotFound)));
}

#[test]
fn address_modes_agree() {
	let (library, _, _) = test_library();
	let doc = library
		.open(DocumentOptions::from_text("caf\u{e9}\nline two\n"))
		.unwrap();

	let coords = doc.convert(Address::LineChar { line: 1, chars: 5 }).unwrap();
	assert_eq!(coords.byte, 11);
	assert_eq!(coords.line, 1);
	assert_eq!(coords.line_chars, 5);

	let by_char = doc.convert(Address::Char(coords.chars)).unwrap();
	assert_eq!(by_char, coords);

	assert!(matches!(
		doc.convert(Address::Byte(999)),
		Err(Error::InvalidPosition)
	));
}

#[test]
fn decorate_batch_is_atomic() {
	let (library, _, _) = test_library();
	let doc = library.open(DocumentOptions::from_text("short")).unwrap();
	let before = doc.current_version();

	let result = doc.decorate(&[
		("ok", Some(Address::Byte(1))),
		("bad", Some(Address::Byte(99))),
	]);
	assert!(matches!(result, Err(Error::InvalidPosition)));
	assert_eq!(doc.current_version(), before);
	assert!(doc.decoration_position("ok").is_err());
}

#[test]
fn decorate_batch_deletes_then_adds() {
	let (library, _, _) = test_library();
	let doc = library.open(DocumentOptions::from_text("abcdefgh")).unwrap();
	doc.decorate(&[("m", Some(Address::Byte(2))), ("n", Some(Address::Byte(4)))])
		.unwrap();
	let rev_after_first = doc.current_version().rev;

	// One batch: delete n, move m.
	doc.decorate(&[("n", None), ("m", Some(Address::Byte(6)))]).unwrap();
	assert_eq!(doc.current_version().rev, rev_after_first + 1);
	assert_eq!(doc.decoration_position("m").unwrap().byte, 6);
	assert!(doc.decoration_position("n").is_err());

	let all = doc.dump_decorations().unwrap();
	assert_eq!(all.len(), 1);
	assert_eq!(all[0].key, "m");
}

#[test]
fn decoration_queries_by_range_and_line() {
	let (library, _, _) = test_library();
	let doc = library
		.open(DocumentOptions::from_text("aa\nbb\ncc\n"))
		.unwrap();
	doc.decorate(&[
		("first", Some(Address::Byte(1))),
		("second", Some(Address::Byte(4))),
		("third", Some(Address::Byte(7))),
	])
	.unwrap();

	let in_range = doc.decorations_in_range(3..7).unwrap();
	assert_eq!(in_range.len(), 1);
	assert_eq!(in_range[0].key, "second");

	let line1 = doc.decorations_on_line(1).unwrap();
	assert_eq!(line1.len(), 1);
	assert_eq!(line1[0].key, "second");
	assert_eq!(line1[0].position, 4);
}

#[test]
fn decoration_dump_import_round_trip() {
	let (library, _, _) = test_library();
	let doc = library.open(DocumentOptions::from_text("0123456789")).unwrap();
	doc.decorate(&[
		("alpha", Some(Address::Byte(0))),
		("beta", Some(Address::Byte(5))),
		("gamma", Some(Address::Byte(10))),
	])
	.unwrap();
	let dump = doc.dump_decorations().unwrap();

	let copy = library.open(DocumentOptions::from_text("0123456789")).unwrap();
	let records: Vec<(String, usize)> = dump.iter().map(|r| (r.key.clone(), r.position)).collect();
	let imported = copy
		.import_decorations(DecorationSource::List(records))
		.unwrap();
	assert_eq!(imported, 3);
	assert_eq!(copy.dump_decorations().unwrap(), dump);
}

#[test]
fn transactions_nest_and_publish_one_revision() {
	let (library, _, _) = test_library();
	let doc = library.open(DocumentOptions::from_text("base")).unwrap();
	let cursor = doc.create_cursor(CursorMode::Process).unwrap();

	doc.begin_transaction(Some("edit")).unwrap();
	doc.insert(cursor, b"one ", false).unwrap();
	doc.begin_transaction(None).unwrap();
	doc.insert(cursor, b"two ", false).unwrap();
	doc.commit_transaction().unwrap();
	assert!(doc.in_transaction());
	let published = doc.commit_transaction().unwrap();

	assert_eq!(published.rev, 1);
	assert_eq!(doc.current_version(), published);
	assert_eq!(content(&doc), "one two base");

	// Readers before the commit never saw the intermediate state; the
	// whole transaction is one undo step.
	doc.undo_seek(0).unwrap();
	assert_eq!(content(&doc), "base");
}

#[test]
fn empty_transaction_still_produces_revision() {
	let (library, _, _) = test_library();
	let doc = library.open(DocumentOptions::from_text("x")).unwrap();
	doc.begin_transaction(Some("empty")).unwrap();
	let published = doc.commit_transaction().unwrap();
	assert_eq!(published.rev, 1);
	assert_eq!(doc.current_version().rev, 1);
	assert_eq!(content(&doc), "x");
}

#[test]
fn poisoned_transaction_fails_commit() {
	let (library, _, _) = test_library();
	let doc = library.open(DocumentOptions::from_text("keep")).unwrap();
	let cursor = doc.create_cursor(CursorMode::Process).unwrap();

	doc.begin_transaction(None).unwrap();
	doc.insert(cursor, b"zap ", false).unwrap();
	doc.begin_transaction(None).unwrap();
	doc.rollback_transaction().unwrap();
	assert!(matches!(
		doc.commit_transaction(),
		Err(Error::TransactionPoisoned)
	));

	assert!(!doc.in_transaction());
	assert_eq!(content(&doc), "keep");
	assert_eq!(doc.current_version().rev, 0);
}

#[test]
fn transaction_errors() {
	let (library, _, _) = test_library();
	let doc = library.open(DocumentOptions::from_text("x")).unwrap();
	assert!(matches!(doc.commit_transaction(), Err(Error::NoTransaction)));
	assert!(matches!(doc.rollback_transaction(), Err(Error::NoTransaction)));

	doc.begin_transaction(None).unwrap();
	assert!(matches!(doc.undo_seek(0), Err(Error::TransactionPending)));
	assert!(matches!(
		doc.fork_seek(ForkId::ROOT),
		Err(Error::TransactionPending)
	));
	doc.rollback_transaction().unwrap();
}

#[test]
fn transaction_rollback_restores_cursors() {
	let (library, _, _) = test_library();
	let doc = library.open(DocumentOptions::from_text("abcdef")).unwrap();
	let cursor = doc.create_cursor(CursorMode::Process).unwrap();
	doc.seek_cursor(cursor, Address::Byte(3)).unwrap();

	doc.begin_transaction(None).unwrap();
	doc.insert(cursor, b"-----", false).unwrap();
	assert_eq!(doc.cursor_position(cursor).unwrap().byte, 8);
	doc.rollback_transaction().unwrap();
	assert_eq!(doc.cursor_position(cursor).unwrap().byte, 3);
}

#[test]
fn fork_seek_lands_on_common_revision() {
	let (library, _, _) = test_library();
	let doc = library.open(DocumentOptions::from_text("AB")).unwrap();
	let cursor = doc.create_cursor(CursorMode::Process).unwrap();

	doc.insert(cursor, b"1", false).unwrap(); // fork 0 rev 1: "1AB"
	doc.undo_seek(0).unwrap();
	doc.seek_cursor(cursor, Address::Byte(0)).unwrap();
	doc.insert(cursor, b"2", false).unwrap(); // fork 1 rev 1: "2AB"

	doc.fork_seek(ForkId::ROOT).unwrap();
	// Branch point was (0, 0).
	assert_eq!(doc.current_version().fork, ForkId::ROOT);
	assert_eq!(doc.current_version().rev, 0);
	assert_eq!(content(&doc), "AB");

	doc.undo_seek(1).unwrap();
	assert_eq!(content(&doc), "1AB");

	doc.fork_seek(ForkId(1)).unwrap();
	assert_eq!(content(&doc), "AB");
	doc.undo_seek(1).unwrap();
	assert_eq!(content(&doc), "2AB");

	assert!(matches!(doc.fork_seek(ForkId(9)), Err(Error::ForkNotFound(_))));
}

#[test]
fn human_cursor_edits_stage_in_region_until_checkpoint() {
	let (library, _, _) = test_library();
	let doc = library.open(DocumentOptions::from_text("Hello World")).unwrap();
	let cursor = doc.create_cursor(CursorMode::Human).unwrap();
	doc.seek_cursor(cursor, Address::Byte(5)).unwrap();
	let rev_before = doc.current_version().rev;

	doc.insert(cursor, b",", false).unwrap();
	doc.insert(cursor, b" hi", false).unwrap();
	// Edits are staged: the tree still holds the original bytes and no
	// revision has been committed.
	assert_eq!(doc.current_version().rev, rev_before);
	assert_eq!(content(&doc), "Hello World");
	assert_eq!(doc.cursor_position(cursor).unwrap().byte, 9);

	assert!(doc.checkpoint().unwrap());
	assert_eq!(doc.current_version().rev, rev_before + 1);
	assert_eq!(content(&doc), "Hello, hi World");
	// Nothing left to dissolve.
	assert!(!doc.checkpoint().unwrap());
}

#[test]
fn region_decorations_follow_edits_and_survive_dissolve() {
	let (library, _, _) = test_library();
	let doc = library.open(DocumentOptions::from_text("Hello World")).unwrap();
	doc.decorate(&[("w", Some(Address::Byte(6)))]).unwrap();

	let cursor = doc.create_cursor(CursorMode::Human).unwrap();
	doc.seek_cursor(cursor, Address::Byte(5)).unwrap();
	doc.insert(cursor, b"!!", false).unwrap();

	// Query sees the staged position.
	assert_eq!(doc.decoration_position("w").unwrap().byte, 8);
	doc.checkpoint().unwrap();
	assert_eq!(content(&doc), "Hello!! World");
	assert_eq!(doc.decoration_position("w").unwrap().byte, 8);
}

#[test]
fn explicit_region_dissolve_and_discard() {
	let (library, _, _) = test_library();
	let doc = library.open(DocumentOptions::from_text("0123456789")).unwrap();
	let cursor = doc.create_cursor(CursorMode::Process).unwrap();

	doc.begin_region(cursor, 2..8).unwrap();
	doc.seek_cursor(cursor, Address::Byte(4)).unwrap();
	doc.insert(cursor, b"ab", false).unwrap();
	assert_eq!(content(&doc), "0123456789");
	doc.dissolve_region(cursor).unwrap();
	assert_eq!(content(&doc), "0123ab456789");

	doc.begin_region(cursor, 0..4).unwrap();
	doc.seek_cursor(cursor, Address::Byte(0)).unwrap();
	doc.insert(cursor, b"zz", false).unwrap();
	doc.discard_region(cursor).unwrap();
	assert_eq!(content(&doc), "0123ab456789");
}

#[test]
fn transaction_rollback_discards_regions() {
	let (library, _, _) = test_library();
	let doc = library.open(DocumentOptions::from_text("stable")).unwrap();
	let cursor = doc.create_cursor(CursorMode::Human).unwrap();

	doc.begin_transaction(None).unwrap();
	doc.seek_cursor(cursor, Address::Byte(6)).unwrap();
	doc.insert(cursor, b" staged", false).unwrap();
	doc.rollback_transaction().unwrap();

	assert_eq!(content(&doc), "stable");
	assert!(!doc.checkpoint().unwrap());
}

#[test]
fn transaction_commit_dissolves_owned_regions() {
	let (library, _, _) = test_library();
	let doc = library.open(DocumentOptions::from_text("stable")).unwrap();
	let cursor = doc.create_cursor(CursorMode::Human).unwrap();

	doc.begin_transaction(None).unwrap();
	doc.seek_cursor(cursor, Address::Byte(6)).unwrap();
	doc.insert(cursor, b" staged", false).unwrap();
	let published = doc.commit_transaction().unwrap();

	assert_eq!(content(&doc), "stable staged");
	assert_eq!(doc.current_version(), published);
}

#[test]
fn channel_load_whole_blocks_until_complete() {
	let (library, _, _) = test_library();
	let (tx, rx) = mpsc::channel();
	tx.send(b"first ".to_vec()).unwrap();
	tx.send(b"second".to_vec()).unwrap();
	drop(tx);

	let doc = library
		.open(DocumentOptions::from_channel(rx).with_ready(ReadyThreshold::Whole))
		.unwrap();
	assert_eq!(content(&doc), "first second");

	// A mutation after the load forks nothing and undo restores the full
	// initial content.
	let cursor = doc.create_cursor(CursorMode::Process).unwrap();
	doc.insert(cursor, b"!", false).unwrap();
	doc.undo_seek(0).unwrap();
	assert_eq!(content(&doc), "first second");
}

#[test]
fn channel_load_ready_threshold_and_cursor_wait() {
	let (library, _, _) = test_library();
	let (tx, rx) = mpsc::channel();
	tx.send(b"abcde".to_vec()).unwrap();

	let doc = library
		.open(DocumentOptions::from_channel(rx).with_ready(ReadyThreshold::Bytes(3)))
		.unwrap();
	assert!(doc.totals().bytes >= 3);

	let cursor = doc.create_cursor(CursorMode::Process).unwrap();
	doc.seek_cursor(cursor, Address::Byte(20)).unwrap();
	assert!(matches!(
		doc.wait_ready_timeout(cursor, Duration::ZERO),
		Err(Error::NotReady)
	));
	assert!(matches!(
		doc.wait_ready_timeout(cursor, Duration::from_millis(20)),
		Err(Error::Timeout)
	));

	tx.send(b"fghijklmnopqrstuvwxyz".to_vec()).unwrap();
	drop(tx);
	doc.wait_ready(cursor).unwrap();
	assert_eq!(doc.cursor_position(cursor).unwrap().byte, 20);
	assert_eq!(doc.totals().bytes, 26);
}

#[test]
fn open_requires_exactly_one_source() {
	let (library, _, _) = test_library();
	assert!(matches!(
		library.open(DocumentOptions::default()),
		Err(Error::NoDataSource)
	));
	let mut options = DocumentOptions::from_text("a");
	options.bytes = Some(vec![b'b']);
	assert!(matches!(
		library.open(options),
		Err(Error::MultipleDataSources)
	));
}

#[test]
fn warm_document_reads_from_backing_file() {
	let (library, _, fs) = test_library();
	fs.put_file("/data.txt", b"Hello Warm World".to_vec());

	let doc = library
		.open(
			DocumentOptions::from_path("/data.txt").with_loading_style(LoadingStyle::AllTiers),
		)
		.unwrap();
	assert_eq!(doc.storage_state_at(0).unwrap(), StorageState::Warm);
	assert_eq!(doc.trust_at(0).unwrap(), TrustLevel::Full);
	assert_eq!(doc.read_to_string(0..16).unwrap(), "Hello Warm World");
	// Warm leaves never own their bytes; the tier does not change.
	assert_eq!(doc.storage_state_at(0).unwrap(), StorageState::Warm);
}

#[test]
fn warm_mismatch_detected_after_source_change() {
	let (library, _, fs) = test_library();
	fs.put_file("/data.txt", b"Hello Warm World".to_vec());
	let doc = library
		.open(
			DocumentOptions::from_path("/data.txt").with_loading_style(LoadingStyle::AllTiers),
		)
		.unwrap();

	fs.corrupt_file("/data.txt", 0, b"XXXXX");
	assert_eq!(doc.check_source().unwrap(), SourceChange::Modified);
	assert_eq!(doc.trust_at(0).unwrap(), TrustLevel::Stale);
	assert!(matches!(
		doc.read(0..5),
		Err(Error::WarmStorageMismatch)
	));

	doc.acknowledge_source_change(SourceResolution::ReloadFromDisk)
		.unwrap();
	assert_eq!(doc.read_to_string(0..16).unwrap(), "XXXXX Warm World");
	assert_eq!(doc.trust_at(0).unwrap(), TrustLevel::Full);
}

#[test]
fn append_absorbed_under_continuous_policy() {
	let (library, _, fs) = test_library();
	fs.put_file("/log.txt", b"line1\n".to_vec());
	let doc = library
		.open(
			DocumentOptions::from_path("/log.txt")
				.with_loading_style(LoadingStyle::AllTiers)
				.with_append_policy(AppendPolicy::Continuous),
		)
		.unwrap();

	fs.append_file("/log.txt", b"line2\n");
	assert_eq!(doc.check_source().unwrap(), SourceChange::Appended { bytes: 6 });
	assert_eq!(content(&doc), "line1\nline2\n");

	// Continuous keeps absorbing.
	fs.append_file("/log.txt", b"line3\n");
	doc.check_source().unwrap();
	assert_eq!(content(&doc), "line1\nline2\nline3\n");
}

#[test]
fn local_edit_past_eof_keeps_append_verification_honest() {
	let (library, _, fs) = test_library();
	fs.put_file("/log.txt", b"line1\n".to_vec());
	let doc = library
		.open(
			DocumentOptions::from_path("/log.txt")
				.with_loading_style(LoadingStyle::AllTiers)
				.with_append_policy(AppendPolicy::Continuous),
		)
		.unwrap();

	// A local edit at the end rebuilds the tail leaf in memory; the leaf
	// that used to straddle the file's end no longer vouches for disk.
	let cursor = doc.create_cursor(CursorMode::Process).unwrap();
	doc.seek_cursor(cursor, Address::Byte(6)).unwrap();
	doc.insert(cursor, b"local", false).unwrap();
	assert_eq!(content(&doc), "line1\nlocal");

	// The file grew, but its original bytes were rewritten: not a genuine
	// append, so nothing may be absorbed.
	fs.put_file("/log.txt", b"XXXXX\njunk".to_vec());
	assert_eq!(doc.check_source().unwrap(), SourceChange::Modified);
	assert_eq!(content(&doc), "line1\nlocal");
}

#[test]
fn genuine_append_still_absorbed_after_local_tail_edit() {
	let (library, _, fs) = test_library();
	fs.put_file("/log.txt", b"line1\n".to_vec());
	let doc = library
		.open(
			DocumentOptions::from_path("/log.txt")
				.with_loading_style(LoadingStyle::AllTiers)
				.with_append_policy(AppendPolicy::Continuous),
		)
		.unwrap();

	let cursor = doc.create_cursor(CursorMode::Process).unwrap();
	doc.seek_cursor(cursor, Address::Byte(6)).unwrap();
	doc.insert(cursor, b"local", false).unwrap();

	// The recorded tail span still matches the file, so the growth is a
	// genuine append and lands at the document's end.
	fs.append_file("/log.txt", b"line2\n");
	assert_eq!(doc.check_source().unwrap(), SourceChange::Appended { bytes: 6 });
	assert_eq!(content(&doc), "line1\nlocalline2\n");
}

#[test]
fn append_once_policy_downgrades_to_ask() {
	let (library, _, fs) = test_library();
	fs.put_file("/log.txt", b"a\n".to_vec());
	let doc = library
		.open(
			DocumentOptions::from_path("/log.txt")
				.with_loading_style(LoadingStyle::AllTiers)
				.with_append_policy(AppendPolicy::Once),
		)
		.unwrap();

	fs.append_file("/log.txt", b"b\n");
	doc.check_source().unwrap();
	assert_eq!(content(&doc), "a\nb\n");

	fs.append_file("/log.txt", b"c\n");
	doc.check_source().unwrap();
	// Second append is only reported, not absorbed.
	assert_eq!(content(&doc), "a\nb\n");
}

#[test]
fn source_deletion_and_replacement_classified() {
	let (library, _, fs) = test_library();
	fs.put_file("/gone.txt", b"data".to_vec());
	let doc = library.open(DocumentOptions::from_path("/gone.txt")).unwrap();

	fs.replace_file("/gone.txt", b"data".to_vec());
	assert_eq!(doc.check_source().unwrap(), SourceChange::Replaced);

	fs.delete_file("/gone.txt");
	assert_eq!(doc.check_source().unwrap(), SourceChange::Deleted);
}

#[test]
fn force_rebalance_preserves_content_and_versions() {
	let (library, _, _) = test_library();
	let options = LibraryOptions {
		max_leaf_size: 8,
		..LibraryOptions::default()
	};
	let library2 = Library::with_backends(
		options,
		Arc::new(MemoryFileSystem::new()),
		None,
	)
	.unwrap();
	drop(library);

	let doc = library2.open(DocumentOptions::from_text("seed")).unwrap();
	let cursor = doc.create_cursor(CursorMode::Process).unwrap();
	for _ in 0..12 {
		let end = doc.totals().bytes;
		doc.seek_cursor(cursor, Address::Byte(end)).unwrap();
		doc.insert(cursor, b"abcdefgh", false).unwrap();
	}
	let before = content(&doc);
	let rev = doc.current_version().rev;

	doc.force_rebalance().unwrap();
	assert_eq!(content(&doc), before);
	assert_eq!(doc.current_version().rev, rev + 1);
	assert!(!doc.needs_rebalance());

	doc.undo_seek(rev).unwrap();
	assert_eq!(content(&doc), before);
}

#[test]
fn memory_usage_tracks_open_and_close() {
	let (library, _, _) = test_library();
	let before = library.memory_usage();
	let doc = library.open(DocumentOptions::from_text("0123456789")).unwrap();
	assert!(library.memory_usage() >= before + 10);
	library.close(&doc).unwrap();
	assert_eq!(library.memory_usage(), before);
	assert_eq!(library.document_count(), 0);
}
