use rustc_hash::FxHashMap;
use vellum_primitives::{Address, ForkId, Version};

use super::*;
use crate::decoration::Decoration;

struct Fixture {
	reg: Registry,
	forks: ForkTable,
	dedup: FxHashMap<(NodeId, NodeId), NodeId>,
	max_leaf: usize,
}

impl Fixture {
	fn new(max_leaf: usize) -> Self {
		Self {
			reg: Registry::default(),
			forks: ForkTable::new(),
			dedup: FxHashMap::default(),
			max_leaf,
		}
	}

	fn ops(&mut self, read_at: Version, write_at: Version) -> TreeOps<'_> {
		TreeOps {
			reg: &mut self.reg,
			forks: &self.forks,
			dedup: &mut self.dedup,
			io: &MemoryFetch,
			read_at,
			write_at,
			max_leaf: self.max_leaf,
			rebalance_budget: 8,
		}
	}

	fn read(&self, at: Version) -> TreeRead<'_> {
		TreeRead {
			reg: &self.reg,
			forks: &self.forks,
			io: &MemoryFetch,
			at,
		}
	}

	fn content(&self, root: NodeId, at: Version) -> String {
		let read = self.read(at);
		let total = read.metrics(root).bytes;
		String::from_utf8(read.read_range(root, 0..total).unwrap()).unwrap()
	}
}

fn v(rev: u64) -> Version {
	Version::new(ForkId::ROOT, rev)
}

#[test]
fn build_and_read() {
	let mut fx = Fixture::new(4);
	let root = fx.ops(v(0), v(0)).build_from_bytes(b"Hello World");
	assert_eq!(fx.content(root, v(0)), "Hello World");
	let m = fx.read(v(0)).metrics(root);
	assert_eq!(m.bytes, 11);
	assert_eq!(m.chars, 11);
	assert_eq!(m.newlines, 0);
}

#[test]
fn build_splits_by_max_leaf() {
	let mut fx = Fixture::new(4);
	let root = fx.ops(v(0), v(0)).build_from_bytes(b"abcdefghij");
	let leaves = fx.read(v(0)).leaves(root);
	assert!(leaves.len() >= 3);
	for (_, snap, _) in &leaves {
		assert!(snap.as_leaf().unwrap().metrics.bytes <= 4);
	}
}

#[test]
fn splice_insert_middle() {
	let mut fx = Fixture::new(64);
	let root = fx.ops(v(0), v(0)).build_from_bytes(b"Hello World");
	let out = fx
		.ops(v(0), v(1))
		.splice(root, 5..5, b" XYZ", false, &[])
		.unwrap();
	assert_eq!(fx.content(out.root, v(1)), "Hello XYZ World");
	assert_eq!(out.inserted_metrics.bytes, 4);
	assert_eq!(out.removed_metrics.bytes, 0);
	// The old version still reads the old content.
	assert_eq!(fx.content(root, v(0)), "Hello World");
}

#[test]
fn splice_delete_across_leaves() {
	let mut fx = Fixture::new(4);
	let root = fx.ops(v(0), v(0)).build_from_bytes(b"abcdefghijkl");
	let out = fx.ops(v(0), v(1)).splice(root, 2..10, b"", false, &[]).unwrap();
	assert_eq!(fx.content(out.root, v(1)), "abkl");
	assert_eq!(out.removed_metrics.bytes, 8);
	assert_eq!(fx.content(root, v(0)), "abcdefghijkl");
}

#[test]
fn splice_rejects_out_of_range() {
	let mut fx = Fixture::new(64);
	let root = fx.ops(v(0), v(0)).build_from_bytes(b"abc");
	assert!(
		fx.ops(v(0), v(1))
			.splice(root, 2..9, b"", false, &[])
			.is_err()
	);
	assert!(
		fx.ops(v(0), v(1))
			.splice(root, 4..4, b"x", false, &[])
			.is_err()
	);
}

#[test]
fn splice_keeps_char_boundaries() {
	let mut fx = Fixture::new(4);
	// Three-byte characters force cuts off the naive midpoint.
	let text = "\u{65e5}\u{672c}\u{8a9e}\u{306e}";
	let root = fx.ops(v(0), v(0)).build_from_bytes(text.as_bytes());
	assert_eq!(fx.content(root, v(0)), text);
	for (_, snap, _) in fx.read(v(0)).leaves(root) {
		let leaf = snap.as_leaf().unwrap();
		let payload = leaf.payload_if_memory().unwrap();
		assert!(std::str::from_utf8(&payload).is_ok());
	}
}

#[test]
fn decoration_slides_on_insert() {
	let mut fx = Fixture::new(64);
	let root = fx.ops(v(0), v(0)).build_from_bytes(b"ABCDEFGH");
	// Place decorations by splicing them in at positions 3, 4, 5.
	let decs = vec![
		Decoration {
			key: "before".into(),
			offset: 3,
		},
		Decoration {
			key: "at".into(),
			offset: 4,
		},
		Decoration {
			key: "after".into(),
			offset: 5,
		},
	];
	let out = fx
		.ops(v(0), v(1))
		.splice(root, 0..8, b"ABCDEFGH", false, &decs)
		.unwrap();
	let root = out.root;

	let out = fx
		.ops(v(1), v(2))
		.splice(root, 4..4, b"XX", true, &[])
		.unwrap();
	assert_eq!(fx.content(out.root, v(2)), "ABCDXXEFGH");
	let positions: Vec<(String, usize)> = fx
		.read(v(2))
		.decorations_in_range(out.root, 0..10)
		.into_iter()
		.map(|(k, p)| (k.to_string(), p))
		.collect();
	assert!(positions.contains(&("before".to_string(), 3)));
	assert!(positions.contains(&("at".to_string(), 6)));
	assert!(positions.contains(&("after".to_string(), 7)));
}

#[test]
fn decoration_stays_on_insert_after() {
	let mut fx = Fixture::new(64);
	let root = fx.ops(v(0), v(0)).build_from_bytes(b"ABCDEFGH");
	let decs = vec![Decoration {
		key: "at".into(),
		offset: 4,
	}];
	let root = fx
		.ops(v(0), v(1))
		.splice(root, 0..8, b"ABCDEFGH", false, &decs)
		.unwrap()
		.root;

	let out = fx
		.ops(v(1), v(2))
		.splice(root, 4..4, b"XX", false, &[])
		.unwrap();
	let positions = fx.read(v(2)).decorations_in_range(out.root, 0..10);
	assert_eq!(positions.len(), 1);
	assert_eq!(positions[0].1, 4);
}

#[test]
fn delete_returns_inside_decorations() {
	let mut fx = Fixture::new(8);
	let content = b"[0]Hel[3]lo [5]Wor[8][A]ld";
	let decs = vec![
		Decoration {
			key: "mark_0".into(),
			offset: 0,
		},
		Decoration {
			key: "mark_3".into(),
			offset: 6,
		},
		Decoration {
			key: "mark_5".into(),
			offset: 12,
		},
		Decoration {
			key: "mark_8".into(),
			offset: 18,
		},
		Decoration {
			key: "mark_A".into(),
			offset: 24,
		},
	];
	let root = fx.ops(v(0), v(0)).build_from_bytes(content);
	let root = fx
		.ops(v(0), v(1))
		.splice(root, 0..content.len(), content, false, &decs)
		.unwrap()
		.root;

	let out = fx.ops(v(1), v(2)).splice(root, 6..15, b"", false, &[]).unwrap();
	assert_eq!(fx.content(out.root, v(2)), "[0]HelWor[8][A]ld");

	let mut removed: Vec<(String, usize)> = out
		.removed
		.iter()
		.map(|r| (r.key.to_string(), r.offset))
		.collect();
	removed.sort();
	assert_eq!(removed, vec![("mark_3".to_string(), 0), ("mark_5".to_string(), 6)]);

	let remaining = fx.read(v(2)).decorations_in_range(out.root, 0..17);
	let mut remaining: Vec<(String, usize)> = remaining
		.into_iter()
		.map(|(k, p)| (k.to_string(), p))
		.collect();
	remaining.sort();
	assert_eq!(
		remaining,
		vec![
			("mark_0".to_string(), 0),
			("mark_8".to_string(), 9),
			("mark_A".to_string(), 15),
		]
	);
}

#[test]
fn address_conversions() {
	let mut fx = Fixture::new(4);
	let text = "ab\ncd\u{e9}\nf";
	let mut ops = fx.ops(v(0), v(0));
	let root = ops.build_from_bytes(text.as_bytes());
	let read = fx.read(v(0));

	assert_eq!(read.resolve_address(root, Address::Byte(3)).unwrap(), 3);
	assert_eq!(read.resolve_address(root, Address::Char(4)).unwrap(), 4);
	// The e-acute is two bytes: char 5 sits after it.
	assert_eq!(read.resolve_address(root, Address::Char(6)).unwrap(), 7);
	assert_eq!(
		read.resolve_address(root, Address::LineChar { line: 1, chars: 2 })
			.unwrap(),
		5
	);
	assert_eq!(
		read.resolve_address(root, Address::LineChar { line: 2, chars: 1 })
			.unwrap(),
		9
	);
	assert!(read.resolve_address(root, Address::Byte(99)).is_err());
	assert!(
		read.resolve_address(root, Address::LineChar { line: 0, chars: 9 })
			.is_err()
	);

	let coords = read.coords_of_byte(root, 5).unwrap();
	assert_eq!(coords.byte, 5);
	assert_eq!(coords.chars, 5);
	assert_eq!(coords.line, 1);
	assert_eq!(coords.line_chars, 2);
}

#[test]
fn internal_aggregates_match_children() {
	let mut fx = Fixture::new(4);
	let root = fx.ops(v(0), v(0)).build_from_bytes(b"one\ntwo\nthree\nfour\n");
	fn check(read: &TreeRead<'_>, id: NodeId) {
		let snap = read.resolve(id);
		if let Some(node) = snap.as_internal() {
			let lm = read.resolve(node.left).metrics();
			let rm = read.resolve(node.right).metrics();
			assert_eq!(node.metrics, lm + rm);
			check(read, node.left);
			check(read, node.right);
		}
	}
	check(&fx.read(v(0)), root);
}

#[test]
fn unchanged_subtrees_are_shared() {
	let mut fx = Fixture::new(4);
	let root = fx.ops(v(0), v(0)).build_from_bytes(b"aaaabbbbccccdddd");
	let nodes_before = fx.reg.len();
	let out = fx
		.ops(v(0), v(1))
		.splice(root, 0..1, b"X", false, &[])
		.unwrap();
	let created = fx.reg.len() - nodes_before;
	// Only the first leaf and the path above it are rebuilt.
	assert!(created <= 5, "created {created} nodes");
	assert_eq!(fx.content(out.root, v(1)), "Xaaabbbbccccdddd");
}

#[test]
fn small_leaves_merge_on_concat() {
	let mut fx = Fixture::new(64);
	let joined = {
		let mut ops = fx.ops(v(0), v(0));
		let a = ops.build_from_bytes(b"ab");
		let b = ops.build_from_bytes(b"cd");
		ops.concat(a, b)
	};
	assert_eq!(fx.content(joined, v(0)), "abcd");
	assert_eq!(fx.read(v(0)).leaves(joined).len(), 1);
}

#[test]
fn whole_document_deletion_leaves_empty_root() {
	let mut fx = Fixture::new(4);
	let root = fx.ops(v(0), v(0)).build_from_bytes(b"abcdefgh");
	let out = fx.ops(v(0), v(1)).splice(root, 0..8, b"", false, &[]).unwrap();
	assert_eq!(fx.read(v(1)).metrics(out.root).bytes, 0);
	assert_eq!(fx.content(out.root, v(1)), "");
}

#[test]
fn force_rebalance_preserves_content() {
	let mut fx = Fixture::new(4);
	let mut root = fx.ops(v(0), v(0)).build_from_bytes(b"start");
	// Repeated appends skew the tree toward the right.
	let mut rev = 0;
	for _ in 0..20 {
		let total = fx.read(v(rev)).metrics(root).bytes;
		rev += 1;
		root = fx
			.ops(v(rev - 1), v(rev))
			.splice(root, total..total, b"xxxx", false, &[])
			.unwrap()
			.root;
	}
	let before = fx.content(root, v(rev));
	let rebuilt = fx.ops(v(rev), v(rev + 1)).force_rebalance(root);
	assert_eq!(fx.content(rebuilt, v(rev + 1)), before);
	assert!(!needs_rebalance(&fx.read(v(rev + 1)), rebuilt));
}

#[test]
fn empty_leaf_keeps_boundary_decorations_after_full_inner_delete() {
	let mut fx = Fixture::new(64);
	let root = fx.ops(v(0), v(0)).build_from_bytes(b"abcd");
	let decs = vec![Decoration {
		key: "end".into(),
		offset: 4,
	}];
	let root = fx
		.ops(v(0), v(1))
		.splice(root, 0..4, b"abcd", false, &decs)
		.unwrap()
		.root;
	// Delete everything: the marker at position 4 slides to 0 and must
	// survive on the empty root.
	let out = fx.ops(v(1), v(2)).splice(root, 0..4, b"", false, &[]).unwrap();
	assert!(out.removed.is_empty());
	let positions = fx.read(v(2)).decorations_in_range(out.root, 0..1);
	assert_eq!(positions.len(), 1);
	assert_eq!(positions[0].1, 0);
}
