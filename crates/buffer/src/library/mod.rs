//! Library - the entry point owning documents and shared resources.
//!
//! A [`Library`] owns the cold store, the default file system, the set of
//! live documents, the library-wide memory accounting, and the background
//! maintenance thread. Documents are opened through it and share its
//! access clock so eviction can order leaves least-recently-used across
//! all of them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};
use vellum_primitives::{ChillLevel, DocumentOptions, LibraryOptions, Result};

use crate::cursor::CursorState;
use crate::decoration::DecorationCache;
use crate::document::{DocShared, Document, DocumentId, DocumentInner, LoadState, loader};
use crate::fs::{FileSystem, StdFileSystem};
use crate::history::{ForkTable, RevisionIndex, RevisionInfo};
use crate::rope::{LeafSnapshot, Registry, Snapshot};
use crate::storage::chill::{Candidate, chill_snapshot, collect_candidates};
use crate::storage::watch::spawn_watcher;
use crate::storage::{ColdStorage, DirColdStorage};

mod maintenance;

/// Result of one chill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChillReport {
	/// Leaves moved to cold storage.
	pub moved: usize,
	/// Payload bytes freed from memory.
	pub bytes_freed: usize,
}

pub(crate) struct LibShared {
	pub options: LibraryOptions,
	pub fs: Arc<dyn FileSystem>,
	pub cold: Option<Arc<dyn ColdStorage>>,
	pub docs: RwLock<Vec<Document>>,
	pub resident: Arc<AtomicUsize>,
	pub pressure: Arc<AtomicBool>,
	pub clock: Arc<AtomicU64>,
	/// Clock value at the previous maintenance tick; the `UnusedData`
	/// chill level treats older access stamps as unused.
	pub last_tick: Arc<AtomicU64>,
	pub shutdown: Arc<AtomicBool>,
	pub maintenance: Mutex<Option<std::thread::JoinHandle<()>>>,
}

/// The library instance. Explicit and owned by its caller; there is no
/// process-global state.
pub struct Library {
	shared: Arc<LibShared>,
}

impl Library {
	/// Creates a library with the standard file system and, when
	/// `cold_path` is set, a directory-backed cold store.
	pub fn new(options: LibraryOptions) -> Result<Self> {
		let cold: Option<Arc<dyn ColdStorage>> = options
			.cold_path
			.as_ref()
			.map(|p| Arc::new(DirColdStorage::new(p)) as Arc<dyn ColdStorage>);
		Self::with_backends(options, Arc::new(StdFileSystem::new()), cold)
	}

	/// Creates a library over explicit file-system and cold-storage
	/// backends.
	pub fn with_backends(
		options: LibraryOptions,
		fs: Arc<dyn FileSystem>,
		cold: Option<Arc<dyn ColdStorage>>,
	) -> Result<Self> {
		let shared = Arc::new(LibShared {
			fs,
			cold,
			docs: RwLock::new(Vec::new()),
			resident: Arc::new(AtomicUsize::new(0)),
			pressure: Arc::new(AtomicBool::new(false)),
			clock: Arc::new(AtomicU64::new(0)),
			last_tick: Arc::new(AtomicU64::new(0)),
			shutdown: Arc::new(AtomicBool::new(false)),
			maintenance: Mutex::new(None),
			options,
		});
		if let Some(interval) = shared.options.background_interval {
			let handle = maintenance::spawn(shared.clone(), interval);
			*shared.maintenance.lock() = Some(handle);
		}
		Ok(Self { shared })
	}

	/// Opens a document from exactly one data source.
	pub fn open(&self, mut options: DocumentOptions) -> Result<Document> {
		loader::validate_source(&options)?;
		let id = DocumentId::next();

		let resident = self.shared.resident.clone();
		let mut registry = Registry::new(resident.clone());
		let mut revisions = RevisionIndex::default();
		let root = registry.insert(
			vellum_primitives::Version::ORIGIN,
			Snapshot::Leaf(LeafSnapshot::from_bytes(&[], Vec::new())),
		);
		revisions.record(
			vellum_primitives::Version::ORIGIN,
			RevisionInfo {
				name: None,
				has_changes: false,
				root,
				cursors: Vec::new(),
			},
		);

		let inner = DocumentInner {
			registry,
			forks: ForkTable::new(),
			revisions,
			dedup: FxHashMap::default(),
			current: vellum_primitives::Version::ORIGIN,
			root,
			totals: vellum_primitives::TextMetrics::ZERO,
			cursors: FxHashMap::<crate::cursor::CursorId, CursorState>::default(),
			next_cursor: 0,
			txn: None,
			source: None,
			load: LoadState::default(),
			append_policy: options.append_policy,
			read_ahead: options.read_ahead,
		};

		let shared = Arc::new(DocShared {
			id,
			folder: format!("doc-{}", id.0),
			inner: RwLock::new(inner),
			cache: Mutex::new(DecorationCache::default()),
			fs: self.shared.fs.clone(),
			cold: self.shared.cold.clone(),
			loading_style: options.loading_style,
			change_handler: options.change_handler.take(),
			file_lock: Mutex::new(()),
			clock: self.shared.clock.clone(),
			resident,
			pressure: self.shared.pressure.clone(),
			hard_limit: self.shared.options.memory_hard_limit,
			max_leaf: self.shared.options.max_leaf_size,
			grace_window: self.shared.options.grace_window_size,
			rebalance_budget: self.shared.options.rebalance_budget,
			shutdown: AtomicBool::new(false),
			watcher: Mutex::new(None),
			loader: Mutex::new(None),
			library: Arc::downgrade(&self.shared),
		});
		let doc = Document { shared };

		// Content.
		let mut remaining_channel = None;
		{
			let mut inner = doc.shared.inner.write();
			if let Some(text) = options.text.take() {
				loader::load_bytes(&doc.shared, &mut inner, text.as_bytes());
				inner.load.complete = true;
			} else if let Some(bytes) = options.bytes.take() {
				loader::load_bytes(&doc.shared, &mut inner, &bytes);
				inner.load.complete = true;
			} else if let Some(path) = options.path.take() {
				loader::load_path(&doc.shared, &mut inner, &path)?;
			} else if let Some(rx) = options.channel.take() {
				remaining_channel =
					loader::load_channel_until_ready(&doc.shared, &mut inner, rx, options.ready)?;
			}
			inner.refresh_ready(&doc.shared);
		}
		if let Some(rx) = remaining_channel {
			let handle = loader::spawn_loader(doc.clone(), rx);
			*doc.shared.loader.lock() = Some(handle);
		}

		// Initial decorations.
		if let Some(source) = options.decorations.take() {
			doc.import_decorations(source)?;
		}

		// Watcher.
		if let Some(interval) = options.watch_interval
			&& doc.shared.inner.read().source.is_some()
		{
			let handle = spawn_watcher(doc.clone(), interval);
			*doc.shared.watcher.lock() = Some(handle);
		}

		self.shared.docs.write().push(doc.clone());
		debug!(doc = id.0, "document opened");
		Ok(doc)
	}

	/// Closes a document: stops its background threads, removes its cold
	/// blocks, and drops it from the live set. Idempotent.
	pub fn close(&self, doc: &Document) -> Result<()> {
		{
			let mut docs = self.shared.docs.write();
			let before = docs.len();
			docs.retain(|d| d.id() != doc.id());
			if docs.len() == before {
				return Ok(());
			}
		}
		doc.shut_down();

		// Free the document's memory share and its cold blocks.
		let inner = doc.shared.inner.read();
		let mut freed = 0usize;
		inner.registry.for_each_snapshot(|_, _, snap| {
			let Some(leaf) = snap.as_leaf() else { return };
			if let Some(payload) = leaf.payload_if_memory() {
				freed += payload.len();
			}
			if let Some(block) = leaf.cold_block()
				&& let Some(cold) = &self.shared.cold
				&& let Err(e) = cold.delete(&doc.shared.folder, &block)
			{
				warn!(doc = doc.id().0, block = %block, error = %e, "cold delete failed");
			}
		});
		self.shared.resident.fetch_sub(freed, Ordering::Relaxed);
		debug!(doc = doc.id().0, "document closed");
		Ok(())
	}

	/// Number of live documents.
	pub fn document_count(&self) -> usize {
		self.shared.docs.read().len()
	}

	/// Total memory-resident payload bytes across all documents.
	pub fn memory_usage(&self) -> usize {
		self.shared.resident.load(Ordering::Relaxed)
	}

	/// Whether the hard limit was exceeded and could not be reduced.
	pub fn memory_pressure(&self) -> bool {
		self.shared.pressure.load(Ordering::Relaxed)
	}

	/// Moves up to `budget` least-recently-accessed memory leaves to cold
	/// storage.
	pub fn chill(&self, level: ChillLevel, budget: usize) -> Result<ChillReport> {
		Ok(self.shared.chill_run(level, budget, None))
	}

	/// Chills until memory drops under the soft limit, no candidates
	/// remain, or one tick's budget is spent.
	pub fn chill_to_target(&self, level: ChillLevel) -> Result<ChillReport> {
		Ok(self.shared.chill_run(
			level,
			self.shared.options.chill_budget,
			Some(self.shared.options.memory_soft_limit),
		))
	}
}

impl LibShared {
	/// One chill pass over all live documents, least recently accessed
	/// leaves first. Stops on the first failing node.
	pub(crate) fn chill_run(
		&self,
		level: ChillLevel,
		budget: usize,
		soft_target: Option<usize>,
	) -> ChillReport {
		let watermark = self.last_tick.load(Ordering::Relaxed);
		let docs: Vec<Document> = self.docs.read().clone();

		let mut candidates: Vec<(Document, Candidate)> = Vec::new();
		for doc in &docs {
			let inner = doc.shared.inner.read();
			for candidate in collect_candidates(&doc.shared, &inner, level, watermark) {
				candidates.push((doc.clone(), candidate));
			}
		}
		candidates.sort_by_key(|(_, c)| c.stamp);

		let mut report = ChillReport::default();
		for (doc, candidate) in candidates.into_iter().take(budget) {
			if let Some(target) = soft_target
				&& self.resident.load(Ordering::Relaxed) <= target
			{
				break;
			}
			match chill_snapshot(&doc.shared, &candidate) {
				Ok(0) => {}
				Ok(freed) => {
					report.moved += 1;
					report.bytes_freed += freed;
				}
				Err(e) => {
					warn!(doc = doc.id().0, error = %e, "chill stopped on failure");
					break;
				}
			}
		}
		debug!(moved = report.moved, bytes = report.bytes_freed, ?level, "chill run");
		report
	}
}

impl Drop for Library {
	fn drop(&mut self) {
		self.shared.shutdown.store(true, Ordering::Relaxed);
		if let Some(handle) = self.shared.maintenance.lock().take() {
			handle.thread().unpark();
			let _ = handle.join();
		}
		for doc in self.shared.docs.read().iter() {
			doc.shut_down();
		}
	}
}
