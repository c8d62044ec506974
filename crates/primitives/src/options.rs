//! Configuration surface for the library and its documents.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// Which storage tiers a document's leaves may occupy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadingStyle {
	/// Everything stays in process memory. Forbids warm and cold tiers.
	#[default]
	MemoryOnly,
	/// Leaves may be chilled to cold storage. Forbids the warm tier.
	ColdAndMemory,
	/// Leaves may also reference the backing file directly (warm tier).
	AllTiers,
}

/// What to do when the backing file grows by a verifiable append.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AppendPolicy {
	/// Notify the change handler and leave the document untouched.
	#[default]
	Ask,
	/// Do nothing: no notification, no absorption.
	Ignore,
	/// Treat the growth like any other modification (mark warm leaves stale).
	Never,
	/// Absorb the first append, then fall back to `Ask`.
	Once,
	/// Absorb every detected append.
	Continuous,
}

/// Aggressiveness of a chill run. Each level is a superset of the previous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChillLevel {
	/// Only leaves reachable solely from non-current forks.
	InactiveForks,
	/// Plus leaves reachable only from revisions before the current one.
	OldHistory,
	/// Plus leaves of the current tree not accessed since the last tick.
	UnusedData,
	/// Every memory-resident leaf.
	Everything,
}

/// Where a leaf's payload physically resides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageState {
	/// Payload held in process memory.
	Memory,
	/// Payload read on demand from the backing file.
	Warm,
	/// Payload held by the library's cold store.
	Cold,
}

/// Derived confidence that a warm leaf's on-disk bytes still match what was
/// recorded when the document was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustLevel {
	/// No change ever detected to the source file.
	Full,
	/// A change was detected, but this leaf's hash verified since then.
	Verified,
	/// A change was detected and this leaf has not been re-verified.
	Stale,
	/// The application was notified of the change and has not resolved it.
	Suspended,
}

/// Classification of a detected change to the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceChange {
	Unchanged,
	/// Same size, different mtime.
	Modified,
	/// File grew; the tail may be a genuine append.
	Appended { bytes: u64 },
	/// Different inode: the file was swapped out from under us.
	Replaced,
	/// File shrank.
	Truncated,
	/// File no longer exists.
	Deleted,
}

/// How to resolve an acknowledged source change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceResolution {
	/// Reload document content from the file on disk as a new revision.
	ReloadFromDisk,
	/// Adopt the in-memory version as canonical: thaw all warm leaves and
	/// reset the change counter.
	KeepMemory,
}

/// Editing mode of a cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CursorMode {
	/// Edits go directly to the tree unless an explicit region covers them.
	#[default]
	Process,
	/// Edits route through an optimized region created on demand.
	Human,
}

/// When `open` may return for a lazily loaded document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadyThreshold {
	/// Wait for the entire source.
	#[default]
	Whole,
	/// Return once this many bytes are loaded.
	Bytes(usize),
	/// Return once this many code points are loaded.
	Chars(usize),
	/// Return once this many lines are loaded.
	Lines(usize),
}

/// Source of an initial decoration set.
pub enum DecorationSource {
	/// Inline dump text, one `key<TAB>byte_position` record per line.
	Inline(String),
	/// Path to a dump file in the same format.
	Path(PathBuf),
	/// Pre-parsed records.
	List(Vec<(String, usize)>),
	/// Records streamed over a channel.
	Channel(Receiver<(String, usize)>),
}

/// Callback invoked (outside the document lock) when the watcher or an
/// explicit check detects a source change.
pub type ChangeHandler = Arc<dyn Fn(SourceChange) + Send + Sync>;

/// Library-wide configuration.
#[derive(Clone)]
pub struct LibraryOptions {
	/// Directory for the built-in cold store. `None` leaves cold storage to
	/// an explicitly supplied backend, or disables it.
	pub cold_path: Option<PathBuf>,
	/// Soft memory limit targeted by background chill, in bytes.
	pub memory_soft_limit: usize,
	/// Hard memory limit enforced after mutations, in bytes.
	pub memory_hard_limit: usize,
	/// Maximum leaves moved per chill tick.
	pub chill_budget: usize,
	/// Background maintenance interval. `None` disables the thread.
	pub background_interval: Option<Duration>,
	/// Nodes visited by incremental rebalance per mutation.
	pub rebalance_budget: usize,
	/// Maximum leaf payload size before a split, in bytes.
	pub max_leaf_size: usize,
	/// Total width of an optimized region's grace window, in bytes.
	pub grace_window_size: usize,
}

impl Default for LibraryOptions {
	fn default() -> Self {
		Self {
			cold_path: None,
			memory_soft_limit: 64 << 20,
			memory_hard_limit: 256 << 20,
			chill_budget: 32,
			background_interval: None,
			rebalance_budget: 8,
			max_leaf_size: 128 << 10,
			grace_window_size: 8 << 10,
		}
	}
}

/// Per-document configuration.
///
/// Exactly one of `path`, `bytes`, `text`, `channel` must be set.
#[derive(Default)]
pub struct DocumentOptions {
	pub loading_style: LoadingStyle,
	/// Load from a file path (enables the warm tier under `AllTiers`).
	pub path: Option<PathBuf>,
	/// Load from a byte slice.
	pub bytes: Option<Vec<u8>>,
	/// Load from a string.
	pub text: Option<String>,
	/// Load lazily from a channel of byte chunks.
	pub channel: Option<Receiver<Vec<u8>>>,
	/// When `open` may return for channel sources.
	pub ready: ReadyThreshold,
	/// How far past a cursor the loader should stay, for channel sources.
	pub read_ahead: ReadyThreshold,
	pub append_policy: AppendPolicy,
	/// Metadata poll interval for the watcher thread. `None` disables it.
	pub watch_interval: Option<Duration>,
	/// Initial decorations to import after loading.
	pub decorations: Option<DecorationSource>,
	/// Invoked on detected source changes.
	pub change_handler: Option<ChangeHandler>,
}

impl DocumentOptions {
	/// Options for an in-memory document seeded from `text`.
	pub fn from_text(text: impl Into<String>) -> Self {
		Self {
			text: Some(text.into()),
			..Self::default()
		}
	}

	/// Options for an in-memory document seeded from `bytes`.
	pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
		Self {
			bytes: Some(bytes.into()),
			..Self::default()
		}
	}

	/// Options for a file-backed document.
	pub fn from_path(path: impl Into<PathBuf>) -> Self {
		Self {
			path: Some(path.into()),
			..Self::default()
		}
	}

	/// Options for a channel-fed document.
	pub fn from_channel(rx: Receiver<Vec<u8>>) -> Self {
		Self {
			channel: Some(rx),
			..Self::default()
		}
	}

	pub fn with_loading_style(mut self, style: LoadingStyle) -> Self {
		self.loading_style = style;
		self
	}

	pub fn with_ready(mut self, ready: ReadyThreshold) -> Self {
		self.ready = ready;
		self
	}

	pub fn with_read_ahead(mut self, read_ahead: ReadyThreshold) -> Self {
		self.read_ahead = read_ahead;
		self
	}

	pub fn with_append_policy(mut self, policy: AppendPolicy) -> Self {
		self.append_policy = policy;
		self
	}

	pub fn with_watch_interval(mut self, interval: Duration) -> Self {
		self.watch_interval = Some(interval);
		self
	}

	pub fn with_decorations(mut self, source: DecorationSource) -> Self {
		self.decorations = Some(source);
		self
	}

	pub fn with_change_handler(mut self, handler: ChangeHandler) -> Self {
		self.change_handler = Some(handler);
		self
	}
}
