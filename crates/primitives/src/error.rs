//! Error taxonomy for buffer operations.
//!
//! All fallible operations return these as first-class values; no unwinding
//! control flow. Rope invariant violations are programming bugs and abort
//! instead of surfacing here.

use thiserror::Error;

use crate::version::{ForkId, Revision};

/// Errors surfaced by the buffer engine.
#[derive(Debug, Error)]
pub enum Error {
	#[error("document has no data source")]
	NoDataSource,

	#[error("document has more than one data source")]
	MultipleDataSources,

	#[error("cursor not found or detached")]
	CursorNotFound,

	#[error("fork {0} not found")]
	ForkNotFound(ForkId),

	#[error("revision {0} not found")]
	RevisionNotFound(Revision),

	#[error("position out of range")]
	InvalidPosition,

	#[error("data at the requested position is not loaded yet")]
	NotReady,

	#[error("timed out waiting for readiness")]
	Timeout,

	#[error("no transaction is active")]
	NoTransaction,

	#[error("operation not permitted while a transaction is active")]
	TransactionPending,

	#[error("transaction was rolled back and cannot commit")]
	TransactionPoisoned,

	#[error("operation not supported by this backend")]
	NotSupported,

	#[error("file handle is not open")]
	FileNotOpen,

	#[error("warm payload does not match its recorded hash")]
	WarmStorageMismatch,

	#[error("memory hard limit exceeded and not reducible")]
	MemoryPressure,

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// Result type for buffer operations.
pub type Result<T> = std::result::Result<T, Error>;
