//! Basic primitives shared across the vellum workspace.
//!
//! This crate holds the value types the buffer engine exposes at its API
//! surface: addresses and coordinates, text metrics, the error taxonomy, and
//! the option structs a [`Library`] and its documents are configured with.
//! It performs no I/O and takes no locks.
//!
//! [`Library`]: https://docs.rs/vellum-buffer

pub mod address;
pub mod error;
pub mod metrics;
pub mod options;
pub mod version;

pub use address::{Address, Coordinates};
pub use error::{Error, Result};
pub use metrics::{LineStart, TextMetrics};
pub use options::{
	AppendPolicy, ChangeHandler, ChillLevel, CursorMode, DecorationSource, DocumentOptions,
	LibraryOptions, LoadingStyle, ReadyThreshold, SourceChange, SourceResolution, StorageState,
	TrustLevel,
};
pub use version::{ForkId, Revision, Version};
