//! Error Types for focaltile
//!
//! This module defines all error types that can occur while locating, decoding and
//! rendering amplifier segments.
//!
//! ## Error Categories
//!
//! ### I/O Errors
//! - `Io`: file system or object store operation failed
//! - `TransientIo`: an I/O failure that a caller may reasonably retry (timeouts,
//!   connection resets). The core itself never retries; a failed cache entry is
//!   discarded so the next `get` re-runs the loader.
//!
//! ### Descriptor / Header Errors
//! - `MalformedDescriptor`: an index line that matches no known dialect
//! - `MissingHeader`: a required FITS keyword was absent
//! - `MalformedDatasec`: DATASEC value did not parse as `[x1:x2,y1:y2]`
//!
//! ### Feature Errors
//! - `UnsupportedCompression`: ZCMPTYPE other than RICE_1 / GZIP_2
//! - `UnknownStrategy`: a bias-correction or colormap name not in the menu
//! - `Unsupported`: recognized but unimplemented (the DAQ descriptor dialect)
//!
//! ### Internal Errors
//! - `Internal`: decompressor corruption or a broken arithmetic invariant
//!
//! ## Usage
//! All fallible functions return `Result<T>` aliased to `Result<T, Error>`, so `?`
//! propagation works throughout. Cache loaders surface failures through shared
//! futures, which require `Clone`; `SharedError` (an `Arc<Error>`) is the clonable
//! form handed to every waiter of a failed load.

use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(String),

    #[error("transient IO error: {0}")]
    TransientIo(String),

    #[error("malformed segment descriptor: {0}")]
    MalformedDescriptor(String),

    #[error("missing header keyword {0}")]
    MissingHeader(String),

    #[error("malformed DATASEC: {0}")]
    MalformedDatasec(String),

    #[error("unsupported compression type: {0}")]
    UnsupportedCompression(String),

    #[error("unknown {kind}: {name}")]
    UnknownStrategy { kind: &'static str, name: String },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::Interrupted => Error::TransientIo(e.to_string()),
            _ => Error::Io(e.to_string()),
        }
    }
}

impl Error {
    /// True for failures where re-requesting the same key is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientIo(_))
    }

    /// True for the I/O family, which render entry points surface unchanged.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_) | Error::TransientIo(_))
    }
}

impl From<SharedError> for Error {
    fn from(e: SharedError) -> Self {
        (*e).clone()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Clonable error handle distributed to all waiters of a failed shared load.
pub type SharedError = Arc<Error>;

/// Result form carried inside shared (single-flight) futures.
pub type SharedResult<T> = std::result::Result<T, SharedError>;
