//! Error types shared by the core crate

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while listing, planning or updating a page.
///
/// The execution engine classifies errors into three buckets: transport
/// failures abort immediately (the bus may be unhealthy), file errors and
/// interruptions trigger the rescue-replay recovery of the erase-block
/// being rebuilt, and everything else is rejected before any flash write.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport read or write failed.
    #[error("device error (address={offset})")]
    Usb {
        /// Absolute offset of the failed transfer.
        offset: u32,
    },

    /// An input file could not be opened, read or stat'ed.
    #[error("{}: {}", path.display(), source)]
    File {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// An input file changed between validation and execution.
    #[error("{} has changed", path.display())]
    FileChanged {
        /// Path of the offending file.
        path: PathBuf,
    },

    /// A ROM file's header did not validate or disagreed with the file.
    #[error("{}: {}", path.display(), reason)]
    BadRom {
        /// Path of the offending file.
        path: PathBuf,
        /// Human-readable reason.
        reason: String,
    },

    /// An interrupt signal was observed at a poll point.
    #[error("operation interrupted")]
    Interrupted,

    /// The flash contents are inconsistent.
    #[error("format error: {0}")]
    Format(String),

    /// The planner could not place a ROM, even after defragmentation.
    #[error("no space left on page")]
    NoSpace,

    /// Two ROMs (inputs or input vs flash) share a title.
    #[error("duplicate title {0:?}")]
    DuplicateTitle(String),

    /// A ROM's enhancements conflict with the page's menu.
    #[error("{title:?} is not compatible with the menu of this page")]
    EnhancementIncompat {
        /// Title of the incompatible ROM.
        title: String,
    },

    /// A command-line argument violates constraints.
    #[error("{0}")]
    InvalidArg(String),
}

impl Error {
    /// Shorthand for a file I/O error with its path attached.
    pub fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::File {
            path: path.into(),
            source,
        }
    }

    /// True for transport failures, which abort without recovery.
    pub fn is_usb(&self) -> bool {
        matches!(self, Error::Usb { .. })
    }

    /// True for errors the execution engine recovers from (file errors
    /// and interruptions).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::File { .. } | Error::FileChanged { .. } | Error::BadRom { .. } | Error::Interrupted
        )
    }
}

/// Result type alias using the core error.
pub type Result<T> = std::result::Result<T, Error>;
