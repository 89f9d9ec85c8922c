//! Definitions of errors that the manifest kernel can encounter

use std::backtrace::{Backtrace, BacktraceStatus};

use crate::Version;

/// A [`std::result::Result`] that has the kernel [`Error`] as the error variant
pub type KernelResult<T, E = Error> = std::result::Result<T, E>;

/// All the types of errors that the kernel can run into
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// This is an error that includes a backtrace. To have a particular type of error include such
    /// backtrace (when RUST_BACKTRACE is set), annotate the error with `#[error(transparent)]`
    #[error("{source}\n{backtrace}")]
    Backtraced {
        source: Box<Self>,
        backtrace: Box<Backtrace>,
    },

    /// An error performing operations on files or directories
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// A generic error with a message
    #[error("Generic error: {0}")]
    Generic(String),

    /// An operation was rejected before it touched storage
    #[error("Invalid operation: {0}")]
    Validation(String),

    /// A partition spec (or an edit of one) is not well formed
    #[error("Invalid partition spec: {0}")]
    InvalidPartitionSpec(String),

    /// A blob that was expected to exist does not
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// A put-if-absent write found the target already present
    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    /// Metadata, a spec or a manifest payload is not valid JSON for its type
    #[error(transparent)]
    MalformedJson(#[from] serde_json::Error),

    /// Unable to parse the provided string as a location
    #[error("Invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A snapshot referenced by id is not part of the table metadata
    #[error("Snapshot {0} does not exist")]
    MissingSnapshot(i64),

    /// The catalog kept rejecting the compare-and-swap of the metadata pointer
    #[error("Commit failed after {attempts} attempts: {reason}")]
    CommitFailed { attempts: u32, reason: String },

    /// A table property was set to a value that does not parse for its key
    #[error("Invalid table property: {0}")]
    InvalidTableProperty(String),

    /// The catalog pointer moved backwards or skipped a version
    #[error("Unexpected catalog version {found}, expected {expected}")]
    UnexpectedVersion { expected: Version, found: Version },

    /// An internal invariant was violated
    #[error("Internal error {0}. This is a kernel bug, please report.")]
    InternalError(String),
}

// Convenience constructors for Error types that take a String argument
impl Error {
    pub fn generic(msg: impl ToString) -> Self {
        Self::Generic(msg.to_string())
    }
    pub fn validation(msg: impl ToString) -> Self {
        Self::Validation(msg.to_string())
    }
    pub fn invalid_partition_spec(msg: impl ToString) -> Self {
        Self::InvalidPartitionSpec(msg.to_string())
    }
    pub fn file_not_found(path: impl ToString) -> Self {
        Self::FileNotFound(path.to_string())
    }
    pub fn file_already_exists(path: impl ToString) -> Self {
        Self::FileAlreadyExists(path.to_string())
    }
    pub fn commit_failed(attempts: u32, reason: impl ToString) -> Self {
        Self::CommitFailed {
            attempts,
            reason: reason.to_string(),
        }
    }
    pub fn invalid_table_property(msg: impl ToString) -> Self {
        Self::InvalidTableProperty(msg.to_string())
    }
    pub fn internal_error(msg: impl ToString) -> Self {
        Self::InternalError(msg.to_string()).with_backtrace()
    }

    /// Capture a backtrace for this error if backtraces are enabled.
    pub fn with_backtrace(self) -> Self {
        let backtrace = Backtrace::capture();
        match backtrace.status() {
            BacktraceStatus::Captured => Self::Backtraced {
                source: Box::new(self),
                backtrace: Box::new(backtrace),
            },
            _ => self,
        }
    }

    /// True for errors raised by validation, which are never worth retrying.
    pub fn is_validation(&self) -> bool {
        match self {
            Self::Validation(_) | Self::InvalidPartitionSpec(_) => true,
            Self::Backtraced { source, .. } => source.is_validation(),
            _ => false,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::internal_error(format!("lock poisoned: {err}"))
    }
}
