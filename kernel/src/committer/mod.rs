//! The `committer` module provides the [`Committer`] trait: the catalog pointer that names the
//! current [`TableMetadata`] of a table and swaps it atomically.
//!
//! The commit engine never mutates a table in place. It loads the current metadata together with
//! its [`Version`], builds a successor, and asks the committer to install that successor *only if*
//! the version is still the current one. A committer answers with [`CommitResponse::Committed`] or,
//! when another writer got there first, with [`CommitResponse::Conflict`]. Conflicts are normal
//! outcomes rather than errors: the retry loop in [`crate::transaction`] reloads and tries again.
//!
//! Three implementations are provided:
//! - [`InMemoryCommitter`] keeps every version in memory, handy for tests and embedding.
//! - [`FileSystemCommitter`] writes numbered metadata files into a directory with put-if-absent
//!   semantics, so concurrent processes can share a table.
//! - [`FaultInjectingCommitter`] wraps another committer and rejects a configured number of
//!   commits, for exercising retry and cleanup paths.
//!
//! [`TableMetadata`]: crate::table_metadata::TableMetadata

use std::fmt::Debug;

use crate::table_metadata::TableMetadataRef;
use crate::{KernelResult, Version};

mod commit_types;
mod fault_injection;
mod filesystem;
mod in_memory;

pub use commit_types::{CommitMetadata, CommitResponse};
pub use fault_injection::{FaultInjectingCommitter, INJECTED_FAILURE};
pub use filesystem::FileSystemCommitter;
pub use in_memory::InMemoryCommitter;

/// A Committer is the compare-and-swap primitive the commit engine is layered on. It is the only
/// point of synchronization between concurrent writers of a table.
//
// Note: Send + Sync so tables can hold an `Arc<dyn Committer>` and be shared across threads.
pub trait Committer: Send + Sync + Debug {
    /// The current metadata of the table and its version.
    fn load(&self) -> KernelResult<(TableMetadataRef, Version)>;

    /// Install [`CommitMetadata::metadata`] as the next version if the table is still at
    /// [`CommitMetadata::base_version`].
    ///
    /// Implementations must be atomic: either the successor becomes current at
    /// `base_version + 1`, or the table is left untouched and a conflict is reported.
    fn commit(&self, commit_metadata: CommitMetadata) -> KernelResult<CommitResponse>;
}
