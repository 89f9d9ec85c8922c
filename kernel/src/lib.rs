//! Manifest Kernel is a library for committing changes to tables whose content is tracked as
//! snapshots of manifests.
//!
//! A table's content is a set of data files. Data files are listed in *manifests*, and a
//! *snapshot* is the list of manifests that make up the table at one point in time. Every change
//! produces a new, immutable snapshot inside a new, immutable [`TableMetadata`] value, which is
//! installed by an atomic compare-and-swap on the table's metadata pointer (a [`Committer`]).
//!
//! The main pieces are:
//! - [`manifest`]: data files, manifest entries and manifests, and the codec and writer that put
//!   them into a [`BlobStore`].
//! - [`partition`]: partition specs, and the [`PartitionSpecRegistry`] that evolves them without
//!   ever reusing a field id.
//! - [`merge`]: the planner that bin-packs small manifests into larger ones.
//! - [`transaction`]: the operations that build new snapshots ([`AppendFiles`], [`FastAppend`],
//!   [`DeleteFiles`], [`OverwriteFiles`]) or new metadata ([`UpdatePartitionSpec`],
//!   [`UpdateProperties`]), and the optimistic commit loop that retries them on conflict and
//!   deletes whatever a failed commit left behind.
//!
//! # Example
//!
//! ```rust,ignore
//! let table = Table::new(committer, store);
//! let mut append = table.new_append();
//! append.append_file(data_file);
//! let snapshot = append.commit()?;
//! ```
//!
//! [`TableMetadata`]: table_metadata::TableMetadata
//! [`PartitionSpecRegistry`]: partition::PartitionSpecRegistry
//! [`AppendFiles`]: transaction::AppendFiles
//! [`FastAppend`]: transaction::FastAppend
//! [`DeleteFiles`]: transaction::DeleteFiles
//! [`OverwriteFiles`]: transaction::OverwriteFiles
//! [`UpdatePartitionSpec`]: transaction::UpdatePartitionSpec
//! [`UpdateProperties`]: transaction::UpdateProperties

#![warn(
    unused_extern_crates,
    rust_2018_idioms,
    rust_2021_compatibility,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

pub mod committer;
pub mod error;
pub mod manifest;
pub mod merge;
pub mod partition;
pub mod schema;
pub mod snapshot;
pub mod storage;
pub mod table;
pub mod table_metadata;
pub mod table_properties;
pub mod transaction;

pub(crate) mod utils;

pub use committer::Committer;
pub use error::{Error, KernelResult};
pub use storage::BlobStore;
pub use table::Table;

/// Version number of a table's metadata pointer. The first version is 0.
pub type Version = u64;
