//! The blob store the engine writes manifests to.
//!
//! Manifests are write-once blobs at unique locations, so stores need no atomic rename or
//! replace. Locations are chosen by the store.

use std::fmt::Debug;

use bytes::Bytes;
use url::Url;

use crate::KernelResult;

mod local;
mod memory;

pub use local::LocalBlobStore;
pub use memory::InMemoryBlobStore;

pub trait BlobStore: Send + Sync + Debug {
    /// Store `data` at a fresh location and return that location.
    fn write(&self, data: Bytes) -> KernelResult<Url>;

    fn read(&self, location: &Url) -> KernelResult<Bytes>;

    fn exists(&self, location: &Url) -> KernelResult<bool>;

    /// Size in bytes of the blob at `location`.
    fn length(&self, location: &Url) -> KernelResult<u64>;

    /// Remove the blob at `location`. Fails with [`Error::FileNotFound`] if there is none.
    ///
    /// [`Error::FileNotFound`]: crate::Error::FileNotFound
    fn delete(&self, location: &Url) -> KernelResult<()>;

    /// Every blob currently stored, in no particular order.
    fn list(&self) -> KernelResult<Vec<Url>>;
}

const BLOB_SUFFIX: &str = ".manifest.json";

fn blob_name() -> String {
    format!("{}{BLOB_SUFFIX}", uuid::Uuid::new_v4())
}
