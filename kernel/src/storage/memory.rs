use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;
use url::Url;

use super::{blob_name, BlobStore};
use crate::{Error, KernelResult};

const MEMORY_ROOT: &str = "memory:///metadata/";

/// A [`BlobStore`] that keeps blobs in a map. Blobs live under `memory:///metadata/`.
#[derive(Debug)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<Url, Bytes>>,
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }
}

impl BlobStore for InMemoryBlobStore {
    fn write(&self, data: Bytes) -> KernelResult<Url> {
        let location = Url::parse(MEMORY_ROOT)?.join(&blob_name())?;
        self.blobs.write()?.insert(location.clone(), data);
        Ok(location)
    }

    fn read(&self, location: &Url) -> KernelResult<Bytes> {
        self.blobs
            .read()?
            .get(location)
            .cloned()
            .ok_or_else(|| Error::file_not_found(location))
    }

    fn exists(&self, location: &Url) -> KernelResult<bool> {
        Ok(self.blobs.read()?.contains_key(location))
    }

    fn length(&self, location: &Url) -> KernelResult<u64> {
        self.blobs
            .read()?
            .get(location)
            .map(|blob| blob.len() as u64)
            .ok_or_else(|| Error::file_not_found(location))
    }

    fn delete(&self, location: &Url) -> KernelResult<()> {
        self.blobs
            .write()?
            .remove(location)
            .map(|_| ())
            .ok_or_else(|| Error::file_not_found(location))
    }

    fn list(&self) -> KernelResult<Vec<Url>> {
        Ok(self.blobs.read()?.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_delete() {
        let store = InMemoryBlobStore::new();
        let location = store.write(Bytes::from_static(b"hello")).unwrap();
        assert!(location.as_str().starts_with("memory:///metadata/"));
        assert!(store.exists(&location).unwrap());
        assert_eq!(store.length(&location).unwrap(), 5);
        assert_eq!(store.read(&location).unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(store.list().unwrap(), vec![location.clone()]);

        store.delete(&location).unwrap();
        assert!(!store.exists(&location).unwrap());
        assert!(matches!(store.delete(&location), Err(Error::FileNotFound(_))));
        assert!(matches!(store.read(&location), Err(Error::FileNotFound(_))));
    }

    #[test]
    fn locations_are_unique() {
        let store = InMemoryBlobStore::new();
        let a = store.write(Bytes::new()).unwrap();
        let b = store.write(Bytes::new()).unwrap();
        assert_ne!(a, b);
    }
}
