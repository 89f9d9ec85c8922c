use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tempfile::NamedTempFile;
use url::Url;

use super::{blob_name, BlobStore, BLOB_SUFFIX};
use crate::{Error, KernelResult};

/// A [`BlobStore`] over a local directory.
///
/// Blobs are written to a temp file in the directory and renamed into place without clobbering,
/// so a reader never sees a partially written manifest.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Use `root` (created if missing) as the blob directory. A relative `root` is resolved
    /// against the current directory once, here.
    pub fn try_new(root: impl Into<PathBuf>) -> KernelResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    fn to_path(&self, location: &Url) -> KernelResult<PathBuf> {
        let path = location
            .to_file_path()
            .map_err(|_| Error::generic(format!("Not a local file location: {location}")))?;
        if !path.starts_with(&self.root) {
            return Err(Error::generic(format!(
                "{location} is outside of blob root {}",
                self.root.display()
            )));
        }
        Ok(path)
    }

    fn to_url(path: &Path) -> KernelResult<Url> {
        Url::from_file_path(path)
            .map_err(|_| Error::generic(format!("Cannot build a url for {}", path.display())))
    }
}

fn not_found_as(location: &Url) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::file_not_found(location),
        _ => Error::IOError(e),
    }
}

impl BlobStore for LocalBlobStore {
    fn write(&self, data: Bytes) -> KernelResult<Url> {
        let path = self.root.join(blob_name());
        let location = Self::to_url(&path)?;
        let mut tmp_file = NamedTempFile::new_in(&self.root)?;
        tmp_file.write_all(&data)?;
        tmp_file.flush()?;
        tmp_file.persist_noclobber(&path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                Error::file_already_exists(path.display())
            } else {
                Error::IOError(e.error)
            }
        })?;
        Ok(location)
    }

    fn read(&self, location: &Url) -> KernelResult<Bytes> {
        let path = self.to_path(location)?;
        fs::read(path).map(Bytes::from).map_err(not_found_as(location))
    }

    fn exists(&self, location: &Url) -> KernelResult<bool> {
        Ok(self.to_path(location)?.is_file())
    }

    fn length(&self, location: &Url) -> KernelResult<u64> {
        let path = self.to_path(location)?;
        fs::metadata(path)
            .map(|m| m.len())
            .map_err(not_found_as(location))
    }

    fn delete(&self, location: &Url) -> KernelResult<()> {
        let path = self.to_path(location)?;
        fs::remove_file(path).map_err(not_found_as(location))
    }

    fn list(&self) -> KernelResult<Vec<Url>> {
        let mut locations = vec![];
        for dir_entry in fs::read_dir(&self.root)? {
            let path = dir_entry?.path();
            let is_blob = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(BLOB_SUFFIX));
            if is_blob && path.is_file() {
                locations.push(Self::to_url(&path)?);
            }
        }
        Ok(locations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap().join("manifests");
        let store = LocalBlobStore::try_new(&root).unwrap();

        let location = store.write(Bytes::from_static(b"{}")).unwrap();
        assert_eq!(location.scheme(), "file");
        assert!(store.exists(&location).unwrap());
        assert_eq!(store.length(&location).unwrap(), 2);
        assert_eq!(store.read(&location).unwrap(), Bytes::from_static(b"{}"));
        assert_eq!(store.list().unwrap(), vec![location.clone()]);

        store.delete(&location).unwrap();
        assert!(!store.exists(&location).unwrap());
        assert!(matches!(store.delete(&location), Err(Error::FileNotFound(_))));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn relative_root() {
        let dir = tempfile::tempdir_in(".").unwrap();
        let relative = Path::new(".")
            .join(dir.path().file_name().unwrap())
            .join("manifests");
        let store = LocalBlobStore::try_new(&relative).unwrap();

        let location = store.write(Bytes::from_static(b"{}")).unwrap();
        assert!(store.exists(&location).unwrap());
        assert_eq!(store.list().unwrap(), vec![location.clone()]);
        store.delete(&location).unwrap();
        assert_eq!(fs::read_dir(&relative).unwrap().count(), 0);
    }

    #[test]
    fn rejects_foreign_locations() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::try_new(dir.path().canonicalize().unwrap()).unwrap();
        let foreign = Url::parse("memory:///metadata/x.json").unwrap();
        assert!(store.read(&foreign).is_err());
        let outside = Url::from_file_path("/definitely/elsewhere.json").unwrap();
        assert!(store.exists(&outside).is_err());
    }
}
