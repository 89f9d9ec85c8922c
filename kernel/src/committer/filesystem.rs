//! File system committer: one JSON metadata file per table version.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

use super::{CommitMetadata, CommitResponse, Committer};
use crate::table_metadata::{TableMetadata, TableMetadataRef};
use crate::utils::require;
use crate::{Error, KernelResult, Version};

const METADATA_SUFFIX: &str = ".metadata.json";

/// The `FileSystemCommitter` stores version `n` of a table as `{n:020}.metadata.json` in its
/// directory. Commits write the next version's file with put-if-absent semantics: a temp file is
/// persisted without clobbering, so when two writers race for the same version exactly one wins
/// and the other sees a conflict.
#[derive(Debug, Clone)]
pub struct FileSystemCommitter {
    root: PathBuf,
}

impl FileSystemCommitter {
    /// Create a table in `root` (created if missing) with `metadata` as version 0.
    pub fn create(root: impl Into<PathBuf>, metadata: &TableMetadata) -> KernelResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let committer = Self { root };
        committer.write_version(0, metadata)?;
        Ok(committer)
    }

    /// Open an existing table in `root`.
    pub fn open(root: impl Into<PathBuf>) -> KernelResult<Self> {
        let committer = Self { root: root.into() };
        require!(
            committer.latest_version()?.is_some(),
            Error::file_not_found(format!(
                "no table metadata in {}",
                committer.root.display()
            ))
        );
        Ok(committer)
    }

    fn version_path(&self, version: Version) -> PathBuf {
        self.root.join(format!("{version:020}{METADATA_SUFFIX}"))
    }

    fn latest_version(&self) -> KernelResult<Option<Version>> {
        let mut latest = None;
        for dir_entry in fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            if let Some(version) = parse_version(&dir_entry.path()) {
                latest = latest.max(Some(version));
            }
        }
        Ok(latest)
    }

    fn write_version(&self, version: Version, metadata: &TableMetadata) -> KernelResult<()> {
        let path = self.version_path(version);
        let mut tmp_file = NamedTempFile::new_in(&self.root)?;
        serde_json::to_writer(&mut tmp_file, metadata)?;
        tmp_file.flush()?;
        tmp_file.persist_noclobber(&path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                Error::file_already_exists(path.display())
            } else {
                Error::IOError(e.error)
            }
        })?;
        debug!(path = %path.display(), "Wrote metadata file");
        Ok(())
    }
}

fn parse_version(path: &Path) -> Option<Version> {
    let name = path.file_name()?.to_str()?;
    let digits = name.strip_suffix(METADATA_SUFFIX)?;
    if digits.len() != 20 {
        return None;
    }
    digits.parse().ok()
}

impl Committer for FileSystemCommitter {
    fn load(&self) -> KernelResult<(TableMetadataRef, Version)> {
        let version = self.latest_version()?.ok_or_else(|| {
            Error::file_not_found(format!("no table metadata in {}", self.root.display()))
        })?;
        let bytes = fs::read(self.version_path(version))?;
        let metadata: TableMetadata = serde_json::from_slice(&bytes)?;
        Ok((Arc::new(metadata), version))
    }

    #[instrument(
        name = "fs_committer.commit",
        skip_all,
        fields(version = commit_metadata.version()),
        err
    )]
    fn commit(&self, commit_metadata: CommitMetadata) -> KernelResult<CommitResponse> {
        let version = commit_metadata.version();
        require!(
            self.version_path(commit_metadata.base_version).is_file(),
            Error::UnexpectedVersion {
                expected: self.latest_version()?.unwrap_or_default(),
                found: commit_metadata.base_version,
            }
        );
        match self.write_version(version, &commit_metadata.metadata) {
            Ok(()) => {
                info!(
                    committed_version = version,
                    "Committed metadata file via filesystem committer"
                );
                Ok(CommitResponse::Committed { version })
            }
            Err(Error::FileAlreadyExists(path)) => {
                info!(
                    conflicting_version = version,
                    "Filesystem commit conflict: target version already exists"
                );
                Ok(CommitResponse::Conflict {
                    version,
                    reason: format!("{path} already exists"),
                })
            }
            Err(e) => Err(e),
        }
    }
}
