use std::sync::Arc;

use tracing::instrument;

use super::{commit_with_retries, MergeMode, SnapshotProducer};
use crate::committer::Committer;
use crate::manifest::{DataFile, ManifestFile};
use crate::snapshot::SnapshotRef;
use crate::table::Table;
use crate::KernelResult;

/// Appends data files and manifests, merging the manifests of the new snapshot according to the
/// table's `commit.manifest.*` properties.
///
/// # Examples
///
/// ```rust,ignore
/// let mut append = table.new_append();
/// append.append_file(file_a).append_file(file_b);
/// let snapshot = append.commit()?;
/// ```
#[derive(Debug)]
pub struct AppendFiles {
    committer: Arc<dyn Committer>,
    producer: SnapshotProducer,
}

impl AppendFiles {
    pub(crate) fn new(table: &Table) -> Self {
        Self {
            committer: table.committer().clone(),
            producer: SnapshotProducer::new(
                table.store().clone(),
                table.codec().clone(),
                MergeMode::Merge,
            ),
        }
    }

    pub fn append_file(&mut self, file: DataFile) -> &mut Self {
        self.producer.add_file(file);
        self
    }

    /// Append an already written manifest. Its entries must all be EXISTING without a snapshot
    /// id, as written by [`ManifestWriter::add_staged_file`].
    ///
    /// [`ManifestWriter::add_staged_file`]: crate::manifest::ManifestWriter::add_staged_file
    pub fn append_manifest(&mut self, manifest: ManifestFile) -> KernelResult<&mut Self> {
        self.producer.add_manifest(manifest)?;
        Ok(self)
    }

    /// Build the snapshot this append would commit against the current table, without
    /// committing it. Manifests written here are reused by [`Self::commit`].
    pub fn apply(&mut self) -> KernelResult<SnapshotRef> {
        let (base, _) = self.committer.load()?;
        Ok(Arc::new(self.producer.build_snapshot(&base)?))
    }

    #[instrument(name = "append.commit", skip_all, err)]
    pub fn commit(mut self) -> KernelResult<SnapshotRef> {
        commit_with_retries(self.committer.as_ref(), &mut self.producer)
    }
}

/// Appends data files and manifests without ever merging: each commit adds its manifests in
/// front of the parent's.
#[derive(Debug)]
pub struct FastAppend {
    committer: Arc<dyn Committer>,
    producer: SnapshotProducer,
}

impl FastAppend {
    pub(crate) fn new(table: &Table) -> Self {
        Self {
            committer: table.committer().clone(),
            producer: SnapshotProducer::new(
                table.store().clone(),
                table.codec().clone(),
                MergeMode::Fast,
            ),
        }
    }

    pub fn append_file(&mut self, file: DataFile) -> &mut Self {
        self.producer.add_file(file);
        self
    }

    pub fn append_manifest(&mut self, manifest: ManifestFile) -> KernelResult<&mut Self> {
        self.producer.add_manifest(manifest)?;
        Ok(self)
    }

    pub fn apply(&mut self) -> KernelResult<SnapshotRef> {
        let (base, _) = self.committer.load()?;
        Ok(Arc::new(self.producer.build_snapshot(&base)?))
    }

    #[instrument(name = "fast_append.commit", skip_all, err)]
    pub fn commit(mut self) -> KernelResult<SnapshotRef> {
        commit_with_retries(self.committer.as_ref(), &mut self.producer)
    }
}
