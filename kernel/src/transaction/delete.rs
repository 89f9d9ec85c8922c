use std::sync::Arc;

use tracing::instrument;

use super::{commit_with_retries, MergeMode, SnapshotProducer};
use crate::committer::Committer;
use crate::manifest::DataFile;
use crate::snapshot::SnapshotRef;
use crate::table::Table;
use crate::KernelResult;

/// Removes data files from the table by path.
///
/// Each manifest of the parent snapshot that holds a removed file is rewritten with that file's
/// entry marked DELETED by the new snapshot. Removing a path that is not in the table is a no-op
/// unless [`Self::validate_files_exist`] was called.
#[derive(Debug)]
pub struct DeleteFiles {
    committer: Arc<dyn Committer>,
    producer: SnapshotProducer,
}

impl DeleteFiles {
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

    pub fn delete_file(&mut self, path: impl Into<String>) -> &mut Self {
        self.producer.delete_path(path);
        self
    }

    pub fn delete_data_file(&mut self, file: &DataFile) -> &mut Self {
        self.delete_file(file.file_path.clone())
    }

    /// Fail instead of ignoring paths that are not live in the table.
    pub fn validate_files_exist(&mut self) -> &mut Self {
        self.producer.validate_deletes();
        self
    }

    pub fn apply(&mut self) -> KernelResult<SnapshotRef> {
        let (base, _) = self.committer.load()?;
        Ok(Arc::new(self.producer.build_snapshot(&base)?))
    }

    #[instrument(name = "delete.commit", skip_all, err)]
    pub fn commit(mut self) -> KernelResult<SnapshotRef> {
        commit_with_retries(self.committer.as_ref(), &mut self.producer)
    }
}

/// Replaces data files: removes some paths and adds new files in one snapshot.
#[derive(Debug)]
pub struct OverwriteFiles {
    committer: Arc<dyn Committer>,
    producer: SnapshotProducer,
}

impl OverwriteFiles {
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

    pub fn add_file(&mut self, file: DataFile) -> &mut Self {
        self.producer.add_file(file);
        self
    }

    pub fn delete_file(&mut self, path: impl Into<String>) -> &mut Self {
        self.producer.delete_path(path);
        self
    }

    pub fn validate_files_exist(&mut self) -> &mut Self {
        self.producer.validate_deletes();
        self
    }

    pub fn apply(&mut self) -> KernelResult<SnapshotRef> {
        let (base, _) = self.committer.load()?;
        Ok(Arc::new(self.producer.build_snapshot(&base)?))
    }

    #[instrument(name = "overwrite.commit", skip_all, err)]
    pub fn commit(mut self) -> KernelResult<SnapshotRef> {
        commit_with_retries(self.committer.as_ref(), &mut self.producer)
    }
}
