use std::sync::{Arc, RwLock};

use tracing::{info, instrument};

use super::{CommitMetadata, CommitResponse, Committer};
use crate::table_metadata::{TableMetadata, TableMetadataRef};
use crate::{Error, KernelResult, Version};

/// A [`Committer`] that keeps every committed version in memory. Version `n` is the `n`th entry
/// of [`Self::history`]; the table starts at version 0.
#[derive(Debug)]
pub struct InMemoryCommitter {
    versions: RwLock<Vec<TableMetadataRef>>,
}

impl InMemoryCommitter {
    pub fn new(initial: TableMetadata) -> Self {
        Self {
            versions: RwLock::new(vec![Arc::new(initial)]),
        }
    }

    /// Every version ever committed, oldest first.
    pub fn history(&self) -> KernelResult<Vec<TableMetadataRef>> {
        Ok(self.versions.read()?.clone())
    }
}

impl Committer for InMemoryCommitter {
    fn load(&self) -> KernelResult<(TableMetadataRef, Version)> {
        let versions = self.versions.read()?;
        let current = versions
            .last()
            .ok_or_else(|| Error::internal_error("In-memory catalog has no versions"))?;
        Ok((current.clone(), versions.len() as Version - 1))
    }

    #[instrument(
        name = "in_memory_committer.commit",
        skip_all,
        fields(version = commit_metadata.version()),
        err
    )]
    fn commit(&self, commit_metadata: CommitMetadata) -> KernelResult<CommitResponse> {
        let mut versions = self.versions.write()?;
        let current = versions.len() as Version - 1;
        let version = commit_metadata.version();
        if commit_metadata.base_version > current {
            return Err(Error::UnexpectedVersion {
                expected: current,
                found: commit_metadata.base_version,
            });
        }
        if commit_metadata.base_version < current {
            info!(
                conflicting_version = version,
                current_version = current,
                "In-memory commit conflict"
            );
            return Ok(CommitResponse::Conflict {
                version,
                reason: format!(
                    "Table is at version {current}, not at base version {}",
                    commit_metadata.base_version
                ),
            });
        }
        versions.push(commit_metadata.metadata);
        info!(committed_version = version, "Committed in-memory table version");
        Ok(CommitResponse::Committed { version })
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;
    use crate::partition::PartitionSpec;
    use crate::schema::{NestedField, PrimitiveType, Schema};
    use crate::table_metadata::FormatVersion;

    fn metadata() -> TableMetadata {
        let schema = Schema::try_new(0, [NestedField::required(1, "id", PrimitiveType::Int)]).unwrap();
        TableMetadata::builder(
            Url::parse("memory:///t/").unwrap(),
            schema,
            PartitionSpec::unpartitioned(),
            FormatVersion::V2,
        )
        .build()
        .unwrap()
    }

    #[test]
    fn commit_then_conflict() {
        let committer = InMemoryCommitter::new(metadata());
        let (base, version) = committer.load().unwrap();
        assert_eq!(version, 0);

        let first = committer
            .commit(CommitMetadata::new(version, base.clone()))
            .unwrap();
        assert_eq!(first, CommitResponse::Committed { version: 1 });

        // same base again: someone else already committed version 1
        let second = committer.commit(CommitMetadata::new(version, base)).unwrap();
        assert!(matches!(second, CommitResponse::Conflict { version: 1, .. }));
        assert_eq!(committer.history().unwrap().len(), 2);
        assert_eq!(committer.load().unwrap().1, 1);
    }

    #[test]
    fn future_base_version_is_an_error() {
        let committer = InMemoryCommitter::new(metadata());
        let (base, _) = committer.load().unwrap();
        let err = committer.commit(CommitMetadata::new(3, base)).unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedVersion {
                expected: 0,
                found: 3
            }
        ));
    }
}
