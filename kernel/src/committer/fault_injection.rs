use std::sync::atomic::{AtomicU32, Ordering};

use tracing::info;

use super::{CommitMetadata, CommitResponse, Committer};
use crate::table_metadata::TableMetadataRef;
use crate::{KernelResult, Version};

/// Reason reported for commits rejected by a [`FaultInjectingCommitter`].
pub const INJECTED_FAILURE: &str = "Injected failure";

/// Wraps a [`Committer`] and reports the next `n` commits as conflicts without forwarding them.
///
/// Injected conflicts look exactly like real ones to the retry loop, but leave the table
/// untouched, so the reloaded base is unchanged.
#[derive(Debug)]
pub struct FaultInjectingCommitter<C> {
    inner: C,
    remaining_failures: AtomicU32,
    attempts: AtomicU32,
}

impl<C: Committer> FaultInjectingCommitter<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            remaining_failures: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
        }
    }

    /// Reject the next `failures` commits.
    pub fn fail_commits(&self, failures: u32) {
        self.remaining_failures.store(failures, Ordering::SeqCst);
    }

    /// Number of commits attempted through this committer, rejected ones included.
    pub fn commit_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: Committer> Committer for FaultInjectingCommitter<C> {
    fn load(&self) -> KernelResult<(TableMetadataRef, Version)> {
        self.inner.load()
    }

    fn commit(&self, commit_metadata: CommitMetadata) -> KernelResult<CommitResponse> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            info!(version = commit_metadata.version(), "Rejecting commit");
            return Ok(CommitResponse::Conflict {
                version: commit_metadata.version(),
                reason: INJECTED_FAILURE.to_string(),
            });
        }
        self.inner.commit(commit_metadata)
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;
    use crate::committer::InMemoryCommitter;
    use crate::partition::PartitionSpec;
    use crate::schema::{NestedField, PrimitiveType, Schema};
    use crate::table_metadata::{FormatVersion, TableMetadata};

    #[test]
    fn rejects_configured_number_of_commits() {
        let schema = Schema::try_new(0, [NestedField::required(1, "id", PrimitiveType::Int)]).unwrap();
        let metadata = TableMetadata::builder(
            Url::parse("memory:///t/").unwrap(),
            schema,
            PartitionSpec::unpartitioned(),
            FormatVersion::V1,
        )
        .build()
        .unwrap();
        let committer = FaultInjectingCommitter::new(InMemoryCommitter::new(metadata));
        committer.fail_commits(2);

        let (base, version) = committer.load().unwrap();
        for _ in 0..2 {
            let response = committer
                .commit(CommitMetadata::new(version, base.clone()))
                .unwrap();
            assert_eq!(
                response,
                CommitResponse::Conflict {
                    version: 1,
                    reason: INJECTED_FAILURE.to_string()
                }
            );
        }
        let response = committer.commit(CommitMetadata::new(version, base)).unwrap();
        assert_eq!(response, CommitResponse::Committed { version: 1 });
        assert_eq!(committer.commit_attempts(), 3);
        assert_eq!(committer.inner().history().unwrap().len(), 2);
    }
}
