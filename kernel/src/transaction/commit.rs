//! The optimistic commit loop shared by every table update.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use strum::IntoStaticStr;
use tracing::{debug, info, instrument, warn};

use crate::committer::{CommitMetadata, CommitResponse, Committer};
use crate::table_metadata::{TableMetadata, TableMetadataRef};
use crate::{Error, KernelResult, Version};

/// An update that can be (re)built against any base metadata and committed through
/// [`commit_with_retries`].
pub(crate) trait PendingUpdate {
    /// What a successful commit hands back to the caller.
    type Output;

    /// Build the successor of `base`. May write blobs, which the update keeps track of; must be
    /// callable again against a newer base.
    fn apply(&mut self, base: &TableMetadataRef) -> KernelResult<(TableMetadata, Self::Output)>;

    /// Delete whatever the update wrote that `committed` does not reference. `None` means nothing
    /// was committed.
    fn clean_uncommitted(&mut self, committed: Option<&Self::Output>);
}

/// Where the commit loop is. Each state carries what the next step needs.
#[derive(IntoStaticStr)]
pub(crate) enum CommitState<O> {
    /// Build the update against a freshly loaded base.
    Building {
        attempt: u32,
        base: TableMetadataRef,
        base_version: Version,
    },
    /// Ask the committer to install the built successor.
    CommitAttempt {
        attempt: u32,
        commit_metadata: CommitMetadata,
        output: O,
    },
    /// The committer rejected the attempt; retry or give up.
    Conflict { attempt: u32, reason: String },
}

/// Commit `update` against the table behind `committer`, retrying on conflicts.
///
/// On conflict the table is reloaded and the update rebuilt, up to the retry budget of the base
/// table's properties. Any other error ends the loop immediately. Either way, blobs written by
/// the update that did not end up in the committed table are deleted before returning.
#[instrument(name = "txn.commit", skip_all, err)]
pub(crate) fn commit_with_retries<U: PendingUpdate>(
    committer: &dyn Committer,
    update: &mut U,
) -> KernelResult<U::Output> {
    match run(committer, update) {
        Ok(output) => {
            update.clean_uncommitted(Some(&output));
            Ok(output)
        }
        Err(e) => {
            update.clean_uncommitted(None);
            Err(e)
        }
    }
}

/// Drive [`CommitState`] until the update is committed or the loop gives up.
fn run<U: PendingUpdate>(committer: &dyn Committer, update: &mut U) -> KernelResult<U::Output> {
    let (base, base_version) = committer.load()?;
    let policy = base.table_properties().retry_policy();
    let started = Instant::now();
    let mut state = CommitState::Building {
        attempt: 1,
        base,
        base_version,
    };

    loop {
        let name: &'static str = (&state).into();
        debug!(state = name, "Commit state");
        state = match state {
            CommitState::Building {
                attempt,
                base,
                base_version,
            } => {
                let (metadata, output) = update.apply(&base)?;
                CommitState::CommitAttempt {
                    attempt,
                    commit_metadata: CommitMetadata::new(base_version, Arc::new(metadata)),
                    output,
                }
            }
            CommitState::CommitAttempt {
                attempt,
                commit_metadata,
                output,
            } => match committer.commit(commit_metadata)? {
                CommitResponse::Committed { version } => {
                    info!(version, attempts = attempt, "Committed table update");
                    return Ok(output);
                }
                CommitResponse::Conflict { version, reason } => {
                    info!(version, attempt, reason = %reason, "Commit conflict");
                    CommitState::Conflict { attempt, reason }
                }
            },
            CommitState::Conflict { attempt, reason } => {
                if attempt >= policy.max_attempts() || started.elapsed() >= policy.total_timeout {
                    warn!(attempts = attempt, "Giving up on commit");
                    return Err(Error::commit_failed(attempt, reason));
                }
                let wait = policy.backoff(attempt);
                if !wait.is_zero() {
                    thread::sleep(wait);
                }
                let (base, base_version) = committer.load()?;
                CommitState::Building {
                    attempt: attempt + 1,
                    base,
                    base_version,
                }
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use url::Url;

    use super::*;
    use crate::committer::{FaultInjectingCommitter, InMemoryCommitter, INJECTED_FAILURE};
    use crate::partition::PartitionSpec;
    use crate::schema::{NestedField, PrimitiveType, Schema};
    use crate::table_metadata::FormatVersion;
    use crate::table_properties::{COMMIT_MIN_RETRY_WAIT_MS, COMMIT_NUM_RETRIES};

    /// Sets a property; records what it was asked to clean.
    #[derive(Default)]
    struct SetOwner {
        applied: u32,
        cleaned: Vec<Option<String>>,
    }

    impl PendingUpdate for SetOwner {
        type Output = String;

        fn apply(&mut self, base: &TableMetadataRef) -> KernelResult<(TableMetadata, String)> {
            self.applied += 1;
            let owner = format!("owner-{}", self.applied);
            let updates = HashMap::from([("owner".to_string(), owner.clone())]);
            Ok((base.with_properties(&updates, &[])?, owner))
        }

        fn clean_uncommitted(&mut self, committed: Option<&String>) {
            self.cleaned.push(committed.cloned());
        }
    }

    fn committer(retries: &str) -> FaultInjectingCommitter<InMemoryCommitter> {
        let schema = Schema::try_new(0, [NestedField::required(1, "id", PrimitiveType::Int)]).unwrap();
        let metadata = TableMetadata::builder(
            Url::parse("memory:///t/").unwrap(),
            schema,
            PartitionSpec::unpartitioned(),
            FormatVersion::V2,
        )
        .with_properties([(COMMIT_NUM_RETRIES, retries), (COMMIT_MIN_RETRY_WAIT_MS, "0")])
        .build()
        .unwrap();
        FaultInjectingCommitter::new(InMemoryCommitter::new(metadata))
    }

    #[test]
    fn retries_until_committed() {
        let committer = committer("4");
        committer.fail_commits(3);
        let mut update = SetOwner::default();
        let output = commit_with_retries(&committer, &mut update).unwrap();
        assert_eq!(output, "owner-4");
        assert_eq!(update.applied, 4);
        assert_eq!(update.cleaned, vec![Some("owner-4".to_string())]);
        let (current, version) = committer.load().unwrap();
        assert_eq!(version, 1);
        assert_eq!(current.properties()["owner"], "owner-4");
    }

    #[test]
    fn gives_up_after_retry_budget() {
        let committer = committer("2");
        committer.fail_commits(5);
        let mut update = SetOwner::default();
        let err = commit_with_retries(&committer, &mut update).unwrap_err();
        assert!(matches!(
            err,
            Error::CommitFailed { attempts: 3, ref reason } if reason == INJECTED_FAILURE
        ));
        assert_eq!(committer.commit_attempts(), 3);
        assert_eq!(update.cleaned, vec![None]);
        assert_eq!(committer.load().unwrap().1, 0);
    }

    #[test]
    fn build_errors_are_not_retried() {
        struct Broken(u32);
        impl PendingUpdate for Broken {
            type Output = ();
            fn apply(&mut self, _: &TableMetadataRef) -> KernelResult<(TableMetadata, ())> {
                self.0 += 1;
                Err(Error::validation("nope"))
            }
            fn clean_uncommitted(&mut self, _: Option<&()>) {}
        }

        let committer = committer("4");
        let mut update = Broken(0);
        let err = commit_with_retries(&committer, &mut update).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(update.0, 1);
        assert_eq!(committer.commit_attempts(), 0);
    }
}
