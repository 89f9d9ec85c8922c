use std::sync::Arc;

use tracing::{info, instrument};

use super::{commit_with_retries, PendingUpdate};
use crate::committer::Committer;
use crate::partition::{PartitionSpec, PartitionSpecRef, SpecEdit, Transform};
use crate::table::Table;
use crate::table_metadata::{TableMetadata, TableMetadataRef};
use crate::KernelResult;

/// Evolves the default partition spec of a table.
///
/// Edits are applied in order to the default spec of whatever metadata is current at commit
/// time. Removed fields are tombstoned for format version 1 tables and dropped for version 2.
#[derive(Debug)]
pub struct UpdatePartitionSpec {
    committer: Arc<dyn Committer>,
    edits: Vec<SpecEdit>,
    replacement: Option<PartitionSpec>,
}

impl UpdatePartitionSpec {
    pub(crate) fn new(table: &Table) -> Self {
        Self {
            committer: table.committer().clone(),
            edits: vec![],
            replacement: None,
        }
    }

    /// Partition by `transform(source)` under the transform's default field name.
    pub fn add_field(&mut self, source: impl Into<String>, transform: Transform) -> &mut Self {
        self.edits.push(SpecEdit::AddField {
            source: source.into(),
            transform,
            name: None,
        });
        self
    }

    pub fn add_named_field(
        &mut self,
        name: impl Into<String>,
        source: impl Into<String>,
        transform: Transform,
    ) -> &mut Self {
        self.edits.push(SpecEdit::AddField {
            source: source.into(),
            transform,
            name: Some(name.into()),
        });
        self
    }

    pub fn remove_field(&mut self, name: impl Into<String>) -> &mut Self {
        self.edits.push(SpecEdit::RemoveField { name: name.into() });
        self
    }

    pub fn rename_field(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edits.push(SpecEdit::RenameField {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    /// Install `spec` (for instance one parsed from JSON) as the new default instead of editing
    /// the current one. Its field ids must agree with every spec the table already has.
    pub fn replace_with(&mut self, spec: PartitionSpec) -> &mut Self {
        self.replacement = Some(spec);
        self
    }

    /// The spec this update would make the default, without committing it.
    pub fn apply(&mut self) -> KernelResult<PartitionSpecRef> {
        let (base, _) = self.committer.load()?;
        let (_, spec) = PendingUpdate::apply(self, &base)?;
        Ok(spec)
    }

    #[instrument(name = "update_spec.commit", skip_all, err)]
    pub fn commit(mut self) -> KernelResult<PartitionSpecRef> {
        let committer = self.committer.clone();
        let spec = commit_with_retries(committer.as_ref(), &mut self)?;
        info!(spec_id = spec.spec_id(), "Committed partition spec");
        Ok(spec)
    }
}

impl PendingUpdate for UpdatePartitionSpec {
    type Output = PartitionSpecRef;

    fn apply(
        &mut self,
        base: &TableMetadataRef,
    ) -> KernelResult<(TableMetadata, PartitionSpecRef)> {
        let specs = base.partition_specs();
        let mut evolved = match &self.replacement {
            Some(spec) => specs.with_spec(spec.clone())?,
            None => specs.clone(),
        };
        if !self.edits.is_empty() {
            let policy = base.format_version().removal_policy();
            evolved = evolved.evolve(base.schema(), &self.edits, policy)?;
        }
        let metadata = base.with_partition_specs(evolved)?;
        let spec = metadata.default_partition_spec()?.clone();
        Ok((metadata, spec))
    }

    // writes nothing
    fn clean_uncommitted(&mut self, _committed: Option<&PartitionSpecRef>) {}
}
