use std::collections::HashMap;
use std::sync::Arc;

use tracing::instrument;

use super::{commit_with_retries, PendingUpdate};
use crate::committer::Committer;
use crate::table::Table;
use crate::table_metadata::{TableMetadata, TableMetadataRef};
use crate::table_properties::validate_property_value;
use crate::{Error, KernelResult};

/// Sets and removes table properties. Values for known keys are validated when they are set, so a
/// bad value never reaches the table.
#[derive(Debug)]
pub struct UpdateProperties {
    committer: Arc<dyn Committer>,
    updates: HashMap<String, String>,
    removals: Vec<String>,
}

impl UpdateProperties {
    pub(crate) fn new(table: &Table) -> Self {
        Self {
            committer: table.committer().clone(),
            updates: HashMap::new(),
            removals: vec![],
        }
    }

    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> KernelResult<&mut Self> {
        let (key, value) = (key.into(), value.into());
        validate_property_value(&key, &value).map_err(Error::invalid_table_property)?;
        self.removals.retain(|k| *k != key);
        self.updates.insert(key, value);
        Ok(self)
    }

    pub fn remove(&mut self, key: impl Into<String>) -> &mut Self {
        let key = key.into();
        self.updates.remove(&key);
        self.removals.push(key);
        self
    }

    /// Commit the changes and return the resulting properties.
    #[instrument(name = "update_properties.commit", skip_all, err)]
    pub fn commit(mut self) -> KernelResult<HashMap<String, String>> {
        let committer = self.committer.clone();
        commit_with_retries(committer.as_ref(), &mut self)
    }
}

impl PendingUpdate for UpdateProperties {
    type Output = HashMap<String, String>;

    fn apply(
        &mut self,
        base: &TableMetadataRef,
    ) -> KernelResult<(TableMetadata, HashMap<String, String>)> {
        let metadata = base.with_properties(&self.updates, &self.removals)?;
        let properties = metadata.properties().clone();
        Ok((metadata, properties))
    }

    fn clean_uncommitted(&mut self, _committed: Option<&HashMap<String, String>>) {}
}
