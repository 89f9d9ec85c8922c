use crate::table_metadata::TableMetadataRef;
use crate::Version;

/// A proposed successor for the table, together with the version it was built from.
#[derive(Debug, Clone)]
pub struct CommitMetadata {
    pub base_version: Version,
    pub metadata: TableMetadataRef,
}

impl CommitMetadata {
    pub fn new(base_version: Version, metadata: TableMetadataRef) -> Self {
        Self {
            base_version,
            metadata,
        }
    }

    /// The version the successor becomes on success.
    pub fn version(&self) -> Version {
        self.base_version + 1
    }
}

/// Result of a compare-and-swap of the metadata pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResponse {
    Committed {
        version: Version,
    },
    /// The table is no longer at the base version. `version` is the version that was attempted.
    Conflict {
        version: Version,
        reason: String,
    },
}
