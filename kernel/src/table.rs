//! The [`Table`] handle: a committer, a blob store and a codec, with builders for every update.

use std::sync::Arc;

use crate::committer::Committer;
use crate::manifest::{JsonManifestCodec, ManifestCodec, ManifestWriter};
use crate::snapshot::SnapshotRef;
use crate::storage::BlobStore;
use crate::table_metadata::TableMetadataRef;
use crate::transaction::{
    AppendFiles, DeleteFiles, FastAppend, OverwriteFiles, UpdatePartitionSpec, UpdateProperties,
};
use crate::{Error, KernelResult, Version};

/// A table: where its metadata pointer lives and where its manifests are stored.
///
/// The handle holds no metadata itself; every read goes through the committer, and every update
/// builds against whatever is current when it commits.
#[derive(Debug, Clone)]
pub struct Table {
    committer: Arc<dyn Committer>,
    store: Arc<dyn BlobStore>,
    codec: Arc<dyn ManifestCodec>,
}

impl Table {
    /// A table whose manifests are encoded with [`JsonManifestCodec`].
    pub fn new(committer: Arc<dyn Committer>, store: Arc<dyn BlobStore>) -> Self {
        Self {
            committer,
            store,
            codec: Arc::new(JsonManifestCodec),
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn ManifestCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn committer(&self) -> &Arc<dyn Committer> {
        &self.committer
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    pub fn codec(&self) -> &Arc<dyn ManifestCodec> {
        &self.codec
    }

    pub fn metadata(&self) -> KernelResult<TableMetadataRef> {
        Ok(self.committer.load()?.0)
    }

    pub fn version(&self) -> KernelResult<Version> {
        Ok(self.committer.load()?.1)
    }

    pub fn current_snapshot(&self) -> KernelResult<Option<SnapshotRef>> {
        Ok(self.metadata()?.current_snapshot().cloned())
    }

    pub fn snapshot(&self, snapshot_id: i64) -> KernelResult<SnapshotRef> {
        self.metadata()?
            .snapshot(snapshot_id)
            .cloned()
            .ok_or(Error::MissingSnapshot(snapshot_id))
    }

    /// A writer for a manifest in the current default partition spec, for manifests that are
    /// later handed to [`AppendFiles::append_manifest`].
    pub fn new_manifest_writer(&self) -> KernelResult<ManifestWriter> {
        let metadata = self.metadata()?;
        let spec = metadata.default_partition_spec()?.clone();
        Ok(ManifestWriter::new(spec, metadata.format_version()))
    }

    pub fn new_append(&self) -> AppendFiles {
        AppendFiles::new(self)
    }

    pub fn new_fast_append(&self) -> FastAppend {
        FastAppend::new(self)
    }

    pub fn new_delete(&self) -> DeleteFiles {
        DeleteFiles::new(self)
    }

    pub fn new_overwrite(&self) -> OverwriteFiles {
        OverwriteFiles::new(self)
    }

    pub fn update_spec(&self) -> UpdatePartitionSpec {
        UpdatePartitionSpec::new(self)
    }

    pub fn update_properties(&self) -> UpdateProperties {
        UpdateProperties::new(self)
    }
}
