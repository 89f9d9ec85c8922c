//! Planning which manifests of a snapshot are combined into new ones.
//!
//! The planner only looks at [`ManifestFile`] references (spec id and length); reading entries and
//! writing merged manifests is left to the snapshot producer.

use itertools::Itertools;
use tracing::debug;

use crate::manifest::ManifestFile;
use crate::table_properties::TableProperties;
use crate::utils::bin_packing::ListPacker;

/// One unit of the planned manifest layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestBin {
    /// Left as it is.
    Keep(ManifestFile),
    /// Combined into one new manifest. Always holds at least two manifests of one spec.
    Merge(Vec<ManifestFile>),
}

impl ManifestBin {
    pub fn manifests(&self) -> &[ManifestFile] {
        match self {
            ManifestBin::Keep(manifest) => std::slice::from_ref(manifest),
            ManifestBin::Merge(manifests) => manifests,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestMergePlanner {
    min_count_to_merge: u32,
    target_size_bytes: u64,
}

impl ManifestMergePlanner {
    pub fn new(min_count_to_merge: u32, target_size_bytes: u64) -> Self {
        Self {
            min_count_to_merge,
            target_size_bytes,
        }
    }

    pub fn from_properties(properties: &TableProperties) -> Self {
        Self::new(
            properties.manifest_min_merge_count(),
            properties.manifest_target_size_bytes(),
        )
    }

    /// Group `manifests` by partition spec and bin-pack each group that is large enough.
    ///
    /// Groups come out in order of first appearance and bins in order of their earliest member,
    /// so a caller passing the newest manifests first gets the newest bins first. Manifests of
    /// different specs never share a bin.
    pub fn plan(&self, manifests: Vec<ManifestFile>) -> Vec<ManifestBin> {
        let spec_order: Vec<i32> = manifests
            .iter()
            .map(|m| m.partition_spec_id)
            .unique()
            .collect();
        let mut groups = manifests
            .into_iter()
            .into_group_map_by(|m| m.partition_spec_id);

        let mut bins = vec![];
        for spec_id in spec_order {
            let Some(group) = groups.remove(&spec_id) else {
                continue;
            };
            if (group.len() as u64) < u64::from(self.min_count_to_merge) {
                debug!(
                    spec_id,
                    manifests = group.len(),
                    "Too few manifests to merge"
                );
                bins.extend(group.into_iter().map(ManifestBin::Keep));
                continue;
            }
            let packer = ListPacker::new(self.target_size_bytes);
            for mut packed in packer.pack(group, |m| m.manifest_length) {
                if packed.len() == 1 {
                    bins.extend(packed.pop().map(ManifestBin::Keep));
                } else {
                    bins.push(ManifestBin::Merge(packed));
                }
            }
        }
        bins
    }
}
