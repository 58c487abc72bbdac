use glimpse_refresh_core::payload::ClusterMeta;

/// Holds cluster metadata stamped into every snapshot.
#[derive(Clone, Debug)]
pub struct ClusterInfo {
    /// Stable identifier, unique across the clusters a frontend aggregates.
    pub id: String,
    /// Display name.
    pub name: String,
}

impl ClusterInfo {
    pub fn meta(&self) -> ClusterMeta {
        ClusterMeta {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}
