//! The build's product: a detached disk.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use crate::client::ResourceClient;
use crate::state::SharedState;
use crate::types::{DiskId, Result};

/// Identifies artifacts produced by this builder.
pub const BUILDER_ID: &str = "ganto.ovirt";

/// Turn final build state into the build result.
///
/// A recorded error wins over anything else in the state. Without an error
/// and without a disk the build succeeded with nothing to show.
pub fn from_state(state: &mut SharedState) -> Result<Option<Artifact>> {
    if let Some(err) = state.take_error() {
        return Err(err);
    }
    Ok(state.disk_id().cloned().map(Artifact::new))
}

/// A disk left behind by a successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    disk_id: DiskId,
    created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(disk_id: DiskId) -> Self {
        Self {
            disk_id,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &DiskId {
        &self.disk_id
    }

    pub fn builder_id(&self) -> &'static str {
        BUILDER_ID
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Local files belonging to the artifact. Disks live on the engine only.
    pub fn files(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Remove the disk from the engine.
    pub async fn destroy(&self, client: &dyn ResourceClient) -> Result<()> {
        tracing::info!("artifact_destroy: disk={}", self.disk_id);
        client
            .delete_disk(&self.disk_id)
            .await
            .map_err(|e| e.context(format!("Error removing disk '{}'", self.disk_id)))?;
        tracing::info!("artifact_destroyed: disk={}", self.disk_id);
        Ok(())
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A disk was created: {}", self.disk_id)
    }
}
