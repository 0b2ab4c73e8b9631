//! Delivery sink boundary contract
//!
//! The messaging endpoint that receives finished files is an external
//! collaborator. It must classify a blocked/unreachable target distinctly
//! (see [`DeliveryError::TargetBlocked`]) so the processor can suppress
//! further notification attempts to that target.

use crate::error::DeliveryError;
use crate::types::ArtifactId;
use async_trait::async_trait;
use std::path::Path;

/// File delivery contract consumed by the job processor
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Upload a local file to `target_id` with a caption
    ///
    /// Returns the endpoint's identity for the stored artifact; later
    /// requests for the same media can be served through
    /// [`deliver_artifact`](Self::deliver_artifact) without re-uploading.
    async fn deliver_file(
        &self,
        target_id: i64,
        local_path: &Path,
        caption: &str,
    ) -> Result<ArtifactId, DeliveryError>;

    /// Re-send an artifact the endpoint already stores
    async fn deliver_artifact(
        &self,
        target_id: i64,
        artifact_id: &ArtifactId,
        caption: &str,
    ) -> Result<(), DeliveryError>;
}
