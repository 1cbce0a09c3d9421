//! Best-effort removal of everything a run created

use tracing::{info, instrument, warn};

use super::manifest::{Manifest, ObjectRef};
use crate::error::{E2eError, E2eResult, TeardownFailure};
use crate::k8s::ClusterGateway;

/// Delete every object in `manifest`, namespaced objects before namespaces
///
/// Keeps going past individual failures. Objects that are already gone count
/// as deleted. Returns the deleted objects in deletion order, or every failure
/// at once.
#[instrument(skip_all, fields(objects = manifest.len()))]
pub async fn teardown(
    gateway: &dyn ClusterGateway,
    manifest: &Manifest,
) -> E2eResult<Vec<ObjectRef>> {
    let mut deleted = Vec::with_capacity(manifest.len());
    let mut failures = Vec::new();

    for object in manifest.teardown_order() {
        match gateway.delete(object).await {
            Ok(()) => {
                info!(%object, "Deleted");
                deleted.push(object.clone());
            }
            Err(e) if e.is_not_found() => {
                info!(%object, "Already gone");
                deleted.push(object.clone());
            }
            Err(e) => {
                warn!(%object, error = %e, "Failed to delete");
                failures.push(TeardownFailure {
                    object: object.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    if failures.is_empty() {
        Ok(deleted)
    } else {
        Err(E2eError::Teardown(failures))
    }
}
