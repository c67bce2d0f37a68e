//! Diffing desired against current state and writing the difference.

use std::fmt;

use kube::ResourceExt;
use kube::api::DynamicObject;
use serde::Serialize;
use tracing::debug;

use super::SyncError;
use super::blueprint::get_blueprint;
use super::current_state::{CurrentState, get_current_state};
use super::desired_state::{DesiredState, compute_desired_state};
use crate::api::{Cluster, MachineDeployment};
use crate::document;
use crate::store::Store;
use crate::{Error, Result};

/// What one reconcile changed. Empty on a no-op pass, which is the steady
/// state for unchanged inputs.
#[derive(Default, Debug)]
pub struct SyncOutcome {
    pub created: Vec<String>,
    pub patched: Vec<String>,
    pub cluster_updated: bool,
}

impl SyncOutcome {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.patched.is_empty() && !self.cluster_updated
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created {:?}, patched {:?}, cluster updated: {}",
            self.created, self.patched, self.cluster_updated
        )
    }
}

/// One full topology pass: load the blueprint and the current state, compute
/// the desired state, write the difference.
pub async fn reconcile_cluster_topology<S: Store>(
    store: &S,
    cluster: &Cluster,
) -> Result<SyncOutcome> {
    let blueprint = get_blueprint(store, cluster).await?;
    let current = get_current_state(store, cluster, &blueprint.cluster_class).await?;
    let desired = compute_desired_state(&blueprint, &current)?;
    sync(store, &current, &desired).await.map_err(Error::from)
}

/// Writes in dependency order: templates before the objects referencing them,
/// the Cluster's own reference update last. Aborts on the first error and
/// leaves requeueing to the runtime.
async fn sync<S: Store>(
    store: &S,
    current: &CurrentState,
    desired: &DesiredState,
) -> Result<SyncOutcome, SyncError> {
    let mut outcome = SyncOutcome::default();

    sync_document(
        store,
        current.infrastructure_cluster.as_ref(),
        &desired.infrastructure_cluster,
        &mut outcome,
    )
    .await?;

    if let Some(template) = &desired.control_plane.infrastructure_machine_template {
        let current_template = current
            .control_plane
            .as_ref()
            .and_then(|control_plane| control_plane.infrastructure_machine_template.as_ref());
        sync_document(store, current_template, template, &mut outcome).await?;
    }

    sync_document(
        store,
        current.control_plane.as_ref().map(|control_plane| &control_plane.object),
        &desired.control_plane.object,
        &mut outcome,
    )
    .await?;

    // Deployments whose topology entry disappeared are left alone; their
    // garbage collection lives elsewhere.
    for (topology_name, desired_md) in &desired.machine_deployments {
        let current_md = current.machine_deployments.get(topology_name);
        sync_document(
            store,
            current_md.map(|state| &state.bootstrap_template),
            &desired_md.bootstrap_template,
            &mut outcome,
        )
        .await?;
        sync_document(
            store,
            current_md.map(|state| &state.infrastructure_machine_template),
            &desired_md.infrastructure_machine_template,
            &mut outcome,
        )
        .await?;
        sync_machine_deployment(
            store,
            current_md.map(|state| &state.object),
            &desired_md.object,
            &mut outcome,
        )
        .await?;
    }

    if needs_write(&desired.cluster, &current.cluster, "Cluster")? {
        store
            .update_cluster(&desired.cluster)
            .await
            .map_err(|source| SyncError::ClusterUpdate {
                name: desired.cluster.name_any(),
                source,
            })?;
        outcome.cluster_updated = true;
    }

    Ok(outcome)
}

async fn sync_document<S: Store>(
    store: &S,
    current: Option<&DynamicObject>,
    desired: &DynamicObject,
    outcome: &mut SyncOutcome,
) -> Result<(), SyncError> {
    let slot = document_slot(desired);
    match current {
        None => {
            store
                .create_document(desired)
                .await
                .map_err(|source| SyncError::Create {
                    object: slot.clone(),
                    source,
                })?;
            debug!("created {slot}");
            outcome.created.push(slot);
        }
        Some(current) => {
            if needs_write(desired, current, &slot)? {
                store
                    .patch_document(desired)
                    .await
                    .map_err(|source| SyncError::Patch {
                        object: slot.clone(),
                        source,
                    })?;
                debug!("patched {slot}");
                outcome.patched.push(slot);
            }
        }
    }
    Ok(())
}

async fn sync_machine_deployment<S: Store>(
    store: &S,
    current: Option<&MachineDeployment>,
    desired: &MachineDeployment,
    outcome: &mut SyncOutcome,
) -> Result<(), SyncError> {
    let slot = format!("MachineDeployment {}", desired.name_any());
    match current {
        None => {
            store
                .create_machine_deployment(desired)
                .await
                .map_err(|source| SyncError::Create {
                    object: slot.clone(),
                    source,
                })?;
            debug!("created {slot}");
            outcome.created.push(slot);
        }
        Some(current) => {
            if needs_write(desired, current, &slot)? {
                store
                    .patch_machine_deployment(desired)
                    .await
                    .map_err(|source| SyncError::Patch {
                        object: slot.clone(),
                        source,
                    })?;
                debug!("patched {slot}");
                outcome.patched.push(slot);
            }
        }
    }
    Ok(())
}

/// A slot needs a write when the fields desired asserts are not already live.
/// Merge semantics mean fields absent from desired never count against it.
fn needs_write<T: Serialize>(desired: &T, current: &T, slot: &str) -> Result<bool, SyncError> {
    let serialize = |value: &T| {
        serde_json::to_value(value).map_err(|source| SyncError::Serialize {
            object: slot.to_string(),
            source,
        })
    };
    Ok(!document::is_subset(&serialize(desired)?, &serialize(current)?))
}

fn document_slot(doc: &DynamicObject) -> String {
    let kind = doc
        .types
        .as_ref()
        .map(|types| types.kind.clone())
        .unwrap_or_else(|| "Object".to_string());
    format!("{kind} {}", doc.name_any())
}
