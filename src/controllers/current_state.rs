//! Snapshot of the managed children a Cluster currently owns.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::ResourceExt;
use kube::api::DynamicObject;

use super::CurrentStateError;
use crate::api::{
    CLUSTER_NAME_LABEL, Cluster, ClusterClass, DEPLOYMENT_NAME_LABEL, MachineDeployment,
    TOPOLOGY_MANAGED_LABEL,
};
use crate::document;
use crate::store::Store;

/// The current state of a Cluster's children, keyed the same way the desired
/// state is computed so the two can be diffed slot by slot.
#[derive(Debug)]
pub struct CurrentState {
    pub cluster: Cluster,
    /// Unset on first reconcile, before the Cluster was ever patched with a
    /// reference.
    pub infrastructure_cluster: Option<DynamicObject>,
    pub control_plane: Option<ControlPlaneState>,
    pub machine_deployments: BTreeMap<String, MachineDeploymentState>,
}

#[derive(Debug)]
pub struct ControlPlaneState {
    pub object: DynamicObject,
    pub infrastructure_machine_template: Option<DynamicObject>,
}

#[derive(Debug)]
pub struct MachineDeploymentState {
    pub object: MachineDeployment,
    pub bootstrap_template: DynamicObject,
    pub infrastructure_machine_template: DynamicObject,
}

/// Walks the Cluster's child references and the MachineDeployments labelled
/// as part of its managed topology. Unset references are a normal
/// first-reconcile condition; a set reference that does not resolve is an
/// error.
pub async fn get_current_state<S: Store>(
    store: &S,
    cluster: &Cluster,
    cluster_class: &ClusterClass,
) -> Result<CurrentState, CurrentStateError> {
    let infrastructure_cluster = match &cluster.spec.infrastructure_ref {
        Some(reference) => Some(get_reference(store, reference).await?),
        None => None,
    };

    let control_plane = match &cluster.spec.control_plane_ref {
        Some(reference) => Some(get_control_plane_state(store, reference, cluster_class).await?),
        None => None,
    };

    let machine_deployments = get_machine_deployment_state(store, cluster).await?;

    Ok(CurrentState {
        cluster: cluster.clone(),
        infrastructure_cluster,
        control_plane,
        machine_deployments,
    })
}

async fn get_control_plane_state<S: Store>(
    store: &S,
    reference: &ObjectReference,
    cluster_class: &ClusterClass,
) -> Result<ControlPlaneState, CurrentStateError> {
    let object = get_reference(store, reference).await?;

    // Control plane providers without managed machine infrastructure end here.
    if cluster_class.spec.control_plane.machine_infrastructure.is_none() {
        return Ok(ControlPlaneState {
            object,
            infrastructure_machine_template: None,
        });
    }

    let template_ref =
        document::get_nested_ref(&object.data, &["spec", "machineTemplate", "infrastructureRef"])
            .map_err(|source| CurrentStateError::ControlPlaneMachineTemplate {
                kind: object.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default(),
                name: object.name_any(),
                source,
            })?;
    let infrastructure_machine_template = get_reference(store, &template_ref).await?;

    Ok(ControlPlaneState {
        object,
        infrastructure_machine_template: Some(infrastructure_machine_template),
    })
}

/// Lists all MachineDeployments in the Cluster's managed topology and indexes
/// them by the deployment-name label. Each must carry the label and resolve
/// both of its template references.
async fn get_machine_deployment_state<S: Store>(
    store: &S,
    cluster: &Cluster,
) -> Result<BTreeMap<String, MachineDeploymentState>, CurrentStateError> {
    let namespace = cluster.namespace().unwrap_or_default();
    let selector = BTreeMap::from([
        (CLUSTER_NAME_LABEL.to_string(), cluster.name_any()),
        (TOPOLOGY_MANAGED_LABEL.to_string(), String::new()),
    ]);
    let deployments = store
        .list_machine_deployments(&namespace, &selector)
        .await
        .map_err(CurrentStateError::List)?;

    let mut state = BTreeMap::new();
    for deployment in deployments {
        let name = deployment.name_any();

        let topology_name = deployment
            .labels()
            .get(DEPLOYMENT_NAME_LABEL)
            .filter(|value| !value.is_empty())
            .cloned()
            .ok_or_else(|| CurrentStateError::MissingDeploymentName {
                name: name.clone(),
                label: DEPLOYMENT_NAME_LABEL,
            })?;

        // Two live deployments claiming the same topology entry means manual
        // modification or a race; bail out rather than guess.
        if state.contains_key(&topology_name) {
            return Err(CurrentStateError::DuplicateDeploymentName {
                name,
                topology: topology_name,
            });
        }

        let bootstrap_ref = deployment
            .spec
            .template
            .spec
            .bootstrap
            .config_ref
            .clone()
            .ok_or_else(|| CurrentStateError::MissingBootstrapRef { name: name.clone() })?;
        let infrastructure_ref = deployment
            .spec
            .template
            .spec
            .infrastructure_ref
            .clone()
            .ok_or_else(|| CurrentStateError::MissingInfrastructureRef { name: name.clone() })?;

        let bootstrap_template = get_reference(store, &bootstrap_ref).await?;
        let infrastructure_machine_template = get_reference(store, &infrastructure_ref).await?;

        state.insert(
            topology_name,
            MachineDeploymentState {
                object: deployment,
                bootstrap_template,
                infrastructure_machine_template,
            },
        );
    }
    Ok(state)
}

async fn get_reference<S: Store>(
    store: &S,
    reference: &ObjectReference,
) -> Result<DynamicObject, CurrentStateError> {
    store
        .get_by_ref(reference)
        .await
        .map_err(|source| CurrentStateError::Reference {
            kind: reference.kind.clone().unwrap_or_default(),
            name: reference.name.clone().unwrap_or_default(),
            source,
        })
}
