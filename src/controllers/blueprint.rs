//! Resolution of a Cluster's ClusterClass and every template it references
//! into an in-memory blueprint for one reconcile.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::ResourceExt;
use kube::api::DynamicObject;

use super::BlueprintError;
use crate::api::{Cluster, ClusterClass, MetadataSpec};
use crate::store::Store;

/// The resolved ClusterClass plus all templates it references. Built at the
/// start of a reconcile and discarded at its end.
#[derive(Debug)]
pub struct Blueprint {
    pub cluster_class: ClusterClass,
    pub infrastructure_cluster_template: DynamicObject,
    pub control_plane: ControlPlaneBlueprint,
    pub machine_deployment_classes: BTreeMap<String, MachineDeploymentClassBlueprint>,
}

#[derive(Debug)]
pub struct ControlPlaneBlueprint {
    pub template: DynamicObject,
    /// Present when the class declares that the control plane manages its own
    /// machine infrastructure.
    pub infrastructure_machine_template: Option<DynamicObject>,
}

#[derive(Debug)]
pub struct MachineDeploymentClassBlueprint {
    pub metadata: MetadataSpec,
    pub bootstrap_template: DynamicObject,
    pub infrastructure_machine_template: DynamicObject,
}

/// Fetches the ClusterClass named by the Cluster's topology and all templates
/// the class declares. Every template is required; a missing one fails the
/// reconcile naming its kind and name.
pub async fn get_blueprint<S: Store>(store: &S, cluster: &Cluster) -> Result<Blueprint, BlueprintError> {
    let topology = cluster
        .topology()
        .ok_or_else(|| BlueprintError::TopologyNotSet {
            cluster: cluster.name_any(),
        })?;
    let namespace = cluster.namespace().unwrap_or_default();

    let cluster_class: ClusterClass = store
        .get(&namespace, &topology.class)
        .await
        .map_err(|source| BlueprintError::ClusterClass {
            name: topology.class.clone(),
            source,
        })?;

    let infrastructure_cluster_template =
        get_template(store, &cluster_class.spec.infrastructure.reference).await?;

    let control_plane_template =
        get_template(store, &cluster_class.spec.control_plane.reference).await?;
    let infrastructure_machine_template =
        match &cluster_class.spec.control_plane.machine_infrastructure {
            Some(machine_infrastructure) => {
                Some(get_template(store, &machine_infrastructure.reference).await?)
            }
            None => None,
        };

    let mut machine_deployment_classes = BTreeMap::new();
    for worker_class in &cluster_class.spec.workers.machine_deployments {
        let bootstrap_template =
            get_template(store, &worker_class.template.bootstrap.reference).await?;
        let infrastructure_machine_template =
            get_template(store, &worker_class.template.infrastructure.reference).await?;
        machine_deployment_classes.insert(
            worker_class.class.clone(),
            MachineDeploymentClassBlueprint {
                metadata: worker_class.template.metadata.clone(),
                bootstrap_template,
                infrastructure_machine_template,
            },
        );
    }

    Ok(Blueprint {
        cluster_class,
        infrastructure_cluster_template,
        control_plane: ControlPlaneBlueprint {
            template: control_plane_template,
            infrastructure_machine_template,
        },
        machine_deployment_classes,
    })
}

async fn get_template<S: Store>(
    store: &S,
    reference: &ObjectReference,
) -> Result<DynamicObject, BlueprintError> {
    store
        .get_by_ref(reference)
        .await
        .map_err(|source| BlueprintError::Template {
            kind: reference.kind.clone().unwrap_or_default(),
            name: reference.name.clone().unwrap_or_default(),
            source,
        })
}
