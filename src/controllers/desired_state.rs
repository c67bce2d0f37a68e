//! Pure computation of the desired state for a Cluster topology.
//!
//! Every function here is a pure function of the blueprint and the current
//! state: no I/O, no partial writes. Identity of previously-created children
//! is preserved by carrying their names forward, so the sync step patches in
//! place instead of recreating.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::ResourceExt;
use kube::api::{DynamicObject, ObjectMeta, TypeMeta};
use serde_json::{Map, Value, json};

use super::ComputeError;
use super::blueprint::Blueprint;
use super::current_state::CurrentState;
use crate::api::machine_deployment::{Bootstrap, MachineSpec, MachineTemplateSpec};
use crate::api::{
    CLONED_FROM_GROUP_KIND_ANNOTATION, CLONED_FROM_NAME_ANNOTATION, CLUSTER_NAME_LABEL, Cluster,
    DEPLOYMENT_NAME_LABEL, MachineDeployment, MachineDeploymentSpec, MachineDeploymentTopology,
    TOPOLOGY_MANAGED_LABEL,
};
use crate::document;
use crate::naming;

const TEMPLATE_SUFFIX: &str = "Template";

/// What the topology demands, in the same shape as the current state.
#[derive(Debug)]
pub struct DesiredState {
    pub cluster: Cluster,
    pub infrastructure_cluster: DynamicObject,
    pub control_plane: DesiredControlPlane,
    pub machine_deployments: BTreeMap<String, DesiredMachineDeployment>,
}

#[derive(Debug)]
pub struct DesiredControlPlane {
    pub object: DynamicObject,
    pub infrastructure_machine_template: Option<DynamicObject>,
}

#[derive(Debug)]
pub struct DesiredMachineDeployment {
    pub object: MachineDeployment,
    pub bootstrap_template: DynamicObject,
    pub infrastructure_machine_template: DynamicObject,
}

pub fn compute_desired_state(
    blueprint: &Blueprint,
    current: &CurrentState,
) -> Result<DesiredState, ComputeError> {
    let infrastructure_cluster = compute_infrastructure_cluster(blueprint, current)?;
    let infrastructure_machine_template =
        compute_control_plane_infrastructure_machine_template(blueprint, current)?;
    let control_plane =
        compute_control_plane(blueprint, current, infrastructure_machine_template.as_ref())?;
    let cluster = compute_cluster(current, &infrastructure_cluster, &control_plane)?;

    let topology = current.cluster.topology().ok_or(ComputeError::TopologyNotSet)?;
    let mut machine_deployments = BTreeMap::new();
    for md_topology in &topology.workers.machine_deployments {
        let desired = compute_machine_deployment(blueprint, current, md_topology)?;
        machine_deployments.insert(md_topology.name.clone(), desired);
    }

    Ok(DesiredState {
        cluster,
        infrastructure_cluster,
        control_plane: DesiredControlPlane {
            object: control_plane,
            infrastructure_machine_template,
        },
        machine_deployments,
    })
}

/// Renders the InfrastructureCluster from the class template. When the
/// Cluster already references one, the existing name wins over a generated
/// one so the object is updated in place.
pub fn compute_infrastructure_cluster(
    blueprint: &Blueprint,
    current: &CurrentState,
) -> Result<DynamicObject, ComputeError> {
    let cluster = &current.cluster;
    template_to_object(&RenderInput {
        template: &blueprint.infrastructure_cluster_template,
        cloned_from: &blueprint.cluster_class.spec.infrastructure.reference,
        cluster,
        name_prefix: cluster.name_any(),
        current_ref: cluster.spec.infrastructure_ref.as_ref(),
        labels: BTreeMap::new(),
        annotations: BTreeMap::new(),
    })
}

/// Renders the control plane's InfrastructureMachineTemplate, if the class
/// declares one. Returns `None` for control plane providers that do not
/// manage machine infrastructure.
pub fn compute_control_plane_infrastructure_machine_template(
    blueprint: &Blueprint,
    current: &CurrentState,
) -> Result<Option<DynamicObject>, ComputeError> {
    let Some(template) = &blueprint.control_plane.infrastructure_machine_template else {
        return Ok(None);
    };
    let machine_infrastructure_ref = blueprint
        .cluster_class
        .spec
        .control_plane
        .machine_infrastructure
        .as_ref()
        .map(|machine_infrastructure| &machine_infrastructure.reference)
        .expect("blueprint carries a machine infrastructure template only when the class declares one");

    let cluster = &current.cluster;
    let (labels, annotations) = control_plane_metadata(blueprint, current)?;

    let current_ref = current
        .control_plane
        .as_ref()
        .and_then(|control_plane| control_plane.infrastructure_machine_template.as_ref())
        .map(document::object_reference)
        .transpose()?;

    template_to_template(&RenderInput {
        template,
        cloned_from: machine_infrastructure_ref,
        cluster,
        name_prefix: cluster.name_any(),
        current_ref: current_ref.as_ref(),
        labels,
        annotations,
    })
    .map(Some)
}

/// Renders the control plane from the class template, stamping the topology
/// version and, when present, the replica count and the reference to the
/// machine-infrastructure template computed alongside it.
pub fn compute_control_plane(
    blueprint: &Blueprint,
    current: &CurrentState,
    infrastructure_machine_template: Option<&DynamicObject>,
) -> Result<DynamicObject, ComputeError> {
    let cluster = &current.cluster;
    let topology = cluster.topology().ok_or(ComputeError::TopologyNotSet)?;
    let (labels, annotations) = control_plane_metadata(blueprint, current)?;

    let mut object = template_to_object(&RenderInput {
        template: &blueprint.control_plane.template,
        cloned_from: &blueprint.cluster_class.spec.control_plane.reference,
        cluster,
        name_prefix: cluster.name_any(),
        current_ref: cluster.spec.control_plane_ref.as_ref(),
        labels,
        annotations,
    })?;

    document::set_nested(
        &mut object.data,
        Value::String(topology.version.clone()),
        &["spec", "version"],
    )?;

    // Unset stays unset: a provider may default replicas on its own.
    if let Some(replicas) = topology.control_plane.replicas {
        document::set_nested(
            &mut object.data,
            json!(i64::from(replicas)),
            &["spec", "replicas"],
        )?;
    }

    if let Some(template) = infrastructure_machine_template {
        let reference = document::object_reference(template)?;
        document::set_nested_ref(
            &mut object.data,
            &reference,
            &["spec", "machineTemplate", "infrastructureRef"],
        )?;
    }

    Ok(object)
}

/// The desired Cluster: identity of the current one, the managed-topology
/// labels, and references pointing at the desired children.
pub fn compute_cluster(
    current: &CurrentState,
    infrastructure_cluster: &DynamicObject,
    control_plane: &DynamicObject,
) -> Result<Cluster, ComputeError> {
    let mut cluster = current.cluster.clone();
    let name = cluster.name_any();
    cluster.labels_mut().insert(CLUSTER_NAME_LABEL.to_string(), name);
    cluster
        .labels_mut()
        .insert(TOPOLOGY_MANAGED_LABEL.to_string(), String::new());
    cluster.spec.infrastructure_ref = Some(document::object_reference(infrastructure_cluster)?);
    cluster.spec.control_plane_ref = Some(document::object_reference(control_plane)?);
    Ok(cluster)
}

/// Renders one worker pool: the MachineDeployment plus the bootstrap and
/// infrastructure templates it references. Existing object and template
/// names are preserved; labels on the current object are not carried
/// forward, only the computed set is asserted.
pub fn compute_machine_deployment(
    blueprint: &Blueprint,
    current: &CurrentState,
    md_topology: &MachineDeploymentTopology,
) -> Result<DesiredMachineDeployment, ComputeError> {
    let class = blueprint
        .machine_deployment_classes
        .get(&md_topology.class)
        .ok_or_else(|| ComputeError::UnknownWorkerClass {
            class: md_topology.class.clone(),
            topology: md_topology.name.clone(),
        })?;

    let cluster = &current.cluster;
    let cluster_name = cluster.name_any();
    let name_prefix = format!("{}-{}", cluster_name, md_topology.name);

    let current_state = current.machine_deployments.get(&md_topology.name);
    let current_bootstrap_ref = current_state
        .map(|state| document::object_reference(&state.bootstrap_template))
        .transpose()?;
    let current_infrastructure_ref = current_state
        .map(|state| document::object_reference(&state.infrastructure_machine_template))
        .transpose()?;

    let mut labels = naming::merge_maps(&class.metadata.labels, &md_topology.metadata.labels);
    labels.insert(CLUSTER_NAME_LABEL.to_string(), cluster_name.clone());
    labels.insert(TOPOLOGY_MANAGED_LABEL.to_string(), String::new());
    labels.insert(DEPLOYMENT_NAME_LABEL.to_string(), md_topology.name.clone());
    let annotations =
        naming::merge_maps(&class.metadata.annotations, &md_topology.metadata.annotations);

    let bootstrap_template = template_to_template(&RenderInput {
        template: &class.bootstrap_template,
        cloned_from: &document::object_reference(&class.bootstrap_template)?,
        cluster,
        name_prefix: name_prefix.clone(),
        current_ref: current_bootstrap_ref.as_ref(),
        labels: labels.clone(),
        annotations: annotations.clone(),
    })?;

    let infrastructure_machine_template = template_to_template(&RenderInput {
        template: &class.infrastructure_machine_template,
        cloned_from: &document::object_reference(&class.infrastructure_machine_template)?,
        cluster,
        name_prefix: name_prefix.clone(),
        current_ref: current_infrastructure_ref.as_ref(),
        labels: labels.clone(),
        annotations: annotations.clone(),
    })?;

    let name = current_state
        .map(|state| state.object.name_any())
        .unwrap_or_else(|| naming::generate_name(&name_prefix));

    let object = MachineDeployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: cluster.namespace(),
            labels: Some(labels),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..Default::default()
        },
        spec: MachineDeploymentSpec {
            cluster_name,
            replicas: md_topology.replicas,
            template: MachineTemplateSpec {
                metadata: Default::default(),
                spec: MachineSpec {
                    bootstrap: Bootstrap {
                        config_ref: Some(document::object_reference(&bootstrap_template)?),
                    },
                    infrastructure_ref: Some(document::object_reference(
                        &infrastructure_machine_template,
                    )?),
                },
            },
        },
    };

    Ok(DesiredMachineDeployment {
        object,
        bootstrap_template,
        infrastructure_machine_template,
    })
}

fn control_plane_metadata(
    blueprint: &Blueprint,
    current: &CurrentState,
) -> Result<(BTreeMap<String, String>, BTreeMap<String, String>), ComputeError> {
    let topology = current.cluster.topology().ok_or(ComputeError::TopologyNotSet)?;
    let class_metadata = &blueprint.cluster_class.spec.control_plane.metadata;
    let topology_metadata = &topology.control_plane.metadata;
    // The Cluster's own topology metadata wins over the class defaults.
    Ok((
        naming::merge_maps(&class_metadata.labels, &topology_metadata.labels),
        naming::merge_maps(&class_metadata.annotations, &topology_metadata.annotations),
    ))
}

struct RenderInput<'a> {
    template: &'a DynamicObject,
    /// Reference recorded in the cloned-from provenance annotations.
    cloned_from: &'a ObjectReference,
    cluster: &'a Cluster,
    name_prefix: String,
    /// Identity to preserve; a fresh name is generated only when `None`.
    current_ref: Option<&'a ObjectReference>,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
}

/// template → object: the kind loses its `Template` suffix and the body under
/// `spec.template.spec` becomes the object's `spec`.
fn template_to_object(input: &RenderInput) -> Result<DynamicObject, ComputeError> {
    let (types, kind) = template_types(input.template)?;
    let object_kind = kind
        .strip_suffix(TEMPLATE_SUFFIX)
        .expect("template_types verified the suffix")
        .to_string();

    let spec = document::get_nested(&input.template.data, &["spec", "template", "spec"])?
        .cloned()
        .ok_or_else(|| ComputeError::MissingTemplateSpec {
            name: input.template.name_any(),
            path: "spec.template.spec",
        })?;

    let mut object = new_child(
        input,
        TypeMeta {
            api_version: types.api_version.clone(),
            kind: object_kind,
        },
    );
    object.data = json!({ "spec": spec });
    Ok(object)
}

/// template → template: kind and `spec` are preserved as-is.
fn template_to_template(input: &RenderInput) -> Result<DynamicObject, ComputeError> {
    let (types, _) = template_types(input.template)?;

    let spec = document::get_nested(&input.template.data, &["spec"])?
        .cloned()
        .ok_or_else(|| ComputeError::MissingTemplateSpec {
            name: input.template.name_any(),
            path: "spec",
        })?;

    let mut object = new_child(input, types.clone());
    object.data = json!({ "spec": spec });
    Ok(object)
}

fn template_types(template: &DynamicObject) -> Result<(&TypeMeta, &str), ComputeError> {
    let types = template
        .types
        .as_ref()
        .ok_or_else(|| crate::document::DocumentError::MissingTypes {
            name: template.name_any(),
        })?;
    if !types.kind.ends_with(TEMPLATE_SUFFIX) {
        return Err(ComputeError::NotATemplate {
            kind: types.kind.clone(),
        });
    }
    Ok((types, &types.kind))
}

/// Shared scaffolding for both render operations: identity, namespace, the
/// managed-topology labels and the cloned-from provenance annotations.
fn new_child(input: &RenderInput, types: TypeMeta) -> DynamicObject {
    let name = input
        .current_ref
        .and_then(|reference| reference.name.clone())
        .unwrap_or_else(|| naming::generate_name(&input.name_prefix));

    let mut labels = input.labels.clone();
    labels.insert(CLUSTER_NAME_LABEL.to_string(), input.cluster.name_any());
    labels.insert(TOPOLOGY_MANAGED_LABEL.to_string(), String::new());

    let mut annotations = input.annotations.clone();
    annotations.insert(
        CLONED_FROM_GROUP_KIND_ANNOTATION.to_string(),
        naming::group_kind(input.cloned_from),
    );
    annotations.insert(
        CLONED_FROM_NAME_ANNOTATION.to_string(),
        input.cloned_from.name.clone().unwrap_or_default(),
    );

    DynamicObject {
        types: Some(types),
        metadata: ObjectMeta {
            name: Some(name),
            namespace: input.cluster.namespace(),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        data: Value::Object(Map::new()),
    }
}
