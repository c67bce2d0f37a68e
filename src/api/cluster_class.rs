use k8s_openapi::api::core::v1::ObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::MetadataSpec;

/// Reusable blueprint naming the templates for infrastructure, control plane
/// and worker pools. Clusters instantiate it through their topology.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "cluster.forge.dev",
    version = "v1alpha1",
    kind = "ClusterClass",
    namespaced,
    plural = "clusterclasses"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterClassSpec {
    /// Template for the provider-specific InfrastructureCluster.
    pub infrastructure: LocalObjectTemplate,

    pub control_plane: ControlPlaneClass,

    #[serde(default, skip_serializing_if = "WorkersClass::is_empty")]
    pub workers: WorkersClass,
}

/// A reference to a template document living in the same namespace.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct LocalObjectTemplate {
    #[serde(rename = "ref")]
    pub reference: ObjectReference,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneClass {
    /// Metadata defaults merged into every generated control plane; the
    /// Cluster topology's own metadata wins on key collision.
    #[serde(default, skip_serializing_if = "MetadataSpec::is_empty")]
    pub metadata: MetadataSpec,

    #[serde(rename = "ref")]
    pub reference: ObjectReference,

    /// Set when the control plane provider manages its own machines and needs
    /// an InfrastructureMachineTemplate cloned per Cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_infrastructure: Option<LocalObjectTemplate>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkersClass {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub machine_deployments: Vec<MachineDeploymentClass>,
}

impl WorkersClass {
    pub fn is_empty(&self) -> bool {
        self.machine_deployments.is_empty()
    }
}

/// A named worker pool blueprint.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentClass {
    /// Name MachineDeploymentTopologies use to select this class.
    pub class: String,

    pub template: MachineDeploymentClassTemplate,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentClassTemplate {
    #[serde(default, skip_serializing_if = "MetadataSpec::is_empty")]
    pub metadata: MetadataSpec,

    pub bootstrap: LocalObjectTemplate,

    pub infrastructure: LocalObjectTemplate,
}
