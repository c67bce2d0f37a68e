use k8s_openapi::api::core::v1::ObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::MetadataSpec;

/// The top-level declarative object. Its topology drives reconciliation of
/// the InfrastructureCluster, the ControlPlane and the MachineDeployments.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "cluster.forge.dev",
    version = "v1alpha1",
    kind = "Cluster",
    namespaced,
    plural = "clusters"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Reference to the provider-specific infrastructure object. Unset until
    /// the first topology reconcile assigns it; its name is stable afterwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,

    /// Reference to the control plane object. Same lifecycle as above.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_ref: Option<ObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<Topology>,
}

/// Concrete parameters instantiating a ClusterClass.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    /// Name of the ClusterClass in the Cluster's namespace.
    pub class: String,

    /// Version propagated to the control plane.
    pub version: String,

    #[serde(default)]
    pub control_plane: ControlPlaneTopology,

    #[serde(default)]
    pub workers: WorkersTopology,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneTopology {
    #[serde(default, skip_serializing_if = "MetadataSpec::is_empty")]
    pub metadata: MetadataSpec,

    /// When unset, the rendered control plane carries no `spec.replicas` at
    /// all (unset is distinct from zero).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkersTopology {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub machine_deployments: Vec<MachineDeploymentTopology>,
}

/// One worker pool: a named instantiation of a worker class.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentTopology {
    #[serde(default, skip_serializing_if = "MetadataSpec::is_empty")]
    pub metadata: MetadataSpec,

    /// Worker class this pool instantiates; must exist in the ClusterClass.
    pub class: String,

    /// Topology-local name, unique within the Cluster. Also the key under
    /// which the generated MachineDeployment is tracked across reconciles.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

impl Cluster {
    pub fn topology(&self) -> Option<&Topology> {
        self.spec.topology.as_ref()
    }
}
