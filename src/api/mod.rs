use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label carrying the owning Cluster's name, set on the Cluster itself and on
/// every managed child for selector-based enumeration.
pub static CLUSTER_NAME_LABEL: &str = "cluster.forge.dev/cluster-name";

/// Membership marker for objects managed by a Cluster topology. The value is
/// always the empty string; list operations filter on equality to it.
pub static TOPOLOGY_MANAGED_LABEL: &str = "cluster.forge.dev/topology-managed";

/// Label linking a MachineDeployment (and its templates) back to the topology
/// entry it was generated from.
pub static DEPLOYMENT_NAME_LABEL: &str = "cluster.forge.dev/deployment-name";

/// Provenance annotation: `Kind.group` of the source template reference.
pub static CLONED_FROM_GROUP_KIND_ANNOTATION: &str = "cluster.forge.dev/cloned-from-group-kind";

/// Provenance annotation: name of the source template.
pub static CLONED_FROM_NAME_ANNOTATION: &str = "cluster.forge.dev/cloned-from-name";

/// Labels and annotations to stamp on generated objects.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct MetadataSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl MetadataSpec {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.annotations.is_empty()
    }
}

pub mod cluster;
pub mod cluster_class;
pub mod machine_deployment;

pub use cluster::{Cluster, ClusterSpec, ControlPlaneTopology, MachineDeploymentTopology, Topology};
pub use cluster_class::{ClusterClass, ClusterClassSpec, LocalObjectTemplate};
pub use machine_deployment::{MachineDeployment, MachineDeploymentSpec};
