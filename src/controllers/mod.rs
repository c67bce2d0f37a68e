use thiserror::Error;

use crate::document::DocumentError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum BlueprintError {
    #[error("Cluster {cluster} has no topology")]
    TopologyNotSet { cluster: String },

    #[error("failed to read ClusterClass {name}: {source}")]
    ClusterClass {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to read {kind} {name}: {source}")]
    Template {
        kind: String,
        name: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Error, Debug)]
pub enum CurrentStateError {
    #[error("failed to read {kind} {name}: {source}")]
    Reference {
        kind: String,
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to get InfrastructureMachineTemplate reference for {kind} {name}: {source}")]
    ControlPlaneMachineTemplate {
        kind: String,
        name: String,
        #[source]
        source: DocumentError,
    },

    #[error("MachineDeployment {name} is missing the {label} label")]
    MissingDeploymentName { name: String, label: &'static str },

    #[error("duplicate MachineDeployment {name} found for topology {topology}")]
    DuplicateDeploymentName { name: String, topology: String },

    #[error("MachineDeployment {name} does not have a reference to a bootstrap config")]
    MissingBootstrapRef { name: String },

    #[error("MachineDeployment {name} does not have a reference to an InfrastructureMachineTemplate")]
    MissingInfrastructureRef { name: String },

    #[error("failed to list MachineDeployments for managed topology: {0}")]
    List(#[source] StoreError),
}

#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("Cluster has no topology")]
    TopologyNotSet,

    #[error("unknown worker class {class:?} referenced by deployment topology {topology:?}")]
    UnknownWorkerClass { class: String, topology: String },

    #[error("template kind {kind:?} does not end with the Template suffix")]
    NotATemplate { kind: String },

    #[error("template {name} has no {path} mapping")]
    MissingTemplateSpec { name: String, path: &'static str },

    #[error(transparent)]
    Document(#[from] DocumentError),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("failed to create {object}: {source}")]
    Create {
        object: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to patch {object}: {source}")]
    Patch {
        object: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to update Cluster {name}: {source}")]
    ClusterUpdate {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to serialize {object} for comparison: {source}")]
    Serialize {
        object: String,
        #[source]
        source: serde_json::Error,
    },
}

pub mod blueprint;
pub mod current_state;
pub mod desired_state;
pub mod sync;
