use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Store error: {0}")]
    StoreError(#[from] store::StoreError),

    #[error("Malformed document: {0}")]
    DocumentError(#[from] document::DocumentError),

    #[error("Blueprint error: {0}")]
    BlueprintError(#[from] controllers::BlueprintError),

    #[error("Current state error: {0}")]
    CurrentStateError(#[from] controllers::CurrentStateError),

    #[error("Desired state error: {0}")]
    ComputeError(#[from] controllers::ComputeError),

    #[error("Sync error: {0}")]
    SyncError(#[from] controllers::SyncError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> String {
        format!("{self:?}").to_lowercase()
    }
}

/// Expose all controller components used by main
pub mod controller;
pub use crate::controller::*;
pub mod api;
pub mod controllers;
pub mod document;
pub mod naming;
pub mod store;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;
pub use metrics::Metrics;

#[cfg(test)]
pub mod fixtures;
