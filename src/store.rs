//! Read/write access to the persistence substrate, typed and untyped.

use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{
    Api, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams, PostParams, TypeMeta,
};
use kube::client::Client;
use kube::core::gvk::ParseGroupVersionError;
use kube::discovery::ApiResource;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::api::{Cluster, MachineDeployment};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("object reference {0:?} is missing apiVersion, kind, namespace or name")]
    IncompleteReference(Box<ObjectReference>),

    #[error("invalid apiVersion on {name}: {source}")]
    InvalidApiVersion {
        name: String,
        source: ParseGroupVersionError,
    },

    #[error("object {name} carries no type information")]
    MissingTypes { name: String },

    // Anything else is transient and stays unwrapped so the runtime requeues.
    #[error(transparent)]
    Api(#[from] kube::Error),
}

impl StoreError {
    fn from_kube(err: kube::Error, kind: &str, namespace: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(response) if response.code == 404 => StoreError::NotFound {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            other => StoreError::Api(other),
        }
    }
}

/// The persistence operations the topology core needs. Implemented against
/// the real apiserver by [`KubeStore`]; tests swap in an in-memory fake.
pub trait Store: Send + Sync {
    async fn get<K>(&self, namespace: &str, name: &str) -> Result<K, StoreError>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + DeserializeOwned;

    /// Resolves a full reference to the untyped document it points at.
    async fn get_by_ref(&self, reference: &ObjectReference) -> Result<DynamicObject, StoreError>;

    /// Lists MachineDeployments whose labels equal every entry of `selector`.
    async fn list_machine_deployments(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<MachineDeployment>, StoreError>;

    async fn create_document(&self, doc: &DynamicObject) -> Result<(), StoreError>;

    /// Merge-patches an existing document; fields absent from `doc` are
    /// preserved on the server.
    async fn patch_document(&self, doc: &DynamicObject) -> Result<(), StoreError>;

    async fn create_machine_deployment(&self, md: &MachineDeployment) -> Result<(), StoreError>;

    async fn patch_machine_deployment(&self, md: &MachineDeployment) -> Result<(), StoreError>;

    /// Writes back the top-level Cluster, persisting newly-assigned child
    /// references.
    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster, StoreError>;
}

/// [`Store`] backed by a [`kube::Client`].
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic_api(
        &self,
        namespace: &str,
        types: &TypeMeta,
        name: &str,
    ) -> Result<Api<DynamicObject>, StoreError> {
        let gvk: GroupVersionKind =
            types
                .clone()
                .try_into()
                .map_err(|source| StoreError::InvalidApiVersion {
                    name: name.to_string(),
                    source,
                })?;
        let resource = ApiResource::from_gvk(&gvk);
        Ok(Api::namespaced_with(self.client.clone(), namespace, &resource))
    }

    fn document_api(&self, doc: &DynamicObject) -> Result<Api<DynamicObject>, StoreError> {
        let types = doc.types.as_ref().ok_or_else(|| StoreError::MissingTypes {
            name: doc.name_any(),
        })?;
        self.dynamic_api(&doc.namespace().unwrap_or_default(), types, &doc.name_any())
    }
}

impl Store for KubeStore {
    async fn get<K>(&self, namespace: &str, name: &str) -> Result<K, StoreError>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + DeserializeOwned,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|err| StoreError::from_kube(err, &K::kind(&()), namespace, name))
    }

    async fn get_by_ref(&self, reference: &ObjectReference) -> Result<DynamicObject, StoreError> {
        let incomplete = || StoreError::IncompleteReference(Box::new(reference.clone()));
        let api_version = reference.api_version.clone().ok_or_else(incomplete)?;
        let kind = reference.kind.clone().ok_or_else(incomplete)?;
        let namespace = reference.namespace.clone().ok_or_else(incomplete)?;
        let name = reference.name.clone().ok_or_else(incomplete)?;

        let types = TypeMeta { api_version, kind: kind.clone() };
        let api = self.dynamic_api(&namespace, &types, &name)?;
        api.get(&name)
            .await
            .map_err(|err| StoreError::from_kube(err, &kind, &namespace, &name))
    }

    async fn list_machine_deployments(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<MachineDeployment>, StoreError> {
        let api: Api<MachineDeployment> = Api::namespaced(self.client.clone(), namespace);
        let labels = selector
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(",");
        let list = api.list(&ListParams::default().labels(&labels)).await?;
        Ok(list.items)
    }

    async fn create_document(&self, doc: &DynamicObject) -> Result<(), StoreError> {
        let api = self.document_api(doc)?;
        api.create(&PostParams::default(), doc).await?;
        Ok(())
    }

    async fn patch_document(&self, doc: &DynamicObject) -> Result<(), StoreError> {
        let api = self.document_api(doc)?;
        api.patch(&doc.name_any(), &PatchParams::default(), &Patch::Merge(doc))
            .await?;
        Ok(())
    }

    async fn create_machine_deployment(&self, md: &MachineDeployment) -> Result<(), StoreError> {
        let api: Api<MachineDeployment> =
            Api::namespaced(self.client.clone(), &md.namespace().unwrap_or_default());
        api.create(&PostParams::default(), md).await?;
        Ok(())
    }

    async fn patch_machine_deployment(&self, md: &MachineDeployment) -> Result<(), StoreError> {
        let api: Api<MachineDeployment> =
            Api::namespaced(self.client.clone(), &md.namespace().unwrap_or_default());
        api.patch(&md.name_any(), &PatchParams::default(), &Patch::Merge(md))
            .await?;
        Ok(())
    }

    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster, StoreError> {
        let api: Api<Cluster> =
            Api::namespaced(self.client.clone(), &cluster.namespace().unwrap_or_default());
        api.replace(&cluster.name_any(), &PostParams::default(), cluster)
            .await
            .map_err(StoreError::Api)
    }
}
