//! Test doubles: an in-memory [`Store`] with a write log, plus builders for
//! clusters, classes, templates and rendered children.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Mutex;

use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{DynamicObject, ObjectMeta, TypeMeta};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::api::cluster::{ControlPlaneTopology, WorkersTopology};
use crate::api::cluster_class::{ControlPlaneClass, MachineDeploymentClass, MachineDeploymentClassTemplate, WorkersClass};
use crate::api::machine_deployment::{Bootstrap, MachineSpec, MachineTemplateSpec};
use crate::api::{
    CLUSTER_NAME_LABEL, Cluster, ClusterClass, ClusterClassSpec, ClusterSpec,
    DEPLOYMENT_NAME_LABEL, LocalObjectTemplate, MachineDeployment, MachineDeploymentSpec,
    MachineDeploymentTopology, MetadataSpec, TOPOLOGY_MANAGED_LABEL, Topology,
};
use crate::controllers::blueprint::{Blueprint, ControlPlaneBlueprint};
use crate::document;
use crate::store::{Store, StoreError};

type ObjectKey = (String, String, String);

/// In-memory [`Store`]. Objects live as serialized documents keyed by kind,
/// namespace and name; every create/patch/update is logged so tests can
/// assert exactly which writes a reconcile issued.
#[derive(Default)]
pub struct InMemoryStore {
    objects: Mutex<BTreeMap<ObjectKey, Value>>,
    writes: Mutex<Vec<String>>,
}

impl InMemoryStore {
    pub fn insert_document(&self, doc: &DynamicObject) {
        let kind = doc.types.as_ref().expect("document carries types").kind.clone();
        self.insert_raw(&kind, &doc.namespace().unwrap_or_default(), &doc.name_any(), doc);
    }

    pub fn insert_machine_deployment(&self, md: &MachineDeployment) {
        self.insert_raw("MachineDeployment", &md.namespace().unwrap_or_default(), &md.name_any(), md);
    }

    pub fn insert_cluster_class(&self, class: &ClusterClass) {
        self.insert_raw("ClusterClass", &class.namespace().unwrap_or_default(), &class.name_any(), class);
    }

    pub fn get_document(&self, kind: &str, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.get_raw(kind, namespace, name)
            .map(|value| serde_json::from_value(value).expect("stored document deserializes"))
    }

    pub fn get_raw(&self, kind: &str, namespace: &str, name: &str) -> Option<Value> {
        self.objects
            .lock()
            .unwrap()
            .get(&key(kind, namespace, name))
            .cloned()
    }

    pub fn remove_document(&self, kind: &str, namespace: &str, name: &str) {
        self.objects.lock().unwrap().remove(&key(kind, namespace, name));
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }

    fn insert_raw<T: serde::Serialize>(&self, kind: &str, namespace: &str, name: &str, object: &T) {
        let value = serde_json::to_value(object).expect("object serializes");
        self.objects.lock().unwrap().insert(key(kind, namespace, name), value);
    }

    fn log(&self, operation: &str, kind: &str, name: &str) {
        self.writes.lock().unwrap().push(format!("{operation} {kind} {name}"));
    }

    fn create(&self, kind: &str, namespace: &str, name: &str, value: Value) -> Result<(), StoreError> {
        let previous = self
            .objects
            .lock()
            .unwrap()
            .insert(key(kind, namespace, name), value);
        assert!(previous.is_none(), "create of existing {kind} {namespace}/{name}");
        self.log("create", kind, name);
        Ok(())
    }

    fn patch(&self, kind: &str, namespace: &str, name: &str, patch: Value) -> Result<(), StoreError> {
        let mut objects = self.objects.lock().unwrap();
        let existing = objects
            .get_mut(&key(kind, namespace, name))
            .ok_or_else(|| StoreError::NotFound {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        merge_patch(existing, &patch);
        self.log("patch", kind, name);
        Ok(())
    }
}

fn key(kind: &str, namespace: &str, name: &str) -> ObjectKey {
    (kind.to_string(), namespace.to_string(), name.to_string())
}

/// RFC 7386 merge, standing in for the server-side strategic merge: mappings
/// merge recursively, nulls remove, everything else replaces.
fn merge_patch(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (k, v) in patch {
                if v.is_null() {
                    target.remove(k);
                } else {
                    merge_patch(target.entry(k.clone()).or_insert(Value::Null), v);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

impl Store for InMemoryStore {
    async fn get<K>(&self, namespace: &str, name: &str) -> Result<K, StoreError>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + DeserializeOwned,
    {
        let kind = K::kind(&()).into_owned();
        let value = self
            .get_raw(&kind, namespace, name)
            .ok_or_else(|| StoreError::NotFound {
                kind: kind.clone(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        Ok(serde_json::from_value(value).expect("stored object deserializes"))
    }

    async fn get_by_ref(&self, reference: &ObjectReference) -> Result<DynamicObject, StoreError> {
        let incomplete = || StoreError::IncompleteReference(Box::new(reference.clone()));
        reference.api_version.as_ref().ok_or_else(incomplete)?;
        let kind = reference.kind.clone().ok_or_else(incomplete)?;
        let namespace = reference.namespace.clone().ok_or_else(incomplete)?;
        let name = reference.name.clone().ok_or_else(incomplete)?;
        self.get_document(&kind, &namespace, &name)
            .ok_or(StoreError::NotFound { kind, namespace, name })
    }

    async fn list_machine_deployments(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<MachineDeployment>, StoreError> {
        let objects = self.objects.lock().unwrap();
        let deployments = objects
            .iter()
            .filter(|((kind, ns, _), _)| kind == "MachineDeployment" && ns == namespace)
            .filter(|(_, value)| {
                let labels = &value["metadata"]["labels"];
                selector
                    .iter()
                    .all(|(k, v)| labels.get(k).and_then(Value::as_str) == Some(v.as_str()))
            })
            .map(|(_, value)| {
                serde_json::from_value(value.clone()).expect("stored deployment deserializes")
            })
            .collect();
        Ok(deployments)
    }

    async fn create_document(&self, doc: &DynamicObject) -> Result<(), StoreError> {
        let kind = doc
            .types
            .as_ref()
            .ok_or_else(|| StoreError::MissingTypes { name: doc.name_any() })?
            .kind
            .clone();
        self.create(
            &kind,
            &doc.namespace().unwrap_or_default(),
            &doc.name_any(),
            serde_json::to_value(doc).expect("document serializes"),
        )
    }

    async fn patch_document(&self, doc: &DynamicObject) -> Result<(), StoreError> {
        let kind = doc
            .types
            .as_ref()
            .ok_or_else(|| StoreError::MissingTypes { name: doc.name_any() })?
            .kind
            .clone();
        self.patch(
            &kind,
            &doc.namespace().unwrap_or_default(),
            &doc.name_any(),
            serde_json::to_value(doc).expect("document serializes"),
        )
    }

    async fn create_machine_deployment(&self, md: &MachineDeployment) -> Result<(), StoreError> {
        self.create(
            "MachineDeployment",
            &md.namespace().unwrap_or_default(),
            &md.name_any(),
            serde_json::to_value(md).expect("deployment serializes"),
        )
    }

    async fn patch_machine_deployment(&self, md: &MachineDeployment) -> Result<(), StoreError> {
        self.patch(
            "MachineDeployment",
            &md.namespace().unwrap_or_default(),
            &md.name_any(),
            serde_json::to_value(md).expect("deployment serializes"),
        )
    }

    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster, StoreError> {
        self.insert_raw(
            "Cluster",
            &cluster.namespace().unwrap_or_default(),
            &cluster.name_any(),
            cluster,
        );
        self.log("update", "Cluster", &cluster.name_any());
        Ok(cluster.clone())
    }
}

pub fn stored_cluster(store: &InMemoryStore, namespace: &str, name: &str) -> Cluster {
    let value = store
        .get_raw("Cluster", namespace, name)
        .expect("cluster was written back");
    serde_json::from_value(value).expect("stored cluster deserializes")
}

// --- builders -------------------------------------------------------------

fn template_document(namespace: &str, name: &str, api_version: &str, kind: &str, spec: Value) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        }),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: json!({ "spec": { "template": { "spec": spec } } }),
    }
}

pub fn infrastructure_cluster_template(namespace: &str, name: &str) -> DynamicObject {
    template_document(
        namespace,
        name,
        "infrastructure.forge.dev/v1alpha1",
        "GenericInfrastructureClusterTemplate",
        json!({ "controlPlaneEndpoint": { "host": "", "port": 0 } }),
    )
}

pub fn control_plane_template(namespace: &str, name: &str) -> DynamicObject {
    template_document(
        namespace,
        name,
        "controlplane.forge.dev/v1alpha1",
        "GenericControlPlaneTemplate",
        json!({ "fakeSetting": true }),
    )
}

pub fn infrastructure_machine_template(namespace: &str, name: &str) -> DynamicObject {
    template_document(
        namespace,
        name,
        "infrastructure.forge.dev/v1alpha1",
        "GenericInfrastructureMachineTemplate",
        json!({ "machineType": "medium" }),
    )
}

pub fn bootstrap_template(namespace: &str, name: &str) -> DynamicObject {
    template_document(
        namespace,
        name,
        "bootstrap.forge.dev/v1alpha1",
        "GenericBootstrapConfigTemplate",
        json!({ "format": "cloud-config" }),
    )
}

/// A live (already rendered) InfrastructureCluster.
pub fn infrastructure_cluster(namespace: &str, name: &str) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: "infrastructure.forge.dev/v1alpha1".to_string(),
            kind: "GenericInfrastructureCluster".to_string(),
        }),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: json!({ "spec": { "controlPlaneEndpoint": { "host": "", "port": 0 } } }),
    }
}

/// A live control plane, optionally pointing at its machine template.
pub fn control_plane(
    namespace: &str,
    name: &str,
    machine_template: Option<&DynamicObject>,
) -> DynamicObject {
    let mut object = DynamicObject {
        types: Some(TypeMeta {
            api_version: "controlplane.forge.dev/v1alpha1".to_string(),
            kind: "GenericControlPlane".to_string(),
        }),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: json!({ "spec": { "fakeSetting": true } }),
    };
    if let Some(template) = machine_template {
        let reference = document::object_reference(template).unwrap();
        document::set_nested_ref(
            &mut object.data,
            &reference,
            &["spec", "machineTemplate", "infrastructureRef"],
        )
        .unwrap();
    }
    object
}

pub fn fake_ref(name: &str) -> ObjectReference {
    ObjectReference {
        api_version: Some("infrastructure.forge.dev/v1alpha1".to_string()),
        kind: Some("GenericInfrastructureCluster".to_string()),
        namespace: Some("default".to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

/// A Cluster with a default topology (`class1`, `v1.21.2`, no worker pools);
/// the mutator customizes it.
pub fn cluster(namespace: &str, name: &str, mutate: impl FnOnce(&mut Topology)) -> Cluster {
    let mut topology = Topology {
        class: "class1".to_string(),
        version: "v1.21.2".to_string(),
        control_plane: ControlPlaneTopology::default(),
        workers: WorkersTopology::default(),
    };
    mutate(&mut topology);

    let mut cluster = Cluster::new(
        name,
        ClusterSpec {
            infrastructure_ref: None,
            control_plane_ref: None,
            topology: Some(topology),
        },
    );
    cluster.metadata.namespace = Some(namespace.to_string());
    cluster
}

pub fn cluster_with_control_plane_metadata() -> Cluster {
    cluster("default", "cluster1", |topology| {
        topology.control_plane.metadata = MetadataSpec {
            labels: BTreeMap::from([("l2".to_string(), String::new())]),
            annotations: BTreeMap::from([("a2".to_string(), String::new())]),
        };
    })
}

fn cluster_class(
    namespace: &str,
    name: &str,
    infrastructure_template: &DynamicObject,
    control_plane_template: &DynamicObject,
    machine_infrastructure_template: Option<&DynamicObject>,
) -> ClusterClass {
    let mut class = ClusterClass::new(
        name,
        ClusterClassSpec {
            infrastructure: LocalObjectTemplate {
                reference: document::object_reference(infrastructure_template).unwrap(),
            },
            control_plane: ControlPlaneClass {
                metadata: MetadataSpec::default(),
                reference: document::object_reference(control_plane_template).unwrap(),
                machine_infrastructure: machine_infrastructure_template.map(|template| {
                    LocalObjectTemplate {
                        reference: document::object_reference(template).unwrap(),
                    }
                }),
            },
            workers: WorkersClass::default(),
        },
    );
    class.metadata.namespace = Some(namespace.to_string());
    class
}

/// Blueprint with only the two required templates.
pub fn minimal_blueprint() -> Blueprint {
    let infrastructure_cluster_template =
        infrastructure_cluster_template("default", "infra-cluster-template1");
    let control_plane = control_plane_template("default", "control-plane-template1");
    let cluster_class = cluster_class(
        "default",
        "class1",
        &infrastructure_cluster_template,
        &control_plane,
        None,
    );
    Blueprint {
        cluster_class,
        infrastructure_cluster_template,
        control_plane: ControlPlaneBlueprint {
            template: control_plane,
            infrastructure_machine_template: None,
        },
        machine_deployment_classes: BTreeMap::new(),
    }
}

/// Blueprint whose control plane declares machine infrastructure and carries
/// the class metadata used by the merge tests.
pub fn blueprint_with_machine_infrastructure() -> Blueprint {
    let infrastructure_cluster_template =
        infrastructure_cluster_template("default", "infra-cluster-template1");
    let control_plane = control_plane_template("default", "control-plane-template1");
    let machine_template =
        infrastructure_machine_template("default", "control-plane-machine-template1");
    let mut cluster_class = cluster_class(
        "default",
        "class1",
        &infrastructure_cluster_template,
        &control_plane,
        Some(&machine_template),
    );
    cluster_class.spec.control_plane.metadata = MetadataSpec {
        labels: BTreeMap::from([("l1".to_string(), String::new())]),
        annotations: BTreeMap::from([("a1".to_string(), String::new())]),
    };
    Blueprint {
        cluster_class,
        infrastructure_cluster_template,
        control_plane: ControlPlaneBlueprint {
            template: control_plane,
            infrastructure_machine_template: Some(machine_template),
        },
        machine_deployment_classes: BTreeMap::new(),
    }
}

/// A MachineDeployment pointing at the given templates, with no labels set.
pub fn machine_deployment(
    namespace: &str,
    name: &str,
    cluster_name: &str,
    bootstrap_template: &DynamicObject,
    infrastructure_machine_template: &DynamicObject,
) -> MachineDeployment {
    let mut md = MachineDeployment::new(
        name,
        MachineDeploymentSpec {
            cluster_name: cluster_name.to_string(),
            replicas: None,
            template: MachineTemplateSpec {
                metadata: MetadataSpec::default(),
                spec: MachineSpec {
                    bootstrap: Bootstrap {
                        config_ref: Some(document::object_reference(bootstrap_template).unwrap()),
                    },
                    infrastructure_ref: Some(
                        document::object_reference(infrastructure_machine_template).unwrap(),
                    ),
                },
            },
        },
    );
    md.metadata.namespace = Some(namespace.to_string());
    md
}

pub struct Scenario {
    pub cluster: Cluster,
    pub cluster_class: ClusterClass,
}

/// Seeds the store with a class that declares control-plane machine
/// infrastructure and one worker class, and returns a cluster instantiating
/// it with a single pool.
pub fn full_class_scenario(store: &InMemoryStore) -> Scenario {
    let infra_template = infrastructure_cluster_template("default", "infra-cluster-template1");
    let cp_template = control_plane_template("default", "control-plane-template1");
    let cp_machine_template =
        infrastructure_machine_template("default", "control-plane-machine-template1");
    let worker_bootstrap = bootstrap_template("default", "linux-worker-bootstraptemplate");
    let worker_machines =
        infrastructure_machine_template("default", "linux-worker-inframachinetemplate");

    let mut cluster_class = cluster_class(
        "default",
        "class1",
        &infra_template,
        &cp_template,
        Some(&cp_machine_template),
    );
    cluster_class.spec.workers = WorkersClass {
        machine_deployments: vec![MachineDeploymentClass {
            class: "linux-worker".to_string(),
            template: MachineDeploymentClassTemplate {
                metadata: MetadataSpec {
                    labels: BTreeMap::from([
                        ("fizz".to_string(), "buzz".to_string()),
                        ("foo".to_string(), "bar".to_string()),
                    ]),
                    annotations: BTreeMap::new(),
                },
                bootstrap: LocalObjectTemplate {
                    reference: document::object_reference(&worker_bootstrap).unwrap(),
                },
                infrastructure: LocalObjectTemplate {
                    reference: document::object_reference(&worker_machines).unwrap(),
                },
            },
        }],
    };

    for doc in [
        &infra_template,
        &cp_template,
        &cp_machine_template,
        &worker_bootstrap,
        &worker_machines,
    ] {
        store.insert_document(doc);
    }
    store.insert_cluster_class(&cluster_class);

    let cluster = cluster("default", "cluster1", |topology| {
        topology.control_plane.replicas = Some(3);
        topology.workers.machine_deployments = vec![MachineDeploymentTopology {
            metadata: MetadataSpec {
                labels: BTreeMap::from([("foo".to_string(), "baz".to_string())]),
                annotations: BTreeMap::new(),
            },
            class: "linux-worker".to_string(),
            name: "big-pool-of-machines".to_string(),
            replicas: Some(5),
        }];
    });

    Scenario { cluster, cluster_class }
}

/// Seeds the store with a class holding only the two required templates and
/// returns a cluster with no worker pools.
pub fn minimal_class_scenario(store: &InMemoryStore) -> Scenario {
    let infra_template = infrastructure_cluster_template("default", "infra-cluster-template1");
    let cp_template = control_plane_template("default", "control-plane-template1");
    let cluster_class = cluster_class("default", "class1", &infra_template, &cp_template, None);

    store.insert_document(&infra_template);
    store.insert_document(&cp_template);
    store.insert_cluster_class(&cluster_class);

    let cluster = cluster("default", "cluster1", |topology| {
        topology.control_plane.replicas = Some(3);
    });

    Scenario { cluster, cluster_class }
}

/// Seeds a live MachineDeployment (plus the template documents it references)
/// labelled as part of the cluster's managed topology.
pub fn seed_machine_deployment(
    store: &InMemoryStore,
    cluster: &Cluster,
    topology_name: &str,
) -> MachineDeployment {
    let namespace = cluster.namespace().unwrap_or_default();
    let bootstrap = bootstrap_template(&namespace, "existing-bootstrap-1");
    let machines = infrastructure_machine_template(&namespace, "existing-machines-1");
    store.insert_document(&bootstrap);
    store.insert_document(&machines);

    let mut md = machine_deployment(
        &namespace,
        "existing-deployment-1",
        &cluster.name_any(),
        &bootstrap,
        &machines,
    );
    md.metadata.labels = Some(BTreeMap::from([
        (CLUSTER_NAME_LABEL.to_string(), cluster.name_any()),
        (TOPOLOGY_MANAGED_LABEL.to_string(), String::new()),
        (DEPLOYMENT_NAME_LABEL.to_string(), topology_name.to_string()),
    ]));
    md.spec.replicas = Some(3);
    store.insert_machine_deployment(&md);
    md
}
