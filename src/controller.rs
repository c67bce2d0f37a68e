use crate::api::Cluster;
use crate::controllers::sync::reconcile_cluster_topology;
use crate::store::KubeStore;
use crate::{Error, Metrics, Result, telemetry};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use kube::{
    Resource,
    api::{Api, ListParams, ResourceExt},
    client::Client,
    runtime::controller::{Action, Controller},
    runtime::events::{Event, EventType, Recorder, Reporter},
    runtime::watcher::Config,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

// Context for the reconciler
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prom metrics
    pub metrics: Metrics,
}

#[instrument(skip(ctx, cluster), fields(trace_id))]
async fn reconcile(cluster: Arc<Cluster>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));
    let _timer = ctx.metrics.count_and_measure();
    ctx.diagnostics.write().await.last_event = Utc::now();

    let name = cluster.name_any();
    let ns = cluster.namespace().unwrap_or_default();

    // Clusters without a topology are not managed by this controller.
    if cluster.topology().is_none() {
        debug!("Cluster \"{name}\" in {ns} has no topology, skipping");
        return Ok(Action::await_change());
    }

    debug!("Reconciling topology of Cluster \"{name}\" in {ns}");
    let store = KubeStore::new(ctx.client.clone());
    let outcome = reconcile_cluster_topology(&store, &cluster).await?;

    if !outcome.is_noop() {
        info!("Cluster \"{name}\" topology converged: {outcome}");
        ctx.diagnostics
            .read()
            .await
            .recorder(ctx.client.clone())
            .publish(
                &Event {
                    type_: EventType::Normal,
                    reason: "TopologyReconciled".into(),
                    note: Some(outcome.to_string()),
                    action: "Reconciling".into(),
                    secondary: None,
                },
                &cluster.object_ref(&()),
            )
            .await?;
    }

    Ok(Action::await_change())
}

fn error_policy(cluster: Arc<Cluster>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {error:?}");
    ctx.metrics.reconcile_failure(&cluster, error);
    Action::requeue(Duration::from_secs(5 * 60))
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: telemetry::SERVICE_NAME.into(),
        }
    }
}
impl Diagnostics {
    fn recorder(&self, client: Client) -> Recorder {
        Recorder::new(client, self.reporter.clone())
    }
}

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
}

/// State wrapper around the controller outputs for the web server
impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub fn to_context(&self, client: Client) -> Arc<Context> {
        Arc::new(Context {
            client,
            metrics: Metrics::default().register(&self.registry).unwrap(),
            diagnostics: self.diagnostics.clone(),
        })
    }
}

/// Initialize the controller and shared state (given the crd is installed)
pub async fn run(state: State) {
    let client = Client::try_default()
        .await
        .expect("failed to create kube Client");
    let clusters = Api::<Cluster>::all(client.clone());
    if let Err(e) = clusters.list(&ListParams::default().limit(1)).await {
        error!("Clusters are not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }
    Controller::new(clusters, Config::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.to_context(client))
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
