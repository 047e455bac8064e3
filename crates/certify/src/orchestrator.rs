//! Deployment orchestration for a single cluster.
//!
//! A deployment walks these stages:
//!
//! ```text
//! Created -> NodesMatching -> NodesAssigned -> Deploying
//!         -> WaitOperational -> WaitTasksFinished -> Operational
//! ```
//!
//! Any error moves a non-terminal deployment to `Failed`. `Operational` and
//! `Failed` clusters move to `Deleted` on teardown.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ClusterStatus, DiscoveredNode, RemoteCluster, RemoteClusterService, TaskStatus};
use crate::descriptor::{ClusterDescriptor, NodeRequirement};
use crate::error::{CertifyError, Result};
use crate::matcher::{MatchedNode, NodeMatcher};
use crate::network;
use crate::polling::{PollingTimer, DEFAULT_POLL_INTERVAL};

/// Default time to wait for a deleted cluster to disappear.
pub const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(60);

/// Local stage of a cluster deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentStage {
    /// Cluster exists, no nodes yet.
    Created,
    /// Waiting for and matching discovered nodes.
    NodesMatching,
    /// Nodes added with pending roles.
    NodesAssigned,
    /// Deploy triggered.
    Deploying,
    /// Waiting for cluster status `operational`.
    WaitOperational,
    /// Waiting for deployment tasks to finish.
    WaitTasksFinished,
    /// Deployment finished.
    Operational,
    /// Deployment failed.
    Failed,
    /// Cluster deleted.
    Deleted,
}

impl DeploymentStage {
    /// Whether no further progress is possible without teardown.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Operational | Self::Failed | Self::Deleted)
    }

    /// Whether `next` may follow this stage.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use DeploymentStage as S;
        match (self, next) {
            (S::Created, S::NodesMatching)
            | (S::NodesMatching, S::NodesAssigned)
            | (S::NodesAssigned, S::Deploying)
            | (S::Deploying, S::WaitOperational)
            | (S::WaitOperational, S::WaitTasksFinished)
            | (S::WaitTasksFinished, S::Operational)
            | (S::Operational | S::Failed, S::Deleted) => true,
            (from, S::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for DeploymentStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::NodesMatching => "nodes_matching",
            Self::NodesAssigned => "nodes_assigned",
            Self::Deploying => "deploying",
            Self::WaitOperational => "wait_operational",
            Self::WaitTasksFinished => "wait_tasks_finished",
            Self::Operational => "operational",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

impl RemoteCluster {
    /// Move to `next`, logging the transition.
    pub fn advance(&mut self, next: DeploymentStage) {
        if self.stage.can_transition_to(next) {
            info!(cluster_id = self.id, from = %self.stage, to = %next, "Deployment stage");
        } else {
            warn!(
                cluster_id = self.id,
                from = %self.stage,
                to = %next,
                "Unexpected deployment stage transition"
            );
        }
        self.stage = next;
    }

    /// Mark the deployment failed if `result` is an error.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if !self.stage.is_terminal() {
                warn!(cluster_id = self.id, stage = %self.stage, error = %e, "Deployment failed");
                self.advance(DeploymentStage::Failed);
            }
        }
        result
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Polling cadence for every wait.
    pub poll_interval: Duration,
    /// How long to wait for a deleted cluster to disappear.
    pub delete_timeout: Duration,
    /// Value written to the cluster's `common.debug` attribute.
    pub debug_mode: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            delete_timeout: DEFAULT_DELETE_TIMEOUT,
            debug_mode: false,
        }
    }
}

/// Options for [`DeploymentOrchestrator::with_managed_cluster`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ManagedOptions {
    /// Delete an existing cluster with the same name first.
    pub replace_existing: bool,
    /// Keep the cluster on exit, for debugging.
    pub retain: bool,
}

type PendingCleanups = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// Deletes the cluster it owns when dropped, unless disarmed.
///
/// `Drop` cannot await, so the delete call is spawned and its handle parked
/// in the orchestrator's pending cleanups.
struct ClusterGuard<S: RemoteClusterService + ?Sized + 'static> {
    service: Arc<S>,
    cluster_id: u64,
    pending: PendingCleanups,
    armed: bool,
}

impl<S: RemoteClusterService + ?Sized + 'static> ClusterGuard<S> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<S: RemoteClusterService + ?Sized + 'static> Drop for ClusterGuard<S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let id = self.cluster_id;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(cluster_id = id, "No runtime left to delete abandoned cluster");
            return;
        };

        warn!(cluster_id = id, "Managed deployment abandoned, deleting cluster");
        let service = Arc::clone(&self.service);
        let handle = runtime.spawn(async move {
            match service.delete_cluster(id).await {
                Ok(()) => info!(cluster_id = id, "Abandoned cluster deleted"),
                Err(e) => warn!(cluster_id = id, error = %e, "Failed to delete abandoned cluster"),
            }
        });
        if let Ok(mut pending) = self.pending.lock() {
            pending.push(handle);
        }
    }
}

/// Drives one cluster deployment at a time against a deployment service.
pub struct DeploymentOrchestrator<S: ?Sized> {
    service: Arc<S>,
    config: OrchestratorConfig,
    timer: PollingTimer,
    cleanups: PendingCleanups,
}

impl<S> DeploymentOrchestrator<S>
where
    S: RemoteClusterService + ?Sized,
{
    /// Create an orchestrator.
    #[must_use]
    pub fn new(service: Arc<S>, config: OrchestratorConfig) -> Self {
        let timer = PollingTimer::new(config.poll_interval);
        Self {
            service,
            config,
            timer,
            cleanups: PendingCleanups::default(),
        }
    }

    /// The service this orchestrator talks to.
    #[must_use]
    pub fn service(&self) -> &S {
        &self.service
    }

    /// Look up the cluster by name, or create it. Returns whether it was
    /// newly created.
    async fn acquire(&self, descriptor: &ClusterDescriptor) -> Result<(RemoteCluster, bool)> {
        if let Some(id) = self.service.get_cluster_by_name(&descriptor.name).await? {
            info!(cluster = %descriptor.name, cluster_id = id, "Reusing existing cluster");
            let cluster = self.service.get_cluster(id).await?.ok_or_else(|| {
                CertifyError::ClusterCreateFailed {
                    name: descriptor.name.clone(),
                }
            })?;
            return Ok((cluster, false));
        }

        info!(cluster = %descriptor.name, "Creating new cluster");
        let cluster = self
            .service
            .create_cluster(descriptor.create_request())
            .await?;
        info!(cluster = %cluster.name, cluster_id = cluster.id, "Cluster created");
        Ok((cluster, true))
    }

    /// Write descriptor settings and the debug flag into the attribute tree.
    async fn apply_settings(&self, cluster: &RemoteCluster, descriptor: &ClusterDescriptor) -> Result<()> {
        let mut attrs = self.service.get_cluster_attributes(cluster.id).await?;

        let mut set = |section: &str, option: &str, value: Value| -> Result<()> {
            let slot = attrs
                .editable
                .get_mut(section)
                .and_then(|s| s.get_mut(option))
                .and_then(Value::as_object_mut)
                .ok_or_else(|| CertifyError::UnknownAttribute {
                    section: section.to_string(),
                    option: option.to_string(),
                })?;
            slot.insert("value".to_string(), value);
            Ok(())
        };

        for (section, option, value) in descriptor.attribute_overrides() {
            debug!(cluster_id = cluster.id, section, option, "Setting attribute");
            set(section, option, value.clone())?;
        }
        set("common", "debug", Value::Bool(self.config.debug_mode))?;

        self.service
            .update_cluster_attributes(cluster.id, &attrs)
            .await
    }

    /// Create the cluster described by `descriptor`, or reuse the one with
    /// the same name.
    ///
    /// Settings are only applied to newly created clusters.
    ///
    /// # Errors
    /// Returns [`CertifyError::ClusterCreateFailed`] if no cluster id comes
    /// back, or the error of any remote call.
    pub async fn create_empty(&self, descriptor: &ClusterDescriptor) -> Result<RemoteCluster> {
        let (mut cluster, created) = self.acquire(descriptor).await?;
        if created {
            let applied = self.apply_settings(&cluster, descriptor).await;
            cluster.track(applied)?;
        }
        Ok(cluster)
    }

    /// Wait until enough unassigned nodes are discovered, then match the
    /// requirements against them once.
    ///
    /// # Errors
    /// Returns [`CertifyError::Timeout`] if too few nodes show up in time,
    /// or [`CertifyError::NodeNotFound`] as soon as a snapshot with enough
    /// nodes fails to match.
    pub async fn discover_and_match(
        &self,
        requirements: &[NodeRequirement],
        timeout: Duration,
    ) -> Result<Vec<MatchedNode>> {
        let required = requirements.len();
        info!(required, timeout_secs = timeout.as_secs(), "Waiting for nodes to be discovered");

        let service = &*self.service;
        self.timer
            .wait_for("nodes discovery", timeout, move || async move {
                let free: Vec<_> = service
                    .list_nodes()
                    .await?
                    .into_iter()
                    .filter(DiscoveredNode::is_unassigned)
                    .collect();

                if free.len() < required {
                    debug!(free = free.len(), required, "Not enough free nodes yet");
                    return Ok(None);
                }

                NodeMatcher::new(free).match_all(requirements).map(Some)
            })
            .await
    }

    /// Add matched nodes to the cluster and apply their interface layouts.
    ///
    /// # Errors
    /// Returns the first remote or reconciliation error.
    pub async fn assign(&self, cluster: &mut RemoteCluster, matched: &[MatchedNode]) -> Result<()> {
        let result = self.assign_nodes(cluster, matched).await;
        cluster.track(result)?;
        cluster.advance(DeploymentStage::NodesAssigned);
        Ok(())
    }

    async fn assign_nodes(&self, cluster: &mut RemoteCluster, matched: &[MatchedNode]) -> Result<()> {
        for m in matched {
            info!(
                cluster_id = cluster.id,
                node_id = m.node.id,
                mac = %m.node.mac,
                roles = ?m.requirement.roles,
                "Adding node to cluster"
            );
            self.service
                .add_node(cluster.id, m.node.id, &m.requirement.roles)
                .await?;
            cluster.nodes.push(m.node.id);

            if let Some(interfaces) = m.requirement.interfaces.as_ref().filter(|i| !i.is_empty()) {
                network::apply_node_interfaces(&*self.service, m.node.id, interfaces).await?;
            }
        }
        Ok(())
    }

    /// Trigger deployment and wait for the cluster and its tasks to finish.
    ///
    /// Both waits use `timeout`. A cluster or task reporting `error` fails
    /// at once.
    ///
    /// # Errors
    /// Returns [`CertifyError::Timeout`] or
    /// [`CertifyError::RemoteTaskError`].
    pub async fn deploy(&self, cluster: &mut RemoteCluster, timeout: Duration) -> Result<()> {
        let result = self.run_deploy(cluster, timeout).await;
        cluster.track(result)
    }

    async fn run_deploy(&self, cluster: &mut RemoteCluster, timeout: Duration) -> Result<()> {
        let id = cluster.id;
        let service = &*self.service;

        cluster.advance(DeploymentStage::Deploying);
        service.start_deploy(id).await?;

        cluster.advance(DeploymentStage::WaitOperational);
        self.timer
            .wait_until("deploy cluster", timeout, move || async move {
                match service.get_cluster_status(id).await? {
                    ClusterStatus::Operational => Ok(true),
                    ClusterStatus::Error => Err(CertifyError::RemoteTaskError {
                        subject: format!("cluster {id}"),
                        message: "deployment ended in error status".to_string(),
                    }),
                    status => {
                        debug!(cluster_id = id, status = %status, "Cluster not operational yet");
                        Ok(false)
                    }
                }
            })
            .await?;
        cluster.status = ClusterStatus::Operational;

        cluster.advance(DeploymentStage::WaitTasksFinished);
        cluster.tasks = self
            .timer
            .wait_for("wait deployment finished", timeout, move || async move {
                let tasks = service.get_tasks(id).await?;
                if let Some(failed) = tasks.iter().find(|t| t.status == TaskStatus::Error) {
                    return Err(CertifyError::RemoteTaskError {
                        subject: format!("task {} ({})", failed.id, failed.name),
                        message: failed.message.clone().unwrap_or_default(),
                    });
                }
                let pending = tasks.iter().filter(|t| t.status != TaskStatus::Ready).count();
                debug!(cluster_id = id, pending, "Waiting for tasks");
                Ok((pending == 0).then_some(tasks))
            })
            .await?;

        cluster.advance(DeploymentStage::Operational);
        info!(cluster_id = id, cluster = %cluster.name, "Cluster is operational");
        Ok(())
    }

    /// Delete a cluster and wait until the service no longer knows it.
    ///
    /// # Errors
    /// Returns the delete call's error or [`CertifyError::Timeout`].
    pub async fn delete(&self, cluster: &mut RemoteCluster) -> Result<()> {
        self.remove_cluster(cluster.id).await?;
        cluster.advance(DeploymentStage::Deleted);
        Ok(())
    }

    async fn remove_cluster(&self, id: u64) -> Result<()> {
        let service = &*self.service;
        service.delete_cluster(id).await?;
        self.timer
            .wait_until("wait cluster deleted", self.config.delete_timeout, move || async move {
                Ok(service.get_cluster(id).await?.is_none())
            })
            .await?;
        info!(cluster_id = id, "Cluster deleted");
        Ok(())
    }

    /// Delete the cluster named `name` if there is one. Returns whether a
    /// cluster was deleted.
    ///
    /// # Errors
    /// Returns the error of any remote call or of the deletion wait.
    pub async fn delete_if_exists(&self, name: &str) -> Result<bool> {
        match self.service.get_cluster_by_name(name).await? {
            Some(id) => {
                info!(cluster = %name, cluster_id = id, "Deleting existing cluster");
                self.remove_cluster(id).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Match, assign, configure networks and deploy an acquired cluster.
    async fn provision(&self, cluster: &mut RemoteCluster, descriptor: &ClusterDescriptor) -> Result<()> {
        cluster.advance(DeploymentStage::NodesMatching);
        let matched = self
            .discover_and_match(&descriptor.nodes, descriptor.discovery_timeout())
            .await;
        let matched = cluster.track(matched)?;

        self.assign(cluster, &matched).await?;

        if let Some(desired) = &descriptor.network_config {
            let applied = network::apply_network_config(&*self.service, cluster, desired).await;
            cluster.track(applied)?;
        }

        self.deploy(cluster, descriptor.deploy_timeout()).await
    }

    /// Create and fully deploy the cluster described by `descriptor`.
    ///
    /// The cluster is left in place on failure; use
    /// [`DeploymentOrchestrator::with_managed_cluster`] for guaranteed
    /// cleanup.
    ///
    /// # Errors
    /// Returns the first error of any stage.
    pub async fn deploy_cluster(&self, descriptor: &ClusterDescriptor) -> Result<RemoteCluster> {
        let mut cluster = self.create_empty(descriptor).await?;
        self.provision(&mut cluster, descriptor).await?;
        Ok(cluster)
    }

    /// Deploy a cluster, run `body` with it, and delete it afterwards.
    ///
    /// Deletion runs whether deployment fails, `body` fails, or anything
    /// after cluster creation panics, unless `options.retain` is set. If the
    /// returned future is dropped before it completes, the delete is spawned
    /// instead; [`DeploymentOrchestrator::finish_cleanups`] waits for it. An
    /// error from `body` or the deployment takes precedence over a deletion
    /// error.
    ///
    /// # Errors
    /// Returns the deployment error, the error of `body`, or the deletion
    /// error, in that order of precedence.
    pub async fn with_managed_cluster<T, E, F, Fut>(
        &self,
        descriptor: &ClusterDescriptor,
        options: ManagedOptions,
        body: F,
    ) -> Result<T, E>
    where
        S: 'static,
        F: FnOnce(RemoteCluster) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CertifyError>,
    {
        if options.replace_existing {
            self.delete_if_exists(&descriptor.name).await?;
        }

        let (mut cluster, created) = self.acquire(descriptor).await?;
        let mut guard = ClusterGuard {
            service: Arc::clone(&self.service),
            cluster_id: cluster.id,
            pending: Arc::clone(&self.cleanups),
            armed: !options.retain,
        };

        let outcome = AssertUnwindSafe(self.run_managed(&mut cluster, created, descriptor, body))
            .catch_unwind()
            .await;

        if options.retain {
            info!(cluster_id = cluster.id, cluster = %cluster.name, "Retaining cluster");
        } else {
            if cluster.stage != DeploymentStage::Operational && !cluster.stage.is_terminal() {
                cluster.advance(DeploymentStage::Failed);
            }
            let cleanup = self.delete(&mut cluster).await;
            guard.disarm();

            if let Err(cleanup_err) = cleanup {
                if matches!(outcome, Ok(Ok(_))) {
                    return Err(E::from(cleanup_err));
                }
                warn!(
                    cluster_id = cluster.id,
                    error = %cleanup_err,
                    "Failed to delete cluster after error"
                );
            }
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn run_managed<T, E, F, Fut>(
        &self,
        cluster: &mut RemoteCluster,
        created: bool,
        descriptor: &ClusterDescriptor,
        body: F,
    ) -> Result<T, E>
    where
        F: FnOnce(RemoteCluster) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CertifyError>,
    {
        if created {
            let applied = self.apply_settings(cluster, descriptor).await;
            cluster.track(applied)?;
        }
        self.provision(cluster, descriptor).await?;
        body(cluster.clone()).await
    }

    /// Wait for deletions spawned for managed deployments that were dropped
    /// before they finished.
    pub async fn finish_cleanups(&self) {
        let pending = self
            .cleanups
            .lock()
            .map(|mut pending| std::mem::take(&mut *pending))
            .unwrap_or_default();
        for handle in pending {
            if let Err(e) = handle.await {
                warn!(error = %e, "Cluster cleanup task failed");
            }
        }
    }
}
