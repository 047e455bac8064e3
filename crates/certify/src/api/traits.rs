//! Service traits and common types for the deployment-management API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::orchestrator::DeploymentStage;

/// Bytes per gigabyte used for size requirements.
pub const GB: u64 = 1024 * 1024 * 1024;

/// Cluster status as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    /// Created, not yet deployed.
    New,
    /// Deployment in progress.
    Deploying,
    /// Deployment finished successfully.
    Operational,
    /// Deployment failed.
    Error,
    /// Being removed.
    Remove,
    /// Unknown status.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Deploying => write!(f, "deploying"),
            Self::Operational => write!(f, "operational"),
            Self::Error => write!(f, "error"),
            Self::Remove => write!(f, "remove"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Task status as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued.
    Pending,
    /// In progress.
    Running,
    /// Finished successfully.
    Ready,
    /// Finished with an error.
    Error,
    /// Unknown status.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Ready => write!(f, "ready"),
            Self::Error => write!(f, "error"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Network provider of a cluster. Also selects the network
/// configuration endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetProvider {
    /// Legacy nova-network.
    #[default]
    NovaNetwork,
    /// Neutron.
    Neutron,
}

impl NetProvider {
    /// Path segment of the network configuration endpoint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NovaNetwork => "nova_network",
            Self::Neutron => "neutron",
        }
    }
}

impl std::fmt::Display for NetProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One disk of a discovered node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    /// Disk size in bytes.
    pub size_bytes: u64,
}

/// A hardware node known to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredNode {
    /// Node id.
    pub id: u64,
    /// Uppercase MAC address.
    pub mac: String,
    /// Display name.
    pub name: Option<String>,
    /// Total CPU count.
    pub cpu_total: u64,
    /// Total memory in bytes.
    pub memory_total_bytes: u64,
    /// Disks attached to the node.
    pub disks: Vec<Disk>,
    /// Cluster this node belongs to, `None` when unassigned.
    pub cluster: Option<u64>,
    /// Deployed roles.
    pub roles: Vec<String>,
    /// Roles scheduled for the next deployment.
    pub pending_roles: Vec<String>,
}

impl DiscoveredNode {
    /// Total disk size in whole gigabytes.
    #[must_use]
    pub fn hd_size_gb(&self) -> u64 {
        self.disks.iter().map(|d| d.size_bytes).sum::<u64>() / GB
    }

    /// Memory size in whole gigabytes.
    #[must_use]
    pub fn mem_size_gb(&self) -> u64 {
        self.memory_total_bytes / GB
    }

    /// Whether the node is free for assignment.
    #[must_use]
    pub fn is_unassigned(&self) -> bool {
        self.cluster.is_none()
    }
}

/// A cluster on the service plus the local deployment stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCluster {
    /// Cluster id.
    pub id: u64,
    /// Cluster name.
    pub name: String,
    /// Remote status.
    pub status: ClusterStatus,
    /// Deployment mode (e.g. `ha_compact`).
    pub mode: Option<String>,
    /// Release id.
    pub release_id: Option<u64>,
    /// Network provider.
    pub net_provider: NetProvider,
    /// Ids of nodes added through this handle.
    pub nodes: Vec<u64>,
    /// Deployment tasks as last seen when deployment finished.
    pub tasks: Vec<Task>,
    /// Local orchestration stage.
    pub stage: DeploymentStage,
}

/// A unit of remote deployment work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Task id.
    pub id: u64,
    /// Task name (e.g. `deploy`, `provision`).
    pub name: String,
    /// Current status.
    pub status: TaskStatus,
    /// Message attached by the service, mostly on error.
    pub message: Option<String>,
}

/// Request to create a cluster.
#[derive(Debug, Clone, Serialize)]
pub struct CreateClusterRequest {
    /// Cluster name.
    pub name: String,
    /// Release id.
    pub release: u64,
    /// Deployment mode.
    pub mode: String,
    /// Network provider.
    pub net_provider: NetProvider,
    /// Segmentation type for neutron (`gre`, `vlan`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_segment_type: Option<String>,
}

/// A network as carried by a node interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedNetwork {
    /// Network id.
    pub id: u64,
    /// Network name (e.g. `public`, `management`).
    pub name: String,
}

/// A node network interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInterface {
    /// Interface name (e.g. `eth0`).
    pub name: String,
    /// Networks currently assigned to this interface.
    pub assigned_networks: Vec<AssignedNetwork>,
    /// Remaining interface fields, pushed back untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One network of the cluster network configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEntry {
    /// Network name.
    pub name: String,
    /// All other network fields (cidr, vlan, ranges...).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Full cluster network configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfiguration {
    /// Cluster networks.
    pub networks: Vec<NetworkEntry>,
    /// Provider-level networking parameters.
    #[serde(default)]
    pub networking_parameters: Map<String, Value>,
    /// Remaining document fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Cluster attribute tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAttributes {
    /// Editable attributes: section -> option -> `{ value, ... }`.
    pub editable: Map<String, Value>,
    /// Remaining attribute fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// OSTF test set available for a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSet {
    /// Test set id (e.g. `smoke`, `sanity`).
    pub id: String,
    /// Human readable name.
    #[serde(default)]
    pub name: String,
}

/// Status of an individual OSTF test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// Passed.
    Success,
    /// Assertion failed.
    Failure,
    /// Test crashed.
    Error,
    /// Skipped.
    Skipped,
    /// Not yet run.
    Wait,
    /// Running.
    Running,
    /// Unknown status.
    #[serde(other)]
    Unknown,
}

/// Result of an individual OSTF test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    /// Test name.
    pub name: String,
    /// Test status.
    pub status: TestStatus,
    /// Failure message, empty on success.
    #[serde(default)]
    pub message: String,
}

impl TestResult {
    /// Whether this test counts as failed in the report.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.status, TestStatus::Failure | TestStatus::Error)
    }
}

/// An OSTF test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRun {
    /// Test run id.
    pub id: u64,
    /// Test set this run executes.
    pub testset: String,
    /// Run status (`running`, `finished`).
    pub status: String,
    /// Individual results.
    #[serde(default)]
    pub tests: Vec<TestResult>,
}

impl TestRun {
    /// Whether the run has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status == "finished"
    }
}

/// Operations the orchestrator needs from the deployment service.
#[async_trait]
pub trait RemoteClusterService: Send + Sync {
    /// List all nodes known to the service.
    async fn list_nodes(&self) -> Result<Vec<DiscoveredNode>>;

    /// Find a cluster id by name.
    async fn get_cluster_by_name(&self, name: &str) -> Result<Option<u64>>;

    /// Fetch a cluster, `None` if it does not exist.
    async fn get_cluster(&self, cluster_id: u64) -> Result<Option<RemoteCluster>>;

    /// Create a cluster.
    async fn create_cluster(&self, req: CreateClusterRequest) -> Result<RemoteCluster>;

    /// Read the cluster attribute tree.
    async fn get_cluster_attributes(&self, cluster_id: u64) -> Result<ClusterAttributes>;

    /// Replace the cluster attribute tree.
    async fn update_cluster_attributes(
        &self,
        cluster_id: u64,
        attrs: &ClusterAttributes,
    ) -> Result<()>;

    /// Add a node to a cluster with pending roles.
    async fn add_node(&self, cluster_id: u64, node_id: u64, roles: &[String]) -> Result<()>;

    /// Read a node's interfaces.
    async fn get_node_interfaces(&self, node_id: u64) -> Result<Vec<NodeInterface>>;

    /// Replace a node's interfaces.
    async fn update_node_interfaces(&self, node_id: u64, interfaces: &[NodeInterface])
        -> Result<()>;

    /// Read the cluster network configuration.
    async fn get_cluster_network_config(
        &self,
        cluster_id: u64,
        net_provider: NetProvider,
    ) -> Result<NetworkConfiguration>;

    /// Replace the cluster network configuration.
    async fn update_cluster_network_config(
        &self,
        cluster_id: u64,
        net_provider: NetProvider,
        config: &NetworkConfiguration,
    ) -> Result<()>;

    /// Trigger deployment of pending changes.
    async fn start_deploy(&self, cluster_id: u64) -> Result<()>;

    /// Current remote status of a cluster.
    async fn get_cluster_status(&self, cluster_id: u64) -> Result<ClusterStatus>;

    /// Tasks associated with a cluster.
    async fn get_tasks(&self, cluster_id: u64) -> Result<Vec<Task>>;

    /// Delete a cluster.
    async fn delete_cluster(&self, cluster_id: u64) -> Result<()>;
}

/// Operations needed to run OSTF health checks.
#[async_trait]
pub trait OstfService: Send + Sync {
    /// Test sets available for a cluster.
    async fn get_testsets(&self, cluster_id: u64) -> Result<Vec<TestSet>>;

    /// Start a test run of one test set.
    async fn start_testrun(&self, cluster_id: u64, testset: &str) -> Result<TestRun>;

    /// Fetch a test run.
    async fn get_testrun(&self, run_id: u64) -> Result<TestRun>;
}

/// Interface layout requested for one node: interface -> network names.
pub type InterfaceMapping = BTreeMap<String, Vec<String>>;
