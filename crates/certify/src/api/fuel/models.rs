//! Fuel REST API request and response models.

use serde::{Deserialize, Serialize};

use crate::api::traits::{
    ClusterStatus, CreateClusterRequest, DiscoveredNode, Disk, NetProvider, RemoteCluster, Task,
    TaskStatus,
};
use crate::orchestrator::DeploymentStage;

// ============================================================================
// Nodes
// ============================================================================

/// Node resource from `api/nodes`.
#[derive(Debug, Deserialize)]
pub struct NodeResource {
    /// Node id.
    pub id: u64,
    /// Primary MAC address.
    pub mac: String,
    /// Owning cluster.
    pub cluster: Option<u64>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Deployed roles.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Pending roles.
    #[serde(default)]
    pub pending_roles: Vec<String>,
    /// Hardware inventory gathered by the bootstrap agent.
    pub meta: NodeMeta,
}

/// Hardware inventory of a node.
#[derive(Debug, Deserialize)]
pub struct NodeMeta {
    /// CPU information.
    pub cpu: CpuMeta,
    /// Memory information.
    pub memory: MemoryMeta,
    /// Disks.
    #[serde(default)]
    pub disks: Vec<DiskMeta>,
}

/// CPU information.
#[derive(Debug, Deserialize)]
pub struct CpuMeta {
    /// Total logical CPUs.
    pub total: u64,
}

/// Memory information.
#[derive(Debug, Deserialize)]
pub struct MemoryMeta {
    /// Total memory in bytes.
    pub total: u64,
}

/// Disk information.
#[derive(Debug, Deserialize)]
pub struct DiskMeta {
    /// Disk size in bytes.
    pub size: u64,
}

impl From<NodeResource> for DiscoveredNode {
    fn from(node: NodeResource) -> Self {
        Self {
            id: node.id,
            mac: node.mac.to_uppercase(),
            name: node.name,
            cpu_total: node.meta.cpu.total,
            memory_total_bytes: node.meta.memory.total,
            disks: node
                .meta
                .disks
                .into_iter()
                .map(|d| Disk { size_bytes: d.size })
                .collect(),
            cluster: node.cluster,
            roles: node.roles,
            pending_roles: node.pending_roles,
        }
    }
}

/// Body entry for `PUT api/nodes`.
#[derive(Debug, Serialize)]
pub struct AddNodeBody<'a> {
    /// Node id.
    pub id: u64,
    /// Target cluster.
    pub cluster_id: u64,
    /// Roles to deploy.
    pub pending_roles: &'a [String],
    /// Marks the node for addition on next deploy.
    pub pending_addition: bool,
}

// ============================================================================
// Clusters
// ============================================================================

/// Cluster resource from `api/clusters`.
#[derive(Debug, Deserialize)]
pub struct ClusterResource {
    /// Cluster id; a create call without one has failed.
    pub id: Option<u64>,
    /// Cluster name.
    pub name: String,
    /// Remote status.
    #[serde(default)]
    pub status: Option<ClusterStatus>,
    /// Deployment mode.
    #[serde(default)]
    pub mode: Option<String>,
    /// Release id.
    #[serde(default)]
    pub release_id: Option<u64>,
    /// Network provider.
    #[serde(default)]
    pub net_provider: Option<NetProvider>,
}

impl ClusterResource {
    /// Convert into a cluster handle, `None` when the id is missing.
    #[must_use]
    pub fn into_cluster(self) -> Option<RemoteCluster> {
        let id = self.id?;
        Some(RemoteCluster {
            id,
            name: self.name,
            status: self.status.unwrap_or(ClusterStatus::New),
            mode: self.mode,
            release_id: self.release_id,
            net_provider: self.net_provider.unwrap_or_default(),
            nodes: Vec::new(),
            tasks: Vec::new(),
            stage: DeploymentStage::Created,
        })
    }
}

/// Body for `POST api/clusters`.
#[derive(Debug, Serialize)]
pub struct CreateClusterBody<'a> {
    /// Cluster parameters.
    #[serde(flatten)]
    pub request: &'a CreateClusterRequest,
    /// Initial nodes (always empty).
    pub nodes: Vec<u64>,
    /// Initial tasks (always empty).
    pub tasks: Vec<u64>,
}

// ============================================================================
// Tasks
// ============================================================================

/// Task resource from `api/tasks`.
#[derive(Debug, Deserialize)]
pub struct TaskResource {
    /// Task id.
    pub id: u64,
    /// Task name.
    pub name: String,
    /// Task status.
    pub status: TaskStatus,
    /// Error or progress message.
    #[serde(default)]
    pub message: Option<String>,
}

impl From<TaskResource> for Task {
    fn from(task: TaskResource) -> Self {
        Self {
            id: task.id,
            name: task.name,
            status: task.status,
            message: task.message,
        }
    }
}

// ============================================================================
// OSTF
// ============================================================================

/// Body entry for `POST ostf/testruns`.
#[derive(Debug, Serialize)]
pub struct TestRunBody<'a> {
    /// Test set to run.
    pub testset: &'a str,
    /// Individual tests, empty for the whole set.
    pub tests: Vec<String>,
    /// Run metadata.
    pub metadata: TestRunMetadata,
}

/// Test run metadata.
#[derive(Debug, Serialize)]
pub struct TestRunMetadata {
    /// Cluster under test.
    pub cluster_id: u64,
}

// ============================================================================
// Keystone
// ============================================================================

/// Keystone v2 token request.
#[derive(Debug, Serialize)]
pub struct TokenRequest<'a> {
    /// Auth block.
    pub auth: TokenAuth<'a>,
}

/// Keystone v2 auth block.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAuth<'a> {
    /// Tenant to scope the token to.
    pub tenant_name: &'a str,
    /// Username and password.
    pub password_credentials: PasswordCredentials<'a>,
}

/// Keystone v2 password credentials.
#[derive(Debug, Serialize)]
pub struct PasswordCredentials<'a> {
    /// Username.
    pub username: &'a str,
    /// Password.
    pub password: &'a str,
}

/// Keystone v2 token response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    /// Access block.
    pub access: TokenAccess,
}

/// Keystone v2 access block.
#[derive(Debug, Deserialize)]
pub struct TokenAccess {
    /// Issued token.
    pub token: IssuedToken,
}

/// Keystone v2 token.
#[derive(Debug, Deserialize)]
pub struct IssuedToken {
    /// Token value sent as `X-Auth-Token`.
    pub id: String,
}
