//! Deployment-management service abstractions.

pub mod fuel;
mod traits;

pub use traits::{
    AssignedNetwork, ClusterAttributes, ClusterStatus, CreateClusterRequest, DiscoveredNode, Disk,
    InterfaceMapping, NetProvider, NetworkConfiguration, NetworkEntry, NodeInterface,
    OstfService, RemoteCluster, RemoteClusterService, Task, TaskStatus, TestResult, TestRun,
    TestSet, TestStatus, GB,
};
