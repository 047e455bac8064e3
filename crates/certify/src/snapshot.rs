//! Capture a live cluster as a reusable descriptor.
//!
//! The captured descriptor pins every node by MAC, so deploying it again
//! reproduces the same node layout on the same hardware.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::info;

use crate::api::{
    ClusterAttributes, DiscoveredNode, InterfaceMapping, NetProvider, NetworkConfiguration,
    NodeInterface, RemoteCluster, RemoteClusterService,
};
use crate::descriptor::{
    supported_settings, ClusterDescriptor, ClusterSettings, NetworkOverride, NodeRequirement,
    DEFAULT_TIMEOUT_SECS,
};

/// Network fields that identify a network on one cluster only.
const CLUSTER_LOCAL_FIELDS: &[&str] = &["id", "group_id", "meta"];

/// Current state of a cluster, as read from the service.
#[derive(Debug, Clone)]
pub struct ClusterState {
    pub cluster: RemoteCluster,
    pub attributes: ClusterAttributes,
    pub network: NetworkConfiguration,
    /// Nodes of the cluster with their interfaces.
    pub nodes: Vec<(DiscoveredNode, Vec<NodeInterface>)>,
}

/// Read the full state of a cluster.
///
/// # Errors
/// Returns an error if the cluster does not exist or a call fails.
pub async fn read_state<S>(service: &S, cluster_id: u64) -> Result<ClusterState>
where
    S: RemoteClusterService + ?Sized,
{
    let cluster = service
        .get_cluster(cluster_id)
        .await?
        .with_context(|| format!("Cluster {cluster_id} not found"))?;
    let attributes = service.get_cluster_attributes(cluster_id).await?;
    let network = service
        .get_cluster_network_config(cluster_id, cluster.net_provider)
        .await?;

    let mut nodes = Vec::new();
    for node in service.list_nodes().await? {
        if node.cluster == Some(cluster_id) {
            let interfaces = service.get_node_interfaces(node.id).await?;
            nodes.push((node, interfaces));
        }
    }

    Ok(ClusterState {
        cluster,
        attributes,
        network,
        nodes,
    })
}

fn setting_value(attributes: &ClusterAttributes, section: &str, option: &str) -> Option<Value> {
    attributes
        .editable
        .get(section)?
        .get(option)?
        .get("value")
        .cloned()
}

fn node_requirement(node: &DiscoveredNode, interfaces: &[NodeInterface]) -> NodeRequirement {
    let mut roles = node.roles.clone();
    for role in &node.pending_roles {
        if !roles.contains(role) {
            roles.push(role.clone());
        }
    }

    let layout: InterfaceMapping = interfaces
        .iter()
        .map(|iface| {
            let names = iface.assigned_networks.iter().map(|n| n.name.clone()).collect();
            (iface.name.clone(), names)
        })
        .collect();

    NodeRequirement {
        name: node.name.clone(),
        mac: Some(node.mac.to_uppercase()),
        requirements: None,
        roles,
        interfaces: (!layout.is_empty()).then_some(layout),
    }
}

fn network_override(network: &NetworkConfiguration) -> NetworkOverride {
    let networks = network
        .networks
        .iter()
        .map(|entry| {
            let fields: Map<String, Value> = entry
                .fields
                .iter()
                .filter(|(key, _)| !CLUSTER_LOCAL_FIELDS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            (entry.name.clone(), fields)
        })
        .collect();

    NetworkOverride {
        networks,
        networking_parameters: network.networking_parameters.clone(),
    }
}

/// Turn a cluster's state into a descriptor that recreates it.
///
/// # Errors
/// Returns an error if the cluster has no release or no nodes.
pub fn descriptor_from_state(state: &ClusterState) -> Result<ClusterDescriptor> {
    let cluster = &state.cluster;
    let release = cluster
        .release_id
        .with_context(|| format!("Cluster {} has no release", cluster.id))?;

    let attributes: BTreeMap<String, Value> = supported_settings()
        .filter_map(|(option, section)| {
            setting_value(&state.attributes, section, option).map(|v| (option.to_string(), v))
        })
        .collect();

    let net_segment_type = match cluster.net_provider {
        NetProvider::Neutron => state
            .network
            .networking_parameters
            .get("segmentation_type")
            .and_then(Value::as_str)
            .map(str::to_string),
        NetProvider::NovaNetwork => None,
    };

    let descriptor = ClusterDescriptor {
        name: cluster.name.clone(),
        release,
        deployment_mode: cluster.mode.clone().unwrap_or_else(|| "multinode".to_string()),
        settings: ClusterSettings {
            net_provider: cluster.net_provider,
            net_segment_type,
            attributes,
        },
        nodes: state
            .nodes
            .iter()
            .map(|(node, interfaces)| node_requirement(node, interfaces))
            .collect(),
        network_config: Some(network_override(&state.network)),
        nodes_discovery_timeout: DEFAULT_TIMEOUT_SECS,
        deploy_timeout: DEFAULT_TIMEOUT_SECS,
    };
    descriptor.validate()?;
    Ok(descriptor)
}

/// Capture a live cluster as a descriptor.
///
/// # Errors
/// Returns an error if the state cannot be read or converted.
pub async fn capture_descriptor<S>(service: &S, cluster_id: u64) -> Result<ClusterDescriptor>
where
    S: RemoteClusterService + ?Sized,
{
    let state = read_state(service, cluster_id).await?;
    let descriptor = descriptor_from_state(&state)?;
    info!(
        cluster_id,
        cluster = %descriptor.name,
        nodes = descriptor.nodes.len(),
        "Captured cluster configuration"
    );
    Ok(descriptor)
}

/// Write a descriptor as YAML.
///
/// # Errors
/// Returns an error if serialization or the write fails.
pub fn save_descriptor(path: &Path, descriptor: &ClusterDescriptor) -> Result<()> {
    let content = serde_yaml::to_string(descriptor).context("Failed to serialize descriptor")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write descriptor to {}", path.display()))?;
    info!(path = %path.display(), cluster = %descriptor.name, "Saved cluster configuration");
    Ok(())
}

/// Read a descriptor written by [`save_descriptor`].
///
/// # Errors
/// Returns an error if the file cannot be read or is invalid.
pub fn load_descriptor(path: &Path) -> Result<ClusterDescriptor> {
    ClusterDescriptor::load(path)
}
