//! Reconciliation of desired network layout with the service's state.
//!
//! The service only accepts whole documents, so both levels work the same
//! way: fetch the current document, rewrite the requested parts in memory,
//! push the full document back.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::api::{
    AssignedNetwork, InterfaceMapping, NetworkConfiguration, NodeInterface, RemoteCluster,
    RemoteClusterService,
};
use crate::descriptor::NetworkOverride;
use crate::error::{CertifyError, Result};

/// Rewrite the assigned networks of the interfaces named in `desired`.
///
/// Network ids are looked up by name among the networks currently assigned
/// to any interface of the node; no new ids are invented. Interfaces absent
/// from `desired` are left as they are.
///
/// # Errors
/// Returns [`CertifyError::UnknownNetwork`] or
/// [`CertifyError::UnknownInterface`] if `desired` names something the node
/// does not have.
pub fn reconcile_interfaces(
    node_id: u64,
    mut interfaces: Vec<NodeInterface>,
    desired: &InterfaceMapping,
) -> Result<Vec<NodeInterface>> {
    let known: HashMap<String, u64> = interfaces
        .iter()
        .flat_map(|iface| &iface.assigned_networks)
        .map(|net| (net.name.clone(), net.id))
        .collect();

    for (iface_name, networks) in desired {
        let iface = interfaces
            .iter_mut()
            .find(|i| i.name == *iface_name)
            .ok_or_else(|| CertifyError::UnknownInterface {
                node_id,
                interface: iface_name.clone(),
            })?;

        iface.assigned_networks = networks
            .iter()
            .map(|name| {
                known
                    .get(name)
                    .map(|&id| AssignedNetwork {
                        id,
                        name: name.clone(),
                    })
                    .ok_or_else(|| CertifyError::UnknownNetwork {
                        scope: format!("node {node_id}"),
                        network: name.clone(),
                    })
            })
            .collect::<Result<_>>()?;
    }

    Ok(interfaces)
}

/// Overlay `desired` onto the current network configuration.
///
/// Each overridden network gets its listed fields replaced; networking
/// parameters are merged key by key. Everything else is kept.
///
/// # Errors
/// Returns [`CertifyError::UnknownNetwork`] if an override names a network
/// the cluster does not have.
pub fn merge_network_config(
    cluster_id: u64,
    mut current: NetworkConfiguration,
    desired: &NetworkOverride,
) -> Result<NetworkConfiguration> {
    for (name, fields) in &desired.networks {
        let entry = current
            .networks
            .iter_mut()
            .find(|n| n.name == *name)
            .ok_or_else(|| CertifyError::UnknownNetwork {
                scope: format!("cluster {cluster_id}"),
                network: name.clone(),
            })?;

        for (key, value) in fields {
            if key != "name" {
                entry.fields.insert(key.clone(), value.clone());
            }
        }
    }

    for (key, value) in &desired.networking_parameters {
        current
            .networking_parameters
            .insert(key.clone(), value.clone());
    }

    Ok(current)
}

/// Apply an interface layout to a node.
///
/// # Errors
/// Fails before the update call if the layout cannot be reconciled, or
/// with a transport error from either call.
pub async fn apply_node_interfaces<S>(
    service: &S,
    node_id: u64,
    desired: &InterfaceMapping,
) -> Result<()>
where
    S: RemoteClusterService + ?Sized,
{
    let current = service.get_node_interfaces(node_id).await?;
    let updated = reconcile_interfaces(node_id, current, desired)?;

    debug!(node_id, interfaces = desired.len(), "Updating node interfaces");
    service.update_node_interfaces(node_id, &updated).await
}

/// Apply network overrides to a cluster.
///
/// # Errors
/// Fails before the update call if an override cannot be merged, or with a
/// transport error from either call.
pub async fn apply_network_config<S>(
    service: &S,
    cluster: &RemoteCluster,
    desired: &NetworkOverride,
) -> Result<()>
where
    S: RemoteClusterService + ?Sized,
{
    let current = service
        .get_cluster_network_config(cluster.id, cluster.net_provider)
        .await?;
    let merged = merge_network_config(cluster.id, current, desired)?;

    info!(
        cluster_id = cluster.id,
        networks = desired.networks.len(),
        parameters = desired.networking_parameters.len(),
        "Updating cluster network configuration"
    );
    service
        .update_cluster_network_config(cluster.id, cluster.net_provider, &merged)
        .await
}
