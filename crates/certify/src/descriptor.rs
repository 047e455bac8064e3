//! Cluster descriptors: the desired state of a cluster deployment.
//!
//! Descriptors are YAML documents, one cluster per file:
//!
//! ```yaml
//! name: cert-ha
//! release: 2
//! deployment_mode: ha_compact
//! settings:
//!   net_provider: neutron
//!   net_segment_type: gre
//!   volumes_ceph: true
//! nodes:
//!   - mac: "aa:bb:cc:dd:ee:ff"
//!     roles: [controller]
//!     interfaces:
//!       eth0: [public, management]
//!   - requirements: { cpu_count_min: 2 }
//!     roles: [compute]
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::api::{CreateClusterRequest, DiscoveredNode, InterfaceMapping, NetProvider};
use crate::error::CertifyError;

/// Default node discovery and deploy timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Attribute section holding each supported cluster setting.
const ATTRIBUTE_SECTIONS: &[(&str, &str)] = &[
    ("sahara", "additional_components"),
    ("murano", "additional_components"),
    ("ceilometer", "additional_components"),
    ("volumes_ceph", "storage"),
    ("images_ceph", "storage"),
    ("ephemeral_ceph", "storage"),
    ("objects_ceph", "storage"),
    ("osd_pool_size", "storage"),
    ("volumes_lvm", "storage"),
    ("volumes_vmdk", "storage"),
    ("tenant", "access"),
    ("password", "access"),
    ("user", "access"),
    ("vc_password", "vcenter"),
    ("cluster", "vcenter"),
    ("host_ip", "vcenter"),
    ("vc_user", "vcenter"),
    ("use_vcenter", "vcenter"),
];

/// Attribute section a setting is written to, if it is a known setting.
#[must_use]
pub fn attribute_section(option: &str) -> Option<&'static str> {
    ATTRIBUTE_SECTIONS
        .iter()
        .find(|(name, _)| *name == option)
        .map(|(_, section)| *section)
}

/// Every supported setting as `(option, section)`.
pub fn supported_settings() -> impl Iterator<Item = (&'static str, &'static str)> {
    ATTRIBUTE_SECTIONS.iter().copied()
}

/// Hardware bounds for a node. Missing bounds are unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Requirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_count_min: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_count_max: Option<u64>,
    /// Total disk size in GB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hd_size_min: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hd_size_max: Option<u64>,
    /// Memory in GB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_count_min: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_count_max: Option<u64>,
}

fn within(value: u64, min: Option<u64>, max: Option<u64>) -> bool {
    min.map_or(true, |m| value >= m) && max.map_or(true, |m| value <= m)
}

impl Requirements {
    /// Whether a node satisfies every bound.
    #[must_use]
    pub fn matches(&self, node: &DiscoveredNode) -> bool {
        within(node.cpu_total, self.cpu_count_min, self.cpu_count_max)
            && within(node.hd_size_gb(), self.hd_size_min, self.hd_size_max)
            && within(node.mem_size_gb(), self.mem_count_min, self.mem_count_max)
    }
}

impl std::fmt::Display for Requirements {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn bound(v: Option<u64>) -> String {
            v.map_or_else(|| "*".to_string(), |v| v.to_string())
        }
        write!(
            f,
            "cpu {}..{}, hd {}..{} GB, mem {}..{} GB",
            bound(self.cpu_count_min),
            bound(self.cpu_count_max),
            bound(self.hd_size_min),
            bound(self.hd_size_max),
            bound(self.mem_count_min),
            bound(self.mem_count_max),
        )
    }
}

fn uppercase_mac<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(|mac| mac.to_uppercase()))
}

/// One entry of a descriptor's node list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeRequirement {
    /// Optional label used in logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Exact hardware address to pin this entry to.
    #[serde(
        default,
        deserialize_with = "uppercase_mac",
        skip_serializing_if = "Option::is_none"
    )]
    pub mac: Option<String>,
    /// Hardware bounds, used when no MAC is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Requirements>,
    /// Roles to deploy on the node.
    pub roles: Vec<String>,
    /// Interface name -> network names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interfaces: Option<InterfaceMapping>,
}

impl std::fmt::Display for NodeRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "{name}: ")?;
        }
        match (&self.mac, &self.requirements) {
            (Some(mac), _) => write!(f, "mac {mac}"),
            (None, Some(req)) => write!(f, "requirements [{req}]"),
            (None, None) => write!(f, "any node"),
        }
    }
}

/// Settings applied at creation time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// Network provider.
    #[serde(default)]
    pub net_provider: NetProvider,
    /// Neutron segmentation type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_segment_type: Option<String>,
    /// Attribute options (storage, access, vcenter, components).
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

/// Desired overrides of the cluster network configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkOverride {
    /// Network name -> fields to overwrite.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, Map<String, Value>>,
    /// Networking parameters to overwrite.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub networking_parameters: Map<String, Value>,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Desired state of one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    /// Cluster name, unique on the service.
    pub name: String,
    /// Release id.
    pub release: u64,
    /// Deployment mode (e.g. `multinode`, `ha_compact`).
    pub deployment_mode: String,
    /// Creation settings.
    #[serde(default)]
    pub settings: ClusterSettings,
    /// Nodes in matching order.
    pub nodes: Vec<NodeRequirement>,
    /// Network configuration overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_config: Option<NetworkOverride>,
    /// Seconds to wait for enough nodes to be discovered.
    #[serde(default = "default_timeout")]
    pub nodes_discovery_timeout: u64,
    /// Seconds to wait for deployment and for its tasks.
    #[serde(default = "default_timeout", alias = "DEPLOY_TIMEOUT")]
    pub deploy_timeout: u64,
}

impl ClusterDescriptor {
    /// Parse and validate a descriptor.
    ///
    /// # Errors
    /// Returns [`CertifyError::Descriptor`] if the YAML is malformed, has
    /// no name, or lists no nodes.
    pub fn from_yaml(yaml: &str) -> Result<Self, CertifyError> {
        let descriptor: Self =
            serde_yaml::from_str(yaml).map_err(|e| CertifyError::Descriptor(e.to_string()))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Check invariants serde cannot express.
    ///
    /// # Errors
    /// Returns [`CertifyError::Descriptor`] on an empty name or node list.
    pub fn validate(&self) -> Result<(), CertifyError> {
        if self.name.trim().is_empty() {
            return Err(CertifyError::Descriptor("cluster name is empty".into()));
        }
        if self.nodes.is_empty() {
            return Err(CertifyError::Descriptor(format!(
                "cluster '{}' lists no nodes",
                self.name
            )));
        }
        Ok(())
    }

    /// Load a descriptor from a YAML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cluster file {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to load cluster from {}", path.display()))
    }

    /// Request used to create the empty cluster.
    #[must_use]
    pub fn create_request(&self) -> CreateClusterRequest {
        CreateClusterRequest {
            name: self.name.clone(),
            release: self.release,
            mode: self.deployment_mode.clone(),
            net_provider: self.settings.net_provider,
            net_segment_type: self.settings.net_segment_type.clone(),
        }
    }

    /// Settings that map onto the attribute tree, as
    /// `(section, option, value)`.
    #[must_use]
    pub fn attribute_overrides(&self) -> Vec<(&'static str, &str, &Value)> {
        self.settings
            .attributes
            .iter()
            .filter_map(|(option, value)| {
                attribute_section(option).map(|section| (section, option.as_str(), value))
            })
            .collect()
    }

    #[must_use]
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.nodes_discovery_timeout)
    }

    #[must_use]
    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_secs(self.deploy_timeout)
    }
}

/// Load every `*.yaml`/`*.yml` descriptor in a directory, keyed by cluster
/// name. Files that fail to parse are logged and skipped.
///
/// # Errors
/// Returns an error if the directory cannot be read.
pub fn load_all_clusters(dir: &Path) -> Result<BTreeMap<String, ClusterDescriptor>> {
    let mut clusters = BTreeMap::new();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read clusters directory {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if !is_yaml {
            continue;
        }

        match ClusterDescriptor::load(&path) {
            Ok(descriptor) => {
                debug!(cluster = %descriptor.name, file = %path.display(), "Loaded cluster");
                clusters.insert(descriptor.name.clone(), descriptor);
            }
            Err(e) => {
                error!("Failed to load cluster from file {}: {e:#}", path.display());
            }
        }
    }

    Ok(clusters)
}
