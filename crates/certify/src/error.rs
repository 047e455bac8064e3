//! Error types for cluster deployment and certification.

use thiserror::Error;

/// Errors that can occur while talking to the deployment service or
/// driving a cluster deployment.
#[derive(Error, Debug)]
pub enum CertifyError {
    /// HTTP request could not be completed.
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Service answered with a non-2xx status.
    #[error("{method} {url} failed with {status}: {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    /// Token could not be obtained from the auth endpoint.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Response body did not decode into the expected shape.
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A node requirement could not be satisfied by the discovered pool.
    #[error("No node found for requirement {requirement}")]
    NodeNotFound { requirement: String },

    /// A polling deadline elapsed before the awaited condition held.
    #[error("Timeout during {label} after {secs}s")]
    Timeout { label: String, secs: u64 },

    /// A cluster or task reported `error` status.
    #[error("{subject} reported error: {message}")]
    RemoteTaskError { subject: String, message: String },

    /// Cluster creation did not produce a cluster id.
    #[error("Could not create cluster '{name}'")]
    ClusterCreateFailed { name: String },

    /// Desired network layout names a network that does not exist.
    #[error("Network '{network}' is not known on {scope}")]
    UnknownNetwork { scope: String, network: String },

    /// Desired interface layout names an interface the node lacks.
    #[error("Node {node_id} has no interface '{interface}'")]
    UnknownInterface { node_id: u64, interface: String },

    /// Descriptor setting has no slot in the cluster attribute tree.
    #[error("Attribute {section}.{option} not found in cluster attributes")]
    UnknownAttribute { section: String, option: String },

    /// Cluster descriptor is invalid.
    #[error("Invalid cluster descriptor: {0}")]
    Descriptor(String),
}

impl CertifyError {
    /// Whether this error came from the transport layer (connection
    /// failure or non-2xx status).
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Status { .. })
    }

    /// Whether the service answered 404.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

/// Result alias used across the crate.
pub type Result<T, E = CertifyError> = std::result::Result<T, E>;
