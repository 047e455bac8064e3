//! Bare metal cluster certification through a Fuel master.
//!
//! Deploys clusters described in YAML onto discovered hardware, runs the
//! OSTF health checks against them and reports failures.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use certify::api::fuel::{ClientConfig, FuelClient};
//! use certify::descriptor::ClusterDescriptor;
//! use certify::orchestrator::{DeploymentOrchestrator, ManagedOptions, OrchestratorConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Arc::new(FuelClient::new(ClientConfig::new("http://10.20.0.2:8000/"))?);
//!     let orchestrator = DeploymentOrchestrator::new(client, OrchestratorConfig::default());
//!
//!     let descriptor = ClusterDescriptor::load("clusters/ha.yaml".as_ref())?;
//!     orchestrator
//!         .with_managed_cluster(&descriptor, ManagedOptions::default(), |cluster| async move {
//!             println!("cluster {} is operational", cluster.id);
//!             Ok::<_, anyhow::Error>(())
//!         })
//!         .await
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod matcher;
pub mod network;
pub mod orchestrator;
pub mod ostf;
pub mod polling;
pub mod report;
pub mod snapshot;

pub use api::fuel::{ClientConfig, FuelClient};
pub use api::{OstfService, RemoteCluster, RemoteClusterService};
pub use descriptor::ClusterDescriptor;
pub use error::{CertifyError, Result};
pub use orchestrator::{DeploymentOrchestrator, DeploymentStage, ManagedOptions, OrchestratorConfig};
