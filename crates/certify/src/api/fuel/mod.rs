//! Fuel deployment-management API.
//!
//! Implements [`RemoteClusterService`](crate::api::RemoteClusterService) and
//! [`OstfService`](crate::api::OstfService) over the Fuel REST API.

mod auth;
mod client;
mod models;

pub use auth::AuthConfig;
pub use client::{ClientConfig, FuelClient};
