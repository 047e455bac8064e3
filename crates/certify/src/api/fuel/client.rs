//! Fuel REST API client implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::auth::AuthConfig;
use super::models::{
    AddNodeBody, ClusterResource, CreateClusterBody, NodeResource, TaskResource, TestRunBody,
    TestRunMetadata,
};
use crate::api::traits::{
    ClusterAttributes, ClusterStatus, CreateClusterRequest, DiscoveredNode, NetProvider,
    NetworkConfiguration, NodeInterface, OstfService, RemoteCluster, RemoteClusterService, Task,
    TestRun, TestSet,
};
use crate::error::{CertifyError, Result};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Header carrying the auth token.
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Connection settings for [`FuelClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the Fuel master (e.g. `http://10.20.0.2:8000/`).
    pub base_url: String,
    /// Keystone credentials, when the API requires a token.
    pub auth: Option<AuthConfig>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl ClientConfig {
    /// Create a config for an unauthenticated API.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Authenticate requests with a Keystone token.
    #[must_use]
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }
}

/// Client for the Fuel deployment-management API.
pub struct FuelClient {
    /// HTTP client.
    client: Client,
    /// Base URL without trailing slash.
    base_url: String,
    /// Keystone credentials.
    auth: Option<AuthConfig>,
    /// Current token.
    token: RwLock<Option<String>>,
}

impl FuelClient {
    /// Create a new Fuel client.
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth: config.auth,
            token: RwLock::new(None),
        })
    }

    /// Base URL this client talks to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Request a fresh token and store it.
    async fn refresh_token(&self) -> Result<()> {
        let Some(auth) = &self.auth else {
            return Ok(());
        };
        let token = auth.request_token(&self.client).await?;
        *self.token.write().await = Some(token);
        Ok(())
    }

    async fn send_once(&self, method: &Method, url: &str, body: Option<&Value>) -> Result<Response> {
        if self.auth.is_some() && self.token.read().await.is_none() {
            self.refresh_token().await?;
        }

        debug!(url = %url, "{method} request");

        let mut request = self.client.request(method.clone(), url);
        if let Some(token) = self.token.read().await.as_deref() {
            request = request.header(AUTH_TOKEN_HEADER, token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        Ok(request.send().await?)
    }

    /// Send a request and return the raw body of a 2xx response.
    ///
    /// An expired token is refreshed once and the request retried once.
    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<String> {
        let url = self.url(path);
        let mut response = self.send_once(&method, &url, body).await?;

        if response.status() == StatusCode::UNAUTHORIZED && self.auth.is_some() {
            warn!(url = %url, "Auth token rejected, refreshing");
            self.refresh_token().await?;
            response = self.send_once(&method, &url, body).await?;
        }

        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(CertifyError::Status {
                method: method.to_string(),
                url,
                status: status.as_u16(),
                body: text,
            })
        }
    }

    fn decode<T: DeserializeOwned>(path: &str, text: &str) -> Result<T> {
        serde_json::from_str(text).map_err(|e| {
            warn!(path = %path, error = %e, body = %text, "Failed to parse response");
            CertifyError::Decode(e)
        })
    }

    /// Make a GET request. GET never carries a body.
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let text = self.send(Method::GET, path, None).await?;
        Self::decode(path, &text)
    }

    /// Make a POST request and decode the response.
    async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        let text = self.send(Method::POST, path, Some(&body)).await?;
        Self::decode(path, &text)
    }

    /// Make a PUT request, ignoring the response body.
    async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let body = serde_json::to_value(body)?;
        self.send(Method::PUT, path, Some(&body)).await?;
        Ok(())
    }

    /// Make a DELETE request.
    async fn delete(&self, path: &str) -> Result<()> {
        self.send(Method::DELETE, path, None).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteClusterService for FuelClient {
    async fn list_nodes(&self) -> Result<Vec<DiscoveredNode>> {
        let nodes: Vec<NodeResource> = self.get("api/nodes").await?;
        Ok(nodes.into_iter().map(DiscoveredNode::from).collect())
    }

    async fn get_cluster_by_name(&self, name: &str) -> Result<Option<u64>> {
        let clusters: Vec<ClusterResource> = self.get("api/clusters").await?;
        let id = clusters
            .into_iter()
            .find(|c| c.name == name)
            .and_then(|c| c.id);

        if let Some(id) = id {
            debug!(cluster = %name, cluster_id = id, "Found existing cluster");
        }
        Ok(id)
    }

    async fn get_cluster(&self, cluster_id: u64) -> Result<Option<RemoteCluster>> {
        match self
            .get::<ClusterResource>(&format!("api/clusters/{cluster_id}"))
            .await
        {
            Ok(resource) => Ok(resource.into_cluster()),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_cluster(&self, req: CreateClusterRequest) -> Result<RemoteCluster> {
        info!(
            cluster = %req.name,
            release = req.release,
            mode = %req.mode,
            net_provider = %req.net_provider,
            "Creating cluster"
        );

        let body = CreateClusterBody {
            request: &req,
            nodes: Vec::new(),
            tasks: Vec::new(),
        };
        let resource: ClusterResource = self.post("api/clusters", &body).await?;

        resource
            .into_cluster()
            .ok_or(CertifyError::ClusterCreateFailed { name: req.name })
    }

    async fn get_cluster_attributes(&self, cluster_id: u64) -> Result<ClusterAttributes> {
        self.get(&format!("api/clusters/{cluster_id}/attributes"))
            .await
    }

    async fn update_cluster_attributes(
        &self,
        cluster_id: u64,
        attrs: &ClusterAttributes,
    ) -> Result<()> {
        self.put(&format!("api/clusters/{cluster_id}/attributes"), attrs)
            .await
    }

    async fn add_node(&self, cluster_id: u64, node_id: u64, roles: &[String]) -> Result<()> {
        let body = [AddNodeBody {
            id: node_id,
            cluster_id,
            pending_roles: roles,
            pending_addition: true,
        }];
        self.put("api/nodes", &body).await
    }

    async fn get_node_interfaces(&self, node_id: u64) -> Result<Vec<NodeInterface>> {
        self.get(&format!("api/nodes/{node_id}/interfaces")).await
    }

    async fn update_node_interfaces(
        &self,
        node_id: u64,
        interfaces: &[NodeInterface],
    ) -> Result<()> {
        self.put(&format!("api/nodes/{node_id}/interfaces"), interfaces)
            .await
    }

    async fn get_cluster_network_config(
        &self,
        cluster_id: u64,
        net_provider: NetProvider,
    ) -> Result<NetworkConfiguration> {
        self.get(&format!(
            "api/clusters/{cluster_id}/network_configuration/{net_provider}"
        ))
        .await
    }

    async fn update_cluster_network_config(
        &self,
        cluster_id: u64,
        net_provider: NetProvider,
        config: &NetworkConfiguration,
    ) -> Result<()> {
        self.put(
            &format!("api/clusters/{cluster_id}/network_configuration/{net_provider}"),
            config,
        )
        .await
    }

    async fn start_deploy(&self, cluster_id: u64) -> Result<()> {
        info!(cluster_id, "Starting deploy");
        self.send(Method::PUT, &format!("api/clusters/{cluster_id}/changes"), None)
            .await?;
        Ok(())
    }

    async fn get_cluster_status(&self, cluster_id: u64) -> Result<ClusterStatus> {
        let resource: ClusterResource = self.get(&format!("api/clusters/{cluster_id}")).await?;
        Ok(resource.status.unwrap_or(ClusterStatus::New))
    }

    async fn get_tasks(&self, cluster_id: u64) -> Result<Vec<Task>> {
        let tasks: Vec<TaskResource> = self
            .get(&format!("api/tasks?cluster_id={cluster_id}"))
            .await?;
        Ok(tasks.into_iter().map(Task::from).collect())
    }

    async fn delete_cluster(&self, cluster_id: u64) -> Result<()> {
        info!(cluster_id, "Deleting cluster");
        self.delete(&format!("api/clusters/{cluster_id}")).await
    }
}

#[async_trait]
impl OstfService for FuelClient {
    async fn get_testsets(&self, cluster_id: u64) -> Result<Vec<TestSet>> {
        self.get(&format!("ostf/testsets/{cluster_id}")).await
    }

    async fn start_testrun(&self, cluster_id: u64, testset: &str) -> Result<TestRun> {
        let body = [TestRunBody {
            testset,
            tests: Vec::new(),
            metadata: TestRunMetadata { cluster_id },
        }];
        let runs: Vec<TestRun> = self.post("ostf/testruns", &body).await?;

        runs.into_iter()
            .next()
            .ok_or_else(|| CertifyError::RemoteTaskError {
                subject: format!("test run {testset}"),
                message: "service returned no test run".to_string(),
            })
    }

    async fn get_testrun(&self, run_id: u64) -> Result<TestRun> {
        self.get(&format!("ostf/testruns/{run_id}")).await
    }
}
