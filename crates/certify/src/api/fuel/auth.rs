//! Keystone token authentication for the Fuel API.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::models::{PasswordCredentials, TokenAuth, TokenRequest, TokenResponse};
use crate::error::{CertifyError, Result};

/// Keystone credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Keystone endpoint (e.g. `http://10.20.0.2:5000`).
    pub url: String,
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
    /// Tenant to scope the token to.
    #[serde(default = "default_tenant")]
    pub tenant: String,
}

fn default_tenant() -> String {
    "admin".to_string()
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("tenant", &self.tenant)
            .finish()
    }
}

impl AuthConfig {
    /// Request a new token from Keystone.
    ///
    /// # Errors
    /// Returns [`CertifyError::Auth`] if Keystone rejects the credentials.
    pub async fn request_token(&self, client: &Client) -> Result<String> {
        let url = format!("{}/v2.0/tokens", self.url.trim_end_matches('/'));
        debug!(url = %url, username = %self.username, "Requesting auth token");

        let body = TokenRequest {
            auth: TokenAuth {
                tenant_name: &self.tenant,
                password_credentials: PasswordCredentials {
                    username: &self.username,
                    password: &self.password,
                },
            },
        };

        let response = client.post(&url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(CertifyError::Auth(format!(
                "{url} returned {}: {text}",
                status.as_u16()
            )));
        }

        let token: TokenResponse = serde_json::from_str(&text)?;
        info!(username = %self.username, "Obtained auth token");
        Ok(token.access.token.id)
    }
}
