//! Certification run configuration loaded from YAML.
//!
//! ```yaml
//! fuel_api:
//!   url: http://10.20.0.2:8000/
//! log_level: info
//! testrun_timeout: 3600
//! tests:
//!   clusters_directory: clusters
//!   tests:
//!     ha_neutron:
//!       cluster: cert-ha
//!       suits: [smoke, sanity]
//! report:
//!   mail:
//!     smtp_server: smtp.example.com
//!     login: bot
//!     mail_to: qa@example.com
//!     mail_from: bot@example.com
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::fuel::{AuthConfig, ClientConfig};
use crate::descriptor::DEFAULT_TIMEOUT_SECS;
use crate::report::MailConfig;

/// Fuel master used when none is configured.
pub const DEFAULT_FUEL_URL: &str = "http://172.18.201.16:8000/";

fn default_fuel_url() -> String {
    DEFAULT_FUEL_URL.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_testrun_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_clusters_directory() -> PathBuf {
    PathBuf::from("clusters")
}

/// Deployment service connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuelApiConfig {
    #[serde(default = "default_fuel_url")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
}

impl Default for FuelApiConfig {
    fn default() -> Self {
        Self {
            url: default_fuel_url(),
            auth: None,
        }
    }
}

/// One named certification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunConfig {
    /// Name of the cluster descriptor to deploy.
    pub cluster: String,
    /// Test sets to run on it.
    #[serde(default)]
    pub suits: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestsConfig {
    /// Directory of cluster descriptor files.
    #[serde(default = "default_clusters_directory")]
    pub clusters_directory: PathBuf,
    /// Run name -> run.
    #[serde(default)]
    pub tests: BTreeMap<String, TestRunConfig>,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            clusters_directory: default_clusters_directory(),
            tests: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mail: Option<MailConfig>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub fuel_api: FuelApiConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Seconds to wait for each test run.
    #[serde(default = "default_testrun_timeout")]
    pub testrun_timeout: u64,
    /// Forwarded to the cluster's `common.debug` attribute.
    #[serde(default)]
    pub debug_mode: bool,
    /// Keep clusters after a run.
    #[serde(default)]
    pub retain_clusters: bool,
    #[serde(default)]
    pub tests: TestsConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            fuel_api: FuelApiConfig::default(),
            log_level: default_log_level(),
            testrun_timeout: default_testrun_timeout(),
            debug_mode: false,
            retain_clusters: false,
            tests: TestsConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub fuel_url: Option<String>,
    pub mail_password: Option<String>,
}

impl AppConfig {
    /// Parse a config document. Relative paths are resolved against
    /// `base_dir`.
    ///
    /// # Errors
    /// Returns an error if the YAML is malformed.
    pub fn from_yaml(yaml: &str, base_dir: &Path) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(yaml).context("Failed to parse config")?;
        if config.tests.clusters_directory.is_relative() {
            config.tests.clusters_directory = base_dir.join(&config.tests.clusters_directory);
        }
        Ok(config)
    }

    /// Load a config file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_yaml(&content, base_dir)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Apply command-line overrides.
    pub fn merge_cli(&mut self, overrides: CliOverrides) {
        if let Some(url) = overrides.fuel_url {
            self.fuel_api.url = url;
        }
        if let (Some(password), Some(mail)) = (overrides.mail_password, self.report.mail.as_mut()) {
            mail.password = password;
        }
    }

    /// Client settings for the deployment service.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        let config = ClientConfig::new(self.fuel_api.url.clone());
        match &self.fuel_api.auth {
            Some(auth) => config.with_auth(auth.clone()),
            None => config,
        }
    }

    #[must_use]
    pub fn testrun_timeout(&self) -> Duration {
        Duration::from_secs(self.testrun_timeout)
    }
}
