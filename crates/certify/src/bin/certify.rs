//! Certify CLI - deploy clusters through Fuel and run health checks on them.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use certify::config::{AppConfig, CliOverrides};
use certify::descriptor::{load_all_clusters, ClusterDescriptor};
use certify::ostf::{OstfSuite, SuiteRegistry, TestOutcome};
use certify::polling::PollingTimer;
use certify::report::{MailConfig, ReportSender};
use certify::snapshot::{capture_descriptor, save_descriptor};
use certify::{
    DeploymentOrchestrator, FuelClient, ManagedOptions, OrchestratorConfig, RemoteClusterService,
};

/// Certify CLI - bare metal cluster certification through Fuel.
#[derive(Parser)]
#[command(name = "certify")]
#[command(about = "Deploy clusters on discovered hardware and run OSTF against them")]
struct Cli {
    /// Path to the YAML config file.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Fuel master URL (or set `FUEL_URL` env var).
    #[arg(long, env = "FUEL_URL")]
    fuel_url: Option<String>,

    /// Mail password for the report (or set `CERTIFY_MAIL_PASSWORD` env var).
    #[arg(long, env = "CERTIFY_MAIL_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured certification: deploy, test, report, delete.
    Run,

    /// Deploy a single cluster descriptor.
    Deploy {
        /// Cluster descriptor file.
        #[arg(long)]
        cluster: PathBuf,

        /// Keep the cluster after deployment instead of deleting it.
        #[arg(long, default_value = "false")]
        keep: bool,
    },

    /// Delete a cluster by name, if it exists.
    Delete {
        /// Cluster name.
        #[arg(long)]
        name: String,
    },

    /// List discovered nodes.
    Nodes,

    /// Save a deployed cluster's configuration as a descriptor.
    SaveConfig {
        /// Cluster ID.
        #[arg(long)]
        cluster_id: u64,

        /// Output descriptor file.
        #[arg(long)]
        output: PathBuf,
    },
}

fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path)
    } else {
        Ok(AppConfig::default())
    }
}

fn report_failures(run_name: &str, outcome: &TestOutcome) {
    let failed = outcome.failed();
    if failed.is_empty() {
        info!(run = run_name, tests = outcome.results().count(), "All tests passed");
        return;
    }
    for test in &failed {
        warn!(run = run_name, test = %test.name, message = %test.message, "Test failed");
    }
}

/// Email the failed tests of one run. Returns whether the report went out.
async fn send_report(mail: &MailConfig, run_name: &str, outcome: &TestOutcome) -> bool {
    match ReportSender::new(mail.clone()).send(outcome.failed()).await {
        Ok(()) => true,
        Err(e) => {
            error!(run = run_name, "Failed to send report: {e:#}");
            false
        }
    }
}

async fn run_all(
    config: &AppConfig,
    client: Arc<FuelClient>,
    orchestrator: &DeploymentOrchestrator<FuelClient>,
) -> Result<()> {
    if config.tests.tests.is_empty() {
        warn!("No tests configured");
        return Ok(());
    }

    let clusters = load_all_clusters(&config.tests.clusters_directory)?;
    let registry = SuiteRegistry::new().with(OstfSuite::new(
        client,
        PollingTimer::default(),
        config.testrun_timeout(),
    ));
    let options = ManagedOptions {
        replace_existing: true,
        retain: config.retain_clusters,
    };

    let mut failed_runs = Vec::new();
    for (run_name, run) in &config.tests.tests {
        let started = Utc::now();
        info!(run = %run_name, cluster = %run.cluster, started_at = %started.to_rfc3339(), "Starting certification run");

        let Some(descriptor) = clusters.get(&run.cluster) else {
            error!(run = %run_name, cluster = %run.cluster, "No descriptor for cluster");
            failed_runs.push(run_name.as_str());
            continue;
        };

        let registry = &registry;
        let suits = run.suits.as_slice();
        let result = orchestrator
            .with_managed_cluster(descriptor, options, |cluster| async move {
                registry
                    .run(cluster.id, suits)
                    .await
                    .map_err(anyhow::Error::from)
            })
            .await;

        let elapsed = Utc::now() - started;
        match result {
            Ok(outcome) => {
                info!(run = %run_name, elapsed_secs = elapsed.num_seconds(), "Certification run finished");
                report_failures(run_name, &outcome);
                if let Some(mail) = &config.report.mail {
                    if !send_report(mail, run_name, &outcome).await {
                        failed_runs.push(run_name.as_str());
                    }
                }
            }
            Err(e) => {
                error!(run = %run_name, elapsed_secs = elapsed.num_seconds(), "Certification run failed: {e:#}");
                failed_runs.push(run_name.as_str());
            }
        }
    }

    if !failed_runs.is_empty() {
        bail!("Certification runs failed: {}", failed_runs.join(", "));
    }
    Ok(())
}

/// Run `work` until it finishes or Ctrl+C arrives. On interrupt the work is
/// dropped, which hands managed clusters to their cleanup tasks, and those
/// are awaited before returning.
async fn until_interrupted(
    orchestrator: &DeploymentOrchestrator<FuelClient>,
    work: impl Future<Output = Result<()>>,
) -> Result<()> {
    let finished = tokio::select! {
        result = work => Some(result),
        () = async { tokio::signal::ctrl_c().await.ok(); } => None,
    };

    match finished {
        Some(result) => result,
        None => {
            warn!("Received SIGINT, cleaning up");
            orchestrator.finish_cleanups().await;
            bail!("Interrupted")
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;
    config.merge_cli(CliOverrides {
        fuel_url: cli.fuel_url,
        mail_password: cli.password,
    });

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let client = Arc::new(
        FuelClient::new(config.client_config()).context("Failed to create Fuel client")?,
    );
    let orchestrator = DeploymentOrchestrator::new(
        Arc::clone(&client),
        OrchestratorConfig {
            debug_mode: config.debug_mode,
            ..OrchestratorConfig::default()
        },
    );

    match cli.command {
        Commands::Run => {
            until_interrupted(&orchestrator, run_all(&config, Arc::clone(&client), &orchestrator)).await?;
        }

        Commands::Deploy { cluster, keep } => {
            let descriptor = ClusterDescriptor::load(&cluster)?;
            if keep {
                let deployed = orchestrator.deploy_cluster(&descriptor).await?;
                println!("Cluster {} deployed with id {}", deployed.name, deployed.id);
            } else {
                let deploy = orchestrator.with_managed_cluster(
                    &descriptor,
                    ManagedOptions::default(),
                    |deployed| async move {
                        println!("Cluster {} deployed with id {}", deployed.name, deployed.id);
                        Ok::<_, anyhow::Error>(())
                    },
                );
                until_interrupted(&orchestrator, deploy).await?;
            }
        }

        Commands::Delete { name } => {
            if orchestrator.delete_if_exists(&name).await? {
                println!("Cluster {name} deleted");
            } else {
                println!("No cluster named {name}");
            }
        }

        Commands::Nodes => {
            let nodes = client.list_nodes().await?;
            println!(
                "\n{:<6} {:<18} {:<5} {:<8} {:<8} {:<8}",
                "ID", "MAC", "CPU", "MEM GB", "HD GB", "CLUSTER"
            );
            println!("{}", "-".repeat(58));
            for node in nodes {
                println!(
                    "{:<6} {:<18} {:<5} {:<8} {:<8} {:<8}",
                    node.id,
                    node.mac,
                    node.cpu_total,
                    node.mem_size_gb(),
                    node.hd_size_gb(),
                    node.cluster.map_or_else(|| "-".to_string(), |c| c.to_string())
                );
            }
        }

        Commands::SaveConfig { cluster_id, output } => {
            let descriptor = capture_descriptor(&*client, cluster_id).await?;
            save_descriptor(&output, &descriptor)?;
            println!("Saved cluster {} to {}", descriptor.name, output.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_smtp_is_reported_not_fatal() {
        let mail = MailConfig {
            smtp_server: "127.0.0.1".into(),
            smtp_port: 1,
            login: "bot".into(),
            password: "secret".into(),
            mail_to: "qa@example.com".into(),
            mail_from: "bot@example.com".into(),
        };

        assert!(!send_report(&mail, "ha", &TestOutcome::default()).await);
    }
}
