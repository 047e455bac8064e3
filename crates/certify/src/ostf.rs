//! Health-check test suites run against a deployed cluster.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::api::{OstfService, TestResult, TestRun};
use crate::error::Result;
use crate::polling::PollingTimer;

/// A source of named test sets that can be run against a cluster.
#[async_trait]
pub trait TestSuite: Send + Sync {
    /// Suite name, used in logs.
    fn name(&self) -> &str;

    /// Test sets this suite can run on the cluster.
    async fn available_tests(&self, cluster_id: u64) -> Result<Vec<String>>;

    /// Run the named test sets and return their finished runs.
    async fn run_tests(&self, cluster_id: u64, names: &[String]) -> Result<Vec<TestRun>>;
}

/// Results of every test run of a certification pass.
#[derive(Debug, Clone, Default)]
pub struct TestOutcome {
    pub runs: Vec<TestRun>,
}

impl TestOutcome {
    /// Every individual test result.
    pub fn results(&self) -> impl Iterator<Item = &TestResult> {
        self.runs.iter().flat_map(|run| &run.tests)
    }

    /// Tests that failed or errored.
    #[must_use]
    pub fn failed(&self) -> Vec<&TestResult> {
        self.results().filter(|t| t.is_failed()).collect()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.results().all(|t| !t.is_failed())
    }
}

/// Explicit list of suites to consult for each run.
#[derive(Default)]
pub struct SuiteRegistry {
    suites: Vec<Box<dyn TestSuite>>,
}

impl SuiteRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a suite.
    #[must_use]
    pub fn with(mut self, suite: impl TestSuite + 'static) -> Self {
        self.suites.push(Box::new(suite));
        self
    }

    /// Names of the registered suites.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.suites.iter().map(|s| s.name()).collect()
    }

    /// Run the requested test sets with every suite that offers them.
    ///
    /// Requested names a suite does not offer are skipped for that suite;
    /// the request order is kept.
    ///
    /// # Errors
    /// Returns the first error from listing or running a suite's tests.
    pub async fn run(&self, cluster_id: u64, requested: &[String]) -> Result<TestOutcome> {
        let mut outcome = TestOutcome::default();

        for suite in &self.suites {
            let available = suite.available_tests(cluster_id).await?;
            let selected: Vec<String> = requested
                .iter()
                .filter(|name| available.contains(name))
                .cloned()
                .collect();

            if selected.is_empty() {
                debug!(suite = suite.name(), cluster_id, "No requested tests available");
                continue;
            }

            info!(suite = suite.name(), cluster_id, tests = ?selected, "Running tests");
            outcome.runs.extend(suite.run_tests(cluster_id, &selected).await?);
        }

        Ok(outcome)
    }
}

/// OSTF health checks exposed by the deployment service.
pub struct OstfSuite<S: ?Sized> {
    service: Arc<S>,
    timer: PollingTimer,
    timeout: Duration,
}

impl<S: OstfService + ?Sized> OstfSuite<S> {
    /// Create a suite that waits up to `timeout` for each test run.
    #[must_use]
    pub fn new(service: Arc<S>, timer: PollingTimer, timeout: Duration) -> Self {
        Self {
            service,
            timer,
            timeout,
        }
    }
}

#[async_trait]
impl<S: OstfService + ?Sized> TestSuite for OstfSuite<S> {
    fn name(&self) -> &str {
        "ostf"
    }

    async fn available_tests(&self, cluster_id: u64) -> Result<Vec<String>> {
        let sets = self.service.get_testsets(cluster_id).await?;
        Ok(sets.into_iter().map(|set| set.id).collect())
    }

    async fn run_tests(&self, cluster_id: u64, names: &[String]) -> Result<Vec<TestRun>> {
        let service = &*self.service;
        let mut runs = Vec::with_capacity(names.len());

        for name in names {
            let started = service.start_testrun(cluster_id, name).await?;
            let run_id = started.id;
            info!(cluster_id, testset = %name, run_id, "Test run started");

            let label = format!("run test {name}");
            let run = self
                .timer
                .wait_for(&label, self.timeout, move || async move {
                    let run = service.get_testrun(run_id).await?;
                    Ok(run.is_finished().then_some(run))
                })
                .await?;

            let failed = run.tests.iter().filter(|t| t.is_failed()).count();
            info!(run_id, testset = %name, total = run.tests.len(), failed, "Test run finished");
            runs.push(run);
        }

        Ok(runs)
    }
}
