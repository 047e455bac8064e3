//! Email report of failed tests.

use anyhow::{Context, Result};
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::api::TestResult;

/// SMTP port used for STARTTLS submission.
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Subject of every report.
pub const REPORT_SUBJECT: &str = "Test Results";

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

/// Mail settings from the `report.mail` section of the config file.
#[derive(Clone, Serialize, Deserialize)]
pub struct MailConfig {
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub login: String,
    #[serde(default)]
    pub password: String,
    pub mail_to: String,
    pub mail_from: String,
}

impl std::fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailConfig")
            .field("smtp_server", &self.smtp_server)
            .field("smtp_port", &self.smtp_port)
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("mail_to", &self.mail_to)
            .field("mail_from", &self.mail_from)
            .finish()
    }
}

/// Render failed tests as the report body: each test name followed by its
/// message on an indented line.
#[must_use]
pub fn format_failures<'a>(failed: impl IntoIterator<Item = &'a TestResult>) -> String {
    failed
        .into_iter()
        .map(|test| format!("{}\n        {}", test.name, test.message))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Sends test reports over SMTP.
pub struct ReportSender {
    config: MailConfig,
}

impl ReportSender {
    #[must_use]
    pub const fn new(config: MailConfig) -> Self {
        Self { config }
    }

    /// Build the report message for `failed`.
    ///
    /// # Errors
    /// Returns an error if an address does not parse.
    pub fn build_message<'a>(&self, failed: impl IntoIterator<Item = &'a TestResult>) -> Result<Message> {
        let from: Mailbox = self
            .config
            .mail_from
            .parse()
            .context("Invalid from email address")?;
        let to: Mailbox = self
            .config
            .mail_to
            .parse()
            .context("Invalid to email address")?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(REPORT_SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(format_failures(failed))
            .context("Failed to build report message")
    }

    /// Email the failed tests.
    ///
    /// # Errors
    /// Returns an error if the message cannot be built or delivered.
    pub async fn send<'a>(&self, failed: impl IntoIterator<Item = &'a TestResult>) -> Result<()> {
        let message = self.build_message(failed)?;

        let creds = Credentials::new(self.config.login.clone(), self.config.password.clone());
        let mailer: AsyncSmtpTransport<Tokio1Executor> =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_server)
                .context("Failed to create SMTP transport")?
                .port(self.config.smtp_port)
                .credentials(creds)
                .build();

        debug!(server = %self.config.smtp_server, "Sending results by email");
        mailer
            .send(message)
            .await
            .context("Failed to send report via SMTP")?;

        info!(to = %self.config.mail_to, subject = REPORT_SUBJECT, "Report sent");
        Ok(())
    }
}
