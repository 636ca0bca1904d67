// Outbound workflow email over SMTP

use crate::config::SmtpConfig;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{authentication::Credentials, PoolConfig},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("invalid email address: {0}")]
    InvalidAddress(String),
    #[error("failed to build message: {0}")]
    Message(String),
    #[error("smtp error: {0}")]
    Smtp(String),
}

/// Delivery seam used by the SEND_EMAIL action. Swapped for a recording
/// fake in tests.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Render the named template with the trigger payload and deliver
    /// it to `to`.
    async fn send_templated(
        &self,
        to: &str,
        subject: &str,
        template_id: &str,
        context: &Value,
    ) -> Result<(), EmailError>;
}

#[derive(Debug, Clone)]
pub struct SmtpEmailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
}

impl SmtpEmailService {
    pub fn new(smtp_config: &SmtpConfig) -> Self {
        let creds = Credentials::new(
            smtp_config.username.clone(),
            smtp_config.password.clone(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp_config.host)
            .port(smtp_config.port)
            .credentials(creds)
            .pool_config(PoolConfig::new().max_size(10))
            .timeout(Some(Duration::from_secs(10)))
            .build();

        SmtpEmailService {
            transport,
            from_email: smtp_config.from_email.clone(),
            from_name: smtp_config.from_name.clone(),
        }
    }

    /// Minimal template rendering: a named layout around the values the
    /// trigger captured. Real template storage lives outside the engine.
    fn render(&self, template_id: &str, context: &Value) -> String {
        let details = serde_json::to_string_pretty(context).unwrap_or_default();
        format!(
            r#"<html><body>
<p>You are receiving this message from an automated workflow (template: {}).</p>
<pre>{}</pre>
</body></html>"#,
            template_id, details
        )
    }
}

#[async_trait]
impl EmailSender for SmtpEmailService {
    async fn send_templated(
        &self,
        to: &str,
        subject: &str,
        template_id: &str,
        context: &Value,
    ) -> Result<(), EmailError> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|_| EmailError::InvalidAddress(self.from_email.clone()))?;
        let to_mailbox = to
            .parse::<Mailbox>()
            .map_err(|_| EmailError::InvalidAddress(to.to_string()))?;

        let html_body = self.render(template_id, context);
        let message = Message::builder()
            .from(from)
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body)
            .map_err(|e| EmailError::Message(e.to_string()))?;

        match self.transport.send(message).await {
            Ok(_) => {
                info!("Workflow email sent to {}", to);
                Ok(())
            }
            Err(e) => {
                error!("Failed to send workflow email to {}: {}", to, e);
                Err(EmailError::Smtp(e.to_string()))
            }
        }
    }
}

/// Fallback sender used when SMTP is not configured. Logs instead of
/// delivering so workflows still complete in development.
#[derive(Debug, Default, Clone)]
pub struct LoggingEmailSender;

#[async_trait]
impl EmailSender for LoggingEmailSender {
    async fn send_templated(
        &self,
        to: &str,
        subject: &str,
        template_id: &str,
        _context: &Value,
    ) -> Result<(), EmailError> {
        info!(
            "SMTP not configured; skipping email to {} (subject: '{}', template: '{}')",
            to, subject, template_id
        );
        Ok(())
    }
}
