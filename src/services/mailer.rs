use crate::config::MailConfig;
use anyhow::Context;
use async_trait::async_trait;
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;

/// Outbound mail delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Development mailer. Message bodies carry live codes, so they only go to debug.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        tracing::info!(target: "mailer", to, subject, "Mail not delivered (no SMTP host)");
        tracing::debug!(target: "mailer", to, "{}", body);
        Ok(())
    }
}

/// Delivers plain-text mail through an SMTP relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> anyhow::Result<Self> {
        let host = config
            .smtp_host
            .as_deref()
            .context("SMTP_HOST is not set")?;

        let mut builder = if config.smtp_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        }
        .port(config.smtp_port);

        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_pass) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let from = config
            .mail_from
            .parse::<Mailbox>()
            .with_context(|| format!("MAIL_FROM is not a valid address: {}", config.mail_from))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse::<Mailbox>()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?;

        self.transport.send(message).await?;
        tracing::info!(target: "mailer", to, subject, "📧 Mail sent");
        Ok(())
    }
}

/// SMTP when a host is configured, otherwise the log mailer.
pub fn create_mailer(config: &MailConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    if config.smtp_host.is_some() {
        Ok(Arc::new(SmtpMailer::new(config)?))
    } else {
        tracing::warn!("SMTP_HOST not set, outgoing mail will only be logged");
        Ok(Arc::new(LogMailer))
    }
}

pub fn verification_message(code: &str, ttl_minutes: i64) -> (String, String) {
    (
        "Verify your email".to_string(),
        format!(
            "Your verification code is {}. It expires in {} minutes.",
            code, ttl_minutes
        ),
    )
}

pub fn reset_message(code: &str, ttl_minutes: i64) -> (String, String) {
    (
        "Reset your password".to_string(),
        format!(
            "Your password reset code is {}. It expires in {} minutes. \
             If you did not request a reset, ignore this message.",
            code, ttl_minutes
        ),
    )
}
