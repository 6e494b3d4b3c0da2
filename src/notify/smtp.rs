use crate::config::SmtpConfig;
use crate::notify::{EmailMessage, Notifier};
use crate::utils::error::SpotError;
use crate::Result;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

/// 通过STARTTLS中继发送邮件，每封邮件单独建立连接
pub struct SmtpNotifier {
    config: SmtpConfig,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        tracing::debug!(
            "SMTP relay {}:{}, credentials present: {}",
            config.host,
            config.port,
            config.has_credentials()
        );
        Self { config }
    }

    fn build_message(&self, sender: &str, message: &EmailMessage) -> Result<Message> {
        let from: Mailbox = sender
            .parse()
            .map_err(|e| SpotError::Config(format!("Invalid sender address '{}': {}", sender, e)))?;
        let to: Mailbox = message.to.parse()?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(message.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())?;

        Ok(email)
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let (username, password) = match (&self.config.username, &self.config.password) {
            (Some(u), Some(p)) => (u.clone(), p.clone()),
            _ => return Err(SpotError::MissingCredentials),
        };

        let email = self.build_message(&username, message)?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)?
            .port(self.config.port)
            .credentials(Credentials::new(username, password))
            .timeout(Some(self.config.timeout))
            .build();

        tracing::debug!(
            "Sending email via {}:{} to {}",
            self.config.host,
            self.config.port,
            message.to
        );
        mailer.send(email).await?;

        Ok(())
    }
}
