use crate::config::SmtpConfig;
use crate::constants::SMTP_TIMEOUT_SECS;
use crate::models::EmailNotification;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum EmailError {
    #[error("Invalid address {address}: {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },
    #[error("Failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("SMTP delivery failed: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Fixed recipient for alert notifications.
    fn recipient(&self) -> &str;

    async fn send(&self, notification: &EmailNotification) -> Result<(), EmailError>;
}

pub struct EmailNotifier {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
    recipient: String,
}

fn mailbox(address: &str) -> Result<Mailbox, EmailError> {
    address.parse().map_err(|source| EmailError::Address {
        address: address.to_string(),
        source,
    })
}

impl EmailNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, EmailError> {
        let from = mailbox(&config.from)?;
        mailbox(&config.recipient)?;

        let transport = if config.noop {
            info!("SMTP noop transport enabled; alerts will only be logged");
            None
        } else {
            let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
                .port(config.port)
                .timeout(Some(Duration::from_secs(SMTP_TIMEOUT_SECS)));
            if let (Some(user), Some(pass)) = (&config.username, &config.password) {
                builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
            }
            Some(builder.build())
        };

        Ok(Self {
            transport,
            from,
            recipient: config.recipient.clone(),
        })
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn recipient(&self) -> &str {
        &self.recipient
    }

    async fn send(&self, notification: &EmailNotification) -> Result<(), EmailError> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(mailbox(&notification.recipient)?)
            .subject(notification.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body.clone())?;

        let Some(transport) = &self.transport else {
            info!(
                recipient = %notification.recipient,
                subject = %notification.subject,
                "SMTP noop: alert email not dispatched"
            );
            return Ok(());
        };

        transport.send(email).await?;
        info!(recipient = %notification.recipient, "Email alert sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_config() -> SmtpConfig {
        SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: None,
            password: None,
            from: "alerts@example.com".to_string(),
            recipient: "ops@example.com".to_string(),
            noop: true,
        }
    }

    #[tokio::test]
    async fn noop_transport_accepts_valid_mail() {
        let notifier = EmailNotifier::new(&noop_config()).unwrap();
        let notification = EmailNotification {
            recipient: notifier.recipient().to_string(),
            subject: "[ALERT] CPC Exceeded for G1".to_string(),
            body: "AdGroup G1 has CPC=2.00 > 1.0".to_string(),
        };

        notifier.send(&notification).await.unwrap();
    }

    #[test]
    fn bad_sender_is_rejected() {
        let mut config = noop_config();
        config.from = "not-an-address".to_string();
        assert!(matches!(
            EmailNotifier::new(&config),
            Err(EmailError::Address { .. })
        ));
    }
}
