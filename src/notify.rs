//! Error reports for a human. Delivery is fire-and-forget: failures are logged and
//! never propagated.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::{debug, info, warn};

use crate::config::EmailConfig;
use crate::error::{Error, Result};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str);
}

/// Chooses the notifier described by `config`.
pub fn from_config(config: &EmailConfig) -> Result<Box<dyn Notifier>> {
    if config.enabled {
        Ok(Box::new(EmailNotifier::new(config)?))
    } else {
        Ok(Box::new(LogNotifier))
    }
}

/// Used when email is disabled; the errors have already been logged where they happened.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, subject: &str, _body: &str) {
        debug!(subject, "email disabled, not sending");
    }
}

pub struct EmailNotifier {
    host: String,
    credentials: Credentials,
    from: Mailbox,
    recipients: Vec<Mailbox>,
}

impl EmailNotifier {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let from = parse_mailbox(&config.username)?;
        let recipients = config
            .recipients
            .iter()
            .map(|r| parse_mailbox(r))
            .collect::<Result<Vec<_>>>()?;
        if recipients.is_empty() {
            return Err(Error::Config("email has no recipients".to_string()));
        }
        Ok(Self {
            host: config.smtp_host.clone(),
            credentials: Credentials::new(config.username.clone(), config.password.clone()),
            from,
            recipients,
        })
    }

    fn message(&self, subject: &str, body: &str) -> std::result::Result<Message, lettre::error::Error> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }
        builder.body(body.to_string())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, subject: &str, body: &str) {
        let message = match self.message(subject, body) {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to build notification email: {e}");
                return;
            }
        };
        let host = self.host.clone();
        let credentials = self.credentials.clone();

        // The SMTP transport blocks.
        let sent = tokio::task::spawn_blocking(move || {
            let mailer = SmtpTransport::relay(&host)?.credentials(credentials).build();
            mailer.send(&message)
        })
        .await;

        match sent {
            Ok(Ok(_)) => info!("Sent error report to {} recipient(s)", self.recipients.len()),
            Ok(Err(e)) => warn!("Failed to send notification email: {e}"),
            Err(e) => warn!("Notification task failed: {e}"),
        }
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse()
        .map_err(|e| Error::Config(format!("bad email address '{address}': {e}")))
}
