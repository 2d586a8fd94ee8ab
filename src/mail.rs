//! SMTP delivery for notifications.
use crate::config::EmailConfig;
use crate::notifier::{Composer, Notification, Notifier, NotifyError};
use crate::state::MonitorState;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// Port for implicit TLS; every other port negotiates STARTTLS.
const IMPLICIT_TLS_PORT: u16 = 465;

pub struct MailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
    composer: Composer,
}

impl MailNotifier {
    pub fn new(config: &EmailConfig, composer: Composer) -> Result<Self, NotifyError> {
        let from = parse_mailbox(&config.username)?;
        let to = parse_mailbox(&config.recipient)?;

        let builder = if config.smtp_port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
        }
        .map_err(|e| NotifyError::Transport(Box::new(e)))?;

        let transport = builder
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self {
            transport,
            from,
            to,
            composer,
        })
    }

    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(notification.subject)
            .header(ContentType::TEXT_HTML)
            .body(notification.html)
            .map_err(|e| NotifyError::Build(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Transport(Box::new(e)))?;
        Ok(())
    }

    /// Send a setup check message.
    pub async fn send_test(&self) -> Result<(), NotifyError> {
        tracing::info!(from = %self.from, to = %self.to, "sending test email");
        self.send(self.composer.test_message(Utc::now())).await?;
        tracing::info!("test email sent");
        Ok(())
    }
}

impl Notifier for MailNotifier {
    async fn notify_open(&self, text: &str, at: DateTime<Utc>) -> Result<(), NotifyError> {
        self.send(self.composer.open_alert(text, at)).await?;
        tracing::info!(to = %self.to, "booking alert email sent");
        Ok(())
    }

    async fn notify_heartbeat(
        &self,
        state: &MonitorState,
        next_check: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        self.send(self.composer.heartbeat(state, next_check, Utc::now()))
            .await?;
        tracing::info!(to = %self.to, "status email sent");
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse().map_err(|e: lettre::address::AddressError| NotifyError::Address {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn composer() -> Composer {
        Composer::new("https://example.com", "s", "b", Duration::from_secs(60))
    }

    fn email() -> EmailConfig {
        EmailConfig {
            username: "monitor@example.com".to_string(),
            password: "app-password".to_string(),
            recipient: "me@example.com".to_string(),
            ..EmailConfig::default()
        }
    }

    #[test]
    fn test_parse_mailbox_rejects_bare_name() {
        let err = parse_mailbox("not-an-address").err().unwrap();
        assert!(matches!(err, NotifyError::Address { .. }));
    }

    #[test]
    fn test_parse_mailbox_accepts_display_name() {
        let mailbox = parse_mailbox("Monitor <monitor@example.com>").unwrap();
        assert_eq!(mailbox.email.to_string(), "monitor@example.com");
    }

    #[tokio::test]
    async fn test_new_builds_starttls_and_implicit_tls_transports() {
        assert!(MailNotifier::new(&email(), composer()).is_ok());

        let mut implicit = email();
        implicit.smtp_port = IMPLICIT_TLS_PORT;
        assert!(MailNotifier::new(&implicit, composer()).is_ok());
    }

    #[tokio::test]
    async fn test_new_rejects_bad_recipient() {
        let mut config = email();
        config.recipient = "@".to_string();
        assert!(matches!(
            MailNotifier::new(&config, composer()),
            Err(NotifyError::Address { .. })
        ));
    }
}
