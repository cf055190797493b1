//! Notification handlers for alerts

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::config::{EmailSettings, NotifyTarget, DEFAULT_DELIVERY_TIMEOUT};
use super::format::AlertMessage;

/// Something an alert can be delivered through
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn notify(&self, message: &AlertMessage) -> Result<(), NotifierError>;
}

/// Notifier for sending alert notifications to every configured target
pub struct Notifier {
    targets: Vec<BoundedTarget>,
}

/// A target with its own delivery deadline, so a stalled target cannot
/// starve the ones after it
struct BoundedTarget {
    target: Target,
    timeout: Duration,
}

enum Target {
    Log,
    Webhook {
        client: reqwest::Client,
        url: String,
        headers: HashMap<String, String>,
    },
    Email(EmailTarget),
}

struct EmailTarget {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    recipients: Vec<Mailbox>,
    relay_host: String,
}

impl Notifier {
    /// Build a notifier, validating addresses and transports up front
    pub fn new(targets: Vec<NotifyTarget>) -> Result<Self, NotifierError> {
        let targets = targets
            .into_iter()
            .map(BoundedTarget::build)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { targets })
    }

    /// Notifier that only writes to the log
    pub fn log_only() -> Self {
        Self {
            targets: vec![BoundedTarget {
                target: Target::Log,
                timeout: DEFAULT_DELIVERY_TIMEOUT,
            }],
        }
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Longest a full fan-out can take: every target's deadline back to
    /// back, plus a second of scheduling slack
    pub fn delivery_bound(&self) -> Duration {
        self.targets
            .iter()
            .map(|t| t.timeout)
            .sum::<Duration>()
            + Duration::from_secs(1)
    }

    /// Send to a single target
    async fn notify_target(&self, target: &Target, message: &AlertMessage) -> Result<(), NotifierError> {
        match target {
            Target::Log => {
                tracing::warn!(
                    subject = %message.subject,
                    groups = message.observations.len(),
                    "Alert triggered:\n{}",
                    message.table
                );
                Ok(())
            }
            Target::Webhook {
                client,
                url,
                headers,
            } => Self::send_webhook(client, url, headers, message).await,
            Target::Email(email) => Self::send_email(email, message).await,
        }
    }

    /// Send webhook notification
    async fn send_webhook(
        client: &reqwest::Client,
        url: &str,
        headers: &HashMap<String, String>,
        message: &AlertMessage,
    ) -> Result<(), NotifierError> {
        let payload = serde_json::json!({
            "subject": message.subject,
            "body": message.body(),
            "groups": message.observations,
            "timestamp": message.generated_at.to_rfc3339(),
        });

        let mut request = client.post(url).json(&payload);

        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifierError::Webhook(format!("Failed to send webhook: {}", e)))?;

        if !response.status().is_success() {
            return Err(NotifierError::Webhook(format!(
                "Webhook returned status {}",
                response.status()
            )));
        }

        tracing::debug!(url = %url, "Webhook notification sent");

        Ok(())
    }

    async fn send_email(email: &EmailTarget, message: &AlertMessage) -> Result<(), NotifierError> {
        let mut builder = Message::builder()
            .from(email.from.clone())
            .subject(message.subject.clone())
            .header(ContentType::TEXT_HTML);
        for to in &email.recipients {
            builder = builder.to(to.clone());
        }

        let mail = builder
            .body(message.html_body())
            .map_err(|e| NotifierError::Email(e.to_string()))?;

        email
            .transport
            .send(mail)
            .await
            .map_err(|e| NotifierError::Email(e.to_string()))?;

        tracing::info!(
            relay = %email.relay_host,
            recipients = email.recipients.len(),
            "Email alert sent"
        );
        Ok(())
    }
}

#[async_trait]
impl AlertChannel for Notifier {
    async fn notify(&self, message: &AlertMessage) -> Result<(), NotifierError> {
        let mut errors = Vec::new();

        for bounded in &self.targets {
            let result = tokio::time::timeout(
                bounded.timeout,
                self.notify_target(&bounded.target, message),
            )
            .await
            .unwrap_or_else(|_| Err(NotifierError::Timeout(bounded.timeout)));

            if let Err(e) = result {
                errors.push(e);
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(NotifierError::Multiple(errors)),
        }
    }
}

impl BoundedTarget {
    fn build(target: NotifyTarget) -> Result<Self, NotifierError> {
        let timeout = match &target {
            NotifyTarget::Email(settings) => settings.timeout,
            NotifyTarget::Log | NotifyTarget::Webhook { .. } => DEFAULT_DELIVERY_TIMEOUT,
        };
        Ok(Self {
            target: Target::build(target)?,
            timeout,
        })
    }
}

impl Target {
    fn build(target: NotifyTarget) -> Result<Self, NotifierError> {
        match target {
            NotifyTarget::Log => Ok(Target::Log),
            NotifyTarget::Webhook { url, headers } => {
                let client = reqwest::Client::builder()
                    .timeout(DEFAULT_DELIVERY_TIMEOUT)
                    .build()
                    .map_err(|e| NotifierError::Webhook(e.to_string()))?;
                Ok(Target::Webhook {
                    client,
                    url,
                    headers,
                })
            }
            NotifyTarget::Email(settings) => EmailTarget::build(settings).map(Target::Email),
        }
    }
}

impl EmailTarget {
    fn build(settings: EmailSettings) -> Result<Self, NotifierError> {
        if settings.recipients.is_empty() {
            return Err(NotifierError::NoRecipients);
        }

        let from: Mailbox = settings.from.parse()?;
        let recipients = settings
            .recipients
            .iter()
            .map(|r| r.parse::<Mailbox>())
            .collect::<Result<Vec<_>, _>>()?;

        // Upgrade to TLS when the relay offers STARTTLS, plain otherwise
        let tls = TlsParameters::new(settings.relay_host.clone())
            .map_err(|e| NotifierError::Email(e.to_string()))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.relay_host)
            .port(settings.port)
            .tls(Tls::Opportunistic(tls))
            .timeout(Some(settings.timeout));

        if let (Some(user), Some(pass)) = (settings.user, settings.password) {
            builder = builder.credentials(Credentials::new(user, pass));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            recipients,
            relay_host: settings.relay_host,
        })
    }
}

/// Notifier errors
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Email error: {0}")]
    Email(String),

    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Email target has no recipients")]
    NoRecipients,

    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("Multiple notification failures: {0:?}")]
    Multiple(Vec<NotifierError>),
}
