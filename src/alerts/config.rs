//! Notification target configuration

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_SMTP_PORT: u16 = 25;
pub const DEFAULT_FROM_ADDRESS: &str = "Stage Monitor <no_reply@localhost>";
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Where alerts are delivered
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NotifyTarget {
    /// Log to tracing
    Log,
    /// HTTP webhook
    Webhook {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// SMTP relay
    Email(EmailSettings),
}

/// SMTP relay settings
#[derive(Clone, Serialize, Deserialize)]
pub struct EmailSettings {
    pub relay_host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    /// RFC 5322 mailbox, e.g. `Monitor <noreply@example.com>`
    pub from: String,
    pub recipients: Vec<String>,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl EmailSettings {
    pub fn new(relay_host: impl Into<String>, recipients: Vec<String>) -> Self {
        Self {
            relay_host: relay_host.into(),
            port: DEFAULT_SMTP_PORT,
            user: None,
            password: None,
            from: DEFAULT_FROM_ADDRESS.to_string(),
            recipients,
            timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }
}

// Keeps the password out of logs
impl std::fmt::Debug for EmailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailSettings")
            .field("relay_host", &self.relay_host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("from", &self.from)
            .field("recipients", &self.recipients)
            .field("timeout", &self.timeout)
            .finish()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
