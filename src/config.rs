//! Daemon configuration
//!
//! Loaded once at startup from `STAGEWATCH_*` environment variables and
//! passed explicitly to the components that need it.
//!
//! | Variable                        | Required | Default                              |
//! |---------------------------------|----------|--------------------------------------|
//! | `STAGEWATCH_DB_HOST`            | no       | `localhost`                          |
//! | `STAGEWATCH_DB_PORT`            | no       | `5432`                               |
//! | `STAGEWATCH_DB_NAME`            | yes      | --                                   |
//! | `STAGEWATCH_DB_USER`            | no       | --                                   |
//! | `STAGEWATCH_DB_PASSWORD`        | no       | --                                   |
//! | `STAGEWATCH_DB_QUERY`           | no       | grouped batch count query            |
//! | `STAGEWATCH_DB_TIMEOUT_SECS`    | no       | `5`                                  |
//! | `STAGEWATCH_SMTP_HOST`          | no       | -- (log-only alerts when unset)      |
//! | `STAGEWATCH_SMTP_PORT`          | no       | `25`                                 |
//! | `STAGEWATCH_SMTP_USER`          | no       | --                                   |
//! | `STAGEWATCH_SMTP_PASSWORD`      | no       | --                                   |
//! | `STAGEWATCH_SMTP_FROM`          | no       | `Stage Monitor <no_reply@localhost>` |
//! | `STAGEWATCH_SMTP_TO`            | with host| --                                   |
//! | `STAGEWATCH_SMTP_TIMEOUT_SECS`  | no       | `10`                                 |
//! | `STAGEWATCH_ALERT_SUBJECT`      | no       | `!! Batches in Exception !!`         |
//! | `STAGEWATCH_WEBHOOK_URL`        | no       | --                                   |
//! | `STAGEWATCH_POLL_INTERVAL_SECS` | no       | `60`                                 |
//! | `STAGEWATCH_EXCEPTION_MARKER`   | no       | `Exceptions`                         |
//! | `STAGEWATCH_LOG_FILE`           | no       | --                                   |

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::alerts::config::{
    EmailSettings, NotifyTarget, DEFAULT_DELIVERY_TIMEOUT, DEFAULT_FROM_ADDRESS, DEFAULT_SMTP_PORT,
};
use crate::alerts::format::DEFAULT_SUBJECT;
use crate::alerts::tracker::DEFAULT_EXCEPTION_MARKER;
use crate::source::sql::DEFAULT_QUERY;

const ENV_PREFIX: &str = "STAGEWATCH_";

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Data source connection settings
#[derive(Clone)]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub query: String,
    /// Bounds both the connection attempt and the query
    pub timeout: Duration,
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Full daemon configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub source: SourceConfig,
    /// `None` sends alerts to the log only
    pub email: Option<EmailSettings>,
    pub webhook_url: Option<String>,
    pub subject: String,
    pub poll_interval: Duration,
    pub exception_marker: String,
    pub log_file: Option<PathBuf>,
}

impl MonitorConfig {
    /// Load from the process environment, after reading `.env` if present
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve full variable names
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let source = SourceConfig {
            host: vars.string("DB_HOST").unwrap_or_else(|| DEFAULT_DB_HOST.to_string()),
            port: vars.parse("DB_PORT")?.unwrap_or(DEFAULT_DB_PORT),
            database: vars
                .string("DB_NAME")
                .ok_or_else(|| ConfigError::Missing(var_name("DB_NAME")))?,
            user: vars.string("DB_USER"),
            password: vars.string("DB_PASSWORD"),
            query: vars.string("DB_QUERY").unwrap_or_else(|| DEFAULT_QUERY.to_string()),
            timeout: vars.secs("DB_TIMEOUT_SECS")?.unwrap_or(DEFAULT_SOURCE_TIMEOUT),
        };

        let email = match vars.string("SMTP_HOST") {
            Some(relay_host) => {
                let recipients: Vec<String> = vars
                    .string("SMTP_TO")
                    .map(|to| {
                        to.split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();
                if recipients.is_empty() {
                    return Err(ConfigError::Missing(var_name("SMTP_TO")));
                }

                Some(EmailSettings {
                    relay_host,
                    port: vars.parse("SMTP_PORT")?.unwrap_or(DEFAULT_SMTP_PORT),
                    user: vars.string("SMTP_USER"),
                    password: vars.string("SMTP_PASSWORD"),
                    from: vars
                        .string("SMTP_FROM")
                        .unwrap_or_else(|| DEFAULT_FROM_ADDRESS.to_string()),
                    recipients,
                    timeout: vars
                        .secs("SMTP_TIMEOUT_SECS")?
                        .unwrap_or(DEFAULT_DELIVERY_TIMEOUT),
                })
            }
            None => None,
        };

        let exception_marker = vars
            .raw("EXCEPTION_MARKER")
            .unwrap_or_else(|| DEFAULT_EXCEPTION_MARKER.to_string());
        if exception_marker.is_empty() {
            return Err(ConfigError::Invalid {
                var: var_name("EXCEPTION_MARKER"),
                reason: "must not be empty".to_string(),
            });
        }

        Ok(Self {
            source,
            email,
            webhook_url: vars.string("WEBHOOK_URL"),
            subject: vars
                .string("ALERT_SUBJECT")
                .unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
            poll_interval: vars
                .secs("POLL_INTERVAL_SECS")?
                .unwrap_or(DEFAULT_POLL_INTERVAL),
            exception_marker,
            log_file: vars.string("LOG_FILE").map(PathBuf::from),
        })
    }

    /// Notification targets implied by this configuration. The log target
    /// is always present.
    pub fn notify_targets(&self) -> Vec<NotifyTarget> {
        let mut targets = vec![NotifyTarget::Log];
        if let Some(email) = &self.email {
            targets.push(NotifyTarget::Email(email.clone()));
        }
        if let Some(url) = &self.webhook_url {
            targets.push(NotifyTarget::Webhook {
                url: url.clone(),
                headers: HashMap::new(),
            });
        }
        targets
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(&var_name(key))
    }

    /// Trimmed value, with blank treated as unset
    fn string(&self, key: &str) -> Option<String> {
        self.raw(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|v| {
                v.parse::<T>().map_err(|e| ConfigError::Invalid {
                    var: var_name(key),
                    reason: format!("{:?}: {}", v, e),
                })
            })
            .transpose()
    }

    /// Positive whole seconds
    fn secs(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        match self.parse::<u64>(key)? {
            Some(0) => Err(ConfigError::Invalid {
                var: var_name(key),
                reason: "must be greater than zero".to_string(),
            }),
            other => Ok(other.map(Duration::from_secs)),
        }
    }
}

fn var_name(key: &str) -> String {
    format!("{}{}", ENV_PREFIX, key)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required variable {0}")]
    Missing(String),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: String, reason: String },
}
