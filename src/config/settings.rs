use std::time::Duration;

use serde::Deserialize;

use crate::transport::endpoint::{BrokerEndpoint, Heartbeat};
use crate::utils::BrokerError;

/// Top-level configuration settings for the application.
///
/// Includes the broker connection, delivery policy and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub delivery: DeliverySettings,
    pub logging: LoggingSettings,
}

/// How to reach the broker.
///
/// When `url` is set (for example `tcp://shared-activemq:61616`) it takes
/// precedence over `host` and `port`.
#[derive(Deserialize, Clone)]
pub struct BrokerSettings {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub vhost: String,
    pub connect_timeout_ms: u64,
    pub heartbeat_send_ms: u64,
    pub heartbeat_receive_ms: u64,
}

impl std::fmt::Debug for BrokerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSettings")
            .field("url", &self.url)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("vhost", &self.vhost)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("heartbeat_send_ms", &self.heartbeat_send_ms)
            .field("heartbeat_receive_ms", &self.heartbeat_receive_ms)
            .finish_non_exhaustive()
    }
}

/// Retry, backoff and subscription parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct DeliverySettings {
    pub destination: String,
    pub max_attempts: u32,
    pub send_retry_delay_ms: u64,
    pub resubscribe_delay_ms: u64,
    pub prefetch: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub delivery: Option<PartialDeliverySettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub vhost: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub heartbeat_send_ms: Option<u64>,
    pub heartbeat_receive_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialDeliverySettings {
    pub destination: Option<String>,
    pub max_attempts: Option<u32>,
    pub send_retry_delay_ms: Option<u64>,
    pub resubscribe_delay_ms: Option<u64>,
    pub prefetch: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

/// Defaults match the shared ActiveMQ deployment.
impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                url: None,
                host: "shared-activemq".to_string(),
                port: 61616,
                username: "admin".to_string(),
                password: "admin".to_string(),
                vhost: "/".to_string(),
                connect_timeout_ms: 10_000,
                heartbeat_send_ms: 5000,
                heartbeat_receive_ms: 5000,
            },
            delivery: DeliverySettings {
                destination: "/topic/book-purchases".to_string(),
                max_attempts: 3,
                send_retry_delay_ms: 2000,
                resubscribe_delay_ms: 5000,
                prefetch: 10,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Merge a partial configuration over the defaults.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let broker = partial.broker.unwrap_or_default();
        let delivery = partial.delivery.unwrap_or_default();
        let logging = partial.logging.unwrap_or_default();

        Settings {
            broker: BrokerSettings {
                url: broker.url.or(default.broker.url),
                host: broker.host.unwrap_or(default.broker.host),
                port: broker.port.unwrap_or(default.broker.port),
                username: broker.username.unwrap_or(default.broker.username),
                password: broker.password.unwrap_or(default.broker.password),
                vhost: broker.vhost.unwrap_or(default.broker.vhost),
                connect_timeout_ms: broker
                    .connect_timeout_ms
                    .unwrap_or(default.broker.connect_timeout_ms),
                heartbeat_send_ms: broker
                    .heartbeat_send_ms
                    .unwrap_or(default.broker.heartbeat_send_ms),
                heartbeat_receive_ms: broker
                    .heartbeat_receive_ms
                    .unwrap_or(default.broker.heartbeat_receive_ms),
            },
            delivery: DeliverySettings {
                destination: delivery.destination.unwrap_or(default.delivery.destination),
                max_attempts: delivery
                    .max_attempts
                    .unwrap_or(default.delivery.max_attempts),
                send_retry_delay_ms: delivery
                    .send_retry_delay_ms
                    .unwrap_or(default.delivery.send_retry_delay_ms),
                resubscribe_delay_ms: delivery
                    .resubscribe_delay_ms
                    .unwrap_or(default.delivery.resubscribe_delay_ms),
                prefetch: delivery.prefetch.unwrap_or(default.delivery.prefetch),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(default.logging.level),
            },
        }
    }

    /// Resolve the broker endpoint. Credentials embedded in `url` win over
    /// `username`/`password`.
    pub fn endpoint(&self) -> Result<BrokerEndpoint, BrokerError> {
        let broker = &self.broker;
        let mut endpoint = match broker.url.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => {
                let parsed = BrokerEndpoint::from_url(url)?;
                if parsed.username.is_empty() {
                    parsed.with_credentials(broker.username.as_str(), broker.password.as_str())
                } else {
                    parsed
                }
            }
            None => BrokerEndpoint::new(broker.host.as_str(), broker.port)
                .with_credentials(broker.username.as_str(), broker.password.as_str()),
        };
        endpoint.vhost = broker.vhost.clone();
        endpoint.connect_timeout = Duration::from_millis(broker.connect_timeout_ms);
        endpoint.heartbeat = Heartbeat::new(broker.heartbeat_send_ms, broker.heartbeat_receive_ms);
        Ok(endpoint)
    }
}
