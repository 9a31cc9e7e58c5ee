//! Broker endpoint description.
//!
//! A `BrokerEndpoint` is built once at startup from configuration and never
//! changes afterwards.

use std::fmt;
use std::time::Duration;

use url::Url;

use crate::utils::BrokerError;

pub const DEFAULT_TCP_PORT: u16 = 61616;
pub const DEFAULT_WS_PORT: u16 = 61614;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// STOMP frames straight over a TCP stream.
    Tcp,
    /// STOMP frames carried in WebSocket messages.
    Ws,
}

/// Heart-beat intervals in milliseconds, as sent in the CONNECT frame.
/// `send_ms` is how often we can send, `receive_ms` how often we want to hear
/// from the broker. Zero disables that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    pub send_ms: u64,
    pub receive_ms: u64,
}

impl Heartbeat {
    pub fn new(send_ms: u64, receive_ms: u64) -> Self {
        Self {
            send_ms,
            receive_ms,
        }
    }

    /// Negotiate against the broker's `heart-beat` header.
    ///
    /// Returns `(send_every, expect_within)`; `None` when that direction is off.
    pub fn negotiate(&self, server: Heartbeat) -> (Option<Duration>, Option<Duration>) {
        let pick = |ours: u64, theirs: u64| {
            if ours == 0 || theirs == 0 {
                None
            } else {
                Some(Duration::from_millis(ours.max(theirs)))
            }
        };
        (
            pick(self.send_ms, server.receive_ms),
            pick(self.receive_ms, server.send_ms),
        )
    }

    /// Parse a `cx,cy` header value. Malformed values disable heart-beats.
    pub fn parse(value: &str) -> Self {
        let mut parts = value.split(',').map(|p| p.trim().parse::<u64>().ok());
        match (parts.next().flatten(), parts.next().flatten()) {
            (Some(send_ms), Some(receive_ms)) => Self::new(send_ms, receive_ms),
            _ => Self::default(),
        }
    }
}

impl fmt::Display for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.send_ms, self.receive_ms)
    }
}

#[derive(Clone)]
pub struct BrokerEndpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Value of the CONNECT `host` header.
    pub vhost: String,
    pub connect_timeout: Duration,
    pub heartbeat: Heartbeat,
}

impl BrokerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::Tcp,
            host: host.into(),
            port,
            username: String::new(),
            password: String::new(),
            vhost: "/".to_string(),
            connect_timeout: Duration::from_secs(10),
            heartbeat: Heartbeat::new(5000, 5000),
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Build from a broker URL such as `tcp://shared-activemq:61616` or
    /// `ws://localhost:61614`. Credentials in the URL override the defaults.
    pub fn from_url(raw: &str) -> Result<Self, BrokerError> {
        let url = Url::parse(raw)?;
        let scheme = match url.scheme() {
            "tcp" | "stomp" => Scheme::Tcp,
            "ws" => Scheme::Ws,
            other => {
                return Err(BrokerError::Connection {
                    endpoint: raw.to_string(),
                    reason: format!("unsupported scheme `{other}`"),
                });
            }
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| BrokerError::Connection {
                endpoint: raw.to_string(),
                reason: "missing host".to_string(),
            })?;
        // `Url::port` hides a port equal to the scheme's well-known one
        // (`ws://host:80`), so fall back to reading the authority.
        let port = url
            .port()
            .or_else(|| explicit_port(raw))
            .unwrap_or(match scheme {
                Scheme::Tcp => DEFAULT_TCP_PORT,
                Scheme::Ws => DEFAULT_WS_PORT,
            });

        let mut endpoint = Self::new(host, port);
        endpoint.scheme = scheme;
        if !url.username().is_empty() {
            endpoint.username = url.username().to_string();
            endpoint.password = url.password().unwrap_or_default().to_string();
        }
        Ok(endpoint)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}/", self.host, self.port)
    }
}

fn explicit_port(raw: &str) -> Option<u16> {
    let (_, rest) = raw.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit('@').next()?;
    let (_, port) = host_port.rsplit_once(':')?;
    port.parse().ok()
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.scheme {
            Scheme::Tcp => "tcp",
            Scheme::Ws => "ws",
        };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}

// Keeps the password out of logs.
impl fmt::Debug for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerEndpoint")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("vhost", &self.vhost)
            .field("connect_timeout", &self.connect_timeout)
            .field("heartbeat", &self.heartbeat)
            .finish_non_exhaustive()
    }
}
