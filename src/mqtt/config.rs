use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Broker transport selected from the URL scheme
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrokerScheme {
    Tcp,
    Tls,
    Ws,
    Wss,
}

impl BrokerScheme {
    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_lowercase().as_str() {
            "mqtt" | "tcp" => Some(BrokerScheme::Tcp),
            "mqtts" | "ssl" => Some(BrokerScheme::Tls),
            "ws" => Some(BrokerScheme::Ws),
            "wss" => Some(BrokerScheme::Wss),
            _ => None,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            BrokerScheme::Tcp => 1883,
            BrokerScheme::Tls => 8883,
            BrokerScheme::Ws => 80,
            BrokerScheme::Wss => 443,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerScheme::Tcp => "mqtt",
            BrokerScheme::Tls => "mqtts",
            BrokerScheme::Ws => "ws",
            BrokerScheme::Wss => "wss",
        }
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self, BrokerScheme::Ws | BrokerScheme::Wss)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid broker URL '{url}': {reason}")]
pub struct BrokerUrlError {
    pub url: String,
    pub reason: &'static str,
}

/// Parsed broker endpoint, e.g. `wss://broker.emqx.io:8084/mqtt`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerUrl {
    pub scheme: BrokerScheme,
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl BrokerUrl {
    /// Parses `scheme://host[:port][/path]`. A bare `host[:port]` is plain TCP.
    pub fn parse(url: &str) -> Result<Self, BrokerUrlError> {
        let error = |reason| BrokerUrlError {
            url: url.to_string(),
            reason,
        };

        let trimmed = url.trim();
        let (scheme, rest) = match trimmed.split_once("://") {
            Some((prefix, rest)) => (
                BrokerScheme::from_prefix(prefix).ok_or_else(|| error("unsupported scheme"))?,
                rest,
            ),
            None => (BrokerScheme::Tcp, trimmed),
        };

        let (authority, path) = match rest.find('/') {
            Some(index) => (&rest[..index], &rest[index..]),
            None => (rest, ""),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>().map_err(|_| error("invalid port"))?,
            ),
            None => (authority, scheme.default_port()),
        };

        if host.is_empty() {
            return Err(error("missing host"));
        }
        if port == 0 {
            return Err(error("invalid port"));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// Address handed to the MQTT client. Websocket transports expect the
    /// whole URL, TCP and TLS only the host name.
    pub fn client_address(&self) -> String {
        if self.scheme.is_websocket() {
            self.to_string()
        } else {
            self.host.clone()
        }
    }
}

impl fmt::Display for BrokerUrl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}{}",
            self.scheme.as_str(),
            self.host,
            self.port,
            self.path
        )
    }
}

/// Per-connection settings consumed by the connection manager
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionOptions {
    /// A random suffix is appended for every connection attempt so two
    /// running clients never take over each other's broker session.
    pub client_id_prefix: String,
    pub reconnect_interval: Duration,
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
    /// Capacity of the transport's outbound request queue
    pub request_capacity: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            client_id_prefix: "rn_led_".to_string(),
            reconnect_interval: Duration::from_millis(1000),
            connect_timeout: Duration::from_millis(5000),
            keep_alive: Duration::from_secs(30),
            request_capacity: 100,
        }
    }
}

impl ConnectionOptions {
    pub fn generate_client_id(&self) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        format!("{}{}", self.client_id_prefix, &token[..6])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_websocket_url_with_path() {
        let url = BrokerUrl::parse("wss://broker.emqx.io:8084/mqtt").unwrap();
        assert_eq!(url.scheme, BrokerScheme::Wss);
        assert_eq!(url.host, "broker.emqx.io");
        assert_eq!(url.port, 8084);
        assert_eq!(url.path, "/mqtt");
        assert_eq!(url.client_address(), "wss://broker.emqx.io:8084/mqtt");
    }

    #[test]
    fn applies_default_ports() {
        assert_eq!(BrokerUrl::parse("mqtt://localhost").unwrap().port, 1883);
        assert_eq!(BrokerUrl::parse("mqtts://localhost").unwrap().port, 8883);
        assert_eq!(BrokerUrl::parse("ws://localhost/mqtt").unwrap().port, 80);

        let bare = BrokerUrl::parse("10.0.0.4:1884").unwrap();
        assert_eq!(bare.scheme, BrokerScheme::Tcp);
        assert_eq!(bare.port, 1884);
        assert_eq!(bare.client_address(), "10.0.0.4");
    }

    #[test]
    fn rejects_malformed_urls() {
        assert_eq!(
            BrokerUrl::parse("http://host").unwrap_err().reason,
            "unsupported scheme"
        );
        assert_eq!(
            BrokerUrl::parse("mqtt://host:notaport").unwrap_err().reason,
            "invalid port"
        );
        assert_eq!(
            BrokerUrl::parse("mqtt://:1883").unwrap_err().reason,
            "missing host"
        );
    }

    #[test]
    fn client_ids_carry_prefix_and_random_suffix() {
        let options = ConnectionOptions::default();
        let first = options.generate_client_id();
        let second = options.generate_client_id();

        assert!(first.starts_with("rn_led_"));
        assert_eq!(first.len(), "rn_led_".len() + 6);
        assert!(first["rn_led_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }
}
