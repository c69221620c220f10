//! Transport seam between the connection manager and the MQTT client
//!
//! The connection manager only talks to three small traits:
//!
//! ```text
//! Dialer ──dial()──► (Link, LinkEvents)
//!                      │       │
//!                      │       └─ driven by the reconnect loop (network I/O)
//!                      └───────── stored in the session slot, borrowed per command
//! ```
//!
//! [`MqttDialer`] implements them on top of `rumqttc`. Tests use the scripted
//! broker in [`fake`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError as MqttConnectionError, Event, EventLoop,
    MqttOptions, Packet, QoS, Transport,
};
use tracing::debug;

use super::config::{BrokerScheme, BrokerUrl, ConnectionOptions};
use super::error::TransportError;
use super::message::OutboundMessage;

const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

pub type EventFuture<'a> =
    Pin<Box<dyn Future<Output = Result<LinkEvent, TransportError>> + Send + 'a>>;

/// Events surfaced from the network side of a session
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// Handshake acknowledged by the broker
    Connected,
    /// Any other traffic (pings, publish acks, ...)
    Activity,
}

/// Outbound half of a session
pub trait Link: fmt::Debug + Send + Sync {
    /// Hands one message to the transport and returns without waiting for the broker.
    fn publish(&self, message: &OutboundMessage) -> Result<(), TransportError>;
}

/// Network half of a session. Must be polled for the session to make progress.
pub trait LinkEvents: fmt::Debug + Send {
    fn next_event(&mut self) -> EventFuture<'_>;
}

/// Opens new sessions. One call per connection attempt.
pub trait Dialer: fmt::Debug + Send + Sync {
    fn dial(
        &self,
        endpoint: &BrokerUrl,
        client_id: &str,
        options: &ConnectionOptions,
    ) -> Result<(Box<dyn Link>, Box<dyn LinkEvents>), TransportError>;
}

/// `rumqttc` backed dialer
#[derive(Clone, Debug, Default)]
pub struct MqttDialer;

impl MqttDialer {
    fn mqtt_options(
        endpoint: &BrokerUrl,
        client_id: &str,
        options: &ConnectionOptions,
    ) -> MqttOptions {
        let mut mqtt_options = MqttOptions::new(client_id, endpoint.client_address(), endpoint.port);
        mqtt_options
            .set_keep_alive(options.keep_alive.max(MIN_KEEP_ALIVE))
            .set_clean_session(true);

        match endpoint.scheme {
            BrokerScheme::Tcp => {}
            BrokerScheme::Tls => {
                mqtt_options.set_transport(Transport::tls_with_default_config());
            }
            BrokerScheme::Ws => {
                mqtt_options.set_transport(Transport::Ws);
            }
            BrokerScheme::Wss => {
                mqtt_options.set_transport(Transport::wss_with_default_config());
            }
        }

        mqtt_options
    }
}

impl Dialer for MqttDialer {
    fn dial(
        &self,
        endpoint: &BrokerUrl,
        client_id: &str,
        options: &ConnectionOptions,
    ) -> Result<(Box<dyn Link>, Box<dyn LinkEvents>), TransportError> {
        debug!("Dialing {} as {}", endpoint, client_id);
        let mqtt_options = Self::mqtt_options(endpoint, client_id, options);
        let (client, event_loop) = AsyncClient::new(mqtt_options, options.request_capacity);

        Ok((
            Box::new(MqttLink { client }),
            Box::new(MqttEvents { event_loop }),
        ))
    }
}

struct MqttLink {
    client: AsyncClient,
}

impl fmt::Debug for MqttLink {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MqttLink").finish_non_exhaustive()
    }
}

impl Link for MqttLink {
    fn publish(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.client
            .try_publish(
                message.topic(),
                QoS::AtMostOnce,
                false,
                message.payload().as_bytes().to_vec(),
            )
            .map_err(|e| TransportError::Publish(e.to_string()))
    }
}

struct MqttEvents {
    event_loop: EventLoop,
}

impl fmt::Debug for MqttEvents {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MqttEvents").finish_non_exhaustive()
    }
}

impl LinkEvents for MqttEvents {
    fn next_event(&mut self) -> EventFuture<'_> {
        Box::pin(async move {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        Ok(LinkEvent::Connected)
                    } else {
                        Err(TransportError::Refused(format!("{:?}", ack.code)))
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => Err(TransportError::Closed(
                    "broker sent DISCONNECT".to_string(),
                )),
                Ok(_) => Ok(LinkEvent::Activity),
                Err(MqttConnectionError::ConnectionRefused(code)) => {
                    Err(TransportError::Refused(format!("{:?}", code)))
                }
                Err(e) => Err(TransportError::Network(e.to_string())),
            }
        })
    }
}
