//! # MQTT Command Protocol Layer
//!
//! Talks to a Tasmota-style power switch over an MQTT broker. The device listens
//! on two command topics, one for immediate power changes and one for a weekly
//! timer, and never answers. This module keeps the broker session alive and turns
//! user intent into the payloads the device expects.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker endpoint parsing and connection options
//! ├── error.rs            - Transport, encoding and command errors
//! ├── payload.rs          - Pure codec: power tokens and timer records
//! ├── topics.rs           - Per-device command topic names
//! ├── message.rs          - Outbound message record
//! ├── transport.rs        - Dialer/Link seam and the rumqttc implementation
//! ├── connection.rs       - Session lifecycle and unbounded reconnect loop
//! └── command_channel.rs  - One publish per command, fails fast when offline
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! toggle / schedule ──► payload ──► CommandChannel ──► ConnectionManager::with_session ──► broker
//!                                        │
//!                                        └──► DeviceStateTracker (optimistic power)
//! ```
//!
//! Transport failures are absorbed by the reconnect loop and only visible as
//! connection state changes. Command failures are returned to the caller.

pub mod command_channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod payload;
pub mod topics;
pub mod transport;
