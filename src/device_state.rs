//! Device State Tracker
//!
//! Holds the client's last-known view of the switch: broker connectivity and
//! the last requested power state. Both facts live in one snapshot behind a
//! `watch` channel, so a subscriber always sees a consistent pair and never a
//! half-applied transition.
//!
//! `power` reflects intent, not confirmed device state. It is updated when a
//! power command was handed to the transport; the device never acknowledges.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};
use tokio::sync::watch;
use tracing::debug;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Hash)]
pub enum PowerState {
    On,
    #[default]
    Off,
}

impl PowerState {
    pub fn is_on(&self) -> bool {
        matches!(self, PowerState::On)
    }

    pub fn toggled(&self) -> Self {
        match self {
            PowerState::On => PowerState::Off,
            PowerState::Off => PowerState::On,
        }
    }
}

impl From<bool> for PowerState {
    fn from(on: bool) -> Self {
        if on {
            PowerState::On
        } else {
            PowerState::Off
        }
    }
}

/// Read-only view handed to the presentation layer
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceSnapshot {
    pub connection: ConnectionState,
    pub power: PowerState,
    /// Last transport error absorbed by the reconnect loop
    pub last_error: Option<String>,
    pub updated_at: DateTime<Local>,
}

impl Default for DeviceSnapshot {
    fn default() -> Self {
        Self {
            connection: ConnectionState::default(),
            power: PowerState::default(),
            last_error: None,
            updated_at: Local::now(),
        }
    }
}

impl DeviceSnapshot {
    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }
}

/// Shared handle to the device snapshot. Cloning is cheap and every clone
/// publishes into the same channel.
#[derive(Clone, Debug)]
pub struct DeviceStateTracker {
    sender: Arc<watch::Sender<DeviceSnapshot>>,
}

impl Default for DeviceStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStateTracker {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(DeviceSnapshot::default());
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.sender.borrow().clone()
    }

    /// Receiver that wakes on every change, no polling needed
    pub fn subscribe(&self) -> watch::Receiver<DeviceSnapshot> {
        self.sender.subscribe()
    }

    /// Records a connectivity transition. `error` replaces the stored error
    /// only when present, so a later `Connecting` keeps the cause visible.
    pub(crate) fn set_connection(&self, state: ConnectionState, error: Option<String>) {
        self.sender.send_if_modified(|snapshot| {
            let error_changed = error.is_some() && snapshot.last_error != error;
            if snapshot.connection == state && !error_changed {
                return false;
            }
            debug!("Connection state {} -> {}", snapshot.connection, state);
            snapshot.connection = state;
            if error.is_some() {
                snapshot.last_error = error;
            } else if state == ConnectionState::Connected {
                snapshot.last_error = None;
            }
            snapshot.updated_at = Local::now();
            true
        });
    }

    pub(crate) fn set_power(&self, power: PowerState) {
        self.sender.send_if_modified(|snapshot| {
            if snapshot.power == power {
                return false;
            }
            debug!("Power state {:?} -> {:?}", snapshot.power, power);
            snapshot.power = power;
            snapshot.updated_at = Local::now();
            true
        });
    }
}
