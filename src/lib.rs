//! Remote control for a network-attached power switch.
//!
//! The switch listens on an MQTT broker for `ON`/`OFF` power commands and
//! for weekly timer records. This crate keeps a resilient broker session,
//! encodes user intent into the device's payloads and tracks what the user
//! last asked for, so a UI only has to render a [`DeviceSnapshot`] and call
//! into [`SwitchRemote`].
//!
//! ```rust,no_run
//! use switch_remote::{ScheduleAction, ScheduleSpec, SwitchConfig, SwitchRemote, TimeOfDay, Weekdays};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut remote = SwitchRemote::from_config(&SwitchConfig::default())?;
//! remote.connect()?;
//!
//! let mut state = remote.subscribe();
//! state.wait_for(|s| s.is_connected()).await?;
//!
//! remote.toggle()?;
//! remote.schedule(&ScheduleSpec::new(
//!     Weekdays::NONE,
//!     TimeOfDay::new(18, 0)?,
//!     ScheduleAction::Off,
//! ))?;
//!
//! remote.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod device_state;
pub mod mqtt;
pub mod remote;

pub use config::{ConfigError, SwitchConfig};
pub use device_state::{ConnectionState, DeviceSnapshot, DeviceStateTracker, PowerState};
pub use mqtt::error::{CommandError, ConnectionError, EncodingError, TransportError};
pub use mqtt::payload::{
    encode_power, encode_schedule, PowerCommand, ScheduleAction, ScheduleSpec, TimeOfDay,
    TimerPayload, Weekdays,
};
pub use remote::SwitchRemote;
