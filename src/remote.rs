//! Switch remote - the surface consumed by the presentation layer
//!
//! Bundles the connection manager, the command channel and the device state
//! tracker behind the handful of calls a UI needs:
//!
//! ```text
//! connect / disconnect    ─► ConnectionManager
//! toggle / set_power      ─► CommandChannel::send_power
//! schedule                ─► CommandChannel::send_schedule
//! snapshot / subscribe    ─► DeviceStateTracker
//! ```

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::config::{ConfigError, SwitchConfig};
use crate::device_state::{DeviceSnapshot, DeviceStateTracker, PowerState};
use crate::mqtt::command_channel::CommandChannel;
use crate::mqtt::config::{BrokerUrl, ConnectionOptions};
use crate::mqtt::connection::ConnectionManager;
use crate::mqtt::error::{CommandError, ConnectionError};
use crate::mqtt::payload::{ScheduleSpec, TimerPayload};
use crate::mqtt::transport::{Dialer, MqttDialer};

#[derive(Debug)]
pub struct SwitchRemote {
    endpoint: BrokerUrl,
    options: ConnectionOptions,
    tracker: DeviceStateTracker,
    manager: ConnectionManager,
    channel: CommandChannel,
}

impl SwitchRemote {
    /// Remote talking to a real broker through rumqttc
    pub fn from_config(config: &SwitchConfig) -> Result<Self, ConfigError> {
        Self::with_dialer(config, Arc::new(MqttDialer))
    }

    pub fn with_dialer(config: &SwitchConfig, dialer: Arc<dyn Dialer>) -> Result<Self, ConfigError> {
        let endpoint = config.broker_url()?;
        let topics = config.topics()?;
        let tracker = DeviceStateTracker::new();

        info!(
            "Switch remote for {} via {}",
            topics.power(),
            endpoint
        );

        Ok(Self {
            endpoint,
            options: config.connection_options(),
            manager: ConnectionManager::new(dialer, tracker.clone()),
            channel: CommandChannel::new(topics, tracker.clone()),
            tracker,
        })
    }

    /// Starts the background connection. Returns immediately, progress is
    /// reported through [`SwitchRemote::subscribe`].
    pub fn connect(&mut self) -> Result<(), ConnectionError> {
        self.manager
            .start(self.endpoint.clone(), self.options.clone())
    }

    pub async fn disconnect(&mut self) {
        self.manager.stop().await;
    }

    /// Flips the last requested power state and returns the new one
    pub fn toggle(&self) -> Result<PowerState, CommandError> {
        let target = self.tracker.snapshot().power.toggled();
        self.set_power(target.is_on())
    }

    pub fn set_power(&self, on: bool) -> Result<PowerState, CommandError> {
        self.channel.send_power(&self.manager, on)?;
        Ok(PowerState::from(on))
    }

    pub fn schedule(&self, spec: &ScheduleSpec) -> Result<TimerPayload, CommandError> {
        self.channel.send_schedule(&self.manager, spec)
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.tracker.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<DeviceSnapshot> {
        self.tracker.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_state::ConnectionState;
    use crate::mqtt::payload::{ScheduleAction, TimeOfDay, Weekdays};
    use crate::mqtt::transport::fake::{DialBehavior, FakeBroker};
    use chrono::Weekday;

    async fn connected_remote() -> (SwitchRemote, FakeBroker) {
        let broker = FakeBroker::new(DialBehavior::Accept);
        let config = SwitchConfig {
            broker_url: "mqtt://localhost".to_string(),
            ..SwitchConfig::default()
        };
        let mut remote = SwitchRemote::with_dialer(&config, broker.dialer()).unwrap();
        let mut rx = remote.subscribe();

        remote.connect().unwrap();
        rx.wait_for(|s| s.is_connected()).await.unwrap();
        (remote, broker)
    }

    #[tokio::test]
    async fn toggle_alternates_power() {
        let (mut remote, broker) = connected_remote().await;

        assert_eq!(remote.toggle().unwrap(), PowerState::On);
        assert_eq!(remote.toggle().unwrap(), PowerState::Off);
        assert_eq!(remote.toggle().unwrap(), PowerState::On);
        assert_eq!(remote.snapshot().power, PowerState::On);

        let payloads: Vec<String> = broker
            .published()
            .iter()
            .map(|m| m.payload().to_string())
            .collect();
        assert_eq!(payloads, ["ON", "OFF", "ON"]);

        remote.disconnect().await;
        assert_eq!(remote.snapshot().connection, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn toggle_while_disconnected_keeps_power() {
        let broker = FakeBroker::new(DialBehavior::Accept);
        let remote = SwitchRemote::with_dialer(&SwitchConfig::default(), broker.dialer()).unwrap();

        assert!(matches!(remote.toggle(), Err(CommandError::NoActiveSession)));
        assert_eq!(remote.snapshot().power, PowerState::Off);
        assert_eq!(broker.dials(), 0);
    }

    #[tokio::test]
    async fn schedule_goes_to_configured_timer() {
        let (mut remote, broker) = connected_remote().await;

        let spec = ScheduleSpec::new(
            Weekdays::from_days(&[Weekday::Mon, Weekday::Wed, Weekday::Fri]),
            TimeOfDay::new(7, 30).unwrap(),
            ScheduleAction::On,
        );
        let payload = remote.schedule(&spec).unwrap();
        assert_eq!(payload.days, "0101010");

        let published = broker.published();
        assert_eq!(published[0].topic(), "cmnd/messi/Timer1");
        assert_eq!(
            published[0].payload(),
            r#"{"Enable":1,"Mode":0,"Time":"07:30","Window":0,"Days":"0101010","Repeat":0,"Output":1,"Action":1}"#
        );

        remote.disconnect().await;
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SwitchConfig {
            timer_slot: 42,
            ..SwitchConfig::default()
        };
        assert!(SwitchRemote::from_config(&config).is_err());
    }
}
