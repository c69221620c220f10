//! Command Channel - outbound emission to the device command topics
//!
//! Each call encodes one intent, borrows the live session from the
//! [`ConnectionManager`] for exactly one publish and returns. There is no
//! retry, no queueing and no wait for an acknowledgement: a command issued
//! while not connected fails with [`CommandError::NoActiveSession`].

use tracing::{info, warn};

use super::connection::ConnectionManager;
use super::error::CommandError;
use super::message::OutboundMessage;
use super::payload::{encode_power, encode_schedule, ScheduleSpec, TimerPayload};
use super::topics::DeviceTopics;
use crate::device_state::DeviceStateTracker;

#[derive(Clone, Debug)]
pub struct CommandChannel {
    topics: DeviceTopics,
    tracker: DeviceStateTracker,
}

impl CommandChannel {
    pub fn new(topics: DeviceTopics, tracker: DeviceStateTracker) -> Self {
        Self { topics, tracker }
    }

    pub fn topics(&self) -> &DeviceTopics {
        &self.topics
    }

    /// Publishes `message` and runs `on_sent` while the session is still
    /// borrowed, so concurrent commands record their effects in publish order.
    fn emit(
        &self,
        session: &ConnectionManager,
        message: &OutboundMessage,
        on_sent: impl FnOnce(),
    ) -> Result<(), CommandError> {
        session
            .with_session(|link| {
                link.publish(message)?;
                on_sent();
                Ok(())
            })
            .inspect_err(|e| warn!("Dropped command for {}: {}", message.topic(), e))?;
        info!("Sent {}", message);
        Ok(())
    }

    /// Publishes `ON`/`OFF` and records the request as the new power state.
    ///
    /// The power state is only touched after the transport accepted the
    /// message, a failed call leaves it unchanged.
    pub fn send_power(
        &self,
        session: &ConnectionManager,
        target_on: bool,
    ) -> Result<OutboundMessage, CommandError> {
        let command = encode_power(target_on);
        let message = OutboundMessage::new(self.topics.power(), command.as_str());

        self.emit(session, &message, || self.tracker.set_power(target_on.into()))?;
        Ok(message)
    }

    /// Publishes the JSON timer record for `spec`.
    pub fn send_schedule(
        &self,
        session: &ConnectionManager,
        spec: &ScheduleSpec,
    ) -> Result<TimerPayload, CommandError> {
        let payload = encode_schedule(spec);
        let message = OutboundMessage::new(self.topics.timer(), payload.to_json()?);

        self.emit(session, &message, || {})?;
        Ok(payload)
    }
}
