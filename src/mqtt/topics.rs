//! Command topics of a single switch device

use super::error::EncodingError;

const COMMAND_PREFIX: &str = "cmnd";
const POWER_COMMAND: &str = "POWER";
const TIMER_COMMAND: &str = "Timer";
const MAX_TIMER_SLOT: u8 = 16;

/// Fully resolved topic names for one device.
///
/// The device address segment comes from configuration, e.g. `messi` gives
/// `cmnd/messi/POWER` and `cmnd/messi/Timer1`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceTopics {
    power: String,
    timer: String,
}

impl DeviceTopics {
    pub fn new(device: &str, timer_slot: u8) -> Result<Self, EncodingError> {
        if !(1..=MAX_TIMER_SLOT).contains(&timer_slot) {
            return Err(EncodingError::TimerSlot(timer_slot));
        }
        Ok(Self {
            power: format!("{COMMAND_PREFIX}/{device}/{POWER_COMMAND}"),
            timer: format!("{COMMAND_PREFIX}/{device}/{TIMER_COMMAND}{timer_slot}"),
        })
    }

    pub fn power(&self) -> &str {
        &self.power
    }

    pub fn timer(&self) -> &str {
        &self.timer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_topics_from_device_segment() {
        let topics = DeviceTopics::new("messi", 1).unwrap();
        assert_eq!(topics.power(), "cmnd/messi/POWER");
        assert_eq!(topics.timer(), "cmnd/messi/Timer1");

        let topics = DeviceTopics::new("hall", 16).unwrap();
        assert_eq!(topics.timer(), "cmnd/hall/Timer16");
    }

    #[test]
    fn rejects_unknown_timer_slots() {
        assert_eq!(
            DeviceTopics::new("messi", 0),
            Err(EncodingError::TimerSlot(0))
        );
        assert_eq!(
            DeviceTopics::new("messi", 17),
            Err(EncodingError::TimerSlot(17))
        );
    }
}
