use std::fmt;

const PREVIEW_LEN: usize = 32;

/// A single message handed to the transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    topic: String,
    payload: String,
}

impl fmt::Display for OutboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = self.payload.chars().take(PREVIEW_LEN).collect();
        let ellipsis = if self.payload.chars().count() > PREVIEW_LEN {
            "…"
        } else {
            ""
        };
        write!(f, "{} -> {}{}", self.topic, preview, ellipsis)
    }
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        OutboundMessage {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_truncates_long_payloads() {
        let short = OutboundMessage::new("cmnd/messi/POWER", "ON");
        assert_eq!(short.to_string(), "cmnd/messi/POWER -> ON");

        let long = OutboundMessage::new("t", "x".repeat(40));
        assert_eq!(long.to_string(), format!("t -> {}…", "x".repeat(32)));
        assert_eq!(long.payload(), "x".repeat(40));
    }
}
