//! Error types for the switch command protocol layer

use std::time::Duration;

use thiserror::Error;

/// Failures of the broker transport.
///
/// These never reach the presentation layer as fatal errors. The reconnect
/// loop absorbs them and they only show up as a state transition plus the
/// `last_error` field of the device snapshot. The one exception is
/// [`TransportError::Publish`], which is returned to whoever issued the command.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The broker answered the handshake with a non-success return code
    #[error("Connection refused by broker: {0}")]
    Refused(String),

    /// Socket, TLS or websocket level failure
    #[error("Network error: {0}")]
    Network(String),

    /// No handshake acknowledgement within the connect timeout
    #[error("Connect attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The broker or the event loop closed an established session
    #[error("Session closed: {0}")]
    Closed(String),

    /// The outbound request queue did not accept the message
    #[error("Publish rejected by transport: {0}")]
    Publish(String),
}

/// Precondition violations on schedule values.
///
/// The UI is expected to only hand over valid wall-clock values, but the
/// core checks anyway and refuses rather than clamping.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Hour out of range (0-23): {0}")]
    HourOutOfRange(u8),

    #[error("Minute out of range (0-59): {0}")]
    MinuteOutOfRange(u8),

    #[error("Expected 7 weekday flags, got {0}")]
    DayCount(usize),

    #[error("Invalid time of day, expected HH:MM: {0}")]
    InvalidTime(String),

    #[error("Timer slot out of range (1-16): {0}")]
    TimerSlot(u8),
}

/// Errors returned synchronously from command issuance
#[derive(Debug, Error)]
pub enum CommandError {
    /// A command was issued while the connection state was not `Connected`.
    /// The core does not queue or retry it.
    #[error("No active broker session")]
    NoActiveSession,

    #[error("Encoding precondition failed: {0}")]
    EncodingPrecondition(#[from] EncodingError),

    #[error("Failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors from the connection lifecycle API
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Connection manager is already running")]
    AlreadyStarted,

    #[error("No tokio runtime available to run the reconnect loop")]
    NoRuntime,
}
