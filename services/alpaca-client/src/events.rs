//! Connection notifications delivered to subscribers

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a user-facing message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

/// Event broadcast by a [`crate::ConnectionManager`]
///
/// The four connection events are edge-triggered: each fires once per state
/// transition, never once per poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ConnectionEvent {
    ServerConnected,
    ServerDisconnected,
    DeviceConnected { device: String },
    DeviceDisconnected { device: String },
    Message { text: String, level: MessageLevel },
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::ServerConnected => write!(f, "server connected"),
            ConnectionEvent::ServerDisconnected => write!(f, "server disconnected"),
            ConnectionEvent::DeviceConnected { device } => {
                write!(f, "device connected: [{}]", device)
            }
            ConnectionEvent::DeviceDisconnected { device } => {
                write!(f, "device disconnected: [{}]", device)
            }
            ConnectionEvent::Message { text, level } => write!(f, "{:?}: {}", level, text),
        }
    }
}
