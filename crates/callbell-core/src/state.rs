//! Link state of a device and the read-only status snapshot.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DeviceAddress;

/// Lifecycle state of the link to a single device.
///
/// Exactly one state applies to a device at any instant:
///
/// ```text
/// Disconnected ──▶ Connecting ──▶ Connected ──▶ Reconnecting
///      ▲               │              ▲               │
///      └── gave up ────┘              └── reconnected ┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No attempt in flight and no live transport.
    #[default]
    Disconnected,

    /// Initial connect attempts are running (bounded).
    Connecting,

    /// A live transport is registered.
    Connected,

    /// The live transport failed; the unbounded reconnect loop is running.
    Reconnecting,
}

impl ConnectionState {
    /// Returns true if a live transport is expected to exist.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Checks whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Reconnecting)
                | (Reconnecting, Connected)
                | (Connected, Disconnected)
                | (Reconnecting, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Point-in-time view of one registry entry, safe to hand out to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Device this status describes
    pub device: DeviceAddress,

    /// Current link state
    pub state: ConnectionState,

    /// When the device entered `state`
    pub since: DateTime<Utc>,

    /// Number of successful reconnects since the first connect
    pub reconnects: u32,
}
