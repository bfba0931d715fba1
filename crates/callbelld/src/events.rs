//! Link events published to subscribers.
//!
//! State changes are published by the registry actor; attempt failures,
//! heartbeats and receptions are published by the supervisor's tasks
//! through the same broadcast channel.

use std::fmt;

use callbell_core::{ConnectionState, DeviceAddress};

/// Which connect loop an attempt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    /// First connect after `start_all`/`connect` (bounded).
    Initial,
    /// Recovery after a live connection failed (unbounded by default).
    Reconnect,
}

impl fmt::Display for AttemptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Reconnect => write!(f, "reconnect"),
        }
    }
}

/// Events describing the life of device links.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A device changed state in the registry.
    ///
    /// `Disconnected` is published when the entry is removed.
    StateChanged {
        device: DeviceAddress,
        state: ConnectionState,
    },

    /// A single connect attempt failed.
    AttemptFailed {
        device: DeviceAddress,
        phase: AttemptPhase,
        /// 1-based attempt number within the current loop
        attempt: u32,
        reason: String,
    },

    /// A bounded connect loop ran out of attempts and the device was dropped.
    GaveUp {
        device: DeviceAddress,
        phase: AttemptPhase,
        attempts: u32,
    },

    /// A heartbeat byte was written and flushed.
    HeartbeatSent { device: DeviceAddress },

    /// A chunk was read from the device and handed to the data sink.
    Received { device: DeviceAddress, bytes: usize },
}

impl LinkEvent {
    /// Device the event refers to.
    pub fn device(&self) -> &DeviceAddress {
        match self {
            Self::StateChanged { device, .. }
            | Self::AttemptFailed { device, .. }
            | Self::GaveUp { device, .. }
            | Self::HeartbeatSent { device }
            | Self::Received { device, .. } => device,
        }
    }
}
