//! Registry actor commands and errors.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//!
//! Events published by the actor live in [`crate::events`].

use std::sync::Arc;

use callbell_core::{ConnectionState, DeviceAddress, DeviceStatus};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::connection::Connection;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command uses a oneshot channel for the response, enabling
/// request-response patterns in async code without blocking.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Reserve an entry for a device about to be connected.
    ///
    /// Inserts the device in `Connecting` state if it is absent and
    /// answers `true`; answers `false` if the device is already present.
    ///
    /// # Errors
    /// - `RegistryError::RegistryFull` if at maximum capacity
    Claim {
        device: DeviceAddress,
        respond_to: oneshot::Sender<Result<bool, RegistryError>>,
    },

    /// Register a live connection; the device becomes `Connected`.
    ///
    /// # Errors
    /// - `RegistryError::ConnectionClosed` if the connection was already closed
    /// - `RegistryError::RegistryFull` if the device is new and the registry is full
    Put {
        device: DeviceAddress,
        connection: Arc<Connection>,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Look up the live connection of a device.
    Get {
        device: DeviceAddress,
        respond_to: oneshot::Sender<Option<Arc<Connection>>>,
    },

    /// Move a device to `Reconnecting` and detach its connection.
    ///
    /// The detached connection (if any) is handed back so the caller
    /// can close it after the registry stopped handing it out.
    ///
    /// # Errors
    /// - `RegistryError::DeviceNotFound` if the device has no entry
    MarkReconnecting {
        device: DeviceAddress,
        respond_to: oneshot::Sender<Result<Option<Arc<Connection>>, RegistryError>>,
    },

    /// Remove a device, handing back its detached connection.
    ///
    /// # Errors
    /// - `RegistryError::DeviceNotFound` if the device has no entry
    Remove {
        device: DeviceAddress,
        respond_to: oneshot::Sender<Result<Option<Arc<Connection>>, RegistryError>>,
    },

    /// Current state of one device; `None` if absent.
    GetState {
        device: DeviceAddress,
        respond_to: oneshot::Sender<Option<ConnectionState>>,
    },

    /// Snapshot of every entry.
    GetAllStatuses {
        respond_to: oneshot::Sender<Vec<DeviceStatus>>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The registry has reached its maximum device capacity.
    #[error("registry is full (max: {max} devices)")]
    RegistryFull {
        /// Maximum number of devices allowed
        max: usize,
    },

    /// The requested device has no registry entry.
    #[error("device not found: {0}")]
    DeviceNotFound(DeviceAddress),

    /// A closed connection was offered for registration.
    #[error("connection to {0} is already closed")]
    ConnectionClosed(DeviceAddress),

    /// The entry is not in a state the command may move it out of.
    #[error("{device} cannot move from {from} to {to}")]
    InvalidTransition {
        device: DeviceAddress,
        from: ConnectionState,
        to: ConnectionState,
    },

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::RegistryFull { max: 1024 };
        assert_eq!(err.to_string(), "registry is full (max: 1024 devices)");

        let err = RegistryError::DeviceNotFound(DeviceAddress::new("10.0.4.21", 8080));
        assert_eq!(err.to_string(), "device not found: 10.0.4.21:8080");

        let err = RegistryError::ConnectionClosed(DeviceAddress::new("10.0.4.21", 8080));
        assert_eq!(err.to_string(), "connection to 10.0.4.21:8080 is already closed");

        let err = RegistryError::InvalidTransition {
            device: DeviceAddress::new("10.0.4.21", 8080),
            from: ConnectionState::Connecting,
            to: ConnectionState::Reconnecting,
        };
        assert_eq!(
            err.to_string(),
            "10.0.4.21:8080 cannot move from connecting to reconnecting"
        );

        let err = RegistryError::ChannelClosed;
        assert_eq!(err.to_string(), "response channel closed");
    }

    #[tokio::test]
    async fn test_command_channel_closed_error() {
        let (tx, rx) = oneshot::channel::<Result<bool, RegistryError>>();

        // Drop sender without sending
        drop(tx);

        let result = rx.await;
        assert!(result.is_err());
    }
}
