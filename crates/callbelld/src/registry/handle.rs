//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending commands
//! to the registry actor and subscribing to link events.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};

use callbell_core::{ConnectionState, DeviceAddress, DeviceStatus};

use super::commands::{RegistryCommand, RegistryError};
use crate::connection::Connection;
use crate::events::LinkEvent;

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
/// All methods are async and communicate with the actor via channels.
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<LinkEvent>,
}

impl RegistryHandle {
    /// Create a new registry handle.
    ///
    /// # Arguments
    ///
    /// * `sender` - The command channel sender for communicating with the actor
    /// * `event_sender` - The broadcast sender for subscribing to events
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<LinkEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Reserve an entry for `device` in `Connecting` state.
    ///
    /// Returns `Ok(false)` if the device is already present.
    ///
    /// # Errors
    ///
    /// - `RegistryError::RegistryFull` if the registry is at maximum capacity
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn claim(&self, device: DeviceAddress) -> Result<bool, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Claim {
                device,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Register a live connection for `device`.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ConnectionClosed` if the connection was already closed
    /// - `RegistryError::RegistryFull` if the registry is at maximum capacity
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn put(
        &self,
        device: DeviceAddress,
        connection: Arc<Connection>,
    ) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Put {
                device,
                connection,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Look up the live connection of `device`.
    ///
    /// Returns `None` if the device is not connected or if communication
    /// with the actor fails.
    pub async fn get(&self, device: DeviceAddress) -> Option<Arc<Connection>> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Get {
                device,
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Move `device` to `Reconnecting`, returning its detached connection.
    ///
    /// # Errors
    ///
    /// - `RegistryError::DeviceNotFound` if the device has no entry
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn mark_reconnecting(
        &self,
        device: DeviceAddress,
    ) -> Result<Option<Arc<Connection>>, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::MarkReconnecting {
                device,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Remove `device`, returning its detached connection.
    ///
    /// # Errors
    ///
    /// - `RegistryError::DeviceNotFound` if the device has no entry
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn remove(
        &self,
        device: DeviceAddress,
    ) -> Result<Option<Arc<Connection>>, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Remove {
                device,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Current state of `device`, `None` if it has no entry.
    pub async fn state(&self, device: DeviceAddress) -> Option<ConnectionState> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::GetState {
                device,
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Snapshot of every device, sorted by address.
    ///
    /// Returns an empty vector if communication with the actor fails.
    pub async fn statuses(&self) -> Vec<DeviceStatus> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::GetAllStatuses { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Subscribe to link events.
    ///
    /// This is a synchronous operation - it doesn't communicate with the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.event_sender.subscribe()
    }

    /// Publish an event produced outside the actor (attempts, heartbeats).
    pub(crate) fn publish(&self, event: LinkEvent) {
        // No subscribers is fine
        let _ = self.event_sender.send(event);
    }
}
