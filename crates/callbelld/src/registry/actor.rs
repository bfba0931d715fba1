//! Registry actor - owns the connection map and processes commands.
//!
//! The RegistryActor is the single owner of link state in the system.
//! It receives commands via an mpsc channel and publishes state changes
//! via broadcast.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel send failures are ignored or logged, never unwrapped

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use callbell_core::{ConnectionState, DeviceAddress, DeviceStatus};

use super::commands::{RegistryCommand, RegistryError};
use crate::connection::Connection;
use crate::events::LinkEvent;

/// Maximum number of devices the registry can hold.
pub const MAX_DEVICES: usize = 1024;

/// One registry entry.
struct Entry {
    state: ConnectionState,

    /// Present only while `Connected`
    connection: Option<Arc<Connection>>,

    since: DateTime<Utc>,

    reconnects: u32,
}

impl Entry {
    fn connecting() -> Self {
        Self {
            state: ConnectionState::Connecting,
            connection: None,
            since: Utc::now(),
            reconnects: 0,
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            self.state = state;
            self.since = Utc::now();
        }
    }
}

/// The registry actor - owns all link state.
///
/// Implements the actor pattern: receives commands via mpsc channel,
/// processes them sequentially, and publishes events to subscribers.
/// Every mutation of the map happens inside this single task, which is
/// what makes `Put`/`Get`/`Remove` mutually exclusive.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    devices: HashMap<DeviceAddress, Entry>,

    /// Event publisher for state changes
    event_publisher: broadcast::Sender<LinkEvent>,
}

impl RegistryActor {
    /// Creates a new registry actor.
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<LinkEvent>,
    ) -> Self {
        Self {
            receiver,
            devices: HashMap::new(),
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("Registry actor stopped (devices: {})", self.devices.len());
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Claim { device, respond_to } => {
                let result = self.handle_claim(device);
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Put {
                device,
                connection,
                respond_to,
            } => {
                let result = self.handle_put(device, connection);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Get { device, respond_to } => {
                let _ = respond_to.send(self.handle_get(&device));
            }
            RegistryCommand::MarkReconnecting { device, respond_to } => {
                let result = self.handle_mark_reconnecting(device);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Remove { device, respond_to } => {
                let result = self.handle_remove(device);
                let _ = respond_to.send(result);
            }
            RegistryCommand::GetState { device, respond_to } => {
                let state = self.devices.get(&device).map(|e| e.state);
                let _ = respond_to.send(state);
            }
            RegistryCommand::GetAllStatuses { respond_to } => {
                let _ = respond_to.send(self.handle_get_all_statuses());
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_claim(&mut self, device: DeviceAddress) -> Result<bool, RegistryError> {
        if self.devices.contains_key(&device) {
            debug!(device = %device, "Device already present, claim refused");
            return Ok(false);
        }

        if self.devices.len() >= MAX_DEVICES {
            warn!(
                device = %device,
                max = MAX_DEVICES,
                "Registry is full, rejecting device"
            );
            return Err(RegistryError::RegistryFull { max: MAX_DEVICES });
        }

        self.devices.insert(device.clone(), Entry::connecting());
        self.publish_state(device, ConnectionState::Connecting);
        Ok(true)
    }

    fn handle_put(
        &mut self,
        device: DeviceAddress,
        connection: Arc<Connection>,
    ) -> Result<(), RegistryError> {
        if connection.is_closed() {
            warn!(device = %device, "Refusing to register a closed connection");
            return Err(RegistryError::ConnectionClosed(device));
        }

        match self.devices.get_mut(&device) {
            Some(entry) => {
                if !entry.state.can_transition_to(ConnectionState::Connected) {
                    warn!(device = %device, state = %entry.state, "Refusing a second connection");
                    return Err(RegistryError::InvalidTransition {
                        device,
                        from: entry.state,
                        to: ConnectionState::Connected,
                    });
                }
                if entry.state == ConnectionState::Reconnecting {
                    entry.reconnects = entry.reconnects.saturating_add(1);
                }
                entry.connection = Some(connection);
                entry.set_state(ConnectionState::Connected);
            }
            None => {
                if self.devices.len() >= MAX_DEVICES {
                    return Err(RegistryError::RegistryFull { max: MAX_DEVICES });
                }
                let mut entry = Entry::connecting();
                entry.connection = Some(connection);
                entry.set_state(ConnectionState::Connected);
                self.devices.insert(device.clone(), entry);
            }
        }

        debug!(device = %device, "Connection registered");
        self.publish_state(device, ConnectionState::Connected);
        Ok(())
    }

    fn handle_get(&self, device: &DeviceAddress) -> Option<Arc<Connection>> {
        self.devices
            .get(device)
            .filter(|e| e.state.is_connected())
            .and_then(|e| e.connection.as_ref())
            .filter(|c| !c.is_closed())
            .cloned()
    }

    fn handle_mark_reconnecting(
        &mut self,
        device: DeviceAddress,
    ) -> Result<Option<Arc<Connection>>, RegistryError> {
        let entry = self
            .devices
            .get_mut(&device)
            .ok_or_else(|| RegistryError::DeviceNotFound(device.clone()))?;

        if !entry.state.can_transition_to(ConnectionState::Reconnecting) {
            return Err(RegistryError::InvalidTransition {
                device,
                from: entry.state,
                to: ConnectionState::Reconnecting,
            });
        }

        let detached = entry.connection.take();
        entry.set_state(ConnectionState::Reconnecting);
        self.publish_state(device, ConnectionState::Reconnecting);
        Ok(detached)
    }

    fn handle_remove(
        &mut self,
        device: DeviceAddress,
    ) -> Result<Option<Arc<Connection>>, RegistryError> {
        let entry = self
            .devices
            .remove(&device)
            .ok_or_else(|| RegistryError::DeviceNotFound(device.clone()))?;

        debug!(device = %device, previous = %entry.state, "Device removed");
        self.publish_state(device, ConnectionState::Disconnected);
        Ok(entry.connection)
    }

    fn handle_get_all_statuses(&self) -> Vec<DeviceStatus> {
        let mut statuses: Vec<DeviceStatus> = self
            .devices
            .iter()
            .map(|(device, entry)| DeviceStatus {
                device: device.clone(),
                state: entry.state,
                since: entry.since,
                reconnects: entry.reconnects,
            })
            .collect();
        statuses.sort_by(|a, b| a.device.cmp(&b.device));
        statuses
    }

    fn publish_state(&self, device: DeviceAddress, state: ConnectionState) {
        // No subscribers is fine
        let _ = self
            .event_publisher
            .send(LinkEvent::StateChanged { device, state });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use tokio::sync::oneshot;

    fn create_actor() -> (RegistryActor, broadcast::Receiver<LinkEvent>) {
        let (_tx, rx) = mpsc::channel(16);
        let (event_tx, event_rx) = broadcast::channel(16);
        (RegistryActor::new(rx, event_tx), event_rx)
    }

    fn device(host: &str) -> DeviceAddress {
        DeviceAddress::new(host, 8080)
    }

    fn connection(device: &DeviceAddress) -> Arc<Connection> {
        let (ours, _theirs) = duplex(64);
        Arc::new(Connection::new(device.clone(), 1, Box::new(ours)))
    }

    #[test]
    fn test_claim_inserts_connecting() {
        let (mut actor, mut events) = create_actor();
        let dev = device("10.0.0.1");

        assert_eq!(actor.handle_claim(dev.clone()), Ok(true));
        assert_eq!(
            actor.devices.get(&dev).map(|e| e.state),
            Some(ConnectionState::Connecting)
        );
        assert!(matches!(
            events.try_recv(),
            Ok(LinkEvent::StateChanged { state: ConnectionState::Connecting, .. })
        ));
    }

    #[test]
    fn test_claim_twice_refused() {
        let (mut actor, _events) = create_actor();
        let dev = device("10.0.0.1");

        assert_eq!(actor.handle_claim(dev.clone()), Ok(true));
        assert_eq!(actor.handle_claim(dev), Ok(false));
        assert_eq!(actor.devices.len(), 1);
    }

    #[test]
    fn test_claim_rejected_when_full() {
        let (mut actor, _events) = create_actor();
        for i in 0..MAX_DEVICES {
            let dev = DeviceAddress::new("10.0.0.1", i as u16 + 1);
            assert_eq!(actor.handle_claim(dev), Ok(true));
        }

        let result = actor.handle_claim(device("10.9.9.9"));
        assert_eq!(result, Err(RegistryError::RegistryFull { max: MAX_DEVICES }));
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (mut actor, _events) = create_actor();
        let dev = device("10.0.0.1");
        let conn = connection(&dev);

        actor.handle_claim(dev.clone()).unwrap();
        actor.handle_put(dev.clone(), Arc::clone(&conn)).unwrap();

        let found = actor.handle_get(&dev).unwrap();
        assert!(Arc::ptr_eq(&found, &conn));
        assert_eq!(
            actor.devices.get(&dev).map(|e| e.state),
            Some(ConnectionState::Connected)
        );
    }

    #[tokio::test]
    async fn test_put_closed_connection_refused() {
        let (mut actor, _events) = create_actor();
        let dev = device("10.0.0.1");
        let conn = connection(&dev);
        conn.close().await;

        assert_eq!(
            actor.handle_put(dev.clone(), conn),
            Err(RegistryError::ConnectionClosed(dev.clone()))
        );
        assert!(actor.handle_get(&dev).is_none());
    }

    #[tokio::test]
    async fn test_get_filters_closed_connection() {
        let (mut actor, _events) = create_actor();
        let dev = device("10.0.0.1");
        let conn = connection(&dev);

        actor.handle_put(dev.clone(), Arc::clone(&conn)).unwrap();
        conn.close().await;

        assert!(actor.handle_get(&dev).is_none());
    }

    #[tokio::test]
    async fn test_mark_reconnecting_detaches_handle() {
        let (mut actor, _events) = create_actor();
        let dev = device("10.0.0.1");
        let conn = connection(&dev);

        actor.handle_claim(dev.clone()).unwrap();
        actor.handle_put(dev.clone(), Arc::clone(&conn)).unwrap();

        let detached = actor.handle_mark_reconnecting(dev.clone()).unwrap();
        assert!(detached.is_some_and(|d| Arc::ptr_eq(&d, &conn)));
        assert!(actor.handle_get(&dev).is_none());
        assert_eq!(
            actor.devices.get(&dev).map(|e| e.state),
            Some(ConnectionState::Reconnecting)
        );
    }

    #[tokio::test]
    async fn test_reconnect_counts() {
        let (mut actor, _events) = create_actor();
        let dev = device("10.0.0.1");

        actor.handle_claim(dev.clone()).unwrap();
        actor.handle_put(dev.clone(), connection(&dev)).unwrap();
        actor.handle_mark_reconnecting(dev.clone()).unwrap();
        actor.handle_put(dev.clone(), connection(&dev)).unwrap();
        actor.handle_mark_reconnecting(dev.clone()).unwrap();
        actor.handle_put(dev.clone(), connection(&dev)).unwrap();

        let statuses = actor.handle_get_all_statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].reconnects, 2);
        assert_eq!(statuses[0].state, ConnectionState::Connected);
    }

    #[test]
    fn test_mark_reconnecting_unknown_device() {
        let (mut actor, _events) = create_actor();
        let dev = device("10.0.0.1");

        let result = actor.handle_mark_reconnecting(dev.clone());
        assert_eq!(result.err(), Some(RegistryError::DeviceNotFound(dev)));
    }

    #[tokio::test]
    async fn test_mark_reconnecting_requires_connected() {
        let (mut actor, mut events) = create_actor();
        let dev = device("10.0.0.1");

        actor.handle_claim(dev.clone()).unwrap();
        let _ = events.try_recv();

        assert_eq!(
            actor.handle_mark_reconnecting(dev.clone()).err(),
            Some(RegistryError::InvalidTransition {
                device: dev.clone(),
                from: ConnectionState::Connecting,
                to: ConnectionState::Reconnecting,
            })
        );
        assert_eq!(
            actor.devices.get(&dev).map(|e| e.state),
            Some(ConnectionState::Connecting)
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_second_put_refused_while_connected() {
        let (mut actor, _events) = create_actor();
        let dev = device("10.0.0.1");
        let first = connection(&dev);

        actor.handle_claim(dev.clone()).unwrap();
        actor.handle_put(dev.clone(), Arc::clone(&first)).unwrap();

        assert_eq!(
            actor.handle_put(dev.clone(), connection(&dev)),
            Err(RegistryError::InvalidTransition {
                device: dev.clone(),
                from: ConnectionState::Connected,
                to: ConnectionState::Connected,
            })
        );
        let current = actor.handle_get(&dev).unwrap();
        assert!(Arc::ptr_eq(&current, &first));
    }

    #[test]
    fn test_remove_publishes_disconnected() {
        let (mut actor, mut events) = create_actor();
        let dev = device("10.0.0.1");

        actor.handle_claim(dev.clone()).unwrap();
        let _ = events.try_recv();

        assert!(actor.handle_remove(dev.clone()).unwrap().is_none());
        assert!(actor.devices.is_empty());
        assert!(matches!(
            events.try_recv(),
            Ok(LinkEvent::StateChanged { state: ConnectionState::Disconnected, .. })
        ));

        assert!(actor.handle_remove(dev).is_err());
    }

    #[test]
    fn test_statuses_sorted() {
        let (mut actor, _events) = create_actor();
        for host in ["10.0.0.3", "10.0.0.1", "10.0.0.2"] {
            actor.handle_claim(device(host)).unwrap();
        }

        let hosts: Vec<String> = actor
            .handle_get_all_statuses()
            .into_iter()
            .map(|s| s.device.host().to_string())
            .collect();
        assert_eq!(hosts, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[tokio::test]
    async fn test_run_processes_commands_until_closed() {
        let (tx, rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = broadcast::channel(16);
        let handle = tokio::spawn(RegistryActor::new(rx, event_tx).run());

        let (resp_tx, resp_rx) = oneshot::channel();
        tx.send(RegistryCommand::Claim {
            device: device("10.0.0.1"),
            respond_to: resp_tx,
        })
        .await
        .unwrap();
        assert_eq!(resp_rx.await.unwrap(), Ok(true));

        drop(tx);
        handle.await.unwrap();
    }
}
