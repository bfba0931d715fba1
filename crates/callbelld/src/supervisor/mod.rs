//! Connection supervisor - drives the lifecycle of every device link.
//!
//! Each device gets one supervised task running this state machine:
//!
//! ```text
//!            claim                     put
//! (absent) ────────▶ Connecting ─────────────────▶ Connected ◀──────┐
//!                        │  bounded attempts           │            │
//!                        │  exhausted                  │ listener   │ put
//!                        ▼                             │ or         │
//!                    (removed)                         │ heartbeat  │
//!                                                      │ failed     │
//!                                                      ▼            │
//!                                                 Reconnecting ─────┘
//!                                                  unbounded attempts
//! ```
//!
//! While `Connected`, the device task owns exactly one [`Listener`] and one
//! [`Heartbeat`] task, both bound to a per-connection cancellation token.
//! The first of them to fail ends the pair: the token is cancelled, the
//! other one is awaited, and only then does the device enter
//! `Reconnecting`. A fresh pair is started on every successful reconnect.
//!
//! Initial connect gives up after `max_connect_attempts`; the reconnect
//! loop retries forever unless `max_reconnect_attempts` is set.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Failures on one device are logged and never touch another device

mod heartbeat;
mod listener;

pub use heartbeat::Heartbeat;
pub use listener::{LinkReader, Listener};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use callbell_core::{DeviceAddress, DeviceStatus};

use crate::config::SupervisorConfig;
use crate::connection::Connection;
use crate::error::{LinkError, SendError};
use crate::events::{AttemptPhase, LinkEvent};
use crate::registry::{RegistryError, RegistryHandle};
use crate::sink::DataSink;

// ============================================================================
// Supervisor
// ============================================================================

/// Supervisor of all device links.
///
/// Cheap to clone; clones share the same tasks and registry.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use callbell_core::DeviceAddress;
/// use callbelld::config::SupervisorConfig;
/// use callbelld::registry::spawn_registry;
/// use callbelld::sink::LogSink;
/// use callbelld::supervisor::Supervisor;
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() {
///     let supervisor = Supervisor::new(
///         SupervisorConfig::default(),
///         spawn_registry(),
///         Arc::new(LogSink::new()),
///         CancellationToken::new(),
///     );
///
///     let device = DeviceAddress::new("10.0.4.21", 8080);
///     supervisor.start_all([device.clone()]).await;
///
///     if let Err(e) = supervisor.send_message(&device, b"LED ON").await {
///         eprintln!("{e}");
///     }
///
///     supervisor.shutdown().await;
/// }
/// ```
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    config: SupervisorConfig,
    registry: RegistryHandle,
    sink: Arc<dyn DataSink>,

    /// Root token; every device task and link token derives from it
    cancel_token: CancellationToken,

    /// Device tasks and their link tasks, awaited on shutdown
    tracker: TaskTracker,

    next_connection_id: AtomicU64,
}

impl Supervisor {
    /// Creates a supervisor. Nothing is connected until `start_all`/`connect`.
    pub fn new(
        config: SupervisorConfig,
        registry: RegistryHandle,
        sink: Arc<dyn DataSink>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                sink,
                cancel_token,
                tracker: TaskTracker::new(),
                next_connection_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.inner.registry
    }

    /// Subscribe to link events.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.inner.registry.subscribe()
    }

    /// Launches one supervised task per device not already in the registry.
    ///
    /// Returns the number of tasks launched. Devices proceed independently
    /// and in no particular order.
    pub async fn start_all<I>(&self, devices: I) -> usize
    where
        I: IntoIterator<Item = DeviceAddress>,
    {
        let mut launched = 0;
        for device in devices {
            match self.connect(device.clone()).await {
                Ok(true) => launched += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(device = %device, error = %e, "Could not start device");
                }
            }
        }
        launched
    }

    /// Launches the supervised task of a single device.
    ///
    /// Returns `Ok(false)` without doing anything if the device is already
    /// connecting, connected or reconnecting.
    ///
    /// # Errors
    ///
    /// - `RegistryError::RegistryFull` if the registry is at maximum capacity
    /// - `RegistryError::ChannelClosed` if the registry has shut down
    pub async fn connect(&self, device: DeviceAddress) -> Result<bool, RegistryError> {
        if !self.inner.registry.claim(device.clone()).await? {
            info!(device = %device, "Already connected");
            return Ok(false);
        }

        debug!(device = %device, "Starting device task");
        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(inner.run_device(device));
        Ok(true)
    }

    /// Writes `payload` to the device, unframed, and flushes it.
    ///
    /// Never blocks on a missing connection and never retries.
    ///
    /// # Errors
    ///
    /// - `SendError::NotConnected` if the device has no live connection
    /// - `SendError::WriteFailed` if the write or flush failed or timed out
    pub async fn send_message(
        &self,
        device: &DeviceAddress,
        payload: &[u8],
    ) -> Result<(), SendError> {
        let Some(connection) = self.inner.registry.get(device.clone()).await else {
            warn!(device = %device, "No connection to device");
            return Err(SendError::NotConnected(device.clone()));
        };

        connection
            .write_all(payload, self.inner.config.write_timeout)
            .await
            .map_err(|e| {
                warn!(device = %device, error = %e, "Failed to send message");
                SendError::WriteFailed {
                    device: device.clone(),
                    reason: e.to_string(),
                }
            })?;

        info!(device = %device, bytes = payload.len(), "Sent message");
        Ok(())
    }

    /// Snapshot of every supervised device.
    pub async fn statuses(&self) -> Vec<DeviceStatus> {
        self.inner.registry.statuses().await
    }

    /// Stops every device task, closes every connection and waits for the
    /// tasks to finish.
    pub async fn shutdown(&self) {
        info!("Supervisor shutting down");
        self.inner.cancel_token.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("Supervisor stopped");
    }
}

// ============================================================================
// Device Task
// ============================================================================

/// How a Listener/Heartbeat pair ended.
enum PairEnded {
    Listener(Option<LinkError>),
    Heartbeat(Option<LinkError>),
    Cancelled,
}

impl Inner {
    /// Runs the whole lifecycle of one device until it is abandoned or the
    /// supervisor shuts down.
    async fn run_device(self: Arc<Self>, device: DeviceAddress) {
        let cancel_token = self.cancel_token.clone();

        let mut next = tokio::select! {
            stream = self.connect_initial(&device) => stream,
            _ = cancel_token.cancelled() => None,
        };

        while let Some(stream) = next.take() {
            let Some(failure) = self.serve(&device, stream).await else {
                break;
            };

            next = tokio::select! {
                stream = self.reconnect(&device, failure) => stream,
                _ = cancel_token.cancelled() => None,
            };
        }

        self.release(&device).await;
    }

    /// Bounded initial connect.
    async fn connect_initial(&self, device: &DeviceAddress) -> Option<TcpStream> {
        let max_attempts = self.config.max_connect_attempts;

        for attempt in 1..=max_attempts {
            match self.attempt(device).await {
                Ok(stream) => return Some(stream),
                Err(e) => {
                    warn!(
                        device = %device,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Failed to connect"
                    );
                    self.registry.publish(LinkEvent::AttemptFailed {
                        device: device.clone(),
                        phase: AttemptPhase::Initial,
                        attempt,
                        reason: e.to_string(),
                    });
                    if attempt < max_attempts {
                        sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        error!(
            device = %device,
            attempts = max_attempts,
            "Giving up on device until it is started again"
        );
        self.registry.publish(LinkEvent::GaveUp {
            device: device.clone(),
            phase: AttemptPhase::Initial,
            attempts: max_attempts,
        });
        None
    }

    /// Registers a fresh connection and runs its Listener/Heartbeat pair.
    ///
    /// Returns the failure that ended the pair, or `None` on shutdown.
    async fn serve(&self, device: &DeviceAddress, stream: TcpStream) -> Option<LinkError> {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = stream.set_nodelay(true) {
            debug!(device = %device, error = %e, "Could not set TCP_NODELAY");
        }
        let (reader, writer) = stream.into_split();
        let connection = Arc::new(Connection::new(device.clone(), id, Box::new(writer)));

        if let Err(e) = self.registry.put(device.clone(), Arc::clone(&connection)).await {
            error!(device = %device, error = %e, "Failed to register connection");
            connection.close().await;
            return None;
        }
        info!(device = %device, connection = id, "Connected");

        let link_token = self.cancel_token.child_token();
        let listener = Listener::new(
            device.clone(),
            Box::new(reader),
            Arc::clone(&self.sink),
            self.registry.clone(),
            self.config.read_buffer_size,
            link_token.clone(),
        );
        let heartbeat = Heartbeat::new(
            Arc::clone(&connection),
            self.registry.clone(),
            self.config.heartbeat_interval,
            self.config.heartbeat_byte,
            self.config.write_timeout,
            link_token.clone(),
        );

        let mut listener_task = self.tracker.spawn(listener.run());
        let mut heartbeat_task = self.tracker.spawn(heartbeat.run());

        let ended = tokio::select! {
            result = &mut listener_task => PairEnded::Listener(task_outcome("listener", result)),
            result = &mut heartbeat_task => PairEnded::Heartbeat(task_outcome("heartbeat", result)),
            _ = self.cancel_token.cancelled() => PairEnded::Cancelled,
        };

        // Stop the survivor before anyone sees the device leave `Connected`.
        // On shutdown `release` detaches and closes the connection.
        link_token.cancel();
        match ended {
            PairEnded::Listener(failure) => {
                join_quietly(device, heartbeat_task).await;
                failure
            }
            PairEnded::Heartbeat(failure) => {
                join_quietly(device, listener_task).await;
                failure
            }
            PairEnded::Cancelled => {
                join_quietly(device, listener_task).await;
                join_quietly(device, heartbeat_task).await;
                None
            }
        }
    }

    /// Unbounded (by default) reconnect after a live connection failed.
    async fn reconnect(&self, device: &DeviceAddress, cause: LinkError) -> Option<TcpStream> {
        warn!(device = %device, error = %cause, "Connection lost, reconnecting");

        match self.registry.mark_reconnecting(device.clone()).await {
            Ok(Some(connection)) => connection.close().await,
            Ok(None) => {}
            Err(e) => {
                warn!(device = %device, error = %e, "Device no longer registered, stopping");
                return None;
            }
        }

        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);

            match self.attempt(device).await {
                Ok(stream) => {
                    info!(device = %device, attempts = attempt, "Reconnected");
                    return Some(stream);
                }
                Err(e) => {
                    warn!(device = %device, attempt, error = %e, "Failed to reconnect");
                    self.registry.publish(LinkEvent::AttemptFailed {
                        device: device.clone(),
                        phase: AttemptPhase::Reconnect,
                        attempt,
                        reason: e.to_string(),
                    });
                }
            }

            if let Some(max_attempts) = self.config.max_reconnect_attempts {
                if attempt >= max_attempts {
                    error!(device = %device, attempts = attempt, "Giving up reconnecting");
                    self.registry.publish(LinkEvent::GaveUp {
                        device: device.clone(),
                        phase: AttemptPhase::Reconnect,
                        attempts: attempt,
                    });
                    return None;
                }
            }

            sleep(self.config.retry_delay).await;
        }
    }

    /// One connect attempt bounded by `connect_timeout`.
    async fn attempt(&self, device: &DeviceAddress) -> Result<TcpStream, LinkError> {
        let limit = self.config.connect_timeout;
        debug!(device = %device, "Connecting");

        match timeout(limit, TcpStream::connect(device.target())).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(LinkError::Connect(e)),
            Err(_) => Err(LinkError::ConnectTimeout { timeout: limit }),
        }
    }

    /// Drops the registry entry and closes whatever connection it held.
    async fn release(&self, device: &DeviceAddress) {
        match self.registry.remove(device.clone()).await {
            Ok(Some(connection)) => connection.close().await,
            Ok(None) => {}
            Err(e) => debug!(device = %device, error = %e, "Nothing to release"),
        }
        debug!(device = %device, "Device task finished");
    }
}

/// Flattens a pair member's join result; a panicked task counts as failed.
fn task_outcome(
    task: &'static str,
    result: Result<Option<LinkError>, tokio::task::JoinError>,
) -> Option<LinkError> {
    match result {
        Ok(outcome) => outcome,
        Err(e) => Some(LinkError::TaskFailed {
            task,
            reason: e.to_string(),
        }),
    }
}

async fn join_quietly(device: &DeviceAddress, handle: JoinHandle<Option<LinkError>>) {
    if let Err(e) = handle.await {
        warn!(device = %device, error = %e, "Link task ended abnormally");
    }
}
