//! Connection registry using Actor pattern.
//!
//! The registry is the single source of truth for "am I connected to X".
//! It receives commands via a tokio mpsc channel and owns the map from
//! device address to link state and live connection handle.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   Supervisor    │────▶│  RegistryActor  │────▶│Broadcast Channel│
//! │ (device tasks)  │     │                 │     │                 │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//!         │                       │                       │
//!         │   RegistryCommand     │   LinkEvent           │
//!         │   (mpsc channel)      │   (broadcast)         │
//!         ▼                       ▼                       ▼
//!    Claim/Put/Get/          HashMap<DeviceAddress,  Tests, diagnostics
//!    Remove                  Entry>
//! ```
//!
//! The registry never holds a handle that is known to be closed: the
//! supervisor detaches a handle (`mark_reconnecting`/`remove`) before it
//! closes it.

use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod handle;

pub use actor::{RegistryActor, MAX_DEVICES};
pub use commands::{RegistryCommand, RegistryError};
pub use handle::RegistryHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 256;

/// Spawn the registry actor and return a handle for interaction.
///
/// # Example
///
/// ```no_run
/// use callbelld::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry();
///
///     let statuses = handle.statuses().await;
/// }
/// ```
pub fn spawn_registry() -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, event_tx.clone());
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}
