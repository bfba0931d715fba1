//! callbell daemon - persistent links to bedside call-button devices
//!
//! This crate provides the runtime half of callbell:
//! - `registry` - Registry actor owning one entry per supervised device
//! - `supervisor` - Per-device connect/serve/reconnect state machine
//! - `connection` - Write half of a live link, guarded by its own lock
//! - `sink` - Where bytes read from devices are delivered
//! - `config` / `cli` - Configuration layering and the `callbelld` entry point
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       callbelld daemon                        │
//! ├───────────────────────────────────────────────────────────────┤
//! │                                                               │
//! │  ┌─────────────────┐  claim/put/get  ┌─────────────────────┐  │
//! │  │   Supervisor    │────────────────▶│   RegistryActor     │  │
//! │  │ (device tasks)  │                 │ (entry per device)  │  │
//! │  └────────┬────────┘                 └──────────┬──────────┘  │
//! │           │ per live connection                 │ events      │
//! │           ▼                                     ▼             │
//! │  ┌─────────────────┐  ┌──────────────┐  ┌─────────────────┐   │
//! │  │    Listener     │  │  Heartbeat   │  │broadcast::Sender│   │
//! │  │ (reads → sink)  │  │ (0x00 / 5s)  │  │  (LinkEvent)    │   │
//! │  └─────────────────┘  └──────────────┘  └─────────────────┘   │
//! │                                                               │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - A failing device never affects another device

pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod registry;
pub mod sink;
pub mod supervisor;

pub use config::{DaemonConfig, SupervisorConfig};
pub use connection::Connection;
pub use error::{LinkError, SendError};
pub use events::{AttemptPhase, LinkEvent};
pub use registry::{spawn_registry, RegistryError, RegistryHandle};
pub use sink::{ChannelSink, DataSink, Delivery, LogSink};
pub use supervisor::Supervisor;
