//! callbell Core - Shared types for call-button link supervision
//!
//! This crate provides the domain types shared by the daemon (`callbelld`)
//! and anything embedding it: device addresses, link states, status
//! snapshots and the device directory loaded at startup.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod device;
pub mod directory;
pub mod error;
pub mod state;

// Re-exports for convenience
pub use device::{Bay, BedId, DeviceAddress};
pub use directory::{DeviceDirectory, DirectoryEntry, DIRECTORY_COLUMNS};
pub use error::{DomainError, DomainResult};
pub use state::{ConnectionState, DeviceStatus};
