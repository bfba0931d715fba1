//! Transport and send errors.
//!
//! `LinkError` covers every failure inside a per-device task; it never
//! leaves that task except as a log line or a `LinkEvent`. `SendError` is
//! what callers of `Supervisor::send_message` see.

use std::io;
use std::time::Duration;

use callbell_core::DeviceAddress;
use thiserror::Error;

/// Failures on a single device link.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The connect attempt did not complete in time.
    #[error("connect timed out after {timeout:?}")]
    ConnectTimeout { timeout: Duration },

    /// The connect attempt was refused or the host was unreachable.
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    /// The device closed its end of the stream.
    #[error("stream closed by device")]
    StreamClosed,

    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("write timed out after {timeout:?}")]
    WriteTimeout { timeout: Duration },

    /// The connection was closed locally before the write.
    #[error("connection closed")]
    Closed,

    /// A listener or heartbeat task panicked or was aborted.
    #[error("{task} task failed: {reason}")]
    TaskFailed { task: &'static str, reason: String },
}

/// Outcome of a failed `send_message`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// No live connection is registered for the device.
    #[error("no connection to {0}")]
    NotConnected(DeviceAddress),

    /// The connection exists but the write or flush failed.
    #[error("write to {device} failed: {reason}")]
    WriteFailed {
        device: DeviceAddress,
        reason: String,
    },
}
