//! Data sink - where bytes read from devices go.
//!
//! The supervisor makes one `deliver` call per non-empty read and makes no
//! assumption about what the sink does with the chunk.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use callbell_core::DeviceAddress;

/// Consumer of inbound device bytes.
#[async_trait]
pub trait DataSink: Send + Sync {
    /// Hands over one chunk read from `device`.
    ///
    /// Called from the device's listener task; a slow sink slows that
    /// device's reads only.
    async fn deliver(&self, device: &DeviceAddress, chunk: Vec<u8>);
}

/// Sink that only logs what it receives.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DataSink for LogSink {
    async fn deliver(&self, device: &DeviceAddress, chunk: Vec<u8>) {
        info!(
            device = %device,
            bytes = chunk.len(),
            data = %String::from_utf8_lossy(&chunk),
            "Storing data from device"
        );
    }
}

/// One chunk forwarded by [`ChannelSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub device: DeviceAddress,
    pub chunk: Vec<u8>,
}

/// Sink forwarding every chunk into a bounded mpsc channel.
///
/// Useful for embedding the supervisor in a larger service that persists
/// or processes the data elsewhere. A full channel holds back the listener
/// of the delivering device only.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<Delivery>,
}

impl ChannelSink {
    /// Creates the sink and the receiving end of its channel.
    ///
    /// `capacity` is clamped to at least one chunk.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl DataSink for ChannelSink {
    async fn deliver(&self, device: &DeviceAddress, chunk: Vec<u8>) {
        let delivery = Delivery {
            device: device.clone(),
            chunk,
        };
        if self.sender.send(delivery).await.is_err() {
            warn!(device = %device, "Data sink receiver dropped, chunk discarded");
        }
    }
}
