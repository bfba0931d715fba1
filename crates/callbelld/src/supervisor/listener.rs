//! Listener - consumes the inbound byte stream of one connection.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use callbell_core::DeviceAddress;

use crate::error::LinkError;
use crate::events::LinkEvent;
use crate::registry::RegistryHandle;
use crate::sink::DataSink;

/// Boxed read half, so tests can use in-memory duplex streams.
pub type LinkReader = Box<dyn AsyncRead + Send + Unpin>;

/// Reads fixed-size chunks from one connection and hands them to the sink.
pub struct Listener {
    device: DeviceAddress,
    reader: LinkReader,
    sink: Arc<dyn DataSink>,
    registry: RegistryHandle,
    buffer_size: usize,
    cancel_token: CancellationToken,
}

impl Listener {
    pub fn new(
        device: DeviceAddress,
        reader: LinkReader,
        sink: Arc<dyn DataSink>,
        registry: RegistryHandle,
        buffer_size: usize,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            device,
            reader,
            sink,
            registry,
            buffer_size,
            cancel_token,
        }
    }

    /// Reads until the stream ends, fails, or the token is cancelled.
    ///
    /// Returns the failure that ended the stream, or `None` when cancelled.
    pub async fn run(mut self) -> Option<LinkError> {
        let mut buf = vec![0u8; self.buffer_size.max(1)];
        debug!(device = %self.device, "Listener started");

        loop {
            let read = tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!(device = %self.device, "Listener cancelled");
                    return None;
                }
                read = self.reader.read(&mut buf) => read,
            };

            match read {
                Ok(0) => {
                    info!(device = %self.device, "Device closed the stream");
                    return Some(LinkError::StreamClosed);
                }
                Ok(n) => {
                    let chunk = buf.get(..n).map(<[u8]>::to_vec).unwrap_or_default();
                    debug!(device = %self.device, bytes = n, "Received data");
                    self.sink.deliver(&self.device, chunk).await;
                    self.registry.publish(LinkEvent::Received {
                        device: self.device.clone(),
                        bytes: n,
                    });
                }
                Err(e) => {
                    warn!(device = %self.device, error = %e, "Error receiving data");
                    return Some(LinkError::Read(e));
                }
            }
        }
    }
}
