//! A live transport to one device.
//!
//! The connection owns the write half of the stream. Heartbeats and
//! application sends go through the same per-connection lock, so a single
//! write is never interleaved with another one on the same device, and a
//! slow device never stalls writes to other devices.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Write failures are returned as `LinkError`

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

use callbell_core::DeviceAddress;

use crate::error::LinkError;

/// Boxed write half, so tests can use in-memory duplex streams.
pub type LinkWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Live transport handle for one device.
pub struct Connection {
    device: DeviceAddress,

    /// Monotonic id, distinguishes successive connections to the same device
    id: u64,

    writer: Mutex<LinkWriter>,

    /// Set by `close` or by a failed write; every later write fails with
    /// `LinkError::Closed`
    closed: AtomicBool,

    established_at: DateTime<Utc>,
}

impl Connection {
    /// Wraps the write half of a freshly connected stream.
    pub fn new(device: DeviceAddress, id: u64, writer: LinkWriter) -> Self {
        Self {
            device,
            id,
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
            established_at: Utc::now(),
        }
    }

    pub fn device(&self) -> &DeviceAddress {
        &self.device
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Writes `payload` and flushes it, holding the connection lock for the
    /// whole write.
    ///
    /// A failed or timed out write may have left part of `payload` on the
    /// wire, so it closes the connection; nothing is ever written after a
    /// partial payload.
    ///
    /// # Errors
    ///
    /// - `LinkError::Closed` if the connection was closed
    /// - `LinkError::WriteTimeout` if the write did not finish within `limit`
    /// - `LinkError::Write` on I/O failure
    pub async fn write_all(&self, payload: &[u8], limit: Duration) -> Result<(), LinkError> {
        if self.is_closed() {
            return Err(LinkError::Closed);
        }

        let mut writer = self.writer.lock().await;

        // Closed while we waited for the lock
        if self.is_closed() {
            return Err(LinkError::Closed);
        }

        let write = async {
            writer.write_all(payload).await?;
            writer.flush().await
        };

        let failure = match timeout(limit, write).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => LinkError::Write(e),
            Err(_) => LinkError::WriteTimeout { timeout: limit },
        };

        self.closed.store(true, Ordering::Release);
        if let Err(e) = timeout(limit, writer.shutdown()).await.unwrap_or(Ok(())) {
            debug!(device = %self.device, error = %e, "Error shutting down connection");
        }
        debug!(
            device = %self.device,
            connection = self.id,
            error = %failure,
            "Connection closed after failed write"
        );
        Err(failure)
    }

    /// Closes the connection. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(device = %self.device, error = %e, "Error shutting down connection");
        }
        debug!(device = %self.device, connection = self.id, "Connection closed");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("device", &self.device)
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("established_at", &self.established_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{duplex, AsyncReadExt};

    const LIMIT: Duration = Duration::from_secs(1);

    fn device() -> DeviceAddress {
        DeviceAddress::new("10.0.4.21", 8080)
    }

    #[tokio::test]
    async fn test_write_all_reaches_peer() {
        let (ours, mut theirs) = duplex(64);
        let conn = Connection::new(device(), 1, Box::new(ours));

        conn.write_all(b"CALL 7", LIMIT).await.unwrap();

        let mut buf = [0u8; 6];
        theirs.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"CALL 7");
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (ours, _theirs) = duplex(64);
        let conn = Connection::new(device(), 1, Box::new(ours));

        conn.close().await;
        assert!(conn.is_closed());

        let result = conn.write_all(b"x", LIMIT).await;
        assert!(matches!(result, Err(LinkError::Closed)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (ours, _theirs) = duplex(64);
        let conn = Connection::new(device(), 1, Box::new(ours));

        conn.close().await;
        conn.close().await;
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_write_to_dropped_peer_fails() {
        let (ours, theirs) = duplex(64);
        let conn = Connection::new(device(), 1, Box::new(ours));
        drop(theirs);

        let result = conn.write_all(b"hello", LIMIT).await;
        assert!(matches!(result, Err(LinkError::Write(_))));
    }

    #[tokio::test]
    async fn test_write_timeout_when_peer_stalls() {
        // Peer never reads, so a payload larger than the pipe blocks
        let (ours, _theirs) = duplex(4);
        let conn = Connection::new(device(), 1, Box::new(ours));

        let payload = vec![0xAB; 64 * 1024];
        let result = conn.write_all(&payload, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(LinkError::WriteTimeout { .. })));
    }

    #[tokio::test]
    async fn test_failed_write_closes_connection() {
        let (ours, mut theirs) = duplex(4);
        let conn = Connection::new(device(), 1, Box::new(ours));

        let result = conn
            .write_all(&[b'A'; 24], Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(LinkError::WriteTimeout { .. })));
        assert!(conn.is_closed());

        let result = conn.write_all(b"LED ON", LIMIT).await;
        assert!(matches!(result, Err(LinkError::Closed)));

        // Only the stalled prefix ever reaches the peer, then EOF
        let mut seen = Vec::new();
        timeout(LIMIT, theirs.read_to_end(&mut seen))
            .await
            .unwrap()
            .unwrap();
        assert!(seen.len() <= 24);
        assert!(seen.iter().all(|&b| b == b'A'), "got {seen:?}");
    }

    #[tokio::test]
    async fn test_concurrent_writes_do_not_interleave() {
        let (ours, mut theirs) = duplex(16);
        let conn = Arc::new(Connection::new(device(), 1, Box::new(ours)));

        let a = vec![b'a'; 4096];
        let b = vec![b'b'; 4096];

        let reader = tokio::spawn(async move {
            let mut out = Vec::new();
            let mut buf = [0u8; 512];
            while out.len() < 8192 {
                let n = theirs.read(&mut buf).await.unwrap();
                out.extend_from_slice(&buf[..n]);
            }
            out
        });

        let c1 = Arc::clone(&conn);
        let c2 = Arc::clone(&conn);
        let (r1, r2) = tokio::join!(
            async move { c1.write_all(&a, LIMIT).await },
            async move { c2.write_all(&b, LIMIT).await },
        );
        r1.unwrap();
        r2.unwrap();

        let out = reader.await.unwrap();
        // Each payload arrives as one contiguous run
        let first = out[0];
        assert!(out[..4096].iter().all(|&x| x == first));
        assert!(out[4096..].iter().all(|&x| x != first));
    }
}
