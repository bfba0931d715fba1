//! Heartbeat sender - periodic liveness byte on an idle connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::connection::Connection;
use crate::error::LinkError;
use crate::events::LinkEvent;
use crate::registry::RegistryHandle;

/// Writes the sentinel byte every `interval`, independent of traffic.
///
/// The first heartbeat goes out one interval after the connection was
/// established. Writes share the connection lock with application sends.
pub struct Heartbeat {
    connection: Arc<Connection>,
    registry: RegistryHandle,
    interval: Duration,
    byte: u8,
    write_timeout: Duration,
    cancel_token: CancellationToken,
}

impl Heartbeat {
    pub fn new(
        connection: Arc<Connection>,
        registry: RegistryHandle,
        interval: Duration,
        byte: u8,
        write_timeout: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            connection,
            registry,
            interval,
            byte,
            write_timeout,
            cancel_token,
        }
    }

    /// Sends heartbeats until a write fails or the token is cancelled.
    ///
    /// Returns the write failure, or `None` when cancelled.
    pub async fn run(self) -> Option<LinkError> {
        let device = self.connection.device().clone();
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!(device = %device, "Heartbeat cancelled");
                    return None;
                }
                _ = ticker.tick() => {}
            }

            match self
                .connection
                .write_all(&[self.byte], self.write_timeout)
                .await
            {
                Ok(()) => {
                    trace!(device = %device, "Heartbeat sent");
                    self.registry.publish(LinkEvent::HeartbeatSent {
                        device: device.clone(),
                    });
                }
                Err(e) => {
                    warn!(device = %device, error = %e, "Failed to send heartbeat");
                    return Some(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::spawn_registry;
    use callbell_core::DeviceAddress;
    use tokio::io::{duplex, AsyncReadExt};

    const INTERVAL: Duration = Duration::from_secs(5);

    fn connection(writer: tokio::io::DuplexStream) -> Arc<Connection> {
        Arc::new(Connection::new(
            DeviceAddress::new("10.0.4.21", 8080),
            1,
            Box::new(writer),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_sentinel_at_interval() {
        let (ours, mut theirs) = duplex(64);
        let heartbeat = Heartbeat::new(
            connection(ours),
            spawn_registry(),
            INTERVAL,
            0x00,
            Duration::from_secs(1),
            CancellationToken::new(),
        );
        let start = Instant::now();
        tokio::spawn(heartbeat.run());

        let mut buf = [0xffu8; 1];
        for n in 1..=3u32 {
            theirs.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, [0x00]);
            let elapsed = start.elapsed();
            assert!(elapsed >= INTERVAL * n, "heartbeat {n} too early: {elapsed:?}");
            assert!(elapsed < INTERVAL * n + Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_sentinel() {
        let (ours, mut theirs) = duplex(64);
        let heartbeat = Heartbeat::new(
            connection(ours),
            spawn_registry(),
            INTERVAL,
            0x7e,
            Duration::from_secs(1),
            CancellationToken::new(),
        );
        tokio::spawn(heartbeat.run());

        let mut buf = [0u8; 1];
        theirs.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x7e]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_ends_task() {
        let (ours, theirs) = duplex(64);
        drop(theirs);
        let heartbeat = Heartbeat::new(
            connection(ours),
            spawn_registry(),
            INTERVAL,
            0x00,
            Duration::from_secs(1),
            CancellationToken::new(),
        );

        let failure = heartbeat.run().await;
        assert!(matches!(failure, Some(LinkError::Write(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_heartbeats() {
        let (ours, mut theirs) = duplex(64);
        let token = CancellationToken::new();
        // Keep the connection alive after the task ends
        let conn = connection(ours);
        let heartbeat = Heartbeat::new(
            Arc::clone(&conn),
            spawn_registry(),
            INTERVAL,
            0x00,
            Duration::from_secs(1),
            token.clone(),
        );
        let task = tokio::spawn(heartbeat.run());

        let mut buf = [0u8; 1];
        theirs.read_exact(&mut buf).await.unwrap();

        token.cancel();
        assert!(task.await.unwrap().is_none());

        // Nothing more arrives while the connection stays open
        let more = tokio::time::timeout(INTERVAL * 3, theirs.read(&mut buf)).await;
        assert!(more.is_err());
    }
}
