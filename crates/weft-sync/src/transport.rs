//! Transport abstraction for replication.
//!
//! A transport is an ordered, reliable, bidirectional channel of frames.
//! Implementations may use TCP, WebSockets, or anything else that
//! preserves frame boundaries.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Transport for one replication session.
///
/// Implementations must be thread-safe (Send + Sync). A session reads from
/// one task and writes from another.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one frame.
    async fn send(&self, frame: Bytes) -> Result<()>;

    /// Receive the next frame.
    ///
    /// Returns `None` once the peer has closed its side.
    async fn recv(&self) -> Result<Option<Bytes>>;

    /// Close our side. The peer's `recv` returns `None` after draining.
    async fn close(&self) -> Result<()>;
}

/// A simple in-memory transport for testing.
pub mod memory {
    use super::*;
    use crate::error::SyncError;
    use tokio::sync::{mpsc, Mutex};

    /// One end of an in-memory duplex channel.
    pub struct MemoryTransport {
        sender: Mutex<Option<mpsc::Sender<Bytes>>>,
        receiver: Mutex<mpsc::Receiver<Bytes>>,
    }

    impl MemoryTransport {
        /// Two connected ends, each buffering up to `capacity` frames.
        pub fn pair(capacity: usize) -> (MemoryTransport, MemoryTransport) {
            let (a_tx, b_rx) = mpsc::channel(capacity.max(1));
            let (b_tx, a_rx) = mpsc::channel(capacity.max(1));
            (
                MemoryTransport {
                    sender: Mutex::new(Some(a_tx)),
                    receiver: Mutex::new(a_rx),
                },
                MemoryTransport {
                    sender: Mutex::new(Some(b_tx)),
                    receiver: Mutex::new(b_rx),
                },
            )
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, frame: Bytes) -> Result<()> {
            // Clone so a slow send does not block close.
            let sender = self.sender.lock().await.clone();
            match sender {
                Some(sender) => sender
                    .send(frame)
                    .await
                    .map_err(|_| SyncError::Transport("peer disconnected".into())),
                None => Err(SyncError::Transport("transport closed".into())),
            }
        }

        async fn recv(&self) -> Result<Option<Bytes>> {
            Ok(self.receiver.lock().await.recv().await)
        }

        async fn close(&self) -> Result<()> {
            self.sender.lock().await.take();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryTransport;
    use super::*;

    #[tokio::test]
    async fn test_memory_transport_send_recv() {
        let (a, b) = MemoryTransport::pair(8);

        a.send(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), Some(Bytes::from_static(b"ping")));

        b.send(Bytes::from_static(b"pong")).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), Some(Bytes::from_static(b"pong")));
    }

    #[tokio::test]
    async fn test_close_ends_peer_stream() {
        let (a, b) = MemoryTransport::pair(8);

        a.send(Bytes::from_static(b"last")).await.unwrap();
        a.close().await.unwrap();

        assert_eq!(b.recv().await.unwrap(), Some(Bytes::from_static(b"last")));
        assert_eq!(b.recv().await.unwrap(), None);
        assert!(a.send(Bytes::from_static(b"late")).await.is_err());
    }
}
