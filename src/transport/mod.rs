//! Transport layer abstraction
//!
//! This module provides a pluggable transport layer supporting:
//! - In-memory channels (for testing)
//! - WebSocket connections to the relay
//!
//! # Design
//!
//! A transport only moves text frames between the client and the relay.
//! Frames are JSON (see [`frame`]); encryption happens before a frame is
//! built, so the transport never sees plaintext.

use async_trait::async_trait;
use thiserror::Error;

pub mod frame;
pub mod websocket;

pub use frame::{InboundFrame, OutboundFrame};
pub use websocket::{WebSocketConnector, WebSocketTransport};

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed
    #[error("Connection closed")]
    Disconnected,

    /// Send failed
    #[error("Failed to send: {0}")]
    SendFailed(String),

    /// Receive failed
    #[error("Failed to receive: {0}")]
    ReceiveFailed(String),

    /// Invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// An open session with the relay
///
/// `receive` must be cancel safe: the connection manager polls it inside
/// `tokio::select!` alongside outbound work.
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame
    async fn send(&mut self, frame: &str) -> TransportResult<()>;

    /// Receive the next text frame
    ///
    /// Blocks until a frame is available or the connection is closed.
    async fn receive(&mut self) -> TransportResult<String>;

    /// Check if the transport is connected
    fn is_connected(&self) -> bool;

    /// Close the transport
    async fn close(&mut self) -> TransportResult<()>;
}

/// Opens transports to a relay endpoint
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Transport produced by this connector
    type Transport: Transport + 'static;

    /// Open a new session to `endpoint`
    async fn open(&self, endpoint: &str) -> TransportResult<Self::Transport>;
}

/// In-memory transport for testing
///
/// Uses channels to simulate a connection between two endpoints.
pub mod memory {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::{mpsc, watch};

    /// Create a pair of connected in-memory transports
    pub fn create_pair() -> (MemoryTransport, MemoryTransport) {
        let (tx1, rx1) = mpsc::channel(100);
        let (tx2, rx2) = mpsc::channel(100);

        let transport1 = MemoryTransport {
            tx: Some(tx1),
            rx: rx2,
        };

        let transport2 = MemoryTransport {
            tx: Some(tx2),
            rx: rx1,
        };

        (transport1, transport2)
    }

    /// In-memory transport endpoint
    ///
    /// Closing or dropping one end makes the other end's `receive` fail
    /// with [`TransportError::Disconnected`].
    pub struct MemoryTransport {
        tx: Option<mpsc::Sender<String>>,
        rx: mpsc::Receiver<String>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&mut self, frame: &str) -> TransportResult<()> {
            let tx = self.tx.as_ref().ok_or(TransportError::Disconnected)?;

            tx.send(frame.to_string())
                .await
                .map_err(|_| TransportError::SendFailed("Channel closed".to_string()))
        }

        async fn receive(&mut self) -> TransportResult<String> {
            if self.tx.is_none() {
                return Err(TransportError::Disconnected);
            }

            self.rx.recv().await.ok_or(TransportError::Disconnected)
        }

        fn is_connected(&self) -> bool {
            self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
        }

        async fn close(&mut self) -> TransportResult<()> {
            self.tx = None;
            self.rx.close();
            Ok(())
        }
    }

    struct ConnectorState {
        opens: AtomicUsize,
        refuse: AtomicBool,
        gate: watch::Sender<bool>,
        accepted: mpsc::UnboundedSender<MemoryTransport>,
    }

    /// Connector whose sessions terminate at a [`MemoryRelay`]
    ///
    /// Opens are counted, can be refused, and can be held behind a gate to
    /// observe the `Connecting` state.
    #[derive(Clone)]
    pub struct MemoryConnector {
        state: Arc<ConnectorState>,
    }

    /// Relay side of a [`MemoryConnector`]
    pub struct MemoryRelay {
        accepted: mpsc::UnboundedReceiver<MemoryTransport>,
    }

    impl MemoryConnector {
        /// Create a connector and the relay end that accepts its sessions
        pub fn new() -> (MemoryConnector, MemoryRelay) {
            let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
            let (gate, _) = watch::channel(true);

            let connector = MemoryConnector {
                state: Arc::new(ConnectorState {
                    opens: AtomicUsize::new(0),
                    refuse: AtomicBool::new(false),
                    gate,
                    accepted: accepted_tx,
                }),
            };

            (connector, MemoryRelay { accepted: accepted_rx })
        }

        /// Number of `open` calls so far
        pub fn opens(&self) -> usize {
            self.state.opens.load(Ordering::SeqCst)
        }

        /// Make subsequent opens fail
        pub fn set_refuse(&self, refuse: bool) {
            self.state.refuse.store(refuse, Ordering::SeqCst);
        }

        /// Hold (`false`) or release (`true`) pending and future opens
        pub fn set_gate(&self, open: bool) {
            self.state.gate.send_replace(open);
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        type Transport = MemoryTransport;

        async fn open(&self, _endpoint: &str) -> TransportResult<MemoryTransport> {
            self.state.opens.fetch_add(1, Ordering::SeqCst);

            let mut gate = self.state.gate.subscribe();
            gate.wait_for(|open| *open)
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

            if self.state.refuse.load(Ordering::SeqCst) {
                return Err(TransportError::ConnectionFailed("refused".to_string()));
            }

            let (client, relay) = create_pair();
            self.state
                .accepted
                .send(relay)
                .map_err(|_| TransportError::ConnectionFailed("relay gone".to_string()))?;
            Ok(client)
        }
    }

    impl MemoryRelay {
        /// Next session opened by the connector
        pub async fn accept(&mut self) -> Option<MemoryTransport> {
            self.accepted.recv().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_transport() {
        let (mut alice, mut bob) = memory::create_pair();

        // Alice sends to Bob
        alice.send("Hello Bob").await.unwrap();
        let received = bob.receive().await.unwrap();
        assert_eq!(received, "Hello Bob");

        // Bob sends to Alice
        bob.send("Hello Alice").await.unwrap();
        let received = alice.receive().await.unwrap();
        assert_eq!(received, "Hello Alice");
    }

    #[tokio::test]
    async fn test_memory_transport_close() {
        let (mut alice, mut bob) = memory::create_pair();

        alice.close().await.unwrap();
        assert!(!alice.is_connected());

        // Should fail after close, on both ends
        assert!(alice.send("test").await.is_err());
        assert_eq!(bob.receive().await, Err(TransportError::Disconnected));
    }

    #[tokio::test]
    async fn test_memory_connector_counts_and_refuses() {
        let (connector, mut relay) = memory::MemoryConnector::new();

        let mut client = connector.open("mem://relay").await.unwrap();
        let mut server = relay.accept().await.unwrap();
        client.send("ping").await.unwrap();
        assert_eq!(server.receive().await.unwrap(), "ping");

        connector.set_refuse(true);
        assert!(matches!(
            connector.open("mem://relay").await,
            Err(TransportError::ConnectionFailed(_))
        ));
        assert_eq!(connector.opens(), 2);
    }

    #[tokio::test]
    async fn test_memory_connector_gate() {
        let (connector, _relay) = memory::MemoryConnector::new();
        connector.set_gate(false);

        let pending = tokio::spawn({
            let connector = connector.clone();
            async move { connector.open("mem://relay").await.is_ok() }
        });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        connector.set_gate(true);
        assert!(pending.await.unwrap());
    }
}
