//! Byte transports between clients and the repository.
//!
//! A transport moves opaque frames in both directions. Closing either end
//! disconnects both, which is how connection loss is simulated in memory.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Network error type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkError {
    ConnectionFailed(String),
    SendFailed(String),
    Disconnected,
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkError::ConnectionFailed(e) => write!(f, "Connection failed: {}", e),
            NetworkError::SendFailed(e) => write!(f, "Send failed: {}", e),
            NetworkError::Disconnected => write!(f, "Disconnected"),
        }
    }
}

impl std::error::Error for NetworkError {}

/// One end of a bidirectional frame channel.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, frame: Vec<u8>) -> Result<(), NetworkError>;

    /// Wait for the next frame. Fails with [`NetworkError::Disconnected`]
    /// once either end is closed.
    async fn recv(&self) -> Result<Vec<u8>, NetworkError>;

    async fn close(&self);

    fn is_open(&self) -> bool;
}

/// Accepts incoming transports on the repository side.
#[async_trait]
pub trait Listener: Send + 'static {
    /// `None` once no more connections can arrive.
    async fn accept(&mut self) -> Option<Arc<dyn Transport>>;
}

/// In-memory transport for testing and simulation.
pub struct MemoryTransport {
    label: String,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: Arc<watch::Sender<bool>>,
}

impl MemoryTransport {
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Two connected endpoints.
pub fn memory_pair(label: impl Into<String>) -> (MemoryTransport, MemoryTransport) {
    let label = label.into();
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    let (closed, _) = watch::channel(false);
    let closed = Arc::new(closed);

    let a = MemoryTransport {
        label: format!("{}/client", label),
        outgoing: Mutex::new(Some(a_tx)),
        incoming: tokio::sync::Mutex::new(a_rx),
        closed: closed.clone(),
    };
    let b = MemoryTransport {
        label: format!("{}/server", label),
        outgoing: Mutex::new(Some(b_tx)),
        incoming: tokio::sync::Mutex::new(b_rx),
        closed,
    };
    (a, b)
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, frame: Vec<u8>) -> Result<(), NetworkError> {
        if !self.is_open() {
            return Err(NetworkError::Disconnected);
        }
        let tx = self.outgoing.lock().clone();
        match tx {
            Some(tx) => tx
                .send(frame)
                .map_err(|e| NetworkError::SendFailed(e.to_string())),
            None => Err(NetworkError::Disconnected),
        }
    }

    async fn recv(&self) -> Result<Vec<u8>, NetworkError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(NetworkError::Disconnected);
        }
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            frame = incoming.recv() => frame.ok_or(NetworkError::Disconnected),
            _ = closed.changed() => Err(NetworkError::Disconnected),
        }
    }

    async fn close(&self) {
        self.outgoing.lock().take();
        self.closed.send_replace(true);
        tracing::debug!(transport = %self.label, "Closed transport");
    }

    fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }
}

/// Client-side half of an in-memory listener.
#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<Arc<dyn Transport>>,
    counter: Arc<Mutex<u64>>,
}

impl MemoryConnector {
    /// Open a new connection to the listener.
    pub fn connect(&self) -> Result<Arc<dyn Transport>, NetworkError> {
        let label = {
            let mut counter = self.counter.lock();
            *counter += 1;
            format!("conn-{}", *counter)
        };
        let (client, server) = memory_pair(label);
        self.accept_tx
            .send(Arc::new(server))
            .map_err(|_| NetworkError::ConnectionFailed("listener is gone".to_string()))?;
        Ok(Arc::new(client))
    }
}

pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<Arc<dyn Transport>>,
}

#[async_trait]
impl Listener for MemoryListener {
    async fn accept(&mut self) -> Option<Arc<dyn Transport>> {
        self.accept_rx.recv().await
    }
}

/// A listener and the connector that reaches it.
pub fn memory_listener() -> (MemoryConnector, MemoryListener) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (
        MemoryConnector {
            accept_tx,
            counter: Arc::new(Mutex::new(0)),
        },
        MemoryListener { accept_rx },
    )
}
