//! In-process transport over tokio channels.
//!
//! Connects peers living in the same process, which is all tests and local
//! simulation need. Addresses are claimed in a shared registry; a dropped
//! listener frees its address and makes later dials fail, which is how tests
//! make a host unreachable.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{
    Connection, ConnectionEvent, ConnectionSender, Listener, Transport, TransportError,
};

/// Shared in-memory transport. Clone the `Arc` into every simulated peer.
#[derive(Default)]
pub struct InMemoryTransport {
    listeners: Mutex<HashMap<String, mpsc::UnboundedSender<Connection>>>,
}

impl InMemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn listen(&self, address: &str) -> Result<Listener, TransportError> {
        let mut listeners = self.listeners.lock().await;
        if let Some(existing) = listeners.get(address) {
            if !existing.is_closed() {
                return Err(TransportError::AddressTaken(address.to_string()));
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        listeners.insert(address.to_string(), tx);
        tracing::debug!("Listening at '{}'", address);
        Ok(rx)
    }

    async fn connect(&self, local: &str, address: &str) -> Result<Connection, TransportError> {
        let listeners = self.listeners.lock().await;
        let listener = listeners
            .get(address)
            .ok_or_else(|| TransportError::Unreachable(address.to_string()))?;

        let open = Arc::new(AtomicBool::new(true));
        let (dialer_tx, dialer_rx) = mpsc::unbounded_channel();
        let (acceptor_tx, acceptor_rx) = mpsc::unbounded_channel();

        // Each side's sender feeds the other side's event stream.
        let dialer_side = Connection::new(
            ConnectionSender::new(address.to_string(), acceptor_tx.clone(), open.clone()),
            dialer_rx,
        );
        let acceptor_side = Connection::new(
            ConnectionSender::new(local.to_string(), dialer_tx.clone(), open),
            acceptor_rx,
        );

        listener
            .send(acceptor_side)
            .map_err(|_| TransportError::Unreachable(address.to_string()))?;

        let _ = dialer_tx.send(ConnectionEvent::Open);
        let _ = acceptor_tx.send(ConnectionEvent::Open);
        tracing::debug!("Connected '{}' -> '{}'", local, address);
        Ok(dialer_side)
    }
}
