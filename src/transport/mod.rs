//! Point-to-point transport contract.
//!
//! The real transport (WebRTC data channels in the browser) is supplied by
//! the embedding application; this crate only relies on named addresses,
//! connect/listen, and open/data/close/error events per connection. The
//! [`memory`] module provides an in-process implementation used by tests and
//! local simulation.

pub mod memory;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport-layer failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("address '{0}' is already claimed")]
    AddressTaken(String),

    #[error("no listener at address '{0}'")]
    Unreachable(String),

    #[error("connection is closed")]
    ConnectionClosed,
}

/// Lifecycle of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Dial in flight, not yet usable (real transports only; the in-memory
    /// transport opens synchronously)
    Opening,
    Open,
    Closed,
}

/// Events delivered on a connection, in per-connection FIFO order
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Open,
    Data(String),
    Closed,
    Error(String),
}

/// Stream of inbound connections accepted at a listen address
pub type Listener = mpsc::UnboundedReceiver<Connection>;

/// Stream of events for one connection
pub type ConnectionEvents = mpsc::UnboundedReceiver<ConnectionEvent>;

/// Sending half of a connection. Cheap to clone; all clones share the same
/// underlying channel and open/closed state.
#[derive(Debug, Clone)]
pub struct ConnectionSender {
    remote: String,
    tx: mpsc::UnboundedSender<ConnectionEvent>,
    open: Arc<AtomicBool>,
}

impl ConnectionSender {
    pub(crate) fn new(
        remote: String,
        tx: mpsc::UnboundedSender<ConnectionEvent>,
        open: Arc<AtomicBool>,
    ) -> Self {
        Self { remote, tx, open }
    }

    /// Address of the other side
    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn state(&self) -> ConnectionState {
        if self.open.load(Ordering::SeqCst) {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    /// Send one text frame. Fails once the connection is closed.
    pub fn send(&self, text: String) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        self.tx
            .send(ConnectionEvent::Data(text))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Close both directions and notify the other side
    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.tx.send(ConnectionEvent::Closed);
        }
    }
}

/// One established point-to-point channel.
///
/// Split into a sender half (kept in the replication registry) and an event
/// stream (polled by the session's event loop).
#[derive(Debug)]
pub struct Connection {
    sender: ConnectionSender,
    events: ConnectionEvents,
}

impl Connection {
    pub(crate) fn new(sender: ConnectionSender, events: ConnectionEvents) -> Self {
        Self { sender, events }
    }

    /// Address of the other side
    pub fn remote(&self) -> &str {
        self.sender.remote()
    }

    pub fn state(&self) -> ConnectionState {
        self.sender.state()
    }

    pub fn send(&self, text: String) -> Result<(), TransportError> {
        self.sender.send(text)
    }

    pub fn close(&self) {
        self.sender.close()
    }

    /// Wait for the next event on this connection
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    /// Split into the sender half and the event stream
    pub fn split(self) -> (ConnectionSender, ConnectionEvents) {
        (self.sender, self.events)
    }
}

/// Connect/listen primitive over named addresses.
///
/// `connect` carries the dialer's own address so the accepting side knows who
/// called; peers listen on their own participant id and the host additionally
/// listens on the room-code address.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Claim `address` and accept inbound connections on it.
    ///
    /// Fails with [`TransportError::AddressTaken`] while another live
    /// listener holds the address.
    async fn listen(&self, address: &str) -> Result<Listener, TransportError>;

    /// Dial `address`, identifying ourselves as `local`
    async fn connect(&self, local: &str, address: &str) -> Result<Connection, TransportError>;
}
