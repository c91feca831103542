//! The in-process message transport between workers.
//!
//! An [`Endpoint`] is one side of a bidirectional channel: posting is
//! fire-and-forget and inbound messages queue until the router claims the
//! receiving half. Shared buffers travel out-of-band next to the JSON body,
//! mirroring transferables on a structured-clone channel.

use std::fmt;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc;
use weft_shm::SharedBuffer;

/// A message body plus the shared buffers travelling with it.
#[derive(Debug)]
pub struct Packet {
    /// The JSON message body.
    pub body: Value,
    /// Shared buffers transferred alongside the body.
    pub buffers: Vec<SharedBuffer>,
}

impl Packet {
    /// Wraps a bare JSON body.
    pub fn new(body: Value) -> Self {
        Self {
            body,
            buffers: Vec::new(),
        }
    }

    /// Wraps a body with attached buffers.
    pub fn with_buffers(body: Value, buffers: Vec<SharedBuffer>) -> Self {
        Self { body, buffers }
    }
}

/// One side of a bidirectional in-process channel between two workers.
pub struct Endpoint {
    tx: Mutex<Option<mpsc::UnboundedSender<Packet>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Packet>>>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("terminated", &self.tx.lock().unwrap().is_none())
            .finish()
    }
}

impl Endpoint {
    /// Creates both sides of a channel.
    pub fn pair() -> (Endpoint, Endpoint) {
        let (left_tx, left_rx) = mpsc::unbounded_channel();
        let (right_tx, right_rx) = mpsc::unbounded_channel();
        (
            Endpoint {
                tx: Mutex::new(Some(left_tx)),
                rx: Mutex::new(Some(right_rx)),
            },
            Endpoint {
                tx: Mutex::new(Some(right_tx)),
                rx: Mutex::new(Some(left_rx)),
            },
        )
    }

    /// Posts a packet to the other side, fire-and-forget.
    ///
    /// Delivery failure (the peer terminated or dropped its endpoint) logs a
    /// warning and discards the packet.
    pub fn post(&self, packet: Packet) {
        let delivered = match &*self.tx.lock().unwrap() {
            Some(tx) => tx.send(packet).is_ok(),
            None => false,
        };
        if !delivered {
            tracing::warn!("peer endpoint is gone, dropping message");
        }
    }

    /// Claims the receiving half of this endpoint.
    ///
    /// The router calls this once when the endpoint is registered; later
    /// calls return `None`.
    pub(crate) fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Packet>> {
        self.rx.lock().unwrap().take()
    }

    /// Severs the channel in both directions.
    ///
    /// Outstanding posts from the other side start failing and anything not
    /// yet received is dropped. Used by the forced path of worker close.
    pub fn terminate(&self) {
        self.tx.lock().unwrap().take();
        self.rx.lock().unwrap().take();
    }
}
