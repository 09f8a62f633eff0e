// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! In-process transport.
//!
//! [`MemoryTransport`] hands out connections backed by crossbeam channels and
//! [`MemoryPeer`] plays the device: it injects bytes towards the link, reads
//! what the link wrote, and can refuse or drop connections.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::debug;

use super::{Connection, Transport};
use crate::descriptor::ConnectionDescriptor;
use crate::error::TransportError;

struct MemoryShared {
    reachable: AtomicBool,
    opens: AtomicUsize,
    /// Sender feeding the current connection, tagged with its open number.
    to_link: Mutex<Option<(usize, Sender<Vec<u8>>)>>,
    from_link_tx: Sender<Vec<u8>>,
    from_link_rx: Receiver<Vec<u8>>,
    read_timeout: Duration,
}

/// Transport side of an in-memory pair.
#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<MemoryShared>,
}

/// Device side of an in-memory pair.
#[derive(Clone)]
pub struct MemoryPeer {
    shared: Arc<MemoryShared>,
}

impl MemoryTransport {
    /// Create a connected transport/peer pair. The peer starts reachable.
    pub fn pair(read_timeout: Duration) -> (Self, MemoryPeer) {
        let (from_link_tx, from_link_rx) = channel::unbounded();
        let shared = Arc::new(MemoryShared {
            reachable: AtomicBool::new(true),
            opens: AtomicUsize::new(0),
            to_link: Mutex::new(None),
            from_link_tx,
            from_link_rx,
            read_timeout,
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            MemoryPeer { shared },
        )
    }
}

impl Transport for MemoryTransport {
    fn open(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn Connection>, TransportError> {
        if !self.shared.reachable.load(Ordering::SeqCst) {
            return Err(TransportError::Open {
                target: descriptor.to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "peer unreachable"),
            });
        }

        let id = self.shared.opens.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = channel::unbounded();
        // Replacing the sender disconnects any earlier connection's reader
        *self.shared.to_link.lock() = Some((id, tx));
        debug!(%descriptor, id, "memory connection open");

        Ok(Box::new(MemoryConnection {
            id,
            rx,
            closed: AtomicBool::new(false),
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct MemoryConnection {
    id: usize,
    rx: Receiver<Vec<u8>>,
    closed: AtomicBool,
    shared: Arc<MemoryShared>,
}

impl Connection for MemoryConnection {
    fn read_available(&self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        match self.rx.recv_timeout(self.shared.read_timeout) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.shared
            .from_link_tx
            .send(bytes.to_vec())
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut to_link = self.shared.to_link.lock();
        if matches!(*to_link, Some((id, _)) if id == self.id) {
            *to_link = None;
        }
        debug!(id = self.id, "memory connection closed");
    }
}

impl MemoryPeer {
    /// Deliver `bytes` to the link as one read. False when no connection is open.
    pub fn inject(&self, bytes: &[u8]) -> bool {
        match self.shared.to_link.lock().as_ref() {
            Some((_, tx)) => tx.send(bytes.to_vec()).is_ok(),
            None => false,
        }
    }

    /// Next chunk the link wrote, waiting up to `timeout`.
    pub fn recv(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.shared.from_link_rx.recv_timeout(timeout).ok()
    }

    /// Discard everything the link wrote so far.
    pub fn drain(&self) -> usize {
        self.shared.from_link_rx.try_iter().count()
    }

    /// Make future `open` calls succeed or fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of successful opens so far.
    pub fn open_count(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.to_link.lock().is_some()
    }

    /// Hang up on the current connection; its next read fails with `Closed`.
    pub fn drop_connection(&self) {
        self.shared.to_link.lock().take();
    }
}
