// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Transport adapters.
//!
//! A [`Transport`] opens connections; each [`Connection`] is the handle for
//! one session. The link reads on one thread and writes on another, so
//! connections take `&self` and synchronize internally. Adapters never retry:
//! retrying is the link's job.

use std::sync::Arc;
use std::time::Duration;

use crate::descriptor::ConnectionDescriptor;
use crate::error::TransportError;

pub mod memory;
pub mod rfcomm;
pub mod serial;

pub use memory::{MemoryPeer, MemoryTransport};
pub use rfcomm::RfcommTransport;
pub use serial::SerialTransport;

/// Opens connections for a descriptor.
pub trait Transport: Send + Sync {
    fn open(&self, descriptor: &ConnectionDescriptor)
        -> Result<Box<dyn Connection>, TransportError>;
}

/// One open byte stream to the device.
pub trait Connection: Send + Sync {
    /// Bounded read of whatever is available. `Ok(None)` when nothing arrived in time.
    fn read_available(&self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Write and flush `bytes`.
    fn write_bytes(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Release the handle. Idempotent; errors are logged, never returned.
    fn close(&self);
}

/// Picks the serial or RFCOMM adapter from the descriptor.
pub struct SystemTransport {
    serial: SerialTransport,
    rfcomm: RfcommTransport,
}

impl SystemTransport {
    pub fn new(read_timeout: Duration, read_window: usize) -> Self {
        Self {
            serial: SerialTransport::new(read_timeout, read_window),
            rfcomm: RfcommTransport::new(read_timeout),
        }
    }

    pub fn shared(read_timeout: Duration, read_window: usize) -> Arc<dyn Transport> {
        Arc::new(Self::new(read_timeout, read_window))
    }
}

impl Transport for SystemTransport {
    fn open(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn Connection>, TransportError> {
        match descriptor {
            ConnectionDescriptor::Usb { .. } => self.serial.open(descriptor),
            ConnectionDescriptor::Bluetooth { .. } => self.rfcomm.open(descriptor),
        }
    }
}
