// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! USB CDC serial transport.

use parking_lot::Mutex;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::{debug, warn};

use super::{Connection, Transport};
use crate::descriptor::ConnectionDescriptor;
use crate::error::TransportError;

/// Serial line speed expected by the controller firmware.
pub const BAUD_RATE: u32 = 115_200;

/// Timeout used while discarding stale input after open.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(10);

/// Opens `/dev/ttyACM*`-style ports at 115200 8N1 without flow control.
pub struct SerialTransport {
    read_timeout: Duration,
    read_window: usize,
}

impl SerialTransport {
    pub fn new(read_timeout: Duration, read_window: usize) -> Self {
        Self {
            read_timeout,
            read_window: read_window.max(1),
        }
    }
}

impl Transport for SerialTransport {
    fn open(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let path = match descriptor {
            ConnectionDescriptor::Usb { path } => path,
            other => {
                return Err(TransportError::InvalidDescriptor(format!(
                    "serial transport cannot open {}",
                    other
                )))
            }
        };

        let mut port = serialport::new(path, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.read_timeout)
            .open()
            .map_err(|e| TransportError::Open {
                target: path.clone(),
                source: io::Error::from(e),
            })?;

        drain_rx(port.as_mut(), self.read_timeout);
        let writer = port.try_clone()?;
        debug!(port = %path, "serial port open");

        Ok(Box::new(SerialConnection {
            name: path.clone(),
            reader: Mutex::new(Some(port)),
            writer: Mutex::new(Some(writer)),
            window: self.read_window,
        }))
    }
}

/// Drop bytes the device sent before we were listening.
fn drain_rx(port: &mut dyn SerialPort, timeout: Duration) {
    let mut buf = [0u8; 64];
    let _ = port.set_timeout(DRAIN_TIMEOUT);
    while port.read(&mut buf).unwrap_or(0) > 0 {}
    let _ = port.set_timeout(timeout);
}

/// Reader and writer are separate handles onto the same port.
struct SerialConnection {
    name: String,
    reader: Mutex<Option<Box<dyn SerialPort>>>,
    writer: Mutex<Option<Box<dyn SerialPort>>>,
    window: usize,
}

impl Connection for SerialConnection {
    fn read_available(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut guard = self.reader.lock();
        let port = guard.as_mut().ok_or(TransportError::Closed)?;

        let mut buf = vec![0u8; self.window];
        match port.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.writer.lock();
        let port = guard.as_mut().ok_or(TransportError::Closed)?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn close(&self) {
        if let Some(mut writer) = self.writer.lock().take() {
            if let Err(e) = writer.flush() {
                warn!(port = %self.name, error = %e, "flush on close failed");
            }
        }
        // Waits for an in-progress read, bounded by the port timeout
        if self.reader.lock().take().is_some() {
            debug!(port = %self.name, "serial port closed");
        }
    }
}
