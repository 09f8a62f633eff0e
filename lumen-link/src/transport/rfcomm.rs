// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Bluetooth RFCOMM transport.
//!
//! On Linux this talks to BlueZ through a raw `AF_BLUETOOTH` stream socket,
//! so no `rfcomm bind` is needed. Reads hand back chunks exactly as the
//! socket delivers them. Other platforms fail `open` with `Unsupported`.

use std::time::Duration;

use super::{Connection, Transport};
use crate::descriptor::ConnectionDescriptor;
use crate::error::TransportError;

/// Connects to a paired device by address and RFCOMM channel.
pub struct RfcommTransport {
    read_timeout: Duration,
}

impl RfcommTransport {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

impl Transport for RfcommTransport {
    fn open(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn Connection>, TransportError> {
        match descriptor {
            ConnectionDescriptor::Bluetooth { address, channel } => {
                imp::connect(address.0, *channel, self.read_timeout, descriptor.url())
            }
            other => Err(TransportError::InvalidDescriptor(format!(
                "RFCOMM transport cannot open {}",
                other
            ))),
        }
    }
}

#[cfg(target_os = "linux")]
mod imp {
    use std::fs::File;
    use std::io::{self, Read, Write};
    use std::mem;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use tracing::{debug, warn};

    use crate::error::TransportError;
    use crate::transport::Connection;

    const BTPROTO_RFCOMM: libc::c_int = 3;

    /// Largest chunk requested from the socket per read.
    const READ_CHUNK: usize = 1024;

    /// `struct sockaddr_rc` from `<bluetooth/rfcomm.h>`.
    #[repr(C)]
    struct SockaddrRc {
        rc_family: libc::sa_family_t,
        /// Little-endian: least significant address byte first.
        rc_bdaddr: [u8; 6],
        rc_channel: u8,
    }

    pub(super) fn connect(
        address: [u8; 6],
        channel: u8,
        read_timeout: Duration,
        target: String,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let open_err = |source: io::Error| TransportError::Open {
            target: target.clone(),
            source,
        };

        // SAFETY: plain socket(2) call; the result is checked before use.
        let fd = unsafe {
            libc::socket(
                libc::AF_BLUETOOTH,
                libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
                BTPROTO_RFCOMM,
            )
        };
        if fd < 0 {
            return Err(open_err(io::Error::last_os_error()));
        }
        // SAFETY: `fd` is a freshly created socket owned by nobody else.
        let socket = unsafe { OwnedFd::from_raw_fd(fd) };

        let mut bdaddr = address;
        bdaddr.reverse();
        let addr = SockaddrRc {
            rc_family: libc::AF_BLUETOOTH as libc::sa_family_t,
            rc_bdaddr: bdaddr,
            rc_channel: channel,
        };
        // SAFETY: `addr` is a valid sockaddr_rc and the length matches its size.
        let rc = unsafe {
            libc::connect(
                socket.as_raw_fd(),
                &addr as *const SockaddrRc as *const libc::sockaddr,
                mem::size_of::<SockaddrRc>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(open_err(io::Error::last_os_error()));
        }

        set_read_timeout(&socket, read_timeout).map_err(open_err)?;
        debug!(target = %target, "RFCOMM socket connected");

        Ok(Box::new(RfcommConnection {
            target,
            stream: Mutex::new(Some(Arc::new(File::from(socket)))),
        }))
    }

    fn set_read_timeout(socket: &OwnedFd, timeout: Duration) -> io::Result<()> {
        let tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        // SAFETY: `tv` outlives the call and the length matches its size.
        let rc = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const libc::timeval as *const libc::c_void,
                mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    struct RfcommConnection {
        target: String,
        stream: Mutex<Option<Arc<File>>>,
    }

    impl RfcommConnection {
        fn stream(&self) -> Result<Arc<File>, TransportError> {
            self.stream.lock().clone().ok_or(TransportError::Closed)
        }
    }

    impl Connection for RfcommConnection {
        fn read_available(&self) -> Result<Option<Vec<u8>>, TransportError> {
            let stream = self.stream()?;
            let mut buf = vec![0u8; READ_CHUNK];
            match (&*stream).read(&mut buf) {
                // Orderly shutdown by the peer
                Ok(0) => Err(TransportError::Closed),
                Ok(n) => {
                    buf.truncate(n);
                    Ok(Some(buf))
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    Ok(None)
                }
                Err(e) => Err(e.into()),
            }
        }

        fn write_bytes(&self, bytes: &[u8]) -> Result<(), TransportError> {
            let stream = self.stream()?;
            (&*stream).write_all(bytes)?;
            (&*stream).flush()?;
            Ok(())
        }

        fn close(&self) {
            let Some(stream) = self.stream.lock().take() else {
                return;
            };
            // Unblocks a reader still holding its own reference to the socket
            // SAFETY: the descriptor stays open while `stream` is alive.
            let rc = unsafe { libc::shutdown(stream.as_raw_fd(), libc::SHUT_RDWR) };
            if rc < 0 {
                let e = io::Error::last_os_error();
                if e.kind() != io::ErrorKind::NotConnected {
                    warn!(target = %self.target, error = %e, "RFCOMM shutdown failed");
                }
            }
            debug!(target = %self.target, "RFCOMM socket closed");
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use std::time::Duration;

    use crate::error::TransportError;
    use crate::transport::Connection;

    pub(super) fn connect(
        _address: [u8; 6],
        _channel: u8,
        _read_timeout: Duration,
        _target: String,
    ) -> Result<Box<dyn Connection>, TransportError> {
        Err(TransportError::Unsupported(
            "Bluetooth RFCOMM sockets are only available on Linux",
        ))
    }
}
