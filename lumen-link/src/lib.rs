// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Host side of the lumen link.
//!
//! Talks to lumen light and deployment-case controllers over USB CDC serial
//! or Bluetooth RFCOMM. Every frame is checksummed and resent until the
//! device acknowledges it; an identification keep-alive detects dead links
//! and forces a reconnect.

pub mod codec;
pub mod config;
pub mod descriptor;
pub mod discovery;
pub mod error;
pub mod link;
pub mod listener;
pub mod transport;

pub use codec::{Frame, FrameCodec};
pub use config::{Framing, LinkConfig};
pub use descriptor::{BluetoothAddress, ConnectionDescriptor};
pub use error::{ConfigError, LinkError, Result, TransportError};
pub use link::{ConnectionState, Link};
pub use listener::{DispatchMode, EventRecorder, LinkEvent, LinkListener, ListenerId};
pub use lumen_common::{Channel, MessageKind};
pub use transport::{MemoryPeer, MemoryTransport, SystemTransport, Transport};
