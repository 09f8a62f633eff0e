// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Common framing types and utilities for the lumen link.
//!
//! This crate supports both `no_std` (device firmware) and `std` (host) environments:
//! - Default: `no_std` mode, fixed-capacity buffers from `heapless`
//! - `std` feature: Enables `Vec`/`String` based encoders and the line framing

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "std")]
extern crate alloc;

pub mod checksum;
pub mod frame;
pub mod kind;
#[cfg(feature = "std")]
pub mod line;
pub mod usb;

// Re-export commonly used types
pub use checksum::{checksum, checksum_parts, crc32};
pub use frame::{FrameError, FrameRef, ACK_FRAME_LEN, FRAME_HEADER_LEN, MIN_FRAME_LEN};
pub use kind::{Channel, MessageKind};
pub use usb::{PacketScanner, Scan, ScanState, USB_SYNC};
