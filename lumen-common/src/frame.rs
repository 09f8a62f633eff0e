// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Generic binary link frame.
//!
//! Layout: `[checksum][kind][payload...]`. The checksum is the additive
//! checksum of everything after it (kind byte and payload).

#[cfg(feature = "std")]
extern crate alloc;

#[cfg(feature = "std")]
use alloc::vec::Vec;

use heapless::Vec as HeaplessVec;

use crate::checksum::{checksum, checksum_parts};
use crate::kind::MessageKind;

/// Checksum byte plus kind byte.
pub const FRAME_HEADER_LEN: usize = 2;
/// Shortest frame that can be decoded (empty payload).
pub const MIN_FRAME_LEN: usize = FRAME_HEADER_LEN;
/// An ack frame carries exactly one checksum byte.
pub const ACK_FRAME_LEN: usize = 3;

/// Why a buffer did not decode to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    TooShort { len: usize },
    ChecksumMismatch { received: u8, calculated: u8 },
}

impl core::fmt::Display for FrameError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FrameError::TooShort { len } => write!(f, "frame too short ({} bytes)", len),
            FrameError::ChecksumMismatch {
                received,
                calculated,
            } => write!(
                f,
                "checksum mismatch (received 0x{:02x}, calculated 0x{:02x})",
                received, calculated
            ),
        }
    }
}

/// A decoded frame borrowing its payload from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRef<'a> {
    pub checksum: u8,
    pub kind: MessageKind,
    pub payload: &'a [u8],
}

impl<'a> FrameRef<'a> {
    /// The acknowledged checksum, when this is a `Crc` frame with a payload.
    pub fn acked_checksum(&self) -> Option<u8> {
        match self.kind {
            MessageKind::Crc => self.payload.first().copied(),
            _ => None,
        }
    }
}

/// Checksum a frame of `kind` carrying `payload` will be sent with.
pub fn frame_checksum(kind: MessageKind, payload: &[u8]) -> u8 {
    checksum_parts(&[&[kind.code()], payload])
}

/// Decode a raw buffer into a frame.
///
/// Unrecognized kind bytes decode as `MessageKind::Unknown`, they are not an error.
pub fn decode(buf: &[u8]) -> Result<FrameRef<'_>, FrameError> {
    if buf.len() < MIN_FRAME_LEN {
        return Err(FrameError::TooShort { len: buf.len() });
    }

    let received = buf[0];
    let calculated = checksum(&buf[1..]);
    if received != calculated {
        return Err(FrameError::ChecksumMismatch {
            received,
            calculated,
        });
    }

    Ok(FrameRef {
        checksum: received,
        kind: MessageKind::from_code(buf[1]),
        payload: &buf[2..],
    })
}

/// Build the ack frame for a received checksum: `[chk(0x00, c)][0x00][c]`.
pub fn ack_frame(acked: u8) -> [u8; ACK_FRAME_LEN] {
    let kind = MessageKind::Crc.code();
    [checksum(&[kind, acked]), kind, acked]
}

/// Encode a frame into a heapless Vec (for no_std).
///
/// Returns None if the frame does not fit into `N` bytes.
pub fn encode_heapless<const N: usize>(
    kind: MessageKind,
    payload: &[u8],
) -> Option<HeaplessVec<u8, N>> {
    let mut output = HeaplessVec::new();
    output.push(frame_checksum(kind, payload)).ok()?;
    output.push(kind.code()).ok()?;
    output.extend_from_slice(payload).ok()?;
    Some(output)
}

#[cfg(feature = "std")]
/// Encode a frame into a Vec (for std).
pub fn encode(kind: MessageKind, payload: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(payload.len() + FRAME_HEADER_LEN);
    output.push(frame_checksum(kind, payload));
    output.push(kind.code());
    output.extend_from_slice(payload);
    output
}
