// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Length-prefixed packet wrapper used on the USB serial channel.
//!
//! Layout: `[0xAA][len_hi][len_lo][payload; len][checksum]`. The checksum is
//! the two's complement of the sum of the length bytes and payload, so the
//! sum of every byte after the sync byte is `0 mod 256`.
//!
//! USB CDC reads hand back arbitrary slices of the stream, so the receiver
//! runs a [`PacketScanner`] over every incoming byte.

#[cfg(feature = "std")]
extern crate alloc;

#[cfg(feature = "std")]
use alloc::vec::Vec;

use heapless::Vec as HeaplessVec;

use crate::checksum::checksum_parts;

/// Sync byte that starts every packet.
pub const USB_SYNC: u8 = 0xAA;
/// Sync, two length bytes and the trailing checksum.
pub const USB_PACKET_OVERHEAD: usize = 4;
/// Largest payload the 16-bit length field can declare.
pub const USB_MAX_DECLARED_LEN: usize = u16::MAX as usize;

/// Packet checksum: `(0xFF - sum(len_hi, len_lo, payload) + 1) & 0xFF`.
pub fn packet_checksum(len_hi: u8, len_lo: u8, payload: &[u8]) -> u8 {
    let sum = checksum_parts(&[&[len_hi, len_lo], payload]);
    0xFFu8.wrapping_sub(sum).wrapping_add(1)
}

fn length_bytes(len: usize) -> Option<(u8, u8)> {
    if len > USB_MAX_DECLARED_LEN {
        return None;
    }
    Some(((len >> 8) as u8, (len & 0xFF) as u8))
}

/// Wrap `payload` into a packet in a heapless Vec (for no_std).
///
/// Returns None if the packet does not fit into `N` bytes.
pub fn encode_heapless<const N: usize>(payload: &[u8]) -> Option<HeaplessVec<u8, N>> {
    let (len_hi, len_lo) = length_bytes(payload.len())?;
    let mut output = HeaplessVec::new();
    output.extend_from_slice(&[USB_SYNC, len_hi, len_lo]).ok()?;
    output.extend_from_slice(payload).ok()?;
    output.push(packet_checksum(len_hi, len_lo, payload)).ok()?;
    Some(output)
}

#[cfg(feature = "std")]
/// Wrap `payload` into a packet (for std).
///
/// Returns None if the payload is longer than the length field can declare.
pub fn encode(payload: &[u8]) -> Option<Vec<u8>> {
    let (len_hi, len_lo) = length_bytes(payload.len())?;
    let mut output = Vec::with_capacity(payload.len() + USB_PACKET_OVERHEAD);
    output.extend_from_slice(&[USB_SYNC, len_hi, len_lo]);
    output.extend_from_slice(payload);
    output.push(packet_checksum(len_hi, len_lo, payload));
    Some(output)
}

/// Receiver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Hunting for the sync byte.
    Idle,
    /// Sync seen, next byte is the high length byte.
    LengthHigh,
    /// Next byte is the low length byte.
    LengthLow,
    /// Collecting payload bytes, then the checksum.
    Additional,
}

/// Outcome of feeding one byte into the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scan<const N: usize> {
    /// Byte consumed, no packet boundary reached.
    Pending,
    /// A complete packet with a valid checksum; holds the payload.
    Frame(HeaplessVec<u8, N>),
    /// Declared length exceeds the receive buffer; scanner reset to `Idle`.
    Oversize { declared: usize },
    /// Trailing checksum did not match; scanner reset to `Idle`.
    BadChecksum { received: u8, expected: u8 },
}

/// Byte-at-a-time packet reassembler with an `N` byte payload buffer.
#[derive(Debug)]
pub struct PacketScanner<const N: usize> {
    state: ScanState,
    len_hi: u8,
    len_lo: u8,
    declared: usize,
    buf: HeaplessVec<u8, N>,
}

impl<const N: usize> Default for PacketScanner<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PacketScanner<N> {
    pub fn new() -> Self {
        Self {
            state: ScanState::Idle,
            len_hi: 0,
            len_lo: 0,
            declared: 0,
            buf: HeaplessVec::new(),
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Payload capacity of the receive buffer.
    pub fn capacity(&self) -> usize {
        N
    }

    /// Drop any partial packet and hunt for the next sync byte.
    pub fn reset(&mut self) {
        self.state = ScanState::Idle;
        self.declared = 0;
        self.buf.clear();
    }

    /// Feed one byte of the stream.
    pub fn push(&mut self, byte: u8) -> Scan<N> {
        match self.state {
            ScanState::Idle => {
                if byte == USB_SYNC {
                    self.state = ScanState::LengthHigh;
                }
                Scan::Pending
            }
            ScanState::LengthHigh => {
                self.len_hi = byte;
                self.state = ScanState::LengthLow;
                Scan::Pending
            }
            ScanState::LengthLow => {
                self.len_lo = byte;
                let declared = ((self.len_hi as usize) << 8) | self.len_lo as usize;
                if declared > N {
                    self.reset();
                    return Scan::Oversize { declared };
                }
                self.declared = declared;
                self.buf.clear();
                self.state = ScanState::Additional;
                Scan::Pending
            }
            ScanState::Additional => {
                if self.buf.len() < self.declared {
                    // Cannot overflow: declared <= N was checked above
                    let _ = self.buf.push(byte);
                    return Scan::Pending;
                }

                let expected = packet_checksum(self.len_hi, self.len_lo, &self.buf);
                let payload = core::mem::take(&mut self.buf);
                self.reset();
                if byte == expected {
                    Scan::Frame(payload)
                } else {
                    Scan::BadChecksum {
                        received: byte,
                        expected,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_bytes_sum_to_zero() {
        let packet: HeaplessVec<u8, 16> = encode_heapless(&[0x10, 0x20, 0xF0]).unwrap();
        let sum = packet[1..].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        assert_eq!(sum, 0);
    }

    #[test]
    fn test_empty_payload_packet() {
        let packet: HeaplessVec<u8, 8> = encode_heapless(&[]).unwrap();
        assert_eq!(&packet[..], &[USB_SYNC, 0x00, 0x00, 0x00]);

        let mut scanner: PacketScanner<8> = PacketScanner::new();
        let outcomes: HeaplessVec<Scan<8>, 8> = packet.iter().map(|&b| scanner.push(b)).collect();
        assert_eq!(outcomes[3], Scan::Frame(HeaplessVec::new()));
    }
}
