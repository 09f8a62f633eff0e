// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Checksums used to validate frames.
//!
//! The binary framing uses an 8-bit additive checksum (sum of all bytes
//! modulo 256). The legacy line framing uses CRC-32 over the payload text.

use crc::{Crc, CRC_32_ISO_HDLC};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Additive checksum: sum of all bytes modulo 256. Empty input yields 0.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Additive checksum over several slices, as if they were concatenated.
pub fn checksum_parts(parts: &[&[u8]]) -> u8 {
    parts
        .iter()
        .fold(0u8, |acc, part| acc.wrapping_add(checksum(part)))
}

/// CRC-32 (ISO-HDLC, the zlib/Ethernet polynomial) of `bytes`.
pub fn crc32(bytes: &[u8]) -> u32 {
    CRC32.checksum(bytes)
}
