// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Unit tests for the USB packet wrapper and its scanner.

use heapless::Vec as HeaplessVec;
use lumen_common::usb::{encode_heapless, packet_checksum, PacketScanner, Scan, ScanState, USB_SYNC};

fn feed<const N: usize>(scanner: &mut PacketScanner<N>, bytes: &[u8]) -> Vec<Scan<N>> {
    bytes
        .iter()
        .map(|&b| scanner.push(b))
        .filter(|scan| *scan != Scan::Pending)
        .collect()
}

fn packet(payload: &[u8]) -> HeaplessVec<u8, 300> {
    encode_heapless(payload).unwrap()
}

// =============================================================================
// Encoding tests
// =============================================================================

#[test]
fn test_packet_layout() {
    let payload = [0x01, 0x02, 0x03];
    let p = packet(&payload);
    assert_eq!(p[0], USB_SYNC);
    assert_eq!(p[1], 0x00);
    assert_eq!(p[2], 0x03);
    assert_eq!(&p[3..6], &payload);
    assert_eq!(p[6], packet_checksum(0x00, 0x03, &payload));
}

#[test]
fn test_checksum_formula() {
    // 0xFF - (0x00 + 0x02 + 0x10 + 0x20) + 1
    assert_eq!(packet_checksum(0x00, 0x02, &[0x10, 0x20]), 0xCE);
}

#[test]
fn test_two_byte_length() {
    let payload = [0x77u8; 260];
    let p = packet(&payload);
    assert_eq!(p[1], 0x01);
    assert_eq!(p[2], 0x04);
}

#[test]
fn test_encode_overflow_returns_none() {
    let too_small: Option<HeaplessVec<u8, 4>> = encode_heapless(&[0x01]);
    assert!(too_small.is_none());
}

// =============================================================================
// Scanner tests
// =============================================================================

#[test]
fn test_scanner_starts_idle() {
    let scanner: PacketScanner<256> = PacketScanner::new();
    assert_eq!(scanner.state(), ScanState::Idle);
    assert_eq!(scanner.capacity(), 256);
}

#[test]
fn test_scanner_one_byte_per_read() {
    let payload = [0x31, 0x82, 0x01, 0x02];
    let mut scanner: PacketScanner<256> = PacketScanner::new();
    let mut frames = Vec::new();
    for &byte in packet(&payload).iter() {
        if let Scan::Frame(frame) = scanner.push(byte) {
            frames.push(frame);
        }
    }
    assert_eq!(frames.len(), 1);
    assert_eq!(&frames[0][..], &payload);
    assert_eq!(scanner.state(), ScanState::Idle);
}

#[test]
fn test_scanner_arbitrary_fragmentation() {
    let payload: Vec<u8> = (0..40u8).collect();
    let bytes = packet(&payload);
    for chunk_size in 1..bytes.len() {
        let mut scanner: PacketScanner<64> = PacketScanner::new();
        let mut frames = Vec::new();
        for chunk in bytes.chunks(chunk_size) {
            frames.extend(feed(&mut scanner, chunk));
        }
        assert_eq!(frames.len(), 1, "chunk size {}", chunk_size);
        match &frames[0] {
            Scan::Frame(frame) => assert_eq!(&frame[..], &payload[..]),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}

#[test]
fn test_scanner_state_walk() {
    let mut scanner: PacketScanner<16> = PacketScanner::new();
    scanner.push(USB_SYNC);
    assert_eq!(scanner.state(), ScanState::LengthHigh);
    scanner.push(0x00);
    assert_eq!(scanner.state(), ScanState::LengthLow);
    scanner.push(0x01);
    assert_eq!(scanner.state(), ScanState::Additional);
    scanner.push(0x55);
    assert_eq!(scanner.state(), ScanState::Additional);
    let outcome = scanner.push(packet_checksum(0x00, 0x01, &[0x55]));
    assert!(matches!(outcome, Scan::Frame(_)));
    assert_eq!(scanner.state(), ScanState::Idle);
}

#[test]
fn test_scanner_skips_noise_before_sync() {
    let mut bytes = vec![0x00, 0x13, 0x37, 0xFF];
    bytes.extend_from_slice(&packet(&[0x42]));
    let mut scanner: PacketScanner<16> = PacketScanner::new();
    let outcomes = feed(&mut scanner, &bytes);
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(&outcomes[0], Scan::Frame(f) if f[..] == [0x42]));
}

#[test]
fn test_scanner_oversize_resets_to_idle() {
    let mut scanner: PacketScanner<8> = PacketScanner::new();
    let outcomes = feed(&mut scanner, &[USB_SYNC, 0x00, 0x09]);
    assert_eq!(outcomes, vec![Scan::Oversize { declared: 9 }]);
    assert_eq!(scanner.state(), ScanState::Idle);
}

#[test]
fn test_scanner_recovers_after_oversize() {
    let mut scanner: PacketScanner<8> = PacketScanner::new();
    let mut bytes = vec![USB_SYNC, 0x01, 0x00];
    bytes.extend_from_slice(&packet(&[0x01, 0x02]));
    let outcomes = feed(&mut scanner, &bytes);
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0], Scan::Oversize { declared: 256 });
    assert!(matches!(&outcomes[1], Scan::Frame(f) if f[..] == [0x01, 0x02]));
}

#[test]
fn test_scanner_bad_checksum_is_discarded() {
    let mut bytes = packet(&[0x10, 0x20]);
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    let mut scanner: PacketScanner<16> = PacketScanner::new();
    let outcomes = feed(&mut scanner, &bytes);
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], Scan::BadChecksum { .. }));
    assert_eq!(scanner.state(), ScanState::Idle);
}

#[test]
fn test_scanner_back_to_back_packets() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&packet(&[0x01]));
    bytes.extend_from_slice(&packet(&[0x02, 0x03]));
    bytes.extend_from_slice(&packet(&[]));
    let mut scanner: PacketScanner<16> = PacketScanner::new();
    let frames: Vec<Vec<u8>> = feed(&mut scanner, &bytes)
        .into_iter()
        .filter_map(|scan| match scan {
            Scan::Frame(f) => Some(f.to_vec()),
            _ => None,
        })
        .collect();
    assert_eq!(frames, vec![vec![0x01], vec![0x02, 0x03], vec![]]);
}

#[test]
fn test_scanner_reset_drops_partial_packet() {
    let mut scanner: PacketScanner<16> = PacketScanner::new();
    feed(&mut scanner, &[USB_SYNC, 0x00, 0x04, 0x01]);
    assert_eq!(scanner.state(), ScanState::Additional);
    scanner.reset();
    assert_eq!(scanner.state(), ScanState::Idle);
    let outcomes = feed(&mut scanner, &packet(&[0x09]));
    assert!(matches!(&outcomes[0], Scan::Frame(f) if f[..] == [0x09]));
}
