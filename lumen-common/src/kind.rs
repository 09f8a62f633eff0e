// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Message kinds and physical channels.

use core::time::Duration;

use serde::{Deserialize, Serialize};

// --- Channel limits ---

/// Largest link frame carried over USB by the generic protocol.
pub const USB_MAX_PACKET_SIZE: usize = 256;
/// Largest link frame accepted by the legacy USB firmware.
pub const USB_LEGACY_MAX_PACKET_SIZE: usize = 35;
/// Largest link frame carried over Bluetooth RFCOMM.
pub const BLUETOOTH_MAX_PACKET_SIZE: usize = 32;

/// Default per-chunk acknowledgement timeout.
pub const DEFAULT_ACK_DELAY_MS: u64 = 500;

/// Physical channel a connection runs over.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Usb,
    Bluetooth,
}

impl Channel {
    /// Maximum size of one link frame (checksum, kind and payload) on this channel.
    pub fn max_packet_size(self) -> usize {
        match self {
            Channel::Usb => USB_MAX_PACKET_SIZE,
            Channel::Bluetooth => BLUETOOTH_MAX_PACKET_SIZE,
        }
    }
}

impl core::fmt::Display for Channel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Channel::Usb => f.write_str("USB"),
            Channel::Bluetooth => f.write_str("Bluetooth"),
        }
    }
}

// --- Message kinds ---

/// Kind byte carried in every binary frame.
///
/// `0x00` and `0x01` are link-level kinds; application kinds occupy
/// `0x80..=0xFE`. Any byte not listed here decodes as [`MessageKind::Unknown`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Acknowledges an inbound frame; payload is the single checksum byte.
    Crc = 0x00,
    /// Identification / keep-alive exchange.
    Idd = 0x01,
    /// Complete light strip configuration.
    LightConfiguration = 0x80,
    /// Free text, mostly for diagnostics.
    Text = 0x81,
    /// A single monitored value changed.
    ValueChanged = 0x82,
    /// Request the state machine currently stored on the device.
    StateMachinePull = 0x83,
    /// Upload a state machine chunk to the device.
    StateMachinePush = 0x84,
    Unknown = 0xFF,
}

impl MessageKind {
    /// All kinds with a defined code, in code order.
    pub const ALL: [MessageKind; 8] = [
        MessageKind::Crc,
        MessageKind::Idd,
        MessageKind::LightConfiguration,
        MessageKind::Text,
        MessageKind::ValueChanged,
        MessageKind::StateMachinePull,
        MessageKind::StateMachinePush,
        MessageKind::Unknown,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Look up a kind by its wire code. Unrecognized codes map to `Unknown`.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => MessageKind::Crc,
            0x01 => MessageKind::Idd,
            0x80 => MessageKind::LightConfiguration,
            0x81 => MessageKind::Text,
            0x82 => MessageKind::ValueChanged,
            0x83 => MessageKind::StateMachinePull,
            0x84 => MessageKind::StateMachinePush,
            _ => MessageKind::Unknown,
        }
    }

    /// True for kinds in the application range.
    pub fn is_application(self) -> bool {
        (0x80..=0xFE).contains(&self.code())
    }

    /// Per-chunk acknowledgement timeout for frames of this kind.
    pub fn delay(self) -> Duration {
        match self {
            MessageKind::Crc => Duration::ZERO,
            // Device writes the state machine to flash before it acks
            MessageKind::StateMachinePull | MessageKind::StateMachinePush => {
                Duration::from_millis(1000)
            }
            _ => Duration::from_millis(DEFAULT_ACK_DELAY_MS),
        }
    }

    /// Tag used by the line framing.
    pub fn tag(self) -> &'static str {
        match self {
            MessageKind::Crc => "CRC",
            MessageKind::Idd => "IDD",
            MessageKind::LightConfiguration => "LIGHT",
            MessageKind::Text => "TEXT",
            MessageKind::ValueChanged => "VALUE",
            MessageKind::StateMachinePull => "SMPULL",
            MessageKind::StateMachinePush => "SMPUSH",
            MessageKind::Unknown => "UNKNOWN",
        }
    }

    /// Look up a kind by its line tag. Unrecognized tags map to `Unknown`.
    pub fn from_tag(tag: &str) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.tag() == tag)
            .unwrap_or(MessageKind::Unknown)
    }
}

impl From<u8> for MessageKind {
    fn from(code: u8) -> Self {
        Self::from_code(code)
    }
}
