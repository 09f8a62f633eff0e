// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Connection descriptors: where a link connects to.

use std::fmt;
use std::str::FromStr;

use lumen_common::Channel;

/// A Bluetooth device address, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BluetoothAddress(pub [u8; 6]);

impl BluetoothAddress {
    /// Address as twelve upper-case hex digits without separators.
    pub fn compact(&self) -> String {
        self.0.iter().map(|b| format!("{:02X}", b)).collect()
    }
}

impl fmt::Display for BluetoothAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

impl FromStr for BluetoothAddress {
    type Err = String;

    /// Accepts `AA:BB:CC:DD:EE:FF`, `AA-BB-CC-DD-EE-FF` and `AABBCCDDEEFF`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();
        if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("invalid Bluetooth address '{}'", s));
        }

        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
                .map_err(|e| format!("invalid Bluetooth address '{}': {}", s, e))?;
        }
        Ok(Self(bytes))
    }
}

/// Channel-specific addressing for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionDescriptor {
    Bluetooth {
        address: BluetoothAddress,
        channel: u8,
    },
    Usb {
        path: String,
    },
}

impl ConnectionDescriptor {
    pub fn bluetooth(address: BluetoothAddress, channel: u8) -> Self {
        Self::Bluetooth { address, channel }
    }

    pub fn usb(path: impl Into<String>) -> Self {
        Self::Usb { path: path.into() }
    }

    pub fn channel(&self) -> Channel {
        match self {
            Self::Bluetooth { .. } => Channel::Bluetooth,
            Self::Usb { .. } => Channel::Usb,
        }
    }

    /// Serial-port-profile URL identifying this device.
    ///
    /// Only meaningful for Bluetooth descriptors; USB descriptors return their path.
    pub fn url(&self) -> String {
        match self {
            Self::Bluetooth { address, channel } => format!(
                "btspp://{}:{};authenticate=false;encrypt=false;master=false",
                address.compact(),
                channel
            ),
            Self::Usb { path } => path.clone(),
        }
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bluetooth { address, channel } => write!(f, "{} channel {}", address, channel),
            Self::Usb { path } => f.write_str(path),
        }
    }
}
