// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Finding devices to connect to.

use std::process::Command;

use serialport::SerialPortType;
use tracing::debug;

use crate::descriptor::BluetoothAddress;
use crate::error::TransportError;

/// A serial port that may host a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbPort {
    pub path: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub product: Option<String>,
}

/// A paired Bluetooth device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BluetoothDevice {
    pub address: BluetoothAddress,
    pub name: String,
}

/// Serial ports known to the OS, USB details filled in where available.
pub fn usb_ports() -> Result<Vec<UsbPort>, TransportError> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|info| match info.port_type {
            SerialPortType::UsbPort(usb) => UsbPort {
                path: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                serial_number: usb.serial_number,
                product: usb.product,
            },
            _ => UsbPort {
                path: info.port_name,
                vid: None,
                pid: None,
                serial_number: None,
                product: None,
            },
        })
        .collect())
}

/// Devices BlueZ reports as paired, via `bluetoothctl`.
pub fn paired_bluetooth_devices() -> Result<Vec<BluetoothDevice>, TransportError> {
    let output = Command::new("bluetoothctl")
        .args(["devices", "Paired"])
        .output()?;
    if !output.status.success() {
        return Err(TransportError::Io(std::io::Error::other(format!(
            "bluetoothctl exited with {}",
            output.status
        ))));
    }
    Ok(parse_bluetoothctl_devices(&String::from_utf8_lossy(
        &output.stdout,
    )))
}

/// Parse `Device <MAC> <name>` lines; anything else is skipped.
pub fn parse_bluetoothctl_devices(text: &str) -> Vec<BluetoothDevice> {
    text.lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Device ")?;
            let (mac, name) = rest.split_once(' ').unwrap_or((rest, ""));
            match mac.parse::<BluetoothAddress>() {
                Ok(address) => Some(BluetoothDevice {
                    address,
                    name: name.trim().to_string(),
                }),
                Err(e) => {
                    debug!(line, error = %e, "skipping bluetoothctl line");
                    None
                }
            }
        })
        .collect()
}
