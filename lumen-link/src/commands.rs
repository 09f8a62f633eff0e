// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use indicatif::{ProgressBar, ProgressStyle};

use lumen_common::frame;
use lumen_link::discovery;
use lumen_link::{
    BluetoothAddress, ConnectionDescriptor, EventRecorder, Framing, Link, LinkConfig, LinkEvent,
    MemoryPeer, MemoryTransport, MessageKind, SystemTransport,
};

/// How long to wait for the first connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// List serial ports.
pub fn ports() -> Result<()> {
    let ports = discovery::usb_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found.");
        return Ok(());
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  {:04x}:{:04x}  {}  {}",
                port.path,
                vid,
                pid,
                port.product.as_deref().unwrap_or("-"),
                port.serial_number.as_deref().unwrap_or("-")
            ),
            _ => println!("{}", port.path),
        }
    }
    Ok(())
}

/// List paired Bluetooth devices.
pub fn devices() -> Result<()> {
    let devices =
        discovery::paired_bluetooth_devices().context("Failed to query paired devices")?;
    if devices.is_empty() {
        println!("No paired devices.");
    }
    for device in devices {
        println!("{}  {}", device.address, device.name);
    }
    Ok(())
}

/// Print received messages until the time runs out.
pub fn monitor(config: &LinkConfig, target: ConnectionDescriptor, seconds: Option<u64>) -> Result<()> {
    let (link, events) = open(config, target)?;
    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));

    loop {
        let wait = match deadline {
            Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                Some(wait) => wait,
                None => break,
            },
            None => Duration::from_secs(1),
        };
        match events.recv_timeout(wait) {
            Ok(LinkEvent::MessageReceived { frame, .. }) => {
                println!("{:<8} {}", frame.kind.tag(), hex(&frame.payload));
            }
            Ok(LinkEvent::Connecting(_)) => println!("-- reconnecting"),
            Ok(LinkEvent::Connected(_)) => println!("-- connected"),
            Ok(LinkEvent::Disconnected(_)) => println!("-- disconnected"),
            Ok(LinkEvent::MessageSent { .. }) => {}
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    link.shutdown();
    Ok(())
}

/// Send one message and wait for its acknowledgement.
pub fn send(
    config: &LinkConfig,
    target: ConnectionDescriptor,
    kind: MessageKind,
    data: &str,
    wait: u64,
) -> Result<()> {
    let payload = parse_hex(data)?;
    let (link, events) = open(config, target)?;

    link.send(kind, &payload)?;
    let result = wait_sent(&events, kind, 1, Duration::from_secs(wait), None);
    link.shutdown();

    result?;
    println!("{} {} acknowledged", kind.tag(), hex(&payload));
    Ok(())
}

/// Upload a file in chunks that fit the channel.
pub fn push(
    config: &LinkConfig,
    target: ConnectionDescriptor,
    file: &Path,
    kind: MessageKind,
) -> Result<()> {
    let data = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let (link, events) = open(config, target.clone())?;
    let limit = link.max_payload(target.channel());

    println!("File:    {} ({} bytes)", file.display(), data.len());
    println!("Target:  {}", target);
    println!("Kind:    {} ({} bytes per chunk)", kind.tag(), limit);
    println!();

    let chunks = link.send_chunked(kind, &data)?;

    let pb = ProgressBar::new(data.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    // Slowest case: every chunk waits its full timeout once before being resent
    let timeout = config.ack_timeout(kind) * 4 * (chunks as u32).max(1);
    let result = wait_sent(&events, kind, chunks, timeout, Some(&pb));
    link.shutdown();

    match result {
        Ok(()) => pb.finish_with_message("Upload complete"),
        Err(e) => {
            pb.abandon();
            return Err(e);
        }
    }
    println!();
    println!("{} chunks acknowledged.", chunks);
    Ok(())
}

/// Exchange a few messages with an in-memory device.
pub fn loopback(config: &LinkConfig, messages: u8) -> Result<()> {
    let config = LinkConfig {
        framing: Framing::Binary,
        ..config.clone()
    };
    let (transport, peer) = MemoryTransport::pair(config.read_timeout());
    let running = Arc::new(AtomicBool::new(true));
    let device = {
        let running = Arc::clone(&running);
        thread::Builder::new()
            .name("loopback-device".into())
            .spawn(move || run_echo_device(peer, running))?
    };

    let link = Link::new(config, Arc::new(transport))?;
    let (recorder, events) = EventRecorder::new();
    link.register(recorder);
    link.connect(ConnectionDescriptor::bluetooth(BluetoothAddress([0; 6]), 1));
    wait_connected(&events)?;

    for i in 0..messages {
        link.send(MessageKind::ValueChanged, &[i])?;
    }

    let mut sent = 0;
    let mut echoed = 0;
    let deadline = Instant::now() + Duration::from_secs(5);
    while sent < messages || echoed < messages {
        let Some(wait) = deadline.checked_duration_since(Instant::now()) else {
            break;
        };
        match events.recv_timeout(wait) {
            Ok(LinkEvent::MessageSent {
                frame, remaining, ..
            }) => {
                sent += 1;
                println!("sent     {} {} (queue {})", frame.kind.tag(), hex(&frame.payload), remaining);
            }
            Ok(LinkEvent::MessageReceived { frame, .. }) => {
                echoed += 1;
                println!("received {} {}", frame.kind.tag(), hex(&frame.payload));
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }

    link.shutdown();
    running.store(false, Ordering::SeqCst);
    if device.join().is_err() {
        bail!("loopback device panicked");
    }
    if sent < messages || echoed < messages {
        bail!("only {} of {} messages completed", sent.min(echoed), messages);
    }
    println!("Loopback OK.");
    Ok(())
}

/// Acknowledge every frame and echo each one back as text.
fn run_echo_device(peer: MemoryPeer, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        let Some(bytes) = peer.recv(Duration::from_millis(20)) else {
            continue;
        };
        let Ok(decoded) = frame::decode(&bytes) else {
            continue;
        };
        if decoded.kind == MessageKind::Crc {
            continue;
        }
        peer.inject(&frame::ack_frame(decoded.checksum));
        if decoded.kind != MessageKind::Idd {
            peer.inject(&frame::encode(MessageKind::Text, decoded.payload));
        }
    }
}

fn open(config: &LinkConfig, target: ConnectionDescriptor) -> Result<(Link, Receiver<LinkEvent>)> {
    let transport = SystemTransport::shared(config.read_timeout(), config.read_window);
    let link = Link::new(config.clone(), transport)?;
    let (recorder, events) = EventRecorder::new();
    link.register(recorder);

    println!("Connecting to {}...", target);
    link.connect(target);
    if let Err(e) = wait_connected(&events) {
        link.shutdown();
        return Err(e);
    }
    Ok((link, events))
}

fn wait_connected(events: &Receiver<LinkEvent>) -> Result<()> {
    let deadline = Instant::now() + CONNECT_TIMEOUT;
    loop {
        let Some(wait) = deadline.checked_duration_since(Instant::now()) else {
            bail!("Timed out connecting after {:?}", CONNECT_TIMEOUT);
        };
        match events.recv_timeout(wait) {
            Ok(LinkEvent::Connected(_)) => return Ok(()),
            Ok(LinkEvent::Disconnected(_)) => bail!("Connection failed (see log for details)"),
            Ok(_) => {}
            Err(_) => bail!("Timed out connecting after {:?}", CONNECT_TIMEOUT),
        }
    }
}

/// Wait for `count` acknowledged frames of `kind`.
fn wait_sent(
    events: &Receiver<LinkEvent>,
    kind: MessageKind,
    count: usize,
    timeout: Duration,
    progress: Option<&ProgressBar>,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut acked = 0;
    while acked < count {
        let Some(wait) = deadline.checked_duration_since(Instant::now()) else {
            bail!("Timed out: {} of {} frames acknowledged", acked, count);
        };
        match events.recv_timeout(wait) {
            Ok(LinkEvent::MessageSent { frame, .. }) if frame.kind == kind => {
                acked += 1;
                if let Some(pb) = progress {
                    pb.inc(frame.payload.len() as u64);
                }
            }
            // A reconnect clears the queue, the rest will never be sent
            Ok(LinkEvent::Disconnected(_)) => {
                bail!("Link dropped: {} of {} frames acknowledged", acked, count)
            }
            Ok(_) => {}
            Err(_) => bail!("Timed out: {} of {} frames acknowledged", acked, count),
        }
    }
    Ok(())
}

/// Parse `"01 02"`, `"0102"` or `"01:02"`.
fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != ',')
        .collect();
    if let Some(bad) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        bail!("Invalid hex digit '{}' in '{}'", bad, text);
    }
    if digits.len() % 2 != 0 {
        bail!("Hex payload has an odd number of digits: '{}'", text);
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("Invalid hex byte '{}'", &digits[i..i + 2]))
        })
        .collect()
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
