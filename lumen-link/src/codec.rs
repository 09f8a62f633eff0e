// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Frame codecs.
//!
//! A [`FrameCodec`] turns envelopes into wire bytes and hands out a
//! [`FrameDecoder`] per connection. Two framings exist:
//!
//! - [`BinaryCodec`]: `[checksum][kind][payload]`. On USB every frame is
//!   wrapped in a length-prefixed packet; on Bluetooth each received chunk is
//!   one frame.
//! - [`LineCodec`]: `STX`/`ETX` text blocks acknowledged by CRC-32.

use std::sync::Arc;

use lumen_common::usb::{self, USB_PACKET_OVERHEAD};
use lumen_common::{frame, line, Channel, MessageKind, PacketScanner, Scan, FRAME_HEADER_LEN};
use tracing::{debug, trace, warn};

use crate::config::{Framing, LinkConfig};

/// Receive buffer of the USB packet scanner.
const USB_SCAN_CAPACITY: usize = lumen_common::kind::USB_MAX_PACKET_SIZE;

/// A decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
    /// Value the peer expects in the acknowledgement (8-bit for binary, CRC-32 for line).
    pub checksum: u32,
}

/// What a decoder extracted from the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Peer acknowledged the frame with this checksum.
    Ack(u32),
    /// Message that must be acknowledged and delivered.
    Message(Frame),
    /// Message delivered without an acknowledgement.
    Notice(Frame),
    /// Peer asks for our identity.
    Enquiry,
}

/// How an idle link keeps the peer busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAlive {
    /// Acknowledged IDD pings; missed acks force a reconnect.
    Identification,
    /// Unacknowledged `NOP` every `idle_cycles` idle iterations.
    Nop { idle_cycles: u32 },
}

/// Encodes outgoing frames for one framing variant.
pub trait FrameCodec: Send + Sync {
    fn framing(&self) -> Framing;

    /// Checksum the peer will acknowledge for this frame.
    fn checksum(&self, kind: MessageKind, payload: &[u8]) -> u32;

    fn encode(&self, kind: MessageKind, payload: &[u8]) -> Vec<u8>;

    fn encode_ack(&self, checksum: u32) -> Vec<u8>;

    /// Reply to an enquiry, if the framing has one.
    fn encode_identity(&self) -> Option<Vec<u8>>;

    /// Keep-alive line, if the framing has one.
    fn encode_nop(&self) -> Option<Vec<u8>>;

    fn keep_alive(&self) -> KeepAlive;

    /// Largest payload one frame can carry.
    fn max_payload(&self) -> usize;

    /// Fresh decoder for a new connection.
    fn decoder(&self) -> Box<dyn FrameDecoder>;
}

/// Stateful decoder owned by one connection's inbound loop.
pub trait FrameDecoder: Send {
    /// Feed received bytes, appending what they completed to `out`.
    fn decode(&mut self, bytes: &[u8], out: &mut Vec<Inbound>);
}

/// Codec selected by `config.framing` for `channel`.
pub fn codec_for(config: &LinkConfig, channel: Channel) -> Arc<dyn FrameCodec> {
    let max_packet = config.max_packet_size(channel);
    match config.framing {
        Framing::Binary => Arc::new(BinaryCodec::new(channel, max_packet)),
        Framing::Line => Arc::new(LineCodec::new(
            max_packet,
            config.service_name.clone(),
            config.nop_idle_cycles,
        )),
    }
}

/// How binary frames are delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packetizer {
    /// One frame per read chunk.
    Raw,
    /// `0xAA` length-prefixed packets.
    Usb,
}

/// `[checksum][kind][payload]` frames.
#[derive(Debug, Clone)]
pub struct BinaryCodec {
    packetizer: Packetizer,
    max_packet: usize,
}

impl BinaryCodec {
    pub fn new(channel: Channel, max_packet: usize) -> Self {
        let packetizer = match channel {
            Channel::Usb => Packetizer::Usb,
            Channel::Bluetooth => Packetizer::Raw,
        };
        Self {
            packetizer,
            max_packet,
        }
    }

    pub fn packetizer(&self) -> Packetizer {
        self.packetizer
    }

    fn wrap(&self, frame: Vec<u8>) -> Vec<u8> {
        match self.packetizer {
            Packetizer::Raw => frame,
            Packetizer::Usb => usb::encode(&frame).unwrap_or_else(|| {
                warn!(len = frame.len(), "frame too long for a USB packet, dropped");
                Vec::new()
            }),
        }
    }
}

impl FrameCodec for BinaryCodec {
    fn framing(&self) -> Framing {
        Framing::Binary
    }

    fn checksum(&self, kind: MessageKind, payload: &[u8]) -> u32 {
        frame::frame_checksum(kind, payload) as u32
    }

    fn encode(&self, kind: MessageKind, payload: &[u8]) -> Vec<u8> {
        self.wrap(frame::encode(kind, payload))
    }

    fn encode_ack(&self, checksum: u32) -> Vec<u8> {
        self.wrap(frame::ack_frame(checksum as u8).to_vec())
    }

    fn encode_identity(&self) -> Option<Vec<u8>> {
        None
    }

    fn encode_nop(&self) -> Option<Vec<u8>> {
        None
    }

    fn keep_alive(&self) -> KeepAlive {
        KeepAlive::Identification
    }

    fn max_payload(&self) -> usize {
        self.max_packet.saturating_sub(FRAME_HEADER_LEN)
    }

    fn decoder(&self) -> Box<dyn FrameDecoder> {
        match self.packetizer {
            Packetizer::Raw => Box::new(RawDecoder),
            Packetizer::Usb => Box::new(UsbDecoder {
                scanner: PacketScanner::new(),
            }),
        }
    }
}

/// Interpret one complete binary frame.
fn decode_binary(buf: &[u8], out: &mut Vec<Inbound>) {
    match frame::decode(buf) {
        Ok(decoded) if decoded.kind == MessageKind::Crc => match decoded.acked_checksum() {
            Some(acked) => out.push(Inbound::Ack(acked as u32)),
            None => debug!("empty ack frame dropped"),
        },
        Ok(decoded) => out.push(Inbound::Message(Frame {
            kind: decoded.kind,
            payload: decoded.payload.to_vec(),
            checksum: decoded.checksum as u32,
        })),
        Err(e) => debug!(error = %e, "frame dropped"),
    }
}

struct RawDecoder;

impl FrameDecoder for RawDecoder {
    fn decode(&mut self, bytes: &[u8], out: &mut Vec<Inbound>) {
        decode_binary(bytes, out);
    }
}

struct UsbDecoder {
    scanner: PacketScanner<USB_SCAN_CAPACITY>,
}

impl FrameDecoder for UsbDecoder {
    fn decode(&mut self, bytes: &[u8], out: &mut Vec<Inbound>) {
        for &byte in bytes {
            match self.scanner.push(byte) {
                Scan::Pending => {}
                Scan::Frame(payload) => decode_binary(&payload, out),
                Scan::Oversize { declared } => {
                    debug!(declared, capacity = USB_SCAN_CAPACITY, "oversize USB packet dropped")
                }
                Scan::BadChecksum { received, expected } => {
                    debug!(received, expected, "USB packet checksum mismatch")
                }
            }
        }
    }
}

/// `STX`/`TAG:text`/`ETX` blocks.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_packet: usize,
    service: String,
    nop_idle_cycles: u32,
}

impl LineCodec {
    pub fn new(max_packet: usize, service: String, nop_idle_cycles: u32) -> Self {
        Self {
            max_packet,
            service,
            nop_idle_cycles,
        }
    }
}

impl FrameCodec for LineCodec {
    fn framing(&self) -> Framing {
        Framing::Line
    }

    fn checksum(&self, _kind: MessageKind, payload: &[u8]) -> u32 {
        line::text_crc(&String::from_utf8_lossy(payload))
    }

    fn encode(&self, kind: MessageKind, payload: &[u8]) -> Vec<u8> {
        line::encode_message(kind.tag(), &String::from_utf8_lossy(payload)).into_bytes()
    }

    fn encode_ack(&self, checksum: u32) -> Vec<u8> {
        line::encode_ack(checksum).into_bytes()
    }

    fn encode_identity(&self) -> Option<Vec<u8>> {
        Some(line::encode_identification(&self.service).into_bytes())
    }

    fn encode_nop(&self) -> Option<Vec<u8>> {
        Some(line::encode_nop().into_bytes())
    }

    fn keep_alive(&self) -> KeepAlive {
        KeepAlive::Nop {
            idle_cycles: self.nop_idle_cycles,
        }
    }

    fn max_payload(&self) -> usize {
        self.max_packet
    }

    fn decoder(&self) -> Box<dyn FrameDecoder> {
        Box::new(LineDecoder {
            assembler: line::LineAssembler::new(),
            events: Vec::new(),
        })
    }
}

struct LineDecoder {
    assembler: line::LineAssembler,
    events: Vec<line::LineEvent>,
}

impl FrameDecoder for LineDecoder {
    fn decode(&mut self, bytes: &[u8], out: &mut Vec<Inbound>) {
        self.assembler.feed(bytes, &mut self.events);
        for event in self.events.drain(..) {
            match event {
                line::LineEvent::Ack(crc) => out.push(Inbound::Ack(crc)),
                line::LineEvent::Enquiry => out.push(Inbound::Enquiry),
                line::LineEvent::Nop => trace!("peer NOP"),
                line::LineEvent::Identification(name) => {
                    let checksum = line::text_crc(&name);
                    out.push(Inbound::Notice(Frame {
                        kind: MessageKind::Idd,
                        payload: name.into_bytes(),
                        checksum,
                    }));
                }
                line::LineEvent::Message { tag, text, crc } => out.push(Inbound::Message(Frame {
                    kind: MessageKind::from_tag(&tag),
                    payload: text.into_bytes(),
                    checksum: crc,
                })),
                line::LineEvent::Garbage(content) => debug!(%content, "line dropped"),
            }
        }
    }
}

/// Bytes a binary frame of `payload_len` occupies on `channel`.
pub fn wire_len(channel: Channel, payload_len: usize) -> usize {
    let frame = payload_len + FRAME_HEADER_LEN;
    match channel {
        Channel::Usb => frame + USB_PACKET_OVERHEAD,
        Channel::Bluetooth => frame,
    }
}
