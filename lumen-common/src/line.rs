// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! ASCII line framing used by the legacy Bluetooth firmware.
//!
//! A message is three lines:
//!
//! ```text
//! STX
//! <TAG>:<text>
//! ETX
//! ```
//!
//! The receiver answers with `ACK:<crc32 of text>`. `ENQ` asks the host to
//! identify itself (`IDD:<service-name>`), `NOP` keeps an idle link busy.

extern crate alloc;

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::checksum::crc32;

pub const STX: &str = "STX";
pub const ETX: &str = "ETX";
pub const ENQ: &str = "ENQ";
pub const NOP: &str = "NOP";
pub const ACK_PREFIX: &str = "ACK:";
pub const IDD_PREFIX: &str = "IDD:";

/// Lines longer than this are dropped without being interpreted.
pub const MAX_LINE_LEN: usize = 1024;

/// Checksum used to acknowledge a message body.
pub fn text_crc(text: &str) -> u32 {
    crc32(text.as_bytes())
}

/// Encode a message block.
pub fn encode_message(tag: &str, text: &str) -> String {
    format!("{STX}\n{tag}:{text}\n{ETX}\n")
}

/// Encode the acknowledgement for a received message.
pub fn encode_ack(crc: u32) -> String {
    format!("{ACK_PREFIX}{crc}\n")
}

/// Encode the identification reply sent in response to `ENQ`.
pub fn encode_identification(service: &str) -> String {
    format!("{IDD_PREFIX}{service}\n")
}

/// Encode the keep-alive line.
pub fn encode_nop() -> String {
    format!("{NOP}\n")
}

/// Something a complete line (or block of lines) meant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// Peer acknowledged a message whose text had this CRC-32.
    Ack(u32),
    /// Peer asks us to identify.
    Enquiry,
    /// Peer keep-alive.
    Nop,
    /// Peer identified itself.
    Identification(String),
    /// A complete `STX`..`ETX` block.
    Message { tag: String, text: String, crc: u32 },
    /// A line that could not be interpreted (bad ack value, stray text, overflow).
    Garbage(String),
}

/// Splits a byte stream into lines and assembles `STX`/`ETX` blocks.
#[derive(Debug, Default)]
pub struct LineAssembler {
    line: Vec<u8>,
    overflowed: bool,
    block: Option<Vec<String>>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while between `STX` and `ETX`.
    pub fn in_block(&self) -> bool {
        self.block.is_some()
    }

    /// Drop any partial line or block.
    pub fn reset(&mut self) {
        self.line.clear();
        self.overflowed = false;
        self.block = None;
    }

    /// Feed received bytes, appending every completed event to `events`.
    pub fn feed(&mut self, bytes: &[u8], events: &mut Vec<LineEvent>) {
        for &byte in bytes {
            if byte != b'\n' {
                if self.line.len() < MAX_LINE_LEN {
                    self.line.push(byte);
                } else {
                    self.overflowed = true;
                }
                continue;
            }

            let raw = core::mem::take(&mut self.line);
            if core::mem::take(&mut self.overflowed) {
                events.push(LineEvent::Garbage(format!("line over {MAX_LINE_LEN} bytes")));
                continue;
            }
            let line = String::from_utf8_lossy(&raw);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.interpret(line) {
                events.push(event);
            }
        }
    }

    fn interpret(&mut self, line: &str) -> Option<LineEvent> {
        if let Some(body) = self.block.as_mut() {
            if line == ETX {
                let body = self.block.take().unwrap_or_default().join("\n");
                return Some(Self::message(body));
            }
            if line == STX {
                // Unterminated block, start over
                body.clear();
                return Some(LineEvent::Garbage(STX.to_string()));
            }
            body.push(line.to_string());
            return None;
        }

        match line {
            "" => None,
            STX => {
                self.block = Some(Vec::new());
                None
            }
            ENQ => Some(LineEvent::Enquiry),
            NOP => Some(LineEvent::Nop),
            _ => {
                if let Some(value) = line.strip_prefix(ACK_PREFIX) {
                    match value.trim().parse::<u32>() {
                        Ok(crc) => Some(LineEvent::Ack(crc)),
                        Err(_) => Some(LineEvent::Garbage(line.to_string())),
                    }
                } else if let Some(name) = line.strip_prefix(IDD_PREFIX) {
                    Some(LineEvent::Identification(name.to_string()))
                } else {
                    Some(LineEvent::Garbage(line.to_string()))
                }
            }
        }
    }

    fn message(body: String) -> LineEvent {
        let (tag, text) = match body.split_once(':') {
            Some((tag, text)) => (tag.to_string(), text.to_string()),
            None => (String::new(), body),
        };
        let crc = text_crc(&text);
        LineEvent::Message { tag, text, crc }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_message_layout() {
        assert_eq!(encode_message("TEXT", "hello"), "STX\nTEXT:hello\nETX\n");
    }

    #[test]
    fn test_crlf_lines_are_accepted() {
        let mut assembler = LineAssembler::new();
        let mut events = Vec::new();
        assembler.feed(b"ENQ\r\nNOP\r\n", &mut events);
        assert_eq!(events, vec![LineEvent::Enquiry, LineEvent::Nop]);
    }
}
