// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Link configuration.
//!
//! Every field has a default, so an empty TOML file (or none at all) gives
//! the timings the light controllers were built against.

use std::fs;
use std::path::Path;
use std::time::Duration;

use lumen_common::kind::USB_MAX_PACKET_SIZE;
use lumen_common::{Channel, MessageKind};
use serde::Deserialize;

use crate::error::ConfigError;

/// Which frame codec the link speaks.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// `[checksum][kind][payload]`, wrapped in USB packets on the USB channel.
    #[default]
    Binary,
    /// `STX`/`ETX` text blocks acknowledged with CRC-32.
    Line,
}

/// Tunables for a [`Link`](crate::Link).
#[derive(Deserialize, Debug, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    pub framing: Framing,
    /// Overrides the channel's largest frame (e.g. 35 for legacy USB firmware).
    pub max_packet_size: Option<usize>,
    /// Overrides the per-kind acknowledgement timeout for every kind.
    pub ack_timeout_ms: Option<u64>,
    pub idle_sleep_ms: u64,
    pub reconnect_delay_ms: u64,
    pub connect_retry_delay_ms: u64,
    pub read_timeout_ms: u64,
    /// Bytes requested per serial read.
    pub read_window: usize,
    pub keep_alive: bool,
    /// Keep pinging after the peer reported identification phase 2.
    pub ping_after_handshake: bool,
    pub idd_failure_threshold: i32,
    pub idd_cooldown: i32,
    /// Idle cycles between `NOP` lines in line framing.
    pub nop_idle_cycles: u32,
    /// Name sent in `IDD:` replies.
    pub service_name: String,
    pub shutdown_grace_ms: u64,
    /// Listener event queue depth; 0 delivers events on the loop threads.
    pub dispatch_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            framing: Framing::Binary,
            max_packet_size: None,
            ack_timeout_ms: None,
            idle_sleep_ms: 100,
            reconnect_delay_ms: 100,
            connect_retry_delay_ms: 1000,
            read_timeout_ms: 50,
            read_window: 96,
            keep_alive: true,
            ping_after_handshake: true,
            idd_failure_threshold: 4,
            idd_cooldown: -5,
            nop_idle_cycles: 10,
            service_name: "lumen".to_string(),
            shutdown_grace_ms: 500,
            dispatch_capacity: 64,
        }
    }
}

impl LinkConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the link cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_window == 0 {
            return Err(ConfigError::Invalid("read_window must be at least 1".into()));
        }
        // Zero would make the loops spin, or block RFCOMM reads forever
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid("read_timeout_ms must be at least 1".into()));
        }
        if self.idle_sleep_ms == 0 {
            return Err(ConfigError::Invalid("idle_sleep_ms must be at least 1".into()));
        }
        if self.ack_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("ack_timeout_ms must be at least 1".into()));
        }
        if let Some(size) = self.max_packet_size {
            if size <= lumen_common::FRAME_HEADER_LEN {
                return Err(ConfigError::Invalid(format!(
                    "max_packet_size {} leaves no room for a payload",
                    size
                )));
            }
            if size > USB_MAX_PACKET_SIZE {
                return Err(ConfigError::Invalid(format!(
                    "max_packet_size {} exceeds the {} byte receive buffer",
                    size, USB_MAX_PACKET_SIZE
                )));
            }
        }
        if self.idd_cooldown > 0 {
            return Err(ConfigError::Invalid("idd_cooldown must not be positive".into()));
        }
        if self.idd_failure_threshold < 0 {
            return Err(ConfigError::Invalid(
                "idd_failure_threshold must not be negative".into(),
            ));
        }
        Ok(())
    }

    /// Largest link frame on `channel`.
    pub fn max_packet_size(&self, channel: Channel) -> usize {
        self.max_packet_size
            .unwrap_or_else(|| channel.max_packet_size())
    }

    /// Acknowledgement timeout for a frame of `kind`.
    pub fn ack_timeout(&self, kind: MessageKind) -> Duration {
        self.ack_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| kind.delay())
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
