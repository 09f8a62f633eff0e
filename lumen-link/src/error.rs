// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Error types for the link.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for link operations.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors raised by a transport adapter or one of its connections.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to open {target}: {source}")]
    Open {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("connection closed")]
    Closed,

    #[error("descriptor not usable by this transport: {0}")]
    InvalidDescriptor(String),

    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),
}

impl TransportError {
    /// Whether trying the same operation again can succeed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            TransportError::InvalidDescriptor(_) | TransportError::Unsupported(_)
        )
    }
}

/// Errors returned by the public link API.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("payload of {len} bytes exceeds the {max} byte limit of the channel")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("link has been shut down")]
    ShutDown,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
