// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use lumen_link::{BluetoothAddress, ConnectionDescriptor, Framing, LinkConfig, MessageKind};

use crate::commands;

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "lumen-link")]
#[command(about = "Talk to lumen light controllers over USB or Bluetooth")]
pub struct Cli {
    /// USB serial port (e.g., /dev/ttyACM0)
    #[arg(long, global = true, conflicts_with = "bt")]
    pub usb: Option<String>,

    /// Bluetooth address of a paired device (e.g., 00:1A:7D:DA:71:13)
    #[arg(long, global = true)]
    pub bt: Option<BluetoothAddress>,

    /// RFCOMM channel used with --bt
    #[arg(long, global = true, default_value = "1")]
    pub channel: u8,

    /// TOML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Frame codec, overrides the configuration file
    #[arg(long, global = true, value_enum)]
    pub framing: Option<FramingArg>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum FramingArg {
    Binary,
    Line,
}

impl From<FramingArg> for Framing {
    fn from(arg: FramingArg) -> Self {
        match arg {
            FramingArg::Binary => Framing::Binary,
            FramingArg::Line => Framing::Line,
        }
    }
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// List serial ports
    Ports,

    /// List paired Bluetooth devices
    Devices,

    /// Connect and print every received message
    Monitor {
        /// Stop after this many seconds (default: run until interrupted)
        #[arg(short, long)]
        seconds: Option<u64>,
    },

    /// Send one message and wait for its acknowledgement
    Send {
        /// Message kind: code (0x82) or tag (VALUE)
        #[arg(short, long, value_parser = parse_kind)]
        kind: MessageKind,

        /// Payload as hex (e.g., "01 02" or 0102)
        #[arg(value_name = "HEX", default_value = "")]
        data: String,

        /// Seconds to wait for the acknowledgement
        #[arg(short, long, default_value = "5")]
        wait: u64,
    },

    /// Upload a file in acknowledged chunks
    Push {
        /// File to upload
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Message kind for every chunk
        #[arg(short, long, value_parser = parse_kind, default_value = "SMPUSH")]
        kind: MessageKind,
    },

    /// Run the link against an in-memory device that acknowledges everything
    Loopback {
        /// Number of messages to exchange
        #[arg(short, long, default_value = "3")]
        messages: u8,
    },
}

/// Accepts `0x82`, `130` or a line tag such as `VALUE`.
pub fn parse_kind(s: &str) -> Result<MessageKind, String> {
    let code = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16).ok()
    } else {
        s.parse::<u8>().ok()
    };
    let kind = match code {
        Some(code) => MessageKind::from_code(code),
        None => MessageKind::from_tag(&s.to_ascii_uppercase()),
    };
    if kind == MessageKind::Unknown {
        return Err(format!("unknown message kind '{}'", s));
    }
    Ok(kind)
}

fn load_config(cli: &Cli) -> Result<LinkConfig> {
    let mut config = match &cli.config {
        Some(path) => LinkConfig::load(path)?,
        None => LinkConfig::default(),
    };
    if let Some(framing) = cli.framing {
        config.framing = framing.into();
    }
    Ok(config)
}

fn target(cli: &Cli) -> Result<ConnectionDescriptor> {
    match (&cli.usb, &cli.bt) {
        (Some(path), _) => Ok(ConnectionDescriptor::usb(path.clone())),
        (None, Some(address)) => Ok(ConnectionDescriptor::bluetooth(*address, cli.channel)),
        (None, None) => bail!("no device given, use --usb <PATH> or --bt <MAC>"),
    }
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let target = target(&cli);

    match cli.command {
        Commands::Ports => commands::ports(),
        Commands::Devices => commands::devices(),
        Commands::Monitor { seconds } => commands::monitor(&config, target?, seconds),
        Commands::Send { kind, data, wait } => commands::send(&config, target?, kind, &data, wait),
        Commands::Push { file, kind } => commands::push(&config, target?, &file, kind),
        Commands::Loopback { messages } => commands::loopback(&config, messages),
    }
}
