// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line tool for lumen light controllers.
//!
//! Usage:
//!   lumen-link ports
//!   lumen-link --usb /dev/ttyACM0 monitor --seconds 30
//!   lumen-link --bt 00:1A:7D:DA:71:13 send --kind 0x82 "01 02"
//!   lumen-link --usb /dev/ttyACM0 push machine.bin --kind SMPUSH

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_tracing(args.verbose);
    cli::run(args)
}

/// `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
