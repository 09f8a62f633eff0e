// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Connection state and the recovery decision table.

use std::fmt;

use crate::error::TransportError;

/// Lifecycle of a link.
///
/// `Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected`;
/// `Disconnecting` is also entered from `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// States a lifecycle transition may move from into `to`.
    pub fn can_transition(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnecting)
                | (Connected, Disconnecting)
                | (Disconnecting, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// What the link does about a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Wait `connect_retry_delay` and open again.
    Retry,
    /// Tear the session down and connect to the same descriptor again.
    Reconnect,
    /// Tear down and stay disconnected.
    Disconnect,
    /// The failure belongs to a session that is already going away.
    Ignore,
}

/// Recovery for a failure observed while the link is in `state`.
pub fn recovery_for(state: ConnectionState, error: &TransportError) -> Recovery {
    match state {
        ConnectionState::Connecting if error.is_recoverable() => Recovery::Retry,
        ConnectionState::Connecting => Recovery::Disconnect,
        ConnectionState::Connected => Recovery::Reconnect,
        ConnectionState::Disconnecting | ConnectionState::Disconnected => Recovery::Ignore,
    }
}
