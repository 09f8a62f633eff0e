// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Connector, inbound and outbound loops of a session.

use std::sync::Arc;

use lumen_common::MessageKind;
use tracing::{debug, trace, warn};

use super::keepalive::IdleAction;
use super::state::{ConnectionState, Recovery};
use super::sync::{Envelope, Reply};
use super::{Link, Session};
use crate::codec::{Frame, Inbound, KeepAlive};
use crate::error::TransportError;
use crate::listener::LinkEvent;
use crate::transport::Connection;

type StepResult = Result<(), TransportError>;

/// Open the transport until it succeeds, the session is cancelled, or the
/// recovery table gives up.
pub(super) fn run_connector(link: Link, session: Arc<Session>) {
    let retry_delay = link.shared.config.connect_retry_delay();
    while link.is_live(&session, ConnectionState::Connecting) {
        match link.shared.transport.open(&session.descriptor) {
            Ok(connection) => {
                link.on_opened(&session, connection);
                return;
            }
            Err(e) => match link.on_failure(&session, e, "open") {
                Recovery::Retry => {
                    if session.cancel.sleep(retry_delay) {
                        return;
                    }
                }
                _ => return,
            },
        }
    }
}

pub(super) fn run_inbound(link: Link, session: Arc<Session>) {
    let mut decoder = session.codec.decoder();
    let mut decoded = Vec::new();

    while link.is_live(&session, ConnectionState::Connected) {
        let read = session.connection().and_then(|c| c.read_available());
        match read {
            Ok(Some(bytes)) => {
                trace!(len = bytes.len(), "read");
                decoder.decode(&bytes, &mut decoded);
                for inbound in decoded.drain(..) {
                    handle_inbound(&link, &session, inbound);
                }
            }
            Ok(None) => {}
            Err(e) => {
                link.on_failure(&session, e, "read");
                return;
            }
        }
    }
    debug!(session = session.id, "inbound loop exiting");
}

fn handle_inbound(link: &Link, session: &Session, inbound: Inbound) {
    match inbound {
        Inbound::Ack(checksum) => {
            trace!(checksum, "ack received");
            session.ack.set(checksum);
        }
        Inbound::Message(frame) => {
            session.replies.push(Reply::Ack(frame.checksum));
            if frame.kind == MessageKind::Idd {
                if let Some(&phase) = frame.payload.first() {
                    link.shared.idd.set_state(phase);
                }
            }
            debug!(kind = ?frame.kind, len = frame.payload.len(), "message received");
            link.emit(LinkEvent::MessageReceived {
                channel: session.channel,
                frame,
            });
        }
        Inbound::Notice(frame) => link.emit(LinkEvent::MessageReceived {
            channel: session.channel,
            frame,
        }),
        Inbound::Enquiry => session.replies.push(Reply::Identity),
    }
}

pub(super) fn run_outbound(link: Link, session: Arc<Session>) {
    let mut idle_cycles = 0u32;
    while link.is_live(&session, ConnectionState::Connected) {
        if let Err(e) = outbound_step(&link, &session, &mut idle_cycles) {
            link.on_failure(&session, e, "write");
            return;
        }
    }
    debug!(session = session.id, "outbound loop exiting");
}

/// One iteration: a pending reply, else the head envelope, else idle work.
pub(super) fn outbound_step(link: &Link, session: &Session, idle_cycles: &mut u32) -> StepResult {
    let connection = session.connection()?;

    if let Some(reply) = session.replies.pop() {
        let bytes = match reply {
            Reply::Ack(checksum) => Some(session.codec.encode_ack(checksum)),
            Reply::Identity => session.codec.encode_identity(),
        };
        if let Some(bytes) = bytes {
            connection.write_bytes(&bytes)?;
            trace!(?reply, "reply sent");
        }
        return Ok(());
    }

    if let Some(envelope) = link.shared.queue.peek() {
        *idle_cycles = 0;
        return send_envelope(link, session, connection.as_ref(), envelope);
    }

    idle(link, session, connection.as_ref(), idle_cycles)
}

fn send_envelope(
    link: &Link,
    session: &Session,
    connection: &dyn Connection,
    envelope: Envelope,
) -> StepResult {
    let shared = &link.shared;
    let checksum = session.codec.checksum(envelope.kind, &envelope.payload);
    let bytes = session.codec.encode(envelope.kind, &envelope.payload);

    session.ack.clear();
    connection.write_bytes(&bytes)?;
    let timeout = envelope
        .timeout
        .unwrap_or_else(|| shared.config.ack_timeout(envelope.kind));

    if session.ack.wait_for(checksum, timeout, &session.cancel) {
        session.ack.clear();
        let remaining = shared.queue.pop_if(envelope.id);
        if envelope.kind == MessageKind::Idd {
            shared.idd.acked();
            trace!("keep-alive acknowledged");
        } else if let Some(remaining) = remaining {
            debug!(kind = ?envelope.kind, remaining, "message sent");
            link.emit(LinkEvent::MessageSent {
                channel: session.channel,
                frame: Frame {
                    kind: envelope.kind,
                    payload: envelope.payload,
                    checksum,
                },
                remaining,
            });
        }
        return Ok(());
    }

    if session.cancel.is_cancelled() {
        return Ok(());
    }
    debug!(kind = ?envelope.kind, checksum, "no acknowledgement, will resend");
    if envelope.kind == MessageKind::Idd && shared.idd.missed() {
        warn!(
            misses = shared.idd.counter(),
            "keep-alive unanswered, reconnecting"
        );
        link.reconnect_session(session.id);
    }
    Ok(())
}

fn idle(
    link: &Link,
    session: &Session,
    connection: &dyn Connection,
    idle_cycles: &mut u32,
) -> StepResult {
    let shared = &link.shared;
    let config = &shared.config;

    match session.codec.keep_alive() {
        KeepAlive::Identification => {
            match shared.idd.idle_action(config.keep_alive, config.ping_after_handshake) {
                IdleAction::Ping => {
                    if shared.queue.push_if_empty(MessageKind::Idd, shared.idd.ping_payload()) {
                        trace!(phase = shared.idd.state(), "keep-alive queued");
                    }
                }
                IdleAction::Cooldown | IdleAction::Wait => {
                    session.cancel.sleep(config.idle_sleep());
                }
            }
        }
        KeepAlive::Nop { idle_cycles: every } => {
            if session.cancel.sleep(config.idle_sleep()) {
                return Ok(());
            }
            *idle_cycles += 1;
            if config.keep_alive && every > 0 && *idle_cycles >= every {
                *idle_cycles = 0;
                if let Some(nop) = session.codec.encode_nop() {
                    connection.write_bytes(&nop)?;
                    trace!("NOP sent");
                }
            }
        }
    }
    Ok(())
}
