// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! End-to-end tests of the link state machine over the in-memory transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;
use lumen_common::{frame, line};
use lumen_link::link::ConnectRequest;
use lumen_link::{
    BluetoothAddress, Channel, ConnectionDescriptor, ConnectionState, EventRecorder, Framing,
    Frame, Link, LinkConfig, LinkError, LinkEvent, LinkListener, MemoryPeer, MemoryTransport,
    MessageKind,
};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(150);

fn test_config() -> LinkConfig {
    LinkConfig {
        keep_alive: false,
        idle_sleep_ms: 5,
        reconnect_delay_ms: 10,
        connect_retry_delay_ms: 20,
        read_timeout_ms: 5,
        ..LinkConfig::default()
    }
}

fn device(last: u8) -> ConnectionDescriptor {
    ConnectionDescriptor::bluetooth(BluetoothAddress([0x00, 0x1A, 0x7D, 0xDA, 0x71, last]), 1)
}

fn setup(config: LinkConfig) -> (Link, MemoryPeer, Receiver<LinkEvent>) {
    let (transport, peer) = MemoryTransport::pair(config.read_timeout());
    let link = Link::new(config, Arc::new(transport)).unwrap();
    let (recorder, events) = EventRecorder::new();
    link.register(recorder);
    (link, peer, events)
}

fn next_event(events: &Receiver<LinkEvent>) -> LinkEvent {
    events.recv_timeout(WAIT).expect("expected a link event")
}

/// Connect and consume the `Connecting`/`Connected` pair.
fn connect(link: &Link, events: &Receiver<LinkEvent>, descriptor: ConnectionDescriptor) {
    assert!(link.connect(descriptor));
    assert_eq!(next_event(events), LinkEvent::Connecting(Channel::Bluetooth));
    assert_eq!(next_event(events), LinkEvent::Connected(Channel::Bluetooth));
}

fn recv(peer: &MemoryPeer) -> Vec<u8> {
    peer.recv(WAIT).expect("expected the link to write")
}

// =============================================================================
// Lifecycle tests
// =============================================================================

#[test]
fn test_connect_emits_lifecycle_events() {
    let (link, peer, events) = setup(test_config());
    assert_eq!(link.state(), ConnectionState::Disconnected);

    connect(&link, &events, device(1));
    assert_eq!(link.state(), ConnectionState::Connected);
    assert_eq!(link.descriptor(), Some(device(1)));
    assert_eq!(link.channel(), Some(Channel::Bluetooth));
    assert_eq!(peer.open_count(), 1);

    link.shutdown();
}

#[test]
fn test_disconnect_is_idempotent() {
    let (link, peer, events) = setup(test_config());
    connect(&link, &events, device(1));

    link.disconnect();
    assert_eq!(next_event(&events), LinkEvent::Disconnected(Channel::Bluetooth));
    assert_eq!(link.state(), ConnectionState::Disconnected);
    assert!(!peer.is_connected());

    link.disconnect();
    link.disconnect();
    assert!(events.recv_timeout(QUIET).is_err());
    assert_eq!(link.state(), ConnectionState::Disconnected);

    link.shutdown();
}

#[test]
fn test_connect_rejected_for_same_descriptor() {
    let (link, peer, events) = setup(test_config());
    connect(&link, &events, device(1));

    assert!(!link.connect(device(1)));
    assert!(events.recv_timeout(QUIET).is_err());

    // A different device replaces the current connection
    assert!(link.connect(device(2)));
    assert_eq!(next_event(&events), LinkEvent::Disconnected(Channel::Bluetooth));
    assert_eq!(next_event(&events), LinkEvent::Connecting(Channel::Bluetooth));
    assert_eq!(next_event(&events), LinkEvent::Connected(Channel::Bluetooth));
    assert_eq!(link.descriptor(), Some(device(2)));
    assert_eq!(peer.open_count(), 2);

    link.shutdown();
}

#[test]
fn test_custom_connect_guard() {
    let (transport, _peer) = MemoryTransport::pair(Duration::from_millis(5));
    let link = Link::with_connect_guard(
        test_config(),
        Arc::new(transport),
        Box::new(|request: &ConnectRequest<'_>| request.requested.channel() == Channel::Usb),
    )
    .unwrap();

    assert!(!link.connect(device(1)));
    assert_eq!(link.state(), ConnectionState::Disconnected);
    link.shutdown();
}

#[test]
fn test_unreachable_peer_is_retried() {
    let (link, peer, events) = setup(test_config());
    peer.set_reachable(false);

    assert!(link.connect(device(1)));
    assert_eq!(next_event(&events), LinkEvent::Connecting(Channel::Bluetooth));
    assert!(events.recv_timeout(QUIET).is_err());
    assert_eq!(link.state(), ConnectionState::Connecting);

    peer.set_reachable(true);
    assert_eq!(next_event(&events), LinkEvent::Connected(Channel::Bluetooth));
    assert_eq!(peer.open_count(), 1);

    link.shutdown();
}

#[test]
fn test_dropped_connection_reconnects() {
    let (link, peer, events) = setup(test_config());
    connect(&link, &events, device(1));

    peer.drop_connection();
    assert_eq!(next_event(&events), LinkEvent::Disconnected(Channel::Bluetooth));
    assert_eq!(next_event(&events), LinkEvent::Connecting(Channel::Bluetooth));
    assert_eq!(next_event(&events), LinkEvent::Connected(Channel::Bluetooth));
    assert_eq!(peer.open_count(), 2);

    link.shutdown();
}

#[test]
fn test_explicit_reconnect() {
    let (link, peer, events) = setup(test_config());
    connect(&link, &events, device(1));

    assert!(link.reconnect());
    assert_eq!(next_event(&events), LinkEvent::Disconnected(Channel::Bluetooth));
    assert_eq!(next_event(&events), LinkEvent::Connecting(Channel::Bluetooth));
    assert_eq!(next_event(&events), LinkEvent::Connected(Channel::Bluetooth));
    assert_eq!(peer.open_count(), 2);

    link.shutdown();
}

#[test]
fn test_shutdown_refuses_further_use() {
    let (link, _peer, events) = setup(test_config());
    connect(&link, &events, device(1));

    link.shutdown();
    assert_eq!(link.state(), ConnectionState::Disconnected);
    assert!(link.is_shut_down());
    assert!(!link.connect(device(2)));
    assert!(matches!(
        link.send(MessageKind::Text, b"late"),
        Err(LinkError::ShutDown)
    ));
    // Second shutdown is a no-op
    link.shutdown();
}

// =============================================================================
// Data path tests
// =============================================================================

#[test]
fn test_send_is_acknowledged_end_to_end() {
    let (link, peer, events) = setup(test_config());
    connect(&link, &events, device(1));

    assert_eq!(link.send(MessageKind::ValueChanged, &[0x01, 0x02]).unwrap(), 1);
    let written = recv(&peer);
    assert_eq!(written, vec![0x85, 0x82, 0x01, 0x02]);

    peer.inject(&frame::ack_frame(written[0]));
    match next_event(&events) {
        LinkEvent::MessageSent {
            channel,
            frame,
            remaining,
        } => {
            assert_eq!(channel, Channel::Bluetooth);
            assert_eq!(frame.kind, MessageKind::ValueChanged);
            assert_eq!(frame.payload, vec![0x01, 0x02]);
            assert_eq!(remaining, 0);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(link.queue_len(), 0);

    link.shutdown();
}

#[test]
fn test_at_most_one_frame_in_flight() {
    let (link, peer, events) = setup(test_config());
    connect(&link, &events, device(1));

    link.send(MessageKind::Text, b"a").unwrap();
    link.send(MessageKind::Text, b"b").unwrap();
    link.send(MessageKind::Text, b"c").unwrap();

    let first = recv(&peer);
    assert_eq!(&first[1..], &[MessageKind::Text.code(), b'a']);
    // Nothing else goes out before the ack (500 ms timeout)
    assert!(peer.recv(QUIET).is_none());

    peer.inject(&frame::ack_frame(first[0]));
    let second = recv(&peer);
    assert_eq!(&second[1..], &[MessageKind::Text.code(), b'b']);
    assert!(matches!(
        next_event(&events),
        LinkEvent::MessageSent { remaining: 2, .. }
    ));

    link.shutdown();
}

#[test]
fn test_unacknowledged_frame_is_resent() {
    let (link, peer, events) = setup(LinkConfig {
        ack_timeout_ms: Some(20),
        ..test_config()
    });
    connect(&link, &events, device(1));

    link.send(MessageKind::Text, b"x").unwrap();
    let first = recv(&peer);
    let again = recv(&peer);
    assert_eq!(first, again);
    assert_eq!(link.queue_len(), 1);

    link.shutdown();
}

#[test]
fn test_inbound_message_is_acked_and_dispatched() {
    let (link, peer, events) = setup(test_config());
    connect(&link, &events, device(1));

    let message = frame::encode(MessageKind::Text, b"hi");
    peer.inject(&message);

    match next_event(&events) {
        LinkEvent::MessageReceived { frame, .. } => {
            assert_eq!(frame.kind, MessageKind::Text);
            assert_eq!(frame.payload, b"hi");
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(recv(&peer), frame::ack_frame(message[0]).to_vec());

    link.shutdown();
}

#[test]
fn test_unknown_kind_is_still_delivered() {
    let (link, peer, events) = setup(test_config());
    connect(&link, &events, device(1));

    let payload = [0x10, 0x20];
    let checksum = lumen_common::checksum_parts(&[&[0x90], &payload]);
    peer.inject(&[checksum, 0x90, 0x10, 0x20]);

    assert!(matches!(
        next_event(&events),
        LinkEvent::MessageReceived { frame, .. } if frame.kind == MessageKind::Unknown
    ));
    link.shutdown();
}

#[test]
fn test_checksum_mismatch_is_dropped() {
    let (link, peer, events) = setup(test_config());
    connect(&link, &events, device(1));

    let mut corrupted = frame::encode(MessageKind::Text, b"hi");
    corrupted[0] = corrupted[0].wrapping_add(1);
    peer.inject(&corrupted);
    peer.inject(&[0x42]);

    assert!(events.recv_timeout(QUIET).is_err());
    assert!(peer.recv(QUIET).is_none());
    assert_eq!(link.state(), ConnectionState::Connected);

    link.shutdown();
}

#[test]
fn test_idd_payload_updates_phase() {
    let (link, peer, events) = setup(test_config());
    connect(&link, &events, device(1));

    peer.inject(&frame::encode(MessageKind::Idd, &[2, 0x12, 0x34]));
    assert!(matches!(
        next_event(&events),
        LinkEvent::MessageReceived { frame, .. } if frame.kind == MessageKind::Idd
    ));
    assert_eq!(link.idd_state(), 2);

    link.shutdown();
}

#[test]
fn test_payload_limits() {
    let (link, _peer, events) = setup(test_config());
    connect(&link, &events, device(1));

    assert_eq!(link.max_payload(Channel::Bluetooth), 30);
    assert_eq!(link.max_payload(Channel::Usb), 254);
    assert!(matches!(
        link.send(MessageKind::LightConfiguration, &[0u8; 31]),
        Err(LinkError::PayloadTooLarge { len: 31, max: 30 })
    ));

    link.shutdown();
}

#[test]
fn test_send_chunked_splits_to_channel_size() {
    let (link, peer, events) = setup(test_config());
    connect(&link, &events, device(1));

    let data: Vec<u8> = (0..100).collect();
    assert_eq!(link.send_chunked(MessageKind::StateMachinePush, &data).unwrap(), 4);

    let mut received = Vec::new();
    for _ in 0..4 {
        let written = recv(&peer);
        received.extend_from_slice(&written[2..]);
        peer.inject(&frame::ack_frame(written[0]));
    }
    assert_eq!(received, data);

    let mut remaining = Vec::new();
    for _ in 0..4 {
        if let LinkEvent::MessageSent { remaining: r, .. } = next_event(&events) {
            remaining.push(r);
        }
    }
    assert_eq!(remaining, vec![3, 2, 1, 0]);

    link.shutdown();
}

// =============================================================================
// Keep-alive tests
// =============================================================================

#[test]
fn test_acknowledged_keepalive_keeps_link_up() {
    let (link, peer, events) = setup(LinkConfig {
        keep_alive: true,
        ..test_config()
    });
    connect(&link, &events, device(1));

    let ping = recv(&peer);
    assert_eq!(ping[1], MessageKind::Idd.code());
    assert_eq!(ping.len(), 5);
    peer.inject(&frame::ack_frame(ping[0]));

    // Keep-alive acks never surface as sent messages
    assert!(events.recv_timeout(QUIET).is_err());
    assert_eq!(link.state(), ConnectionState::Connected);

    link.shutdown();
}

#[test]
fn test_keepalive_exhaustion_forces_reconnect() {
    let (link, peer, events) = setup(LinkConfig {
        keep_alive: true,
        ack_timeout_ms: Some(20),
        idle_sleep_ms: 1,
        ..test_config()
    });
    connect(&link, &events, device(1));

    // The peer never answers: five missed pings later the link cycles
    assert_eq!(next_event(&events), LinkEvent::Disconnected(Channel::Bluetooth));
    assert_eq!(next_event(&events), LinkEvent::Connecting(Channel::Bluetooth));
    assert_eq!(next_event(&events), LinkEvent::Connected(Channel::Bluetooth));
    assert_eq!(peer.open_count(), 2);
    assert!(peer.drain() >= 5);

    link.shutdown();
}

#[test]
fn test_forced_reconnect_clears_queue() {
    let (link, peer, events) = setup(LinkConfig {
        ack_timeout_ms: Some(1000),
        ..test_config()
    });
    connect(&link, &events, device(1));

    link.send(MessageKind::Text, b"a").unwrap();
    link.send(MessageKind::Text, b"b").unwrap();
    recv(&peer);

    peer.drop_connection();
    assert_eq!(next_event(&events), LinkEvent::Disconnected(Channel::Bluetooth));
    assert_eq!(next_event(&events), LinkEvent::Connecting(Channel::Bluetooth));
    assert_eq!(next_event(&events), LinkEvent::Connected(Channel::Bluetooth));
    assert_eq!(link.queue_len(), 0);

    link.shutdown();
}

// =============================================================================
// Line framing tests
// =============================================================================

#[test]
fn test_line_framing_round_trip() {
    let (link, peer, events) = setup(LinkConfig {
        framing: Framing::Line,
        service_name: "bench".into(),
        ..test_config()
    });
    connect(&link, &events, device(1));

    link.send(MessageKind::Text, b"hello").unwrap();
    assert_eq!(recv(&peer), b"STX\nTEXT:hello\nETX\n".to_vec());

    peer.inject(line::encode_ack(line::text_crc("hello")).as_bytes());
    assert!(matches!(
        next_event(&events),
        LinkEvent::MessageSent { remaining: 0, .. }
    ));

    peer.inject(b"ENQ\n");
    assert_eq!(recv(&peer), b"IDD:bench\n".to_vec());

    peer.inject(b"STX\nVALUE:42\nETX\n");
    assert!(matches!(
        next_event(&events),
        LinkEvent::MessageReceived { frame, .. } if frame.kind == MessageKind::ValueChanged
    ));
    assert_eq!(recv(&peer), line::encode_ack(line::text_crc("42")).into_bytes());

    link.shutdown();
}

// =============================================================================
// Listener tests
// =============================================================================

struct SlowReceiver {
    received: AtomicUsize,
}

impl LinkListener for SlowReceiver {
    fn on_message_received(&self, _channel: Channel, _frame: &Frame) {
        thread::sleep(Duration::from_millis(3));
        self.received.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_slow_listener_sees_every_acked_message() {
    let (link, peer, events) = setup(LinkConfig {
        dispatch_capacity: 2,
        ..test_config()
    });
    let slow = Arc::new(SlowReceiver {
        received: AtomicUsize::new(0),
    });
    link.register(slow.clone());
    connect(&link, &events, device(1));

    for i in 0..40u8 {
        assert!(peer.inject(&frame::encode(MessageKind::Text, &[i])));
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while slow.received.load(Ordering::SeqCst) < 40 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(slow.received.load(Ordering::SeqCst), 40);

    link.shutdown();
}

/// Calls back into the link from inside its callbacks.
struct ReentrantListener {
    link: OnceLock<Link>,
}

impl LinkListener for ReentrantListener {
    fn on_connect(&self, _channel: Channel) {
        if let Some(link) = self.link.get() {
            link.send(MessageKind::LightConfiguration, &[1, 2, 3]).unwrap();
        }
    }

    fn on_message_received(&self, _channel: Channel, _frame: &Frame) {
        if let Some(link) = self.link.get() {
            link.disconnect();
        }
    }
}

fn reentrant_setup() -> (Link, MemoryPeer, Receiver<LinkEvent>) {
    let (link, peer, events) = setup(LinkConfig {
        dispatch_capacity: 0,
        ..test_config()
    });
    let listener = Arc::new(ReentrantListener {
        link: OnceLock::new(),
    });
    let _ = listener.link.set(link.clone());
    link.register(listener);
    (link, peer, events)
}

#[test]
fn test_inline_listener_can_send_on_connect() {
    let (link, peer, events) = reentrant_setup();
    connect(&link, &events, device(1));

    assert_eq!(
        recv(&peer),
        frame::encode(MessageKind::LightConfiguration, &[1, 2, 3])
    );
    assert_eq!(link.descriptor(), Some(device(1)));
    assert_eq!(link.state(), ConnectionState::Connected);

    link.shutdown();
}

#[test]
fn test_inline_listener_can_disconnect() {
    let (link, peer, events) = reentrant_setup();
    connect(&link, &events, device(1));
    recv(&peer);

    peer.inject(&frame::encode(MessageKind::Text, b"bye"));
    assert!(matches!(
        next_event(&events),
        LinkEvent::MessageReceived { .. }
    ));
    assert_eq!(next_event(&events), LinkEvent::Disconnected(Channel::Bluetooth));
    assert_eq!(link.state(), ConnectionState::Disconnected);

    link.shutdown();
}

#[test]
fn test_dropping_last_handle_shuts_down() {
    let (link, peer, events) = setup(test_config());
    connect(&link, &events, device(1));

    let other = link.clone();
    drop(link);
    assert!(peer.is_connected());
    assert_eq!(other.state(), ConnectionState::Connected);

    drop(other);
    assert!(!peer.is_connected());
    assert_eq!(next_event(&events), LinkEvent::Disconnected(Channel::Bluetooth));
}
