// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Identification keep-alive bookkeeping.
//!
//! While the send queue is empty the outbound loop pings the peer with an
//! IDD frame. An acknowledged ping starts a cooldown (negative counter that
//! drains by one per idle sleep); every missed ack counts up, and crossing
//! the threshold forces a reconnect.

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};

use rand::Rng;

/// What the outbound loop does when it has nothing to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleAction {
    /// Counter was negative and moved one step towards zero; sleep.
    Cooldown,
    /// Queue an IDD ping.
    Ping,
    /// Nothing due; sleep.
    Wait,
}

#[derive(Debug)]
pub struct IddCounters {
    state: AtomicU8,
    counter: AtomicI32,
    cooldown: i32,
    threshold: i32,
}

impl IddCounters {
    pub fn new(cooldown: i32, threshold: i32) -> Self {
        Self {
            state: AtomicU8::new(0),
            counter: AtomicI32::new(0),
            cooldown,
            threshold,
        }
    }

    /// Fresh connection: phase 0, ping on the first idle iteration.
    pub fn reset(&self) {
        self.state.store(0, Ordering::SeqCst);
        self.counter.store(0, Ordering::SeqCst);
    }

    /// Identification phase last reported by the peer.
    pub fn state(&self) -> u8 {
        self.state.load(Ordering::SeqCst)
    }

    pub fn set_state(&self, state: u8) {
        self.state.store(state, Ordering::SeqCst);
    }

    pub fn counter(&self) -> i32 {
        self.counter.load(Ordering::SeqCst)
    }

    pub fn acked(&self) {
        self.counter.store(self.cooldown, Ordering::SeqCst);
    }

    /// Count a missed ack. True once the link should be considered dead.
    pub fn missed(&self) -> bool {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1 > self.threshold
    }

    /// Decide the next idle step.
    pub fn idle_action(&self, keep_alive: bool, ping_after_handshake: bool) -> IdleAction {
        let counter = self.counter();
        if counter < 0 {
            self.counter.fetch_add(1, Ordering::SeqCst);
            return IdleAction::Cooldown;
        }
        if counter > 0 || !keep_alive {
            return IdleAction::Wait;
        }
        if !ping_after_handshake && self.state() >= 2 {
            return IdleAction::Wait;
        }
        IdleAction::Ping
    }

    /// `[phase, nonce_hi, nonce_lo]` with a random nonce.
    pub fn ping_payload(&self) -> Vec<u8> {
        let nonce: u16 = rand::thread_rng().gen();
        let [hi, lo] = nonce.to_be_bytes();
        vec![self.state(), hi, lo]
    }
}
