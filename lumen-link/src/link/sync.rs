// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Primitives shared by the loop threads of a session.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam::queue::SegQueue;
use lumen_common::MessageKind;
use parking_lot::{Condvar, Mutex};

/// Cancellation signal for one session. Sleeps through it wake early.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: Mutex<bool>,
    cond: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        *self.cancelled.lock() = true;
        self.cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }

    /// Sleep for `duration` or until cancelled. Returns true when cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut cancelled = self.cancelled.lock();
        while !*cancelled {
            if self.cond.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled
    }
}

/// Last checksum acknowledged by the peer.
#[derive(Debug, Default)]
pub struct AckSlot {
    value: Mutex<Option<u32>>,
    cond: Condvar,
}

impl AckSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an acknowledged checksum, replacing any earlier one.
    pub fn set(&self, checksum: u32) {
        *self.value.lock() = Some(checksum);
        self.cond.notify_all();
    }

    pub fn clear(&self) {
        self.value.lock().take();
    }

    pub fn get(&self) -> Option<u32> {
        *self.value.lock()
    }

    /// Wake waiters so they re-check their cancel token.
    pub fn wake(&self) {
        let _guard = self.value.lock();
        self.cond.notify_all();
    }

    /// Wait until the slot holds `expected`, the timeout elapses or `cancel` fires.
    pub fn wait_for(&self, expected: u32, timeout: Duration, cancel: &CancelToken) -> bool {
        let deadline = Instant::now() + timeout;
        let mut value = self.value.lock();
        loop {
            if *value == Some(expected) {
                return true;
            }
            if cancel.is_cancelled() {
                return false;
            }
            if self.cond.wait_until(&mut value, deadline).timed_out() {
                return *value == Some(expected);
            }
        }
    }
}

/// Outbound message waiting for its acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Queue-assigned sequence number.
    pub id: u64,
    pub kind: MessageKind,
    pub payload: Vec<u8>,
    /// Explicit acknowledgement timeout; otherwise the configured one for `kind`.
    pub timeout: Option<Duration>,
}

/// FIFO of envelopes. The head stays queued until it is acknowledged.
#[derive(Debug, Default)]
pub struct SendQueue {
    items: Mutex<VecDeque<Envelope>>,
    next_id: AtomicU64,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn envelope(&self, kind: MessageKind, payload: Vec<u8>, timeout: Option<Duration>) -> Envelope {
        Envelope {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            payload,
            timeout,
        }
    }

    /// Append an envelope; returns the new queue length.
    pub fn push(&self, kind: MessageKind, payload: Vec<u8>, timeout: Option<Duration>) -> usize {
        let envelope = self.envelope(kind, payload, timeout);
        let mut items = self.items.lock();
        items.push_back(envelope);
        items.len()
    }

    /// Append only when nothing is queued. Keep-alive traffic never competes with sends.
    pub fn push_if_empty(&self, kind: MessageKind, payload: Vec<u8>) -> bool {
        let mut items = self.items.lock();
        if !items.is_empty() {
            return false;
        }
        let envelope = self.envelope(kind, payload, None);
        items.push_back(envelope);
        true
    }

    /// Copy of the head envelope.
    pub fn peek(&self) -> Option<Envelope> {
        self.items.lock().front().cloned()
    }

    /// Pop the head if it is envelope `id`; returns the remaining length.
    ///
    /// The queue may have been cleared and refilled while the envelope was in flight.
    pub fn pop_if(&self, id: u64) -> Option<usize> {
        let mut items = self.items.lock();
        match items.front() {
            Some(head) if head.id == id => {
                items.pop_front();
                Some(items.len())
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }
}

/// A reply the outbound loop owes the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Acknowledge an inbound frame.
    Ack(u32),
    /// Answer an enquiry with our identity.
    Identity,
}

/// Replies are sent before anything in the send queue.
#[derive(Debug, Default)]
pub struct ReplyQueue {
    items: SegQueue<Reply>,
}

impl ReplyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: Reply) {
        self.items.push(reply);
    }

    pub fn pop(&self) -> Option<Reply> {
        self.items.pop()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&self) {
        while self.items.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_cancel_interrupts_sleep() {
        let token = Arc::new(CancelToken::new());
        let sleeper = {
            let token = Arc::clone(&token);
            thread::spawn(move || {
                let start = Instant::now();
                let cancelled = token.sleep(Duration::from_secs(10));
                (cancelled, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        let (cancelled, elapsed) = sleeper.join().unwrap();
        assert!(cancelled);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_sleep_times_out() {
        let token = CancelToken::new();
        assert!(!token.sleep(Duration::from_millis(5)));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_ack_wait_matches_only_expected() {
        let slot = Arc::new(AckSlot::new());
        let token = CancelToken::new();

        slot.set(0x10);
        assert!(!slot.wait_for(0x85, Duration::from_millis(10), &token));

        let setter = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                slot.set(0x85);
            })
        };
        assert!(slot.wait_for(0x85, Duration::from_secs(5), &token));
        setter.join().unwrap();
    }

    #[test]
    fn test_ack_wait_stops_on_cancel() {
        let slot = Arc::new(AckSlot::new());
        let token = Arc::new(CancelToken::new());
        let waiter = {
            let slot = Arc::clone(&slot);
            let token = Arc::clone(&token);
            thread::spawn(move || slot.wait_for(1, Duration::from_secs(10), &token))
        };
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        slot.wake();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn test_pop_if_only_pops_matching_head() {
        let queue = SendQueue::new();
        queue.push(MessageKind::Text, vec![1], None);
        queue.push(MessageKind::Text, vec![2], None);

        let head = queue.peek().unwrap();
        assert_eq!(head.payload, vec![1]);
        assert_eq!(queue.pop_if(head.id + 1), None);
        assert_eq!(queue.pop_if(head.id), Some(1));

        // Cleared and refilled while in flight
        let stale = queue.peek().unwrap();
        queue.clear();
        queue.push(MessageKind::Text, vec![3], None);
        assert_eq!(queue.pop_if(stale.id), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_push_if_empty() {
        let queue = SendQueue::new();
        assert!(queue.push_if_empty(MessageKind::Idd, vec![0, 1, 2]));
        assert!(!queue.push_if_empty(MessageKind::Idd, vec![0, 1, 2]));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_reply_queue_fifo() {
        let replies = ReplyQueue::new();
        replies.push(Reply::Ack(1));
        replies.push(Reply::Identity);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies.pop(), Some(Reply::Ack(1)));
        replies.clear();
        assert!(replies.is_empty());
    }
}
