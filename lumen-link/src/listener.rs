// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Listener registration and event dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use lumen_common::Channel;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::codec::Frame;

/// Observer of connection and message events. Every callback defaults to a no-op.
///
/// With [`DispatchMode::Inline`] callbacks run on the link's own threads, so a
/// slow callback stalls the link. Callbacks may call back into the link.
pub trait LinkListener: Send + Sync {
    fn on_connecting(&self, _channel: Channel) {}

    fn on_connect(&self, _channel: Channel) {}

    fn on_disconnect(&self, _channel: Channel) {}

    fn on_message_received(&self, _channel: Channel, _frame: &Frame) {}

    /// `remaining` is the send queue depth after this frame was acknowledged.
    fn on_message_sent(&self, _channel: Channel, _frame: &Frame, _remaining: usize) {}
}

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connecting(Channel),
    Connected(Channel),
    Disconnected(Channel),
    MessageReceived {
        channel: Channel,
        frame: Frame,
    },
    MessageSent {
        channel: Channel,
        frame: Frame,
        remaining: usize,
    },
}

impl LinkEvent {
    /// Invoke the matching callback on `listener`.
    pub fn deliver(&self, listener: &dyn LinkListener) {
        match self {
            LinkEvent::Connecting(channel) => listener.on_connecting(*channel),
            LinkEvent::Connected(channel) => listener.on_connect(*channel),
            LinkEvent::Disconnected(channel) => listener.on_disconnect(*channel),
            LinkEvent::MessageReceived { channel, frame } => {
                listener.on_message_received(*channel, frame)
            }
            LinkEvent::MessageSent {
                channel,
                frame,
                remaining,
            } => listener.on_message_sent(*channel, frame, *remaining),
        }
    }
}

/// Handle returned by registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Where listener callbacks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// On the thread that raised the event.
    Inline,
    /// On a dedicated thread fed by a bounded queue. A full queue makes the
    /// raising thread wait; events are never dropped.
    Executor { capacity: usize },
}

impl DispatchMode {
    /// `0` selects inline delivery.
    pub fn from_capacity(capacity: usize) -> Self {
        if capacity == 0 {
            DispatchMode::Inline
        } else {
            DispatchMode::Executor { capacity }
        }
    }
}

type ListenerList = Arc<RwLock<Vec<(ListenerId, Arc<dyn LinkListener>)>>>;

/// Owns the listener set and delivers events to it.
pub struct Dispatcher {
    listeners: ListenerList,
    next_id: AtomicU64,
    inline: bool,
    sender: Mutex<Option<Sender<LinkEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_thread: Option<ThreadId>,
}

impl Dispatcher {
    pub fn new(mode: DispatchMode) -> Self {
        let listeners: ListenerList = Arc::new(RwLock::new(Vec::new()));
        let mut sender = None;
        let mut worker = None;

        if let DispatchMode::Executor { capacity } = mode {
            let (tx, rx) = channel::bounded(capacity);
            let list = Arc::clone(&listeners);
            match thread::Builder::new()
                .name("lumen-dispatch".into())
                .spawn(move || run_executor(rx, list))
            {
                Ok(handle) => {
                    sender = Some(tx);
                    worker = Some(handle);
                }
                Err(e) => warn!(error = %e, "dispatch thread failed to start, delivering inline"),
            }
        }

        Self {
            listeners,
            next_id: AtomicU64::new(1),
            inline: worker.is_none(),
            worker_thread: worker.as_ref().map(|h: &JoinHandle<()>| h.thread().id()),
            sender: Mutex::new(sender),
            worker: Mutex::new(worker),
        }
    }

    /// Add a listener. Registering the same `Arc` again returns its existing id.
    pub fn register(&self, listener: Arc<dyn LinkListener>) -> ListenerId {
        let mut listeners = self.listeners.write();
        let addr = Arc::as_ptr(&listener) as *const ();
        if let Some((id, _)) = listeners
            .iter()
            .find(|(_, l)| Arc::as_ptr(l) as *const () == addr)
        {
            return *id;
        }
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        listeners.push((id, listener));
        id
    }

    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver `event` to every registered listener.
    ///
    /// In executor mode this waits while the queue is full.
    pub fn emit(&self, event: LinkEvent) {
        let sender = self.sender.lock().clone();
        match sender {
            // A listener raising events must not wait on its own queue
            Some(tx) if self.worker_thread == Some(thread::current().id()) => {
                match tx.try_send(event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(event)) => deliver_all(&self.listeners, &event),
                    Err(TrySendError::Disconnected(_)) => {
                        debug!("dispatcher stopped, event dropped")
                    }
                }
            }
            Some(tx) => {
                if tx.send(event).is_err() {
                    debug!("dispatcher stopped, event dropped");
                }
            }
            None if self.inline => deliver_all(&self.listeners, &event),
            None => debug!("dispatcher stopped, event dropped"),
        }
    }

    /// Stop the executor after it drained queued events. Inline dispatchers are unaffected.
    pub fn stop(&self) {
        self.sender.lock().take();
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        // Called from a listener: the thread exits on its own once we return
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("dispatch thread panicked");
        }
    }
}

fn deliver_all(listeners: &ListenerList, event: &LinkEvent) {
    let snapshot: Vec<Arc<dyn LinkListener>> =
        listeners.read().iter().map(|(_, l)| Arc::clone(l)).collect();
    for listener in snapshot {
        event.deliver(listener.as_ref());
    }
}

fn run_executor(rx: Receiver<LinkEvent>, listeners: ListenerList) {
    while let Ok(event) = rx.recv() {
        deliver_all(&listeners, &event);
    }
    debug!("dispatch thread exiting");
}

/// Listener that forwards every event into a channel.
pub struct EventRecorder {
    tx: Sender<LinkEvent>,
}

impl EventRecorder {
    pub fn new() -> (Arc<Self>, Receiver<LinkEvent>) {
        let (tx, rx) = channel::unbounded();
        (Arc::new(Self { tx }), rx)
    }

    fn record(&self, event: LinkEvent) {
        let _ = self.tx.send(event);
    }
}

impl LinkListener for EventRecorder {
    fn on_connecting(&self, channel: Channel) {
        self.record(LinkEvent::Connecting(channel));
    }

    fn on_connect(&self, channel: Channel) {
        self.record(LinkEvent::Connected(channel));
    }

    fn on_disconnect(&self, channel: Channel) {
        self.record(LinkEvent::Disconnected(channel));
    }

    fn on_message_received(&self, channel: Channel, frame: &Frame) {
        self.record(LinkEvent::MessageReceived {
            channel,
            frame: frame.clone(),
        });
    }

    fn on_message_sent(&self, channel: Channel, frame: &Frame, remaining: usize) {
        self.record(LinkEvent::MessageSent {
            channel,
            frame: frame.clone(),
            remaining,
        });
    }
}
