// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Link state machine.
//!
//! A [`Link`] owns one connection at a time. `connect` starts a session: a
//! connector thread opens the transport, then an inbound thread decodes what
//! the device sends and an outbound thread writes replies and queued
//! envelopes, one at a time, each waiting for its acknowledgement.
//!
//! Lifecycle changes (connect, disconnect, reconnect, shutdown) are
//! serialized by one lock and are the only writers of the connection state.
//! Every session carries its own cancel token and connection handle, so
//! threads of a torn-down session can never touch the next one.
//!
//! Events raised under the lifecycle lock go to an outbox and are delivered
//! in order once the lock is released, so listeners may call back into the
//! link from any callback.

mod keepalive;
mod state;
mod sync;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::queue::SegQueue;
use lumen_common::{Channel, MessageKind};
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::codec::{codec_for, FrameCodec};
use crate::config::LinkConfig;
use crate::descriptor::ConnectionDescriptor;
use crate::error::{LinkError, Result, TransportError};
use crate::listener::{DispatchMode, Dispatcher, LinkEvent, LinkListener, ListenerId};
use crate::transport::{Connection, Transport};

pub use keepalive::{IddCounters, IdleAction};
pub use state::{recovery_for, ConnectionState, Recovery};
pub use sync::{AckSlot, CancelToken, Envelope, Reply, ReplyQueue, SendQueue};

/// Poll interval while waiting for loop threads at shutdown.
const JOIN_POLL: Duration = Duration::from_millis(5);

/// Inputs of a connect decision.
#[derive(Debug, Clone, Copy)]
pub struct ConnectRequest<'a> {
    pub state: ConnectionState,
    pub current: Option<&'a ConnectionDescriptor>,
    pub requested: &'a ConnectionDescriptor,
}

/// Decides whether `connect` proceeds.
pub type ConnectGuard = Box<dyn Fn(&ConnectRequest<'_>) -> bool + Send + Sync>;

/// Connect when disconnected, or when asked for a different device.
pub fn default_connect_guard(request: &ConnectRequest<'_>) -> bool {
    request.state == ConnectionState::Disconnected || request.current != Some(request.requested)
}

/// One connection attempt and the threads serving it.
pub(crate) struct Session {
    id: u64,
    descriptor: ConnectionDescriptor,
    channel: Channel,
    codec: Arc<dyn FrameCodec>,
    cancel: CancelToken,
    ack: AckSlot,
    replies: ReplyQueue,
    connection: Mutex<Option<Arc<dyn Connection>>>,
}

impl Session {
    fn new(id: u64, descriptor: ConnectionDescriptor, codec: Arc<dyn FrameCodec>) -> Self {
        Self {
            id,
            channel: descriptor.channel(),
            descriptor,
            codec,
            cancel: CancelToken::new(),
            ack: AckSlot::new(),
            replies: ReplyQueue::new(),
            connection: Mutex::new(None),
        }
    }

    fn attach(&self, connection: Box<dyn Connection>) {
        *self.connection.lock() = Some(Arc::from(connection));
    }

    fn connection(&self) -> std::result::Result<Arc<dyn Connection>, TransportError> {
        self.connection.lock().clone().ok_or(TransportError::Closed)
    }

    /// Cancel the loops and close the connection. Idempotent.
    fn stop(&self) {
        self.cancel.cancel();
        self.ack.wake();
        self.replies.clear();
        if let Some(connection) = self.connection.lock().take() {
            connection.close();
        }
    }
}

struct Lifecycle {
    session: Option<Arc<Session>>,
    next_session: u64,
    /// Bumped by every user-initiated connect/disconnect so a pending
    /// reconnect can tell it was overtaken.
    epoch: u64,
    threads: Vec<JoinHandle<()>>,
}

pub(crate) struct Shared {
    config: LinkConfig,
    transport: Arc<dyn Transport>,
    guard: ConnectGuard,
    state: Mutex<ConnectionState>,
    lifecycle: Mutex<Lifecycle>,
    /// Written only with `lifecycle` held; read without it.
    descriptor: RwLock<Option<ConnectionDescriptor>>,
    queue: SendQueue,
    idd: IddCounters,
    dispatcher: Dispatcher,
    outbox: SegQueue<LinkEvent>,
    draining: AtomicBool,
    shut_down: AtomicBool,
}

/// Shuts the link down once the last user handle is dropped.
struct Owner {
    shared: Arc<Shared>,
}

impl Drop for Owner {
    fn drop(&mut self) {
        Link {
            shared: Arc::clone(&self.shared),
            owner: None,
        }
        .shutdown();
    }
}

/// Handle to a link. Clones share the same connection.
///
/// Dropping the last clone shuts the link down; loop threads hold internal
/// handles that do not keep it alive.
#[derive(Clone)]
pub struct Link {
    shared: Arc<Shared>,
    owner: Option<Arc<Owner>>,
}

impl Link {
    pub fn new(config: LinkConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_connect_guard(config, transport, Box::new(default_connect_guard))
    }

    /// Like [`Link::new`] with a custom connect precondition.
    pub fn with_connect_guard(
        config: LinkConfig,
        transport: Arc<dyn Transport>,
        guard: ConnectGuard,
    ) -> Result<Self> {
        config.validate()?;
        let idd = IddCounters::new(config.idd_cooldown, config.idd_failure_threshold);
        let dispatcher = Dispatcher::new(DispatchMode::from_capacity(config.dispatch_capacity));
        let shared = Arc::new(Shared {
            config,
            transport,
            guard,
            state: Mutex::new(ConnectionState::Disconnected),
            lifecycle: Mutex::new(Lifecycle {
                session: None,
                next_session: 0,
                epoch: 0,
                threads: Vec::new(),
            }),
            descriptor: RwLock::new(None),
            queue: SendQueue::new(),
            idd,
            dispatcher,
            outbox: SegQueue::new(),
            draining: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        });
        Ok(Self {
            owner: Some(Arc::new(Owner {
                shared: Arc::clone(&shared),
            })),
            shared,
        })
    }

    /// Handle for loop threads; does not count as a user of the link.
    fn internal(&self) -> Link {
        Link {
            shared: Arc::clone(&self.shared),
            owner: None,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Descriptor of the current or last connection.
    pub fn descriptor(&self) -> Option<ConnectionDescriptor> {
        self.shared.descriptor.read().clone()
    }

    pub fn channel(&self) -> Option<Channel> {
        self.descriptor().map(|d| d.channel())
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Identification phase last reported by the peer.
    pub fn idd_state(&self) -> u8 {
        self.shared.idd.state()
    }

    /// Largest payload one frame can carry on `channel` with this configuration.
    pub fn max_payload(&self, channel: Channel) -> usize {
        codec_for(&self.shared.config, channel).max_payload()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::SeqCst)
    }

    pub fn register(&self, listener: Arc<dyn LinkListener>) -> ListenerId {
        self.shared.dispatcher.register(listener)
    }

    pub fn unregister(&self, id: ListenerId) -> bool {
        self.shared.dispatcher.unregister(id)
    }

    /// Start connecting to `descriptor`. False when the connect guard refuses
    /// or the link has been shut down.
    pub fn connect(&self, descriptor: ConnectionDescriptor) -> bool {
        if self.is_shut_down() {
            return false;
        }
        let mut lc = self.shared.lifecycle.lock();
        let current = self.descriptor();
        let request = ConnectRequest {
            state: self.state(),
            current: current.as_ref(),
            requested: &descriptor,
        };
        if !(self.shared.guard)(&request) {
            debug!(%descriptor, state = %request.state, "connect refused");
            return false;
        }

        self.teardown(&mut lc);
        lc.epoch += 1;
        self.start_session(&mut lc, descriptor);
        drop(lc);
        self.flush_events();
        true
    }

    /// Disconnect, pause `reconnect_delay`, then connect to the stored descriptor.
    ///
    /// False when nothing was stored or another connect/disconnect happened
    /// during the pause.
    pub fn reconnect(&self) -> bool {
        let epoch = {
            let mut lc = self.shared.lifecycle.lock();
            lc.epoch += 1;
            self.teardown(&mut lc);
            lc.epoch
        };
        self.flush_events();
        self.resume_after_pause(epoch)
    }

    /// Tear down the current session. Idempotent: no event when already disconnected.
    pub fn disconnect(&self) {
        {
            let mut lc = self.shared.lifecycle.lock();
            lc.epoch += 1;
            self.teardown(&mut lc);
        }
        self.flush_events();
    }

    /// Disconnect, refuse further connects and wait for the loop threads.
    ///
    /// Threads still running after `shutdown_grace` are detached.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let threads = {
            let mut lc = self.shared.lifecycle.lock();
            lc.epoch += 1;
            self.teardown(&mut lc);
            *self.shared.descriptor.write() = None;
            std::mem::take(&mut lc.threads)
        };
        self.flush_events();

        let deadline = Instant::now() + self.shared.config.shutdown_grace();
        let current = thread::current().id();
        for handle in threads {
            if handle.thread().id() == current {
                continue;
            }
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(JOIN_POLL);
            }
            let name = handle.thread().name().unwrap_or("loop").to_string();
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!(thread = %name, "loop thread panicked");
                }
            } else {
                warn!(thread = %name, "loop thread still running after grace period, detaching");
            }
        }

        self.shared.queue.clear();
        self.shared.dispatcher.stop();
        info!("link shut down");
    }

    /// Queue `payload` with the configured acknowledgement timeout for `kind`.
    ///
    /// Returns the queue length after the push.
    pub fn send(&self, kind: MessageKind, payload: &[u8]) -> Result<usize> {
        self.enqueue(kind, payload, None)
    }

    /// Queue `payload` with an explicit acknowledgement timeout.
    pub fn send_with_timeout(
        &self,
        kind: MessageKind,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<usize> {
        self.enqueue(kind, payload, Some(timeout))
    }

    /// Split `data` into frames that fit the channel and queue them in order.
    ///
    /// Returns the number of chunks queued.
    pub fn send_chunked(&self, kind: MessageKind, data: &[u8]) -> Result<usize> {
        if self.is_shut_down() {
            return Err(LinkError::ShutDown);
        }
        let limit = self.payload_limit();
        if limit == 0 {
            return Err(LinkError::PayloadTooLarge {
                len: data.len(),
                max: 0,
            });
        }
        let mut chunks = 0;
        for chunk in data.chunks(limit) {
            self.shared.queue.push(kind, chunk.to_vec(), None);
            chunks += 1;
        }
        Ok(chunks)
    }

    fn enqueue(&self, kind: MessageKind, payload: &[u8], timeout: Option<Duration>) -> Result<usize> {
        if self.is_shut_down() {
            return Err(LinkError::ShutDown);
        }
        let max = self.payload_limit();
        if payload.len() > max {
            return Err(LinkError::PayloadTooLarge {
                len: payload.len(),
                max,
            });
        }
        Ok(self.shared.queue.push(kind, payload.to_vec(), timeout))
    }

    /// Payload limit of the current channel; the smaller one when none is known yet.
    fn payload_limit(&self) -> usize {
        match self.channel() {
            Some(channel) => self.max_payload(channel),
            None => self
                .max_payload(Channel::Usb)
                .min(self.max_payload(Channel::Bluetooth)),
        }
    }

    fn set_state(&self, _lc: &mut MutexGuard<'_, Lifecycle>, to: ConnectionState) {
        let mut state = self.shared.state.lock();
        if !state.can_transition(to) {
            warn!(from = %*state, to = %to, "unexpected state transition");
        }
        debug!(from = %*state, to = %to, "state");
        *state = to;
    }

    /// Queue `event` for the next [`Link::flush_events`].
    fn post(&self, event: LinkEvent) {
        self.shared.outbox.push(event);
    }

    /// Deliver queued events in order. Must not be called with the lifecycle
    /// lock held. A call made while another thread is delivering (including
    /// from inside a listener) leaves its events to that thread.
    fn flush_events(&self) {
        let shared = &self.shared;
        loop {
            if shared.draining.swap(true, Ordering::SeqCst) {
                return;
            }
            while let Some(event) = shared.outbox.pop() {
                shared.dispatcher.emit(event);
            }
            shared.draining.store(false, Ordering::SeqCst);
            if shared.outbox.is_empty() {
                return;
            }
        }
    }

    fn emit(&self, event: LinkEvent) {
        self.post(event);
        self.flush_events();
    }

    /// Stop the current session. Returns false when already disconnected.
    fn teardown(&self, lc: &mut MutexGuard<'_, Lifecycle>) -> bool {
        let state = self.state();
        if state == ConnectionState::Disconnected {
            return false;
        }
        let channel = lc
            .session
            .as_ref()
            .map(|s| s.channel)
            .or_else(|| self.channel());

        self.set_state(lc, ConnectionState::Disconnecting);
        self.shared.queue.clear();
        if let Some(session) = lc.session.take() {
            session.stop();
        }
        self.set_state(lc, ConnectionState::Disconnected);
        info!(was = %state, "disconnected");
        if let Some(channel) = channel {
            self.post(LinkEvent::Disconnected(channel));
        }
        true
    }

    fn start_session(&self, lc: &mut MutexGuard<'_, Lifecycle>, descriptor: ConnectionDescriptor) {
        self.shared.queue.clear();
        lc.threads.retain(|h| !h.is_finished());
        lc.next_session += 1;

        let channel = descriptor.channel();
        let codec = codec_for(&self.shared.config, channel);
        let session = Arc::new(Session::new(lc.next_session, descriptor.clone(), codec));
        *self.shared.descriptor.write() = Some(descriptor.clone());
        lc.session = Some(Arc::clone(&session));

        self.set_state(lc, ConnectionState::Connecting);
        info!(%descriptor, session = session.id, "connecting");
        self.post(LinkEvent::Connecting(channel));

        let link = self.internal();
        let connector = Arc::clone(&session);
        if !self.spawn(lc, "connector", session.id, move || {
            worker::run_connector(link, connector)
        }) {
            self.teardown(lc);
        }
    }

    fn spawn<F>(&self, lc: &mut MutexGuard<'_, Lifecycle>, role: &str, id: u64, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match thread::Builder::new()
            .name(format!("lumen-{}-{}", role, id))
            .spawn(f)
        {
            Ok(handle) => {
                lc.threads.push(handle);
                true
            }
            Err(e) => {
                warn!(role, error = %e, "failed to spawn loop thread");
                false
            }
        }
    }

    fn is_current(lc: &Lifecycle, session: &Session) -> bool {
        lc.session.as_ref().map(|s| s.id) == Some(session.id)
    }

    /// Loop threads of `session` keep running while this holds.
    fn is_live(&self, session: &Session, state: ConnectionState) -> bool {
        !session.cancel.is_cancelled() && self.state() == state
    }

    /// Connector success: go `Connected` and start the data loops.
    fn on_opened(&self, session: &Arc<Session>, connection: Box<dyn Connection>) {
        let mut lc = self.shared.lifecycle.lock();
        if !Self::is_current(&lc, session)
            || session.cancel.is_cancelled()
            || self.state() != ConnectionState::Connecting
        {
            connection.close();
            return;
        }

        session.attach(connection);
        self.shared.idd.reset();
        self.set_state(&mut lc, ConnectionState::Connected);
        info!(descriptor = %session.descriptor, session = session.id, "connected");
        // Queued before the data loops start so it precedes their events
        self.post(LinkEvent::Connected(session.channel));

        let inbound = (self.internal(), Arc::clone(session));
        let outbound = (self.internal(), Arc::clone(session));
        let started = self.spawn(&mut lc, "inbound", session.id, move || {
            worker::run_inbound(inbound.0, inbound.1)
        }) && self.spawn(&mut lc, "outbound", session.id, move || {
            worker::run_outbound(outbound.0, outbound.1)
        });
        if !started {
            self.teardown(&mut lc);
        }
        drop(lc);
        self.flush_events();
    }

    /// Route a loop failure through the recovery table.
    fn on_failure(&self, session: &Session, error: TransportError, context: &str) -> Recovery {
        if session.cancel.is_cancelled() {
            debug!(session = session.id, context, error = %error, "failure of a stopped session");
            return Recovery::Ignore;
        }
        let state = self.state();
        let recovery = recovery_for(state, &error);
        match recovery {
            Recovery::Retry => debug!(context, error = %error, "open failed, retrying"),
            Recovery::Ignore => debug!(context, error = %error, "failure ignored"),
            _ => warn!(context, error = %error, ?recovery, "transport failure"),
        }
        match recovery {
            Recovery::Reconnect => self.reconnect_session(session.id),
            Recovery::Disconnect => self.disconnect_session(session.id),
            Recovery::Retry | Recovery::Ignore => {}
        }
        recovery
    }

    /// Reconnect on behalf of a loop thread; no-op if the session was replaced.
    fn reconnect_session(&self, id: u64) {
        let epoch = {
            let mut lc = self.shared.lifecycle.lock();
            if lc.session.as_ref().map(|s| s.id) != Some(id) {
                return;
            }
            self.teardown(&mut lc);
            lc.epoch
        };
        self.flush_events();
        self.resume_after_pause(epoch);
    }

    fn disconnect_session(&self, id: u64) {
        {
            let mut lc = self.shared.lifecycle.lock();
            if lc.session.as_ref().map(|s| s.id) == Some(id) {
                lc.epoch += 1;
                self.teardown(&mut lc);
            }
        }
        self.flush_events();
    }

    fn resume_after_pause(&self, epoch: u64) -> bool {
        thread::sleep(self.shared.config.reconnect_delay());

        let resumed = {
            let mut lc = self.shared.lifecycle.lock();
            if self.is_shut_down()
                || lc.epoch != epoch
                || self.state() != ConnectionState::Disconnected
            {
                debug!("reconnect overtaken");
                false
            } else if let Some(descriptor) = self.descriptor() {
                lc.epoch += 1;
                self.start_session(&mut lc, descriptor);
                true
            } else {
                false
            }
        };
        self.flush_events();
        resumed
    }
}
