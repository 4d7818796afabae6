//! Per-connection engine.
//!
//! [`LinkEngine`] owns the decoder, notification bus, dispatcher and link
//! statistics for one connection. It never touches the transport: bytes come
//! in through [`LinkEngine::feed`], buffers to write come out of
//! [`LinkEngine::poll_transmit`], and time only advances through the `now`
//! arguments. [`crate::client`] drives it over a real transport.

use crate::bus::{NotificationBus, SubscriptionId};
use crate::config::LinkConfig;
use crate::decoder::Decoder;
use crate::dispatcher::{Completion, Dispatcher, Request, Transmit};
use crate::error::LinkError;
use crate::frame::Frame;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Snapshot of the link counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub timeout: Duration,
    pub checksum_failures: u64,
    pub frames_decoded: u64,
    pub retransmissions: u64,
    pub last_received: Option<Instant>,
}

#[derive(Debug)]
pub struct LinkEngine {
    decoder: Decoder,
    bus: NotificationBus,
    dispatcher: Dispatcher,
    connected: bool,
    offline: bool,
    checksum_failures: u64,
    frames_decoded: u64,
    last_received: Option<Instant>,
}

impl Default for LinkEngine {
    fn default() -> Self {
        Self::new(LinkConfig::default())
    }
}

impl LinkEngine {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            decoder: Decoder::new(),
            bus: NotificationBus::new(),
            dispatcher: Dispatcher::new(config),
            connected: false,
            offline: false,
            checksum_failures: 0,
            frames_decoded: 0,
            last_received: None,
        }
    }

    /// The transport came up.
    pub fn connect(&mut self) {
        info!("link connected");
        self.reset();
        self.connected = true;
    }

    /// The transport went away.
    pub fn disconnect(&mut self) {
        info!("link disconnected");
        self.reset();
        self.connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// In offline mode every send fails immediately.
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// Return decoder, counters and dispatcher to their initial state.
    pub fn reset(&mut self) {
        debug!(
            pending = self.dispatcher.pending_len(),
            "resetting link state"
        );
        self.decoder.reset();
        self.dispatcher.clear();
        self.checksum_failures = 0;
        self.frames_decoded = 0;
        self.last_received = None;
    }

    /// Decode a chunk of received bytes. Each completed frame is published on
    /// the bus and then matched against pending requests.
    pub fn feed(&mut self, data: &[u8], now: Instant) -> Vec<Frame> {
        self.last_received = Some(now);
        let frames = self.decoder.feed_all(data);
        for frame in &frames {
            self.dispatch(frame);
        }
        frames
    }

    /// Handle one frame decoded outside the engine, e.g. by
    /// [`crate::codec::MspCodec`].
    pub fn receive(&mut self, frame: &Frame, now: Instant) {
        self.last_received = Some(now);
        self.dispatch(frame);
    }

    fn dispatch(&mut self, frame: &Frame) {
        self.frames_decoded += 1;
        if !frame.valid {
            self.checksum_failures += 1;
        }
        self.bus.publish(frame);
        if !self.dispatcher.complete(frame) {
            debug!(code = frame.code, "frame matched no pending request");
        }
    }

    /// Queue a request. Returns false, after completing with `None`, when the
    /// link is down, offline, or the request cannot be encoded.
    pub fn send(
        &mut self,
        request: Request,
        completion: Completion,
        sent: Option<oneshot::Sender<()>>,
        now: Instant,
    ) -> bool {
        match self.try_send(request, completion, sent, now) {
            Ok(()) => true,
            Err((err, completion)) => {
                warn!(%err, "request not sent");
                let _ = completion.send(None);
                false
            }
        }
    }

    /// Like [`LinkEngine::send`], but reports why a request was refused and
    /// hands the unused completion back.
    pub fn try_send(
        &mut self,
        request: Request,
        completion: Completion,
        sent: Option<oneshot::Sender<()>>,
        now: Instant,
    ) -> Result<(), (LinkError, Completion)> {
        if !self.connected {
            return Err((LinkError::NotConnected, completion));
        }
        if self.offline {
            return Err((LinkError::Offline, completion));
        }
        self.dispatcher.enqueue(request, completion, sent, now)
    }

    /// Fire expired request timers.
    pub fn poll_timeouts(&mut self, now: Instant) {
        self.dispatcher.poll_timeouts(now);
    }

    /// Earliest instant at which [`LinkEngine::poll_timeouts`] has work to do.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.dispatcher.next_deadline()
    }

    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.dispatcher.poll_transmit()
    }

    pub fn on_transmitted(&mut self, transmit: Transmit, ok: bool, now: Instant) {
        self.dispatcher.on_transmitted(transmit, ok, now);
    }

    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&Frame) + Send + 'static,
    {
        self.bus.subscribe(listener)
    }

    pub fn subscribe_channel(&mut self) -> (SubscriptionId, mpsc::UnboundedReceiver<Frame>) {
        self.bus.subscribe_channel()
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    pub fn clear_listeners(&mut self) {
        self.bus.clear();
    }

    pub fn pending_len(&self) -> usize {
        self.dispatcher.pending_len()
    }

    pub fn has_pending(&self, code: u16) -> bool {
        self.dispatcher.has_pending(code)
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            timeout: self.dispatcher.timeout(),
            checksum_failures: self.checksum_failures,
            frames_decoded: self.frames_decoded,
            retransmissions: self.dispatcher.retransmissions(),
            last_received: self.last_received,
        }
    }
}
