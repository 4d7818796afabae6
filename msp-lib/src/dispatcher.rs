//! Request/response correlation.
//!
//! Every request waits in a FIFO table until a frame with the same code
//! arrives. The first request for a code arms a single-shot timer; when it
//! fires the original buffer is sent once more and the timer is not re-armed.
//! Polls (empty payload) for a code that is already outstanding are queued but
//! not transmitted again.
//!
//! The dispatcher does no I/O. Buffers to send are queued as [`Transmit`]s and
//! the driver reports back through [`Dispatcher::on_transmitted`], which is
//! where the adaptive timeout is adjusted.

use crate::config::LinkConfig;
use crate::encoder;
use crate::error::LinkError;
use crate::frame::{Frame, Response};
use crate::timer::{DelayQueue, TimerId};
use bytes::Bytes;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Receives `Some(response)` when a matching frame arrives, or `None` when the
/// request could not be sent at all.
pub type Completion = oneshot::Sender<Option<Response>>;

/// An outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub code: u16,
    pub payload: Bytes,
    /// Complete even when the response fails its checksum.
    pub invoke_on_crc_error: bool,
}

impl Request {
    pub fn new(code: u16) -> Self {
        Self {
            code,
            payload: Bytes::new(),
            invoke_on_crc_error: false,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn invoke_on_crc_error(mut self, yes: bool) -> Self {
        self.invoke_on_crc_error = yes;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitKind {
    Initial,
    /// Resend after a timeout; `started` is when the request was first queued.
    Retransmit { started: Instant },
}

/// A buffer waiting to be written to the transport.
#[derive(Debug)]
pub struct Transmit {
    pub code: u16,
    pub bytes: Bytes,
    pub kind: TransmitKind,
    sent: Option<oneshot::Sender<()>>,
}

#[derive(Debug)]
struct PendingRequest {
    id: u64,
    code: u16,
    buffer: Bytes,
    completion: Completion,
    invoke_on_crc_error: bool,
    sent_at: Instant,
    timer: Option<TimerId>,
}

#[derive(Debug)]
pub struct Dispatcher {
    config: LinkConfig,
    pending: VecDeque<PendingRequest>,
    timers: DelayQueue<u64>,
    outbox: VecDeque<Transmit>,
    timeout_ms: u64,
    next_id: u64,
    retransmissions: u64,
}

impl Dispatcher {
    pub fn new(config: LinkConfig) -> Self {
        let timeout_ms = config.clamp_timeout(config.initial_timeout_ms);
        Self {
            config,
            pending: VecDeque::new(),
            timers: DelayQueue::new(),
            outbox: VecDeque::new(),
            timeout_ms,
            next_id: 0,
            retransmissions: 0,
        }
    }

    /// Encode and queue a request.
    ///
    /// `sent` fires once the initial transmission has been written. It is
    /// dropped unfired when the request is coalesced into an outstanding poll.
    /// A request that cannot be encoded hands its completion back untouched.
    pub fn enqueue(
        &mut self,
        request: Request,
        completion: Completion,
        sent: Option<oneshot::Sender<()>>,
        now: Instant,
    ) -> Result<(), (LinkError, Completion)> {
        let buffer = match encoder::encode(request.code, &request.payload) {
            Ok(buffer) => buffer,
            Err(err) => return Err((err, completion)),
        };
        let code = request.code;
        let already_pending = self.has_pending(code);

        let id = self.next_id;
        self.next_id += 1;

        let timer = if already_pending {
            None
        } else {
            Some(self.timers.insert(now + self.timeout(), id))
        };

        self.pending.push_back(PendingRequest {
            id,
            code,
            buffer: buffer.clone(),
            completion,
            invoke_on_crc_error: request.invoke_on_crc_error,
            sent_at: now,
            timer,
        });

        if !request.payload.is_empty() || !already_pending {
            self.outbox.push_back(Transmit {
                code,
                bytes: buffer,
                kind: TransmitKind::Initial,
                sent,
            });
        } else {
            debug!(code, "poll already outstanding, coalescing");
        }
        Ok(())
    }

    /// Hand a decoded frame to the first request waiting on its code.
    /// Returns true when a request was matched.
    pub fn complete(&mut self, frame: &Frame) -> bool {
        let Some(index) = self.pending.iter().position(|p| p.code == frame.code) else {
            return false;
        };
        let Some(entry) = self.pending.remove(index) else {
            return false;
        };
        if let Some(timer) = entry.timer {
            self.timers.cancel(timer);
        }

        if frame.valid || entry.invoke_on_crc_error {
            let _ = entry.completion.send(Some(Response::from(frame)));
        } else {
            debug!(code = frame.code, "dropping request after checksum failure");
        }
        true
    }

    /// Fire every expired timer, queueing one retransmission for each.
    pub fn poll_timeouts(&mut self, now: Instant) {
        while let Some((_, id)) = self.timers.pop_expired(now) {
            let Some(entry) = self.pending.iter_mut().find(|p| p.id == id) else {
                continue;
            };
            entry.timer = None;
            warn!(
                code = entry.code,
                timeout_ms = self.timeout_ms,
                "request timed out, resending"
            );
            self.retransmissions += 1;
            self.outbox.push_back(Transmit {
                code: entry.code,
                bytes: entry.buffer.clone(),
                kind: TransmitKind::Retransmit {
                    started: entry.sent_at,
                },
                sent: None,
            });
        }
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.outbox.pop_front()
    }

    /// Record the outcome of writing a [`Transmit`] to the transport.
    pub fn on_transmitted(&mut self, mut transmit: Transmit, ok: bool, now: Instant) {
        if !ok {
            warn!(code = transmit.code, "transmission failed");
            return;
        }

        match transmit.kind {
            TransmitKind::Initial => {
                if self.timeout_ms > self.config.min_timeout_ms {
                    self.timeout_ms -= 1;
                }
                if let Some(sent) = transmit.sent.take() {
                    let _ = sent.send(());
                }
            }
            TransmitKind::Retransmit { started } => {
                let elapsed = now.saturating_duration_since(started).as_millis() as u64;
                self.timeout_ms = self.config.clamp_timeout(elapsed);
                debug!(code = transmit.code, timeout_ms = self.timeout_ms, "adaptive timeout updated");
            }
        }
    }

    /// Current adaptive timeout window.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self, code: u16) -> bool {
        self.pending.iter().any(|p| p.code == code)
    }

    /// Cancel all timers and drop every pending request and queued transmission.
    /// Waiting callers observe their completion channel closing.
    pub fn clear(&mut self) {
        self.timers.clear();
        self.pending.clear();
        self.outbox.clear();
    }
}
