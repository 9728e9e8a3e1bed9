//! Per-stream state machine (RFC 9113 §5.1, spec §4.4) and the per-stream
//! flow-control windows and content-length accounting that travel with it.
//! Event-driven transitions mirror the teacher's `transition_state`
//! (`trace!` on every state change), generalized from the teacher's
//! client-only four states to the full seven-state machine a server needs,
//! plus the CLOSED grace period and content-length bookkeeping spec §4.4/§3
//! add. Per spec §9 "Cyclic structures", a `Stream` holds no back-pointer to
//! its `Connection` -- the connection owns `stream_id -> Stream` and passes
//! itself in wherever a transition needs wider context.

use crate::error::ProtocolError;
use crate::flow_control::FlowController;
use crate::types::{ErrorCode, StreamId};
use bytes::BytesMut;
use log::trace;
use std::time::{Duration, Instant};

/// RFC 9113 §5.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// The five event kinds named in spec §4.4, each with an implicit
/// send/receive direction supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    Headers,
    HeadersEndStream,
    Data,
    DataEndStream,
    RstStream,
}

/// How long a CLOSED stream still silently tolerates PRIORITY and
/// WINDOW_UPDATE (spec §4.4).
pub const CLOSED_GRACE_PERIOD: Duration = Duration::from_secs(2);

pub struct Stream {
    pub id: StreamId,
    state: StreamState,
    pub send_window: FlowController,
    pub recv_window: FlowController,
    content_length_declared: Option<u64>,
    content_length_seen: u64,
    pub end_stream_sent: bool,
    pub end_stream_received: bool,
    created_at: Instant,
    closed_at: Option<Instant>,
    /// Whether any DATA has reached the handler -- the rapid-reset tracker
    /// (spec §4.6) needs this to tell a legitimate cancellation from the
    /// CVE-2023-44487 pattern.
    pub produced_data_to_handler: bool,
    /// Header block fragments accumulated across HEADERS + CONTINUATION,
    /// cleared once END_HEADERS is seen and the block is decoded.
    pub recv_buffer: BytesMut,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("send_window", &self.send_window.window())
            .field("recv_window", &self.recv_window.window())
            .finish()
    }
}

impl Stream {
    #[must_use]
    pub fn new(id: StreamId, initial_send_window: u32, initial_recv_window: u32, now: Instant) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            send_window: FlowController::new(initial_send_window),
            recv_window: FlowController::new(initial_recv_window),
            content_length_declared: None,
            content_length_seen: 0,
            end_stream_sent: false,
            end_stream_received: false,
            created_at: now,
            closed_at: None,
            produced_data_to_handler: false,
            recv_buffer: BytesMut::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    #[must_use]
    pub fn closed_at(&self) -> Option<Instant> {
        self.closed_at
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    #[must_use]
    pub fn in_closed_grace_period(&self, now: Instant) -> bool {
        matches!(self.closed_at, Some(at) if now.duration_since(at) <= CLOSED_GRACE_PERIOD)
    }

    pub fn set_declared_content_length(&mut self, len: u64) {
        self.content_length_declared = Some(len);
    }

    #[must_use]
    pub fn declared_content_length(&self) -> Option<u64> {
        self.content_length_declared
    }

    /// Accounts for `n` newly received DATA payload bytes, enforcing
    /// `content_length_seen <= content_length_declared` at every step
    /// (spec §3 invariants).
    pub fn record_data_received(&mut self, n: u64) -> Result<(), ProtocolError> {
        self.content_length_seen += n;
        if let Some(declared) = self.content_length_declared {
            if self.content_length_seen > declared {
                return Err(ProtocolError::stream(
                    self.id,
                    ErrorCode::ProtocolError,
                    "content-length exceeded by DATA payload",
                ));
            }
        }
        Ok(())
    }

    /// Checked at END_STREAM: declared and seen must match exactly.
    pub fn check_content_length_at_end_stream(&self) -> Result<(), ProtocolError> {
        if let Some(declared) = self.content_length_declared {
            if self.content_length_seen != declared {
                return Err(ProtocolError::stream(
                    self.id,
                    ErrorCode::ProtocolError,
                    "content-length mismatch at END_STREAM",
                ));
            }
        }
        Ok(())
    }

    /// Applies one state-machine event. `send` is `true` for a frame this
    /// endpoint is sending, `false` for one just received.
    pub fn apply_event(&mut self, send: bool, event: StreamEvent, now: Instant) -> Result<(), ProtocolError> {
        use StreamEvent::{Data, DataEndStream, Headers, HeadersEndStream, RstStream};
        use StreamState::{Closed, HalfClosedLocal, HalfClosedRemote, Idle, Open, ReservedLocal, ReservedRemote};

        let before = self.state;

        let next = match (self.state, send, event) {
            (Closed, _, RstStream) => Closed, // tolerated re-reset
            (_, _, RstStream) => Closed,

            (Idle, true, Headers) | (Idle, false, Headers) => Open,
            (Idle, true, HeadersEndStream) => HalfClosedLocal,
            (Idle, false, HeadersEndStream) => HalfClosedRemote,

            (ReservedLocal, true, Headers | HeadersEndStream) => HalfClosedRemote,
            (ReservedRemote, false, Headers | HeadersEndStream) => HalfClosedLocal,

            (Open, true, DataEndStream | HeadersEndStream) => HalfClosedLocal,
            (Open, false, DataEndStream | HeadersEndStream) => HalfClosedRemote,
            (Open, _, Data | Headers) => Open,

            (HalfClosedLocal, false, DataEndStream | HeadersEndStream) => Closed,
            (HalfClosedLocal, false, Data | Headers) => HalfClosedLocal,
            (HalfClosedRemote, true, DataEndStream | HeadersEndStream) => Closed,
            (HalfClosedRemote, true, Data | Headers) => HalfClosedRemote,

            (state, _, _) => {
                return Err(ProtocolError::stream(
                    self.id,
                    ErrorCode::ProtocolError,
                    format!("invalid event {event:?} (send={send}) in state {state:?}"),
                ));
            }
        };

        if matches!(event, DataEndStream | HeadersEndStream) {
            if send {
                self.end_stream_sent = true;
            } else {
                self.end_stream_received = true;
            }
        }

        self.state = next;
        if self.state == Closed && before != Closed {
            self.closed_at = Some(now);
        }
        if before != self.state {
            trace!("stream {} {:?} -> {:?} (send={}, event={:?})", self.id, before, self.state, send, event);
        }
        Ok(())
    }

    /// Reserves this (otherwise-idle) stream as locally-initiated. Kept for
    /// completeness of the state machine even though server push issuance is
    /// a spec Non-goal; receiving a malformed PUSH_PROMISE from a peer still
    /// needs a well-defined reserved state to reject cleanly.
    pub fn reserve_local(&mut self) {
        debug_assert_eq!(self.state, StreamState::Idle);
        self.state = StreamState::ReservedLocal;
    }

    pub fn reserve_remote(&mut self) {
        debug_assert_eq!(self.state, StreamState::Idle);
        self.state = StreamState::ReservedRemote;
    }
}
