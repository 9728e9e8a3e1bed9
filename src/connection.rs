//! The connection engine (spec §4.6): preface handshake, the read/dispatch
//! loop, CONTINUATION accumulation, GOAWAY, and the flood/rate defenses,
//! wired to the flow controller, HPACK codec and stream state machine built
//! elsewhere in this crate. Generalizes the teacher's thread-based
//! `spawn_request_sender`/`spawn_response_receiver` pair (condvar
//! synchronisation, `EnumMap<SettingsParameter, u32>` settings table, a
//! single socket wrapped for shared writes) into one cooperative async task
//! per connection, since spec §9 "Cooperative concurrency" asks for a
//! suspend-resume model rather than dedicated OS threads per connection.

use crate::buffer_pool::BufferPool;
use crate::config::Config;
use crate::error::ProtocolError;
use crate::flow_control::{self, FlowControlAdvisor, FlowController};
use crate::frame::{Frame, FrameHeader, RawSetting, FRAME_HEADER_LEN};
use crate::header_validator;
use crate::hpack::{Decoder as HpackDecoder, Encoder as HpackEncoder};
use crate::metrics::Metrics;
use crate::security::{RateLimitKind, RateLimiters, RapidResetTracker, RapidResetVerdict};
use crate::stream::{Stream, StreamEvent, StreamState};
use crate::types::{ErrorCode, HeaderList, Settings, SettingsParameter, StreamId};
use crate::writer::MultiFrameWriter;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use enum_map::EnumMap;
use log::{debug, trace, warn};
use num_traits::FromPrimitive;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::time::timeout;

pub const CONNECTION_PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// The observer hooks named in spec §6 "Adapter contracts exposed by the
/// core". All default to doing nothing, so an embedder implements only what
/// it cares about -- the application-facing request/response façade that
/// normally sits behind these hooks is the excluded collaborator (spec §1).
pub trait Observer {
    fn on_headers(&mut self, _stream_id: StreamId, _headers: &HeaderList, _end_stream: bool) {}
    fn on_data(&mut self, _stream_id: StreamId, _data: &[u8], _end_stream: bool) {}
    fn on_stream_closed(&mut self, _stream_id: StreamId, _error_code: Option<ErrorCode>) {}
    fn on_settings(&mut self, _settings: &Settings) {}
    /// A stream that previously stalled on flow control (spec §4.5) now has
    /// `min(conn, stream)` send-window capacity again. The embedder is
    /// expected to retry whatever `send_frame` call returned
    /// `FlowControlError` for `stream_id`.
    fn on_capacity_available(&mut self, _stream_id: StreamId) {}
}

/// No-op observer, handy for tests that only want to drive the engine.
#[derive(Debug, Default)]
pub struct NullObserver;
impl Observer for NullObserver {}

/// Header block fragments accumulated across a HEADERS frame and any
/// CONTINUATION frames that follow it (spec §3 `continuation_accumulator`).
/// Only one may be in flight per connection.
struct ContinuationAccumulator {
    stream_id: StreamId,
    header_block: BytesMut,
    frame_count: usize,
    end_stream: bool,
}

/// The full connection data model of spec §3.
pub struct Connection {
    is_server: bool,
    config: Config,
    local_settings: Settings,
    remote_settings: Settings,
    applied_settings: Settings,
    send_window: FlowController,
    recv_window: FlowController,
    streams: DashMap<StreamId, Stream>,
    highest_peer_stream_id: StreamId,
    next_local_stream_id: StreamId,
    goaway_sent: bool,
    goaway_received: bool,
    hpack_encoder: HpackEncoder,
    hpack_decoder: HpackDecoder,
    continuation_accumulator: Option<ContinuationAccumulator>,
    ping_waiters: HashMap<[u8; 8], oneshot::Sender<()>>,
    pending_settings_acks: VecDeque<Instant>,
    /// Per-parameter pending local settings changes not yet ACKed, keyed the
    /// way the teacher's `connection.rs` keyed its `their_settings` table.
    pending_local_settings: EnumMap<SettingsParameter, Option<u32>>,
    rate_limiters: RateLimiters,
    rapid_reset_tracker: RapidResetTracker,
    metrics: Metrics,
    flow_advisor: Box<dyn FlowControlAdvisor + Send + Sync>,
    buffer_pool: Arc<BufferPool>,
    writer: MultiFrameWriter,
    /// Streams currently blocked on flow control (spec §4.5): registered by
    /// `send_frame` on a stall, drained by `wake_eligible_stalled_streams`
    /// once a WINDOW_UPDATE reopens their capacity.
    stalled_streams: HashSet<StreamId>,
}

impl Connection {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let now = Instant::now();
        let local_settings = Settings {
            header_table_size: config.header_table_size,
            enable_push: false,
            max_concurrent_streams: config.max_concurrent_streams,
            initial_window_size: config.initial_window_size,
            max_frame_size: config.max_frame_size,
            max_header_list_size: config.max_header_list_size,
        };
        Self {
            is_server: true,
            hpack_encoder: HpackEncoder::new(local_settings.header_table_size as usize),
            hpack_decoder: HpackDecoder::new(
                local_settings.header_table_size as usize,
                local_settings.max_header_list_size as usize,
            ),
            send_window: FlowController::new(Settings::default().initial_window_size),
            recv_window: FlowController::new(local_settings.initial_window_size),
            // Until the peer's first SETTINGS frame arrives, RFC 9113 says to
            // assume its defaults, not ours.
            applied_settings: Settings::default(),
            local_settings,
            remote_settings: Settings::default(),
            streams: DashMap::new(),
            highest_peer_stream_id: 0,
            next_local_stream_id: 2,
            goaway_sent: false,
            goaway_received: false,
            continuation_accumulator: None,
            ping_waiters: HashMap::new(),
            pending_settings_acks: VecDeque::new(),
            pending_local_settings: EnumMap::default(),
            rate_limiters: RateLimiters::new(config.rate_limits, now),
            rapid_reset_tracker: RapidResetTracker::new(config.rapid_reset),
            metrics: Metrics::default(),
            flow_advisor: flow_control::advisor_for(config.flow_control_strategy),
            buffer_pool: Arc::new(BufferPool::new(config.buffer_pool.max_pool_size, config.buffer_pool.max_buffer_size)),
            writer: MultiFrameWriter::new(),
            stalled_streams: HashSet::new(),
            config,
        }
    }

    #[must_use]
    pub fn metrics(&self) -> Metrics {
        self.metrics
    }

    #[must_use]
    pub fn goaway_sent(&self) -> bool {
        self.goaway_sent
    }

    #[must_use]
    pub fn highest_peer_stream_id(&self) -> StreamId {
        self.highest_peer_stream_id
    }

    /// Entry point for an h2c adapter that has already stripped the HTTP/1.1
    /// Upgrade request line: the core only ever starts from the raw
    /// preface-prefixed byte stream (spec §11 supplemented h2c seam).
    pub async fn new_from_preface<S: AsyncRead + AsyncWrite + Unpin, O: Observer>(
        config: Config,
        io: &mut S,
        observer: &mut O,
    ) -> Result<Self, ProtocolError> {
        let mut conn = Self::new(config);
        conn.run(io, observer).await?;
        Ok(conn)
    }

    /// Drives the connection to completion: handshake, then the read/dispatch
    /// loop until GOAWAY (either direction) or a fatal I/O error.
    pub async fn run<S: AsyncRead + AsyncWrite + Unpin, O: Observer>(
        &mut self,
        io: &mut S,
        observer: &mut O,
    ) -> Result<(), ProtocolError> {
        let handshake_deadline = self.config.timeouts.handshake;
        match timeout(handshake_deadline, self.read_preface(io)).await {
            Err(_) => return Err(ProtocolError::connection(ErrorCode::ProtocolError, "connection preface not received in time")),
            Ok(Ok(false)) => {
                // Deviation from the exact 24-byte preface: close with no frames.
                return Err(ProtocolError::connection(ErrorCode::ProtocolError, "invalid connection preface"));
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(true)) => {}
        }
        self.send_local_settings(io).await?;

        let settings_deadline = self.config.timeouts.settings_ack;
        let idle_deadline = self.config.timeouts.idle;
        let mut last_activity = Instant::now();
        loop {
            if self.goaway_sent || self.goaway_received {
                break;
            }
            let frame_result = timeout(settings_deadline.max(Duration::from_secs(1)), self.read_frame(io)).await;
            let frame = match frame_result {
                Err(_) if !self.pending_settings_acks.is_empty() => {
                    self.handle_error(io, ProtocolError::connection(ErrorCode::SettingsTimeout, "SETTINGS ACK not received in time")).await?;
                    break;
                }
                Err(_) if last_activity.elapsed() >= idle_deadline => {
                    self.send_goaway(io, ErrorCode::NoError, b"idle timeout").await?;
                    break;
                }
                Err(_) => continue, // idle tick, nothing overdue yet
                Ok(inner) => inner?,
            };
            let Some(frame) = frame else { break }; // clean EOF
            last_activity = Instant::now();
            if let Err(err) = self.dispatch(io, frame, observer).await {
                let is_connection_fatal = err.as_connection_outcome().is_some();
                self.handle_error(io, err).await?;
                if is_connection_fatal {
                    break;
                }
            }
        }
        self.flush(io).await.ok();
        Ok(())
    }

    async fn read_preface<S: AsyncRead + Unpin>(&mut self, io: &mut S) -> Result<bool, ProtocolError> {
        let mut buf = [0u8; 24];
        if io.read_exact(&mut buf).await.is_err() {
            return Ok(false);
        }
        Ok(&buf == CONNECTION_PREFACE)
    }

    async fn send_local_settings<S: AsyncWrite + Unpin>(&mut self, io: &mut S) -> Result<(), ProtocolError> {
        let params = vec![
            RawSetting { id: SettingsParameter::HeaderTableSize as u16, value: self.local_settings.header_table_size },
            RawSetting { id: SettingsParameter::EnablePush as u16, value: 0 },
            RawSetting { id: SettingsParameter::MaxConcurrentStreams as u16, value: self.local_settings.max_concurrent_streams },
            RawSetting { id: SettingsParameter::InitialWindowSize as u16, value: self.local_settings.initial_window_size },
            RawSetting { id: SettingsParameter::MaxFrameSize as u16, value: self.local_settings.max_frame_size },
            RawSetting { id: SettingsParameter::MaxHeaderListSize as u16, value: self.local_settings.max_header_list_size },
        ];
        self.writer.push(&Frame::Settings { ack: false, params });
        self.pending_settings_acks.push_back(Instant::now());
        self.flush(io).await.map_err(io_error)
    }

    /// Reads one frame: 9-byte header, then the typed payload. Returns
    /// `Ok(None)` on a clean EOF between frames.
    async fn read_frame<S: AsyncRead + Unpin>(&mut self, io: &mut S) -> Result<Option<Frame>, ProtocolError> {
        let mut header_buf = [0u8; FRAME_HEADER_LEN];
        match io.read_exact(&mut header_buf).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(io_error(e)),
        }
        let header = FrameHeader::parse(&header_buf)?;
        if header.length > self.local_settings.max_frame_size {
            return Err(ProtocolError::connection(ErrorCode::FrameSizeError, "frame exceeds advertised MAX_FRAME_SIZE"));
        }
        let mut payload = self.buffer_pool.acquire(header.length as usize);
        io.read_exact(&mut payload).await.map_err(io_error)?;
        self.metrics.record_frame_received(u64::from(FRAME_HEADER_LEN as u32 + header.length));
        let frame = Frame::parse_payload(&header, payload.freeze())?;
        Ok(Some(frame))
    }

    async fn flush<S: AsyncWrite + Unpin>(&mut self, io: &mut S) -> std::io::Result<()> {
        if self.writer.is_empty() {
            return Ok(());
        }
        self.writer.flush(io).await
    }

    fn write_frame(&mut self, frame: &Frame) {
        // `push` reports the exact header+payload length it queued, so DATA's
        // zero-copy path (`split_for_write`) is never re-serialised just to
        // measure it for metrics.
        let len = self.writer.push(frame);
        self.metrics.record_frame_sent(len as u64);
    }

    // ---- dispatch -------------------------------------------------------

    async fn dispatch<S: AsyncWrite + Unpin, O: Observer>(
        &mut self,
        io: &mut S,
        frame: Frame,
        observer: &mut O,
    ) -> Result<(), ProtocolError> {
        let now = Instant::now();

        if let Some(acc) = &self.continuation_accumulator {
            let ok = matches!(&frame, Frame::Continuation { stream_id, .. } if *stream_id == acc.stream_id);
            if !ok {
                return Err(ProtocolError::connection(ErrorCode::ProtocolError, "expected CONTINUATION for in-flight header block"));
            }
        }

        match frame {
            Frame::Settings { ack, params } => self.on_settings(io, ack, params, observer, now).await?,
            Frame::Ping { ack, opaque } => self.on_ping(io, ack, opaque).await?,
            Frame::GoAway { last_stream_id, error_code, .. } => {
                self.goaway_received = true;
                debug!("received GOAWAY last_stream_id={last_stream_id} code={error_code:?}");
            }
            Frame::WindowUpdate { stream_id, increment } => self.on_window_update(stream_id, increment, observer)?,
            Frame::Priority { stream_id, .. } => {
                if !self.rate_limiters.check(RateLimitKind::Priority, now) {
                    self.metrics.rate_limit_rejections += 1;
                    return Err(ProtocolError::connection(ErrorCode::EnhanceYourCalm, "PRIORITY rate exceeded"));
                }
                // Parsed, validated, then ignored (Non-goal: priority scheduling);
                // it still must advance highest_peer_stream_id (spec §9(a)).
                if is_peer_initiated(stream_id) {
                    self.highest_peer_stream_id = self.highest_peer_stream_id.max(stream_id);
                }
            }
            Frame::ResetStream { stream_id, error_code } => self.on_reset_stream(stream_id, error_code, now, observer)?,
            Frame::Headers { stream_id, end_stream, end_headers, header_block } => {
                self.on_headers_frame(stream_id, end_stream, end_headers, header_block, now, observer)?;
            }
            Frame::Continuation { stream_id, end_headers, header_block } => {
                self.on_continuation(stream_id, end_headers, header_block, observer)?;
            }
            Frame::Data { stream_id, end_stream, data } => self.on_data(stream_id, end_stream, data, now, observer)?,
            Frame::PushPromise { stream_id, .. } => {
                return Err(ProtocolError::stream(stream_id, ErrorCode::RefusedStream, "server push is disabled"));
            }
            Frame::Unknown { raw_type, stream_id } => {
                trace!("discarding unknown frame type {raw_type} on stream {stream_id}");
            }
        }

        self.flush(io).await.map_err(io_error)
    }

    async fn on_settings<S: AsyncWrite + Unpin, O: Observer>(
        &mut self,
        io: &mut S,
        ack: bool,
        params: Vec<RawSetting>,
        observer: &mut O,
        now: Instant,
    ) -> Result<(), ProtocolError> {
        if !self.rate_limiters.check(RateLimitKind::Settings, now) {
            self.metrics.rate_limit_rejections += 1;
            return Err(ProtocolError::connection(ErrorCode::EnhanceYourCalm, "SETTINGS rate exceeded"));
        }
        if ack {
            self.pending_settings_acks.pop_front();
            self.metrics.settings_acked += 1;
            for (param, pending) in self.pending_local_settings.iter_mut() {
                if let Some(value) = pending.take() {
                    self.local_settings.apply(param, value);
                }
            }
            return Ok(());
        }

        let old_initial_window = self.applied_settings.initial_window_size;
        for RawSetting { id, value } in params {
            let Some(param) = SettingsParameter::from_u16(id) else { continue };
            match param {
                SettingsParameter::EnablePush if value > 1 => {
                    return Err(ProtocolError::connection(ErrorCode::ProtocolError, "ENABLE_PUSH must be 0 or 1"));
                }
                SettingsParameter::InitialWindowSize if value > flow_control::MAX_WINDOW as u32 => {
                    return Err(ProtocolError::connection(ErrorCode::FlowControlError, "INITIAL_WINDOW_SIZE out of range"));
                }
                SettingsParameter::MaxFrameSize if !(16_384..=16_777_215).contains(&value) => {
                    return Err(ProtocolError::connection(ErrorCode::ProtocolError, "MAX_FRAME_SIZE out of range"));
                }
                _ => {}
            }
            self.remote_settings.apply(param, value);
        }
        self.applied_settings = self.remote_settings;
        observer.on_settings(&self.remote_settings);

        let delta = i64::from(self.applied_settings.initial_window_size) - i64::from(old_initial_window);
        if delta != 0 {
            for mut entry in self.streams.iter_mut() {
                let stream = entry.value_mut();
                if matches!(stream.state(), StreamState::Open | StreamState::HalfClosedRemote) {
                    stream.send_window.apply_initial_window_delta(delta).map_err(|_| {
                        ProtocolError::connection(ErrorCode::FlowControlError, "INITIAL_WINDOW_SIZE update overflowed a stream window")
                    })?;
                }
            }
        }
        self.hpack_decoder.set_peer_table_size_limit(self.applied_settings.header_table_size as usize);

        self.writer.push(&Frame::Settings { ack: true, params: Vec::new() });
        self.flush(io).await.map_err(io_error)?;
        Ok(())
    }

    async fn on_ping<S: AsyncWrite + Unpin>(&mut self, io: &mut S, ack: bool, opaque: [u8; 8]) -> Result<(), ProtocolError> {
        self.metrics.pings_received += 1;
        if ack {
            if let Some(tx) = self.ping_waiters.remove(&opaque) {
                let _ = tx.send(());
            }
            self.rate_limiters.resolve_pending_ping(opaque);
            return Ok(());
        }
        if !self.rate_limiters.check(RateLimitKind::Ping, Instant::now()) {
            self.metrics.rate_limit_rejections += 1;
            return Err(ProtocolError::connection(ErrorCode::EnhanceYourCalm, "PING rate exceeded"));
        }
        self.writer.push(&Frame::Ping { ack: true, opaque });
        self.metrics.pings_sent += 1;
        self.flush(io).await.map_err(io_error)
    }

    fn on_window_update<O: Observer>(&mut self, stream_id: StreamId, increment: u32, observer: &mut O) -> Result<(), ProtocolError> {
        if stream_id == 0 {
            self.send_window.apply_window_update(increment).map_err(|_| {
                ProtocolError::connection(ErrorCode::FlowControlError, "connection send window overflow")
            })?;
        } else {
            match self.streams.get_mut(&stream_id) {
                Some(mut stream) => stream.send_window.apply_window_update(increment).map_err(|_| {
                    ProtocolError::stream(stream_id, ErrorCode::FlowControlError, "stream send window overflow")
                })?,
                None if self.is_forgotten_but_known(stream_id) => return Ok(()), // silently dropped
                None => return Err(ProtocolError::connection(ErrorCode::ProtocolError, "WINDOW_UPDATE for idle stream")),
            }
        }
        self.wake_eligible_stalled_streams(observer);
        Ok(())
    }

    /// Spec §4.5: a stream that stalled on `min(conn, stream)` send-window
    /// capacity was registered in `stalled_streams` by `send_frame`. Once a
    /// WINDOW_UPDATE (connection- or stream-scoped) reopens capacity, this
    /// re-checks every registered stream and tells the observer which ones
    /// became eligible again; still-stalled or since-closed streams are
    /// dropped from (or kept in) the set accordingly.
    fn wake_eligible_stalled_streams<O: Observer>(&mut self, observer: &mut O) {
        if self.stalled_streams.is_empty() || !self.send_window.can_send(1) {
            return;
        }
        let pending: Vec<StreamId> = std::mem::take(&mut self.stalled_streams).into_iter().collect();
        for stream_id in pending {
            let eligibility = self.streams.get(&stream_id).map(|s| (s.is_closed(), s.send_window.can_send(1)));
            match eligibility {
                Some((false, true)) => observer.on_capacity_available(stream_id),
                Some((false, false)) => {
                    self.stalled_streams.insert(stream_id); // still short on its own window
                }
                Some((true, _)) | None => {} // closed or gone; drop the stale registration
            }
        }
    }

    fn on_reset_stream<O: Observer>(
        &mut self,
        stream_id: StreamId,
        error_code: ErrorCode,
        now: Instant,
        observer: &mut O,
    ) -> Result<(), ProtocolError> {
        if !self.rate_limiters.check(RateLimitKind::RstStream, now) {
            self.metrics.rate_limit_rejections += 1;
            return Err(ProtocolError::connection(ErrorCode::EnhanceYourCalm, "RST_STREAM rate exceeded"));
        }
        let Some(mut stream) = self.streams.get_mut(&stream_id) else {
            return if self.is_forgotten_but_known(stream_id) {
                Ok(())
            } else {
                Err(ProtocolError::connection(ErrorCode::ProtocolError, "RST_STREAM for idle stream"))
            };
        };
        stream.apply_event(false, StreamEvent::RstStream, now)?;
        let created_at = stream.created_at();
        let never_produced = !stream.produced_data_to_handler;
        drop(stream);

        self.metrics.streams_reset += 1;
        if self.rapid_reset_tracker.record_stream_reset(now, created_at, never_produced) == RapidResetVerdict::Ban {
            self.metrics.rapid_resets_detected += 1;
            return Err(ProtocolError::connection(ErrorCode::EnhanceYourCalm, "rapid reset flood detected"));
        }
        observer.on_stream_closed(stream_id, Some(error_code));
        Ok(())
    }

    fn on_headers_frame<O: Observer>(
        &mut self,
        stream_id: StreamId,
        end_stream: bool,
        end_headers: bool,
        header_block: Bytes,
        now: Instant,
        observer: &mut O,
    ) -> Result<(), ProtocolError> {
        if !self.streams.contains_key(&stream_id) {
            if !is_peer_initiated(stream_id) || stream_id <= self.highest_peer_stream_id {
                return Err(ProtocolError::connection(ErrorCode::ProtocolError, "HEADERS stream id not strictly increasing"));
            }
            // The id is consumed whether or not the stream is ultimately
            // admitted, so ordering stays correct even for a refused stream.
            self.highest_peer_stream_id = stream_id;
            if self.rapid_reset_tracker.is_banned(now) {
                return Err(ProtocolError::connection(ErrorCode::EnhanceYourCalm, "connection banned for rapid-reset abuse"));
            }
            if self.rapid_reset_tracker.record_stream_created(now) == RapidResetVerdict::Ban {
                self.metrics.rapid_resets_detected += 1;
                return Err(ProtocolError::connection(ErrorCode::EnhanceYourCalm, "rapid reset flood detected"));
            }
            if self.metrics.streams_opened >= u64::from(self.config.max_total_streams) {
                return Err(ProtocolError::connection(ErrorCode::EnhanceYourCalm, "maximum total stream count exceeded"));
            }
            let open_count = self.streams.iter().filter(|e| !e.value().is_closed()).count() as u32;
            if open_count >= self.local_settings.max_concurrent_streams {
                return Err(ProtocolError::stream(stream_id, ErrorCode::RefusedStream, "MAX_CONCURRENT_STREAMS exceeded"));
            }
            self.metrics.streams_opened += 1;
            self.streams.insert(
                stream_id,
                Stream::new(stream_id, self.applied_settings.initial_window_size, self.local_settings.initial_window_size, now),
            );
        }

        if end_headers {
            self.finish_header_block(stream_id, header_block, end_stream, now, observer)
        } else {
            if self.continuation_accumulator.is_some() {
                return Err(ProtocolError::connection(ErrorCode::ProtocolError, "a header block is already in flight"));
            }
            let mut buf = BytesMut::with_capacity(header_block.len());
            buf.extend_from_slice(&header_block);
            self.continuation_accumulator = Some(ContinuationAccumulator { stream_id, header_block: buf, frame_count: 1, end_stream });
            Ok(())
        }
    }

    fn on_continuation<O: Observer>(
        &mut self,
        stream_id: StreamId,
        end_headers: bool,
        header_block: Bytes,
        observer: &mut O,
    ) -> Result<(), ProtocolError> {
        let acc = self
            .continuation_accumulator
            .as_mut()
            .filter(|a| a.stream_id == stream_id)
            .ok_or_else(|| ProtocolError::connection(ErrorCode::ProtocolError, "unexpected CONTINUATION"))?;

        acc.frame_count += 1;
        acc.header_block.extend_from_slice(&header_block);
        if acc.frame_count > self.config.max_continuation_frames || acc.header_block.len() > self.config.max_continuation_size {
            self.continuation_accumulator = None;
            return Err(ProtocolError::connection(ErrorCode::ProtocolError, "CONTINUATION flood defense tripped"));
        }

        if end_headers {
            let acc = self.continuation_accumulator.take().unwrap();
            self.finish_header_block(acc.stream_id, acc.header_block.freeze(), acc.end_stream, Instant::now(), observer)
        } else {
            Ok(())
        }
    }

    fn finish_header_block<O: Observer>(
        &mut self,
        stream_id: StreamId,
        header_block: Bytes,
        end_stream: bool,
        now: Instant,
        observer: &mut O,
    ) -> Result<(), ProtocolError> {
        let headers = self.hpack_decoder.decode(&header_block).map_err(|e| match e {
            crate::hpack::HpackError::InvalidName(name) => {
                ProtocolError::stream(stream_id, ErrorCode::ProtocolError, format!("invalid header name {name:?}"))
            }
            crate::hpack::HpackError::Decompression(msg) => ProtocolError::decompression(msg),
        })?;
        header_validator::validate_request(stream_id, &headers)?;

        let mut stream = self
            .streams
            .get_mut(&stream_id)
            .ok_or_else(|| ProtocolError::connection(ErrorCode::InternalError, "stream vanished mid header block"))?;

        let event = if end_stream { StreamEvent::HeadersEndStream } else { StreamEvent::Headers };
        stream.apply_event(false, event, now)?;
        if let Some(len) = header_validator::declared_content_length(&headers) {
            stream.set_declared_content_length(len);
        }
        if end_stream {
            stream.check_content_length_at_end_stream()?;
        }
        self.rapid_reset_tracker.record_stream_headered();
        drop(stream);

        observer.on_headers(stream_id, &headers, end_stream);
        if end_stream {
            observer.on_stream_closed(stream_id, None);
        }
        Ok(())
    }

    fn on_data<O: Observer>(
        &mut self,
        stream_id: StreamId,
        end_stream: bool,
        data: Bytes,
        now: Instant,
        observer: &mut O,
    ) -> Result<(), ProtocolError> {
        self.recv_window.consume(data.len() as u32).map_err(|_| {
            ProtocolError::connection(ErrorCode::FlowControlError, "connection recv window underflow")
        })?;

        let Some(mut stream) = self.streams.get_mut(&stream_id) else {
            // Unlike WINDOW_UPDATE/RST_STREAM, DATA on a forgotten stream is
            // never silently tolerated (spec §4.4).
            return Err(ProtocolError::stream(stream_id, ErrorCode::StreamClosed, "DATA for a stream that no longer exists"));
        };
        stream.recv_window.consume(data.len() as u32).map_err(|_| {
            ProtocolError::stream(stream_id, ErrorCode::FlowControlError, "stream recv window underflow")
        })?;
        stream.record_data_received(data.len() as u64)?;
        let event = if end_stream { StreamEvent::DataEndStream } else { StreamEvent::Data };
        stream.apply_event(false, event, now)?;
        if end_stream {
            stream.check_content_length_at_end_stream()?;
        }
        stream.produced_data_to_handler = true;
        let stream_recv_window = stream.recv_window.window();
        drop(stream);
        self.rapid_reset_tracker.record_stream_headered();
        self.replenish_recv_windows(stream_id, stream_recv_window, end_stream);

        observer.on_data(stream_id, &data, end_stream);
        if end_stream {
            observer.on_stream_closed(stream_id, None);
        }
        Ok(())
    }

    /// Consults the configured `FlowControlAdvisor` for both the connection
    /// and stream receive windows and enqueues any WINDOW_UPDATE the
    /// strategy recommends (spec §4.5/§9(b)).
    fn replenish_recv_windows(&mut self, stream_id: StreamId, stream_recv_window: i64, stream_ended: bool) {
        let conn_max = self.local_settings.initial_window_size;
        let conn_increment = self.flow_advisor.advise(self.recv_window.window(), conn_max, 0);
        if conn_increment > 0 && self.recv_window.apply_window_update(conn_increment).is_ok() {
            self.writer.push(&Frame::WindowUpdate { stream_id: 0, increment: conn_increment });
        }
        if stream_ended {
            return;
        }
        let stream_max = self.local_settings.initial_window_size;
        let stream_increment = self.flow_advisor.advise(stream_recv_window, stream_max, 0);
        if stream_increment > 0 {
            if let Some(mut stream) = self.streams.get_mut(&stream_id) {
                if stream.recv_window.apply_window_update(stream_increment).is_ok() {
                    self.writer.push(&Frame::WindowUpdate { stream_id, increment: stream_increment });
                }
            }
        }
    }

    /// A stream id below `highest_peer_stream_id` with no map entry was
    /// opened implicitly by a PRIORITY frame and then forgotten, or has
    /// already been fully processed; WINDOW_UPDATE/RST_STREAM on it are
    /// harmless no-ops (spec §4.4). DATA/HEADERS are not tolerated this way
    /// -- those get an explicit STREAM_CLOSED at their own call sites.
    fn is_forgotten_but_known(&self, stream_id: StreamId) -> bool {
        stream_id <= self.highest_peer_stream_id
    }

    // ---- error handling / GOAWAY -----------------------------------------

    async fn handle_error<S: AsyncWrite + Unpin>(&mut self, io: &mut S, err: ProtocolError) -> Result<(), ProtocolError> {
        if let Some((stream_id, code)) = err.as_stream_outcome() {
            warn!("stream {stream_id} error: {err}");
            self.writer.push(&Frame::ResetStream { stream_id, error_code: code });
            self.metrics.streams_reset += 1;
            self.flush(io).await.map_err(io_error)?;
            return Ok(());
        }
        if let Some((code, msg)) = err.as_connection_outcome() {
            warn!("connection error: {err}");
            self.send_goaway(io, code, msg.as_bytes()).await?;
        }
        Ok(())
    }

    async fn send_goaway<S: AsyncWrite + Unpin>(&mut self, io: &mut S, code: ErrorCode, debug: &[u8]) -> Result<(), ProtocolError> {
        if self.goaway_sent {
            return Ok(());
        }
        self.goaway_sent = true;
        self.writer.push(&Frame::GoAway {
            last_stream_id: self.highest_peer_stream_id,
            error_code: code,
            debug_data: Bytes::copy_from_slice(debug),
        });
        self.metrics.goaways_sent += 1;
        self.flush(io).await.map_err(io_error)
    }

    /// Graceful shutdown (spec §11 supplemented feature): announce NO_ERROR,
    /// stop admitting new streams, then wait for in-flight streams to close
    /// up to `deadline`.
    pub async fn shutdown<S: AsyncWrite + Unpin>(&mut self, io: &mut S, deadline: Duration) -> Result<(), ProtocolError> {
        self.send_goaway(io, ErrorCode::NoError, b"").await?;
        let start = Instant::now();
        while self.streams.iter().any(|e| !e.value().is_closed()) {
            if start.elapsed() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    // ---- outbound convenience (client-direction contract, spec §6) ------

    /// Allocates a new locally-initiated stream id (even, per RFC 9113
    /// §5.1.1). Present for API completeness; server push issuance itself is
    /// a spec Non-goal.
    pub fn create_stream(&mut self) -> StreamId {
        let id = self.next_local_stream_id;
        self.next_local_stream_id += 2;
        self.streams.insert(id, Stream::new(id, self.remote_settings.initial_window_size, self.local_settings.initial_window_size, Instant::now()));
        id
    }

    /// Queues a local SETTINGS change (e.g. shrinking HEADER_TABLE_SIZE
    /// mid-connection) and sends it immediately; the value is only applied
    /// to `local_settings` once the peer ACKs it, matching the teacher's
    /// "settings changes take effect on ACK, never eagerly" discipline.
    pub async fn update_local_setting<S: AsyncWrite + Unpin>(
        &mut self,
        io: &mut S,
        param: SettingsParameter,
        value: u32,
    ) -> Result<(), ProtocolError> {
        self.pending_local_settings[param] = Some(value);
        self.writer.push(&Frame::Settings { ack: false, params: vec![RawSetting { id: param as u16, value }] });
        self.pending_settings_acks.push_back(Instant::now());
        self.flush(io).await.map_err(io_error)
    }

    /// Low-level single-frame send: applies stream bookkeeping for HEADERS/
    /// DATA/RST_STREAM and enqueues the frame on the writer. Flushing is the
    /// caller's responsibility via `send_frames` or an explicit `flush`.
    pub fn send_frame(&mut self, frame: Frame) -> Result<(), ProtocolError> {
        let now = Instant::now();
        match &frame {
            Frame::Headers { stream_id, end_stream, .. } => {
                if let Some(mut stream) = self.streams.get_mut(stream_id) {
                    let event = if *end_stream { StreamEvent::HeadersEndStream } else { StreamEvent::Headers };
                    stream.apply_event(true, event, now)?;
                }
            }
            Frame::Data { stream_id, end_stream, data } => {
                let Some(mut stream) = self.streams.get_mut(stream_id) else {
                    return Err(ProtocolError::stream(*stream_id, ErrorCode::StreamClosed, "send on unknown stream"));
                };
                let n = data.len() as u32;
                if !self.send_window.can_send(n) || !stream.send_window.can_send(n) {
                    drop(stream);
                    self.metrics.flow_control_stalls += 1;
                    self.stalled_streams.insert(*stream_id);
                    return Err(ProtocolError::stream(*stream_id, ErrorCode::FlowControlError, "send window exhausted"));
                }
                self.send_window.consume(n).map_err(|_| ProtocolError::connection(ErrorCode::FlowControlError, "connection send window underflow"))?;
                stream.send_window.consume(n).map_err(|_| ProtocolError::stream(*stream_id, ErrorCode::FlowControlError, "stream send window underflow"))?;
                let event = if *end_stream { StreamEvent::DataEndStream } else { StreamEvent::Data };
                stream.apply_event(true, event, now)?;
            }
            Frame::ResetStream { stream_id, .. } => {
                if let Some(mut stream) = self.streams.get_mut(stream_id) {
                    stream.apply_event(true, StreamEvent::RstStream, now)?;
                }
                self.metrics.streams_reset += 1;
            }
            _ => {}
        }
        self.write_frame(&frame);
        Ok(())
    }

    pub fn send_frames(&mut self, frames: impl IntoIterator<Item = Frame>) -> Result<(), ProtocolError> {
        for frame in frames {
            self.send_frame(frame)?;
        }
        Ok(())
    }

    /// Encodes and sends a HEADERS block for `stream_id`, splitting into a
    /// HEADERS + CONTINUATION chain if the encoded block exceeds our peer's
    /// advertised MAX_FRAME_SIZE (spec §4.6 "Write side").
    pub fn send_headers<'a>(
        &mut self,
        stream_id: StreamId,
        headers: impl IntoIterator<Item = (&'a str, &'a str)>,
        end_stream: bool,
    ) -> Result<(), ProtocolError> {
        let block = self.hpack_encoder.encode(headers);
        let max = self.remote_settings.max_frame_size as usize;
        if block.len() <= max {
            self.send_frame(Frame::Headers { stream_id, end_stream, end_headers: true, header_block: block })?;
        } else {
            let mut chunks = block.chunks(max);
            let first = chunks.next().unwrap();
            self.send_frame(Frame::Headers {
                stream_id,
                end_stream,
                end_headers: false,
                header_block: Bytes::copy_from_slice(first),
            })?;
            let rest: Vec<_> = chunks.collect();
            for (i, chunk) in rest.iter().enumerate() {
                let is_last = i + 1 == rest.len();
                self.write_frame(&Frame::Continuation {
                    stream_id,
                    end_headers: is_last,
                    header_block: Bytes::copy_from_slice(chunk),
                });
            }
        }
        Ok(())
    }

    /// Originates a PING with the given opaque payload (health checks, RTT
    /// probes) and registers it in the flood-defense pending-ack queue (spec
    /// §4.6 "pending ping-ack queue <= 100, oldest evicted FIFO"), the same
    /// queue an inbound PING ACK drains via `resolve_pending_ping`. Returns a
    /// receiver that resolves once the peer's ACK for this opaque arrives
    /// (`on_ping` fulfils it); dropping the receiver is fine, the ACK is
    /// still accounted for in the flood defense either way.
    pub async fn send_ping<S: AsyncWrite + Unpin>(
        &mut self,
        io: &mut S,
        opaque: [u8; 8],
    ) -> Result<oneshot::Receiver<()>, ProtocolError> {
        let (tx, rx) = oneshot::channel();
        self.ping_waiters.insert(opaque, tx); // replaces (and drops) any stale waiter for a reused opaque
        self.rate_limiters.push_pending_ping(opaque);
        self.writer.push(&Frame::Ping { ack: false, opaque });
        self.metrics.pings_sent += 1;
        self.flush(io).await.map_err(io_error)?;
        Ok(rx)
    }

    /// Produces the `dump_state` snapshot named in spec §6: connection
    /// settings, every stream's id/state/windows, flow control, HPACK table
    /// sizes, and metrics.
    #[must_use]
    pub fn dump_state(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        let _ = writeln!(out, "connection: server={} goaway_sent={} goaway_received={}", self.is_server, self.goaway_sent, self.goaway_received);
        let _ = writeln!(out, "windows: send={} recv={}", self.send_window.window(), self.recv_window.window());
        let _ = writeln!(
            out,
            "settings: local={:?} remote={:?}",
            self.local_settings, self.remote_settings
        );
        let _ = writeln!(
            out,
            "hpack: encoder dyn_entries={} dyn_bytes={} | decoder dyn_entries={} dyn_bytes={}",
            self.hpack_encoder.dynamic_table_len(),
            self.hpack_encoder.dynamic_table_size_bytes(),
            self.hpack_decoder.dynamic_table_len(),
            self.hpack_decoder.dynamic_table_size_bytes()
        );
        let _ = writeln!(out, "streams ({}):", self.streams.len());
        for entry in self.streams.iter() {
            let s = entry.value();
            let _ = writeln!(
                out,
                "  {} state={:?} send_window={} recv_window={}",
                s.id,
                s.state(),
                s.send_window.window(),
                s.recv_window.window()
            );
        }
        self.metrics.dump(&mut out);
        out
    }
}

fn is_peer_initiated(stream_id: StreamId) -> bool {
    stream_id % 2 == 1
}

fn io_error(e: std::io::Error) -> ProtocolError {
    ProtocolError::connection(ErrorCode::InternalError, format!("I/O error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn frame_header(frame: &Frame) -> Bytes {
        frame.to_bytes()
    }

    #[tokio::test]
    async fn handshake_exchanges_settings_and_ack() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let mut conn = Connection::new(Config::default());

        let driver = tokio::spawn(async move {
            let mut observer = NullObserver;
            let _ = tokio::time::timeout(Duration::from_millis(200), conn.run(&mut server, &mut observer)).await;
            conn
        });

        client.write_all(CONNECTION_PREFACE).await.unwrap();
        // Empty client SETTINGS.
        client.write_all(&frame_header(&Frame::Settings { ack: false, params: Vec::new() })).await.unwrap();

        let mut buf = vec![0u8; 4096];
        let n = tokio::time::timeout(Duration::from_millis(200), client.read(&mut buf)).await.unwrap().unwrap();
        assert!(n >= FRAME_HEADER_LEN);

        drop(client);
        let _ = driver.await;
    }

    #[test]
    fn priority_on_unknown_stream_advances_highest_id() {
        let mut conn = Connection::new(Config::default());
        let now = Instant::now();
        let mut observer = NullObserver;
        conn.on_headers_frame(5, false, false, Bytes::new(), now, &mut observer).ok();
        // Simulate PRIORITY handling directly, as dispatch() would.
        conn.highest_peer_stream_id = conn.highest_peer_stream_id.max(5);
        assert_eq!(conn.highest_peer_stream_id(), 5);
        let err = conn.on_headers_frame(3, false, false, Bytes::new(), now, &mut observer).unwrap_err();
        assert!(err.as_connection_outcome().is_some());
    }

    #[test]
    fn max_concurrent_streams_refuses_the_overflow_stream() {
        let config = Config::builder().max_concurrent_streams(1).build();
        let mut conn = Connection::new(config);
        let now = Instant::now();
        let mut observer = NullObserver;
        conn.on_headers_frame(1, false, true, Bytes::new(), now, &mut observer).ok();
        let err = conn.on_headers_frame(3, false, true, Bytes::new(), now, &mut observer).unwrap_err();
        assert_eq!(err.as_stream_outcome(), Some((3, ErrorCode::RefusedStream)));
        // The refused id still counts for ordering purposes.
        assert_eq!(conn.highest_peer_stream_id(), 3);
    }

    #[tokio::test]
    async fn idle_timeout_sends_goaway_no_error() {
        let config = Config { timeouts: crate::config::Timeouts { idle: Duration::from_millis(30), ..Default::default() }, ..Config::default() };
        let (mut client, mut server) = tokio::io::duplex(4096);
        let mut conn = Connection::new(config);

        let driver = tokio::spawn(async move {
            let mut observer = NullObserver;
            let _ = tokio::time::timeout(Duration::from_secs(2), conn.run(&mut server, &mut observer)).await;
            conn
        });

        client.write_all(CONNECTION_PREFACE).await.unwrap();
        client.write_all(&frame_header(&Frame::Settings { ack: false, params: Vec::new() })).await.unwrap();

        // Accumulate everything the server writes (SETTINGS, ACK, then the
        // idle-timeout GOAWAY) and confirm a GOAWAY frame type shows up.
        let mut seen = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match tokio::time::timeout(Duration::from_millis(500), client.read(&mut buf)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => seen.extend_from_slice(&buf[..n]),
                Ok(Err(_)) => break,
            }
        }
        assert!(seen.windows(FRAME_HEADER_LEN).any(|w| w[3] == crate::types::FrameType::GoAway as u8));

        drop(client);
        let conn = driver.await.unwrap();
        assert!(conn.goaway_sent());
    }

    #[tokio::test]
    async fn send_ping_registers_pending_ack_and_resolves_on_peer_ack() {
        let mut conn = Connection::new(Config::default());
        let (mut io, _unused) = tokio::io::duplex(256);
        let opaque = [7u8; 8];

        let rx = conn.send_ping(&mut io, opaque).await.unwrap();
        // The flood-defense queue was actually populated by send_ping.
        assert!(conn.rate_limiters.resolve_pending_ping(opaque));
        conn.rate_limiters.push_pending_ping(opaque); // put it back, as it would be for a real in-flight ping

        conn.on_ping(&mut io, true, opaque).await.unwrap();
        assert!(rx.await.is_ok());
        // on_ping's ACK handling already drained the queue.
        assert!(!conn.rate_limiters.resolve_pending_ping(opaque));
    }

    #[test]
    fn stalled_stream_becomes_eligible_again_after_window_update() {
        let mut conn = Connection::new(Config::default());
        let mut observer = NullObserver;
        let now = Instant::now();
        conn.on_headers_frame(1, false, true, Bytes::new(), now, &mut observer).ok();

        // Shrink the stream's send window to zero, then try to send past it.
        conn.streams.get_mut(&1).unwrap().send_window.consume(65_535).unwrap();
        let err = conn.send_frame(Frame::Data { stream_id: 1, end_stream: false, data: Bytes::from_static(b"x") }).unwrap_err();
        assert_eq!(err.as_stream_outcome(), Some((1, ErrorCode::FlowControlError)));
        assert!(conn.stalled_streams.contains(&1));

        conn.on_window_update(1, 1024, &mut observer).unwrap();
        assert!(!conn.stalled_streams.contains(&1));
    }
}
