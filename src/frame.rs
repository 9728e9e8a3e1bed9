//! Binary frame codec: the 9-byte common header plus the ten typed payloads
//! of RFC 9113 §6, modeled as a tagged sum per the common-header/typed-payload
//! split recommended for dispatch and metrics code.

use crate::error::ProtocolError;
use crate::flags::{
    ContinuationFlags, DataFlags, HeadersFlags, PingFlags, PushPromiseFlags, SettingsFlags,
};
use crate::types::{ErrorCode, FrameDecodeError, FrameType, StreamId};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_traits::{FromPrimitive, ToPrimitive};

pub const FRAME_HEADER_LEN: usize = 9;
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
pub const MAX_FRAME_SIZE_UPPER_BOUND: u32 = (1 << 24) - 1;

/// The common 9-byte frame header, decoded but not yet dispatched to a typed
/// payload. Lets dispatch/metrics code look at `typ`/`stream_id` without
/// matching on the full `Frame` sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub typ: Option<FrameType>,
    pub raw_type: u8,
    pub flags: u8,
    pub stream_id: StreamId,
}

impl FrameHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameDecodeError> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(FrameDecodeError::PayloadTooShort);
        }
        let length = u32::from(bytes[0]) << 16 | u32::from(bytes[1]) << 8 | u32::from(bytes[2]);
        let raw_type = bytes[3];
        let flags = bytes[4];
        let stream_id = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & (u32::MAX >> 1);
        Ok(Self {
            length,
            typ: FrameType::from_u8(raw_type),
            raw_type,
            flags,
            stream_id,
        })
    }

    pub fn write(&self, out: &mut BytesMut) {
        out.put_u8((self.length >> 16) as u8);
        out.put_u8((self.length >> 8) as u8);
        out.put_u8(self.length as u8);
        out.put_u8(self.raw_type);
        out.put_u8(self.flags);
        out.put_u32(self.stream_id & (u32::MAX >> 1));
    }
}

/// One (id, value) SETTINGS pair, in wire order. Order must be preserved so
/// duplicate ids apply sequentially (h2spec 6.5.3/1) -- this is why
/// `Frame::Settings` carries a `Vec`, not a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSetting {
    pub id: u16,
    pub value: u32,
}

/// The fully typed set of frames a server-side engine must understand, per
/// spec §3. PRIORITY is parsed and validated but its payload is not retained
/// beyond that (Non-goals: priority-based scheduling).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream_id: StreamId,
        end_stream: bool,
        data: Bytes,
    },
    Headers {
        stream_id: StreamId,
        end_stream: bool,
        end_headers: bool,
        header_block: Bytes,
    },
    Priority {
        stream_id: StreamId,
        exclusive: bool,
        dependency: StreamId,
        weight: u8,
    },
    ResetStream {
        stream_id: StreamId,
        error_code: ErrorCode,
    },
    Settings {
        ack: bool,
        params: Vec<RawSetting>,
    },
    PushPromise {
        stream_id: StreamId,
        end_headers: bool,
        promised_stream_id: StreamId,
        header_block: Bytes,
    },
    Ping {
        ack: bool,
        opaque: [u8; 8],
    },
    GoAway {
        last_stream_id: StreamId,
        error_code: ErrorCode,
        debug_data: Bytes,
    },
    WindowUpdate {
        stream_id: StreamId,
        increment: u32,
    },
    Continuation {
        stream_id: StreamId,
        end_headers: bool,
        header_block: Bytes,
    },
    /// An unknown frame type: read and discarded per RFC 9113 §4.1, but kept
    /// around so metrics/dump_state can note it was seen.
    Unknown {
        raw_type: u8,
        stream_id: StreamId,
    },
}

fn conn_err(code: ErrorCode, msg: &'static str) -> ProtocolError {
    ProtocolError::Connection(code, msg.into())
}

impl Frame {
    /// Parses the payload for a frame whose header has already been decoded
    /// and whose length has already been checked against MAX_FRAME_SIZE.
    pub fn parse_payload(header: &FrameHeader, payload: Bytes) -> Result<Frame, ProtocolError> {
        let Some(typ) = header.typ else {
            return Ok(Frame::Unknown {
                raw_type: header.raw_type,
                stream_id: header.stream_id,
            });
        };
        match typ {
            FrameType::Data => Self::parse_data(header, payload),
            FrameType::Headers => Self::parse_headers(header, payload),
            FrameType::Priority => Self::parse_priority(header, payload),
            FrameType::ResetStream => Self::parse_reset_stream(header, payload),
            FrameType::Settings => Self::parse_settings(header, payload),
            FrameType::PushPromise => Self::parse_push_promise(header, payload),
            FrameType::Ping => Self::parse_ping(header, payload),
            FrameType::GoAway => Self::parse_goaway(header, payload),
            FrameType::WindowUpdate => Self::parse_window_update(header, payload),
            FrameType::Continuation => Ok(Frame::Continuation {
                stream_id: header.stream_id,
                end_headers: ContinuationFlags::from_bits_truncate(header.flags)
                    .contains(ContinuationFlags::END_HEADERS),
                header_block: payload,
            }),
        }
    }

    /// Strips the PADDED-flag pad-length byte and trailing padding from a
    /// DATA/HEADERS/PUSH_PROMISE payload. A pad length that consumes the
    /// whole remaining payload is a single uniform "Invalid frame format"
    /// error so the PADDED probe can't be used as a size oracle.
    fn strip_padding(padded: bool, mut payload: Bytes) -> Result<Bytes, ProtocolError> {
        if !padded {
            return Ok(payload);
        }
        if payload.is_empty() {
            return Err(conn_err(ErrorCode::ProtocolError, "Invalid frame format"));
        }
        let pad_len = payload[0] as usize;
        payload.advance(1);
        if pad_len >= payload.len() {
            return Err(conn_err(ErrorCode::ProtocolError, "Invalid frame format"));
        }
        payload.truncate(payload.len() - pad_len);
        Ok(payload)
    }

    fn parse_data(header: &FrameHeader, payload: Bytes) -> Result<Frame, ProtocolError> {
        if header.stream_id == 0 {
            return Err(conn_err(ErrorCode::ProtocolError, "DATA on stream 0"));
        }
        let flags = DataFlags::from_bits_truncate(header.flags);
        let data = Self::strip_padding(flags.contains(DataFlags::PADDED), payload)?;
        Ok(Frame::Data {
            stream_id: header.stream_id,
            end_stream: flags.contains(DataFlags::END_STREAM),
            data,
        })
    }

    fn parse_headers(header: &FrameHeader, payload: Bytes) -> Result<Frame, ProtocolError> {
        if header.stream_id == 0 {
            return Err(conn_err(ErrorCode::ProtocolError, "HEADERS on stream 0"));
        }
        let flags = HeadersFlags::from_bits_truncate(header.flags);
        let mut rest = Self::strip_padding(flags.contains(HeadersFlags::PADDED), payload)?;
        if flags.contains(HeadersFlags::PRIORITY) {
            if rest.len() < 5 {
                return Err(conn_err(ErrorCode::ProtocolError, "Invalid frame format"));
            }
            // Dependency + exclusive bit + weight are parsed for compliance
            // and then discarded; priority-based scheduling is a Non-goal.
            rest.advance(5);
        }
        Ok(Frame::Headers {
            stream_id: header.stream_id,
            end_stream: flags.contains(HeadersFlags::END_STREAM),
            end_headers: flags.contains(HeadersFlags::END_HEADERS),
            header_block: rest,
        })
    }

    fn parse_priority(header: &FrameHeader, payload: Bytes) -> Result<Frame, ProtocolError> {
        if header.stream_id == 0 {
            return Err(conn_err(ErrorCode::ProtocolError, "PRIORITY on stream 0"));
        }
        if payload.len() != 5 {
            return Err(conn_err(ErrorCode::FrameSizeError, "PRIORITY must be 5 bytes"));
        }
        let raw = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        Ok(Frame::Priority {
            stream_id: header.stream_id,
            exclusive: raw & 0x8000_0000 != 0,
            dependency: raw & 0x7fff_ffff,
            weight: payload[4],
        })
    }

    fn parse_reset_stream(header: &FrameHeader, payload: Bytes) -> Result<Frame, ProtocolError> {
        if header.stream_id == 0 {
            return Err(conn_err(ErrorCode::ProtocolError, "RST_STREAM on stream 0"));
        }
        if payload.len() != 4 {
            return Err(conn_err(ErrorCode::FrameSizeError, "RST_STREAM must be 4 bytes"));
        }
        let code = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        Ok(Frame::ResetStream {
            stream_id: header.stream_id,
            error_code: ErrorCode::from_wire(code),
        })
    }

    fn parse_settings(header: &FrameHeader, payload: Bytes) -> Result<Frame, ProtocolError> {
        if header.stream_id != 0 {
            return Err(conn_err(ErrorCode::ProtocolError, "SETTINGS on non-zero stream"));
        }
        let ack = SettingsFlags::from_bits_truncate(header.flags).contains(SettingsFlags::ACK);
        if ack {
            if !payload.is_empty() {
                return Err(conn_err(ErrorCode::FrameSizeError, "SETTINGS ACK must be empty"));
            }
            return Ok(Frame::Settings { ack: true, params: Vec::new() });
        }
        if payload.len() % 6 != 0 {
            return Err(conn_err(
                ErrorCode::FrameSizeError,
                "SETTINGS length not a multiple of 6",
            ));
        }
        let params = payload
            .chunks(6)
            .map(|chunk| RawSetting {
                id: u16::from_be_bytes([chunk[0], chunk[1]]),
                value: u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]),
            })
            .collect();
        Ok(Frame::Settings { ack: false, params })
    }

    fn parse_push_promise(header: &FrameHeader, payload: Bytes) -> Result<Frame, ProtocolError> {
        if header.stream_id == 0 {
            return Err(conn_err(ErrorCode::ProtocolError, "PUSH_PROMISE on stream 0"));
        }
        let flags = PushPromiseFlags::from_bits_truncate(header.flags);
        let mut rest = Self::strip_padding(flags.contains(PushPromiseFlags::PADDED), payload)?;
        if rest.len() < 4 {
            return Err(conn_err(ErrorCode::ProtocolError, "Invalid frame format"));
        }
        let promised = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) & (u32::MAX >> 1);
        rest.advance(4);
        Ok(Frame::PushPromise {
            stream_id: header.stream_id,
            end_headers: flags.contains(PushPromiseFlags::END_HEADERS),
            promised_stream_id: promised,
            header_block: rest,
        })
    }

    fn parse_ping(header: &FrameHeader, payload: Bytes) -> Result<Frame, ProtocolError> {
        if header.stream_id != 0 {
            return Err(conn_err(ErrorCode::ProtocolError, "PING on non-zero stream"));
        }
        if payload.len() != 8 {
            return Err(conn_err(ErrorCode::FrameSizeError, "PING must be 8 bytes"));
        }
        let mut opaque = [0u8; 8];
        opaque.copy_from_slice(&payload);
        Ok(Frame::Ping {
            ack: PingFlags::from_bits_truncate(header.flags).contains(PingFlags::ACK),
            opaque,
        })
    }

    fn parse_goaway(header: &FrameHeader, payload: Bytes) -> Result<Frame, ProtocolError> {
        if header.stream_id != 0 {
            return Err(conn_err(ErrorCode::ProtocolError, "GOAWAY on non-zero stream"));
        }
        if payload.len() < 8 {
            return Err(conn_err(ErrorCode::FrameSizeError, "GOAWAY too short"));
        }
        let last = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & (u32::MAX >> 1);
        let code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        Ok(Frame::GoAway {
            last_stream_id: last,
            error_code: ErrorCode::from_wire(code),
            debug_data: payload.slice(8..),
        })
    }

    fn parse_window_update(header: &FrameHeader, payload: Bytes) -> Result<Frame, ProtocolError> {
        if payload.len() != 4 {
            return Err(conn_err(ErrorCode::FrameSizeError, "WINDOW_UPDATE must be 4 bytes"));
        }
        let increment = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & (u32::MAX >> 1);
        if increment == 0 {
            return if header.stream_id == 0 {
                Err(conn_err(ErrorCode::ProtocolError, "WINDOW_UPDATE increment 0"))
            } else {
                Err(ProtocolError::Stream(
                    header.stream_id,
                    ErrorCode::ProtocolError,
                    "WINDOW_UPDATE increment 0".into(),
                ))
            };
        }
        Ok(Frame::WindowUpdate {
            stream_id: header.stream_id,
            increment,
        })
    }

    /// Stream id this frame pertains to (0 for connection-scoped frames).
    pub fn stream_id(&self) -> StreamId {
        match self {
            Frame::Data { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::Priority { stream_id, .. }
            | Frame::ResetStream { stream_id, .. }
            | Frame::PushPromise { stream_id, .. }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Continuation { stream_id, .. }
            | Frame::Unknown { stream_id, .. } => *stream_id,
            Frame::Settings { .. } | Frame::Ping { .. } | Frame::GoAway { .. } => 0,
        }
    }

    pub fn frame_type(&self) -> Option<FrameType> {
        match self {
            Frame::Data { .. } => Some(FrameType::Data),
            Frame::Headers { .. } => Some(FrameType::Headers),
            Frame::Priority { .. } => Some(FrameType::Priority),
            Frame::ResetStream { .. } => Some(FrameType::ResetStream),
            Frame::Settings { .. } => Some(FrameType::Settings),
            Frame::PushPromise { .. } => Some(FrameType::PushPromise),
            Frame::Ping { .. } => Some(FrameType::Ping),
            Frame::GoAway { .. } => Some(FrameType::GoAway),
            Frame::WindowUpdate { .. } => Some(FrameType::WindowUpdate),
            Frame::Continuation { .. } => Some(FrameType::Continuation),
            Frame::Unknown { .. } => None,
        }
    }

    /// Copying serialiser: returns the full frame (header + payload) as one
    /// contiguous buffer. Prefer `write_to` for DATA frames on the hot path.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(FRAME_HEADER_LEN + self.payload_len_hint());
        self.write_to(&mut out);
        out.freeze()
    }

    fn payload_len_hint(&self) -> usize {
        match self {
            Frame::Data { data, .. } => data.len(),
            Frame::Headers { header_block, .. } => header_block.len() + 5,
            Frame::Priority { .. } => 5,
            Frame::ResetStream { .. } => 4,
            Frame::Settings { params, .. } => params.len() * 6,
            Frame::PushPromise { header_block, .. } => header_block.len() + 4,
            Frame::Ping { .. } => 8,
            Frame::GoAway { debug_data, .. } => 8 + debug_data.len(),
            Frame::WindowUpdate { .. } => 4,
            Frame::Continuation { header_block, .. } => header_block.len(),
            Frame::Unknown { .. } => 0,
        }
    }

    /// Splits the frame into a header-only buffer and, for DATA frames, a
    /// zero-copy reference to the payload -- the fast path the multi-frame
    /// writer uses (spec §4.6 "Write side") so a large response body is
    /// never copied just to be written.
    pub fn split_for_write(&self) -> (Bytes, Option<Bytes>) {
        if let Frame::Data { stream_id, end_stream, data } = self {
            let mut flags = DataFlags::empty();
            if *end_stream {
                flags.insert(DataFlags::END_STREAM);
            }
            let mut header = BytesMut::with_capacity(FRAME_HEADER_LEN);
            FrameHeader {
                length: data.len() as u32,
                typ: Some(FrameType::Data),
                raw_type: FrameType::Data.to_u8().unwrap(),
                flags: flags.bits(),
                stream_id: *stream_id,
            }
            .write(&mut header);
            (header.freeze(), Some(data.clone()))
        } else {
            (self.to_bytes(), None)
        }
    }

    /// Zero-copy serialiser: writes the header and payload directly into
    /// `out`, extending from the already-owned `Bytes` payload rather than
    /// allocating an intermediate copy.
    pub fn write_to(&self, out: &mut BytesMut) {
        match self {
            Frame::Data { stream_id, end_stream, data } => {
                let mut flags = DataFlags::empty();
                if *end_stream {
                    flags.insert(DataFlags::END_STREAM);
                }
                FrameHeader {
                    length: data.len() as u32,
                    typ: Some(FrameType::Data),
                    raw_type: FrameType::Data.to_u8().unwrap(),
                    flags: flags.bits(),
                    stream_id: *stream_id,
                }
                .write(out);
                out.extend_from_slice(data);
            }
            Frame::Headers { stream_id, end_stream, end_headers, header_block } => {
                let mut flags = HeadersFlags::empty();
                if *end_stream {
                    flags.insert(HeadersFlags::END_STREAM);
                }
                if *end_headers {
                    flags.insert(HeadersFlags::END_HEADERS);
                }
                FrameHeader {
                    length: header_block.len() as u32,
                    typ: Some(FrameType::Headers),
                    raw_type: FrameType::Headers.to_u8().unwrap(),
                    flags: flags.bits(),
                    stream_id: *stream_id,
                }
                .write(out);
                out.extend_from_slice(header_block);
            }
            Frame::Priority { stream_id, exclusive, dependency, weight } => {
                FrameHeader {
                    length: 5,
                    typ: Some(FrameType::Priority),
                    raw_type: FrameType::Priority.to_u8().unwrap(),
                    flags: 0,
                    stream_id: *stream_id,
                }
                .write(out);
                let mut raw = *dependency & 0x7fff_ffff;
                if *exclusive {
                    raw |= 0x8000_0000;
                }
                out.put_u32(raw);
                out.put_u8(*weight);
            }
            Frame::ResetStream { stream_id, error_code } => {
                FrameHeader {
                    length: 4,
                    typ: Some(FrameType::ResetStream),
                    raw_type: FrameType::ResetStream.to_u8().unwrap(),
                    flags: 0,
                    stream_id: *stream_id,
                }
                .write(out);
                out.put_u32(error_code.to_u32().unwrap());
            }
            Frame::Settings { ack, params } => {
                let flags = if *ack { SettingsFlags::ACK.bits() } else { 0 };
                let len = if *ack { 0 } else { params.len() * 6 };
                FrameHeader {
                    length: len as u32,
                    typ: Some(FrameType::Settings),
                    raw_type: FrameType::Settings.to_u8().unwrap(),
                    flags,
                    stream_id: 0,
                }
                .write(out);
                if !ack {
                    for p in params {
                        out.put_u16(p.id);
                        out.put_u32(p.value);
                    }
                }
            }
            Frame::PushPromise { stream_id, end_headers, promised_stream_id, header_block } => {
                let mut flags = PushPromiseFlags::empty();
                if *end_headers {
                    flags.insert(PushPromiseFlags::END_HEADERS);
                }
                FrameHeader {
                    length: (header_block.len() + 4) as u32,
                    typ: Some(FrameType::PushPromise),
                    raw_type: FrameType::PushPromise.to_u8().unwrap(),
                    flags: flags.bits(),
                    stream_id: *stream_id,
                }
                .write(out);
                out.put_u32(promised_stream_id & 0x7fff_ffff);
                out.extend_from_slice(header_block);
            }
            Frame::Ping { ack, opaque } => {
                let flags = if *ack { PingFlags::ACK.bits() } else { 0 };
                FrameHeader {
                    length: 8,
                    typ: Some(FrameType::Ping),
                    raw_type: FrameType::Ping.to_u8().unwrap(),
                    flags,
                    stream_id: 0,
                }
                .write(out);
                out.extend_from_slice(opaque);
            }
            Frame::GoAway { last_stream_id, error_code, debug_data } => {
                FrameHeader {
                    length: (8 + debug_data.len()) as u32,
                    typ: Some(FrameType::GoAway),
                    raw_type: FrameType::GoAway.to_u8().unwrap(),
                    flags: 0,
                    stream_id: 0,
                }
                .write(out);
                out.put_u32(last_stream_id & 0x7fff_ffff);
                out.put_u32(error_code.to_u32().unwrap());
                out.extend_from_slice(debug_data);
            }
            Frame::WindowUpdate { stream_id, increment } => {
                FrameHeader {
                    length: 4,
                    typ: Some(FrameType::WindowUpdate),
                    raw_type: FrameType::WindowUpdate.to_u8().unwrap(),
                    flags: 0,
                    stream_id: *stream_id,
                }
                .write(out);
                out.put_u32(increment & 0x7fff_ffff);
            }
            Frame::Continuation { stream_id, end_headers, header_block } => {
                let flags = if *end_headers { ContinuationFlags::END_HEADERS.bits() } else { 0 };
                FrameHeader {
                    length: header_block.len() as u32,
                    typ: Some(FrameType::Continuation),
                    raw_type: FrameType::Continuation.to_u8().unwrap(),
                    flags,
                    stream_id: *stream_id,
                }
                .write(out);
                out.extend_from_slice(header_block);
            }
            Frame::Unknown { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: Frame) {
        let bytes = frame.to_bytes();
        let header = FrameHeader::parse(&bytes[..FRAME_HEADER_LEN]).unwrap();
        let payload = Bytes::copy_from_slice(&bytes[FRAME_HEADER_LEN..]);
        let parsed = Frame::parse_payload(&header, payload).unwrap();
        assert_eq!(frame, parsed);
    }

    #[test]
    fn data_frame_roundtrip() {
        roundtrip(Frame::Data {
            stream_id: 1,
            end_stream: true,
            data: Bytes::from_static(b"hello"),
        });
    }

    #[test]
    fn headers_frame_roundtrip() {
        roundtrip(Frame::Headers {
            stream_id: 3,
            end_stream: false,
            end_headers: true,
            header_block: Bytes::from_static(b"\x82\x84"),
        });
    }

    #[test]
    fn settings_preserves_duplicate_order() {
        let frame = Frame::Settings {
            ack: false,
            params: vec![
                RawSetting { id: 4, value: 100 },
                RawSetting { id: 4, value: 1 },
            ],
        };
        let bytes = frame.to_bytes();
        let header = FrameHeader::parse(&bytes[..FRAME_HEADER_LEN]).unwrap();
        let payload = Bytes::copy_from_slice(&bytes[FRAME_HEADER_LEN..]);
        let Frame::Settings { params, .. } = Frame::parse_payload(&header, payload).unwrap() else {
            panic!("expected settings");
        };
        assert_eq!(params, vec![RawSetting { id: 4, value: 100 }, RawSetting { id: 4, value: 1 }]);
    }

    #[test]
    fn padded_data_pad_length_equal_to_remaining_is_rejected() {
        let mut payload = BytesMut::new();
        payload.put_u8(4); // pad_len == remaining len (0 data bytes left)
        let header = FrameHeader {
            length: payload.len() as u32,
            typ: Some(FrameType::Data),
            raw_type: 0,
            flags: DataFlags::PADDED.bits(),
            stream_id: 1,
        };
        let err = Frame::parse_payload(&header, payload.freeze()).unwrap_err();
        assert!(matches!(err, ProtocolError::Connection(ErrorCode::ProtocolError, _)));
    }

    #[test]
    fn window_update_zero_increment_stream_scoped() {
        let header = FrameHeader {
            length: 4,
            typ: Some(FrameType::WindowUpdate),
            raw_type: 0,
            flags: 0,
            stream_id: 5,
        };
        let payload = Bytes::from_static(&[0, 0, 0, 0]);
        let err = Frame::parse_payload(&header, payload).unwrap_err();
        assert!(matches!(err, ProtocolError::Stream(5, ErrorCode::ProtocolError, _)));
    }

    #[test]
    fn window_update_zero_increment_connection_scoped() {
        let header = FrameHeader {
            length: 4,
            typ: Some(FrameType::WindowUpdate),
            raw_type: 0,
            flags: 0,
            stream_id: 0,
        };
        let payload = Bytes::from_static(&[0, 0, 0, 0]);
        let err = Frame::parse_payload(&header, payload).unwrap_err();
        assert!(matches!(err, ProtocolError::Connection(ErrorCode::ProtocolError, _)));
    }

    #[test]
    fn settings_ack_with_body_is_frame_size_error() {
        let header = FrameHeader {
            length: 1,
            typ: Some(FrameType::Settings),
            raw_type: 0,
            flags: SettingsFlags::ACK.bits(),
            stream_id: 0,
        };
        let err = Frame::parse_payload(&header, Bytes::from_static(&[0])).unwrap_err();
        assert!(matches!(err, ProtocolError::Connection(ErrorCode::FrameSizeError, _)));
    }

    #[test]
    fn unknown_frame_type_is_discarded_without_error() {
        let header = FrameHeader {
            length: 3,
            typ: None,
            raw_type: 0xff,
            flags: 0,
            stream_id: 7,
        };
        let frame = Frame::parse_payload(&header, Bytes::from_static(b"abc")).unwrap();
        assert!(matches!(frame, Frame::Unknown { raw_type: 0xff, stream_id: 7 }));
    }
}
