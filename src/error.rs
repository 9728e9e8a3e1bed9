//! The two-level error outcome named in the design notes: protocol and
//! stream errors are values, not exceptions, and only bug-level conditions
//! (the `// unwrap:` comments scattered through the codec) are allowed to
//! panic.

use crate::types::{ErrorCode, FrameDecodeError, StreamId};
use std::borrow::Cow;

#[derive(thiserror::Error, Debug, Clone)]
pub enum ProtocolError {
    /// Local to one stream: the engine resets the stream and keeps the
    /// connection open.
    #[error("stream {0} error {1:?}: {2}")]
    Stream(StreamId, ErrorCode, Cow<'static, str>),

    /// Terminal for the whole connection: the engine emits GOAWAY and closes.
    #[error("connection error {0:?}: {1}")]
    Connection(ErrorCode, Cow<'static, str>),

    /// HPACK state is desynchronized; per RFC 7541 this always escalates to
    /// a connection error with COMPRESSION_ERROR.
    #[error("HPACK decompression error: {0}")]
    Decompression(Cow<'static, str>),
}

impl ProtocolError {
    pub fn stream(id: StreamId, code: ErrorCode, msg: impl Into<Cow<'static, str>>) -> Self {
        ProtocolError::Stream(id, code, msg.into())
    }

    pub fn connection(code: ErrorCode, msg: impl Into<Cow<'static, str>>) -> Self {
        ProtocolError::Connection(code, msg.into())
    }

    pub fn decompression(msg: impl Into<Cow<'static, str>>) -> Self {
        ProtocolError::Decompression(msg.into())
    }

    /// Collapses this error into the (error_code, debug_text) pair that
    /// actually crosses the wire: a Decompression error always escalates to
    /// a connection-level COMPRESSION_ERROR (spec §7).
    pub fn as_connection_outcome(&self) -> Option<(ErrorCode, Cow<'static, str>)> {
        match self {
            ProtocolError::Connection(code, msg) => Some((*code, msg.clone())),
            ProtocolError::Decompression(msg) => Some((ErrorCode::CompressionError, msg.clone())),
            ProtocolError::Stream(..) => None,
        }
    }

    pub fn as_stream_outcome(&self) -> Option<(StreamId, ErrorCode)> {
        match self {
            ProtocolError::Stream(id, code, _) => Some((*id, *code)),
            _ => None,
        }
    }
}

impl From<FrameDecodeError> for ProtocolError {
    fn from(err: FrameDecodeError) -> Self {
        match err {
            FrameDecodeError::FrameTooLarge(_) => {
                ProtocolError::connection(ErrorCode::FrameSizeError, err.to_string())
            }
            other => ProtocolError::connection(ErrorCode::ProtocolError, other.to_string()),
        }
    }
}
