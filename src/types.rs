use num_derive::{FromPrimitive, ToPrimitive};

pub type StreamId = u32;

/// A decoded header list as produced by the HPACK decoder: insertion order
/// preserved, duplicates kept (the header validator decides what to do with
/// them).
pub type HeaderList = Vec<(String, String)>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameDecodeError {
    #[error("Unknown frame type")]
    UnknownType,
    #[error("Payload is shorter than expected")]
    PayloadTooShort,
    #[error("Unexpected 0 stream ID")]
    ZeroStreamId,
    #[error("Unexpected 0 window increment")]
    ZeroWindowIncrement,
    #[error("Unknown error type: {0}")]
    UnknownErrorType(u32),
    #[error("Invalid frame format")]
    InvalidFormat,
    #[error("frame length {0} exceeds MAX_FRAME_SIZE")]
    FrameTooLarge(u32),
}

/// https://httpwg.org/specs/rfc7540.html#FrameTypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    ResetStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

/// https://httpwg.org/specs/rfc7540.html#ErrorCodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum ErrorCode {
    /// The associated condition is not a result of an error, e.g. a graceful GOAWAY.
    NoError = 0x0,
    /// An unspecific protocol error; used when a more specific error code is not available.
    ProtocolError = 0x1,
    /// The endpoint encountered an unexpected internal error.
    InternalError = 0x2,
    /// The endpoint detected that its peer violated the flow-control protocol.
    FlowControlError = 0x3,
    /// A SETTINGS frame was sent but no ACK was received in a timely manner.
    SettingsTimeout = 0x4,
    /// The endpoint received a frame after a stream was half-closed.
    StreamClosed = 0x5,
    /// The endpoint received a frame with an invalid size.
    FrameSizeError = 0x6,
    /// The endpoint refused the stream prior to performing any application processing.
    RefusedStream = 0x7,
    /// Used by the endpoint to indicate that the stream is no longer needed.
    Cancel = 0x8,
    /// The endpoint is unable to maintain the header compression context for the connection.
    CompressionError = 0x9,
    /// A CONNECT-established connection was reset or abnormally closed.
    ConnectError = 0xa,
    /// The endpoint's peer is exhibiting a behavior that might be generating excessive load.
    EnhanceYourCalm = 0xb,
    /// The underlying transport does not meet minimum security requirements.
    InadequateSecurity = 0xc,
    /// The endpoint requires that HTTP/1.1 be used instead of HTTP/2.
    Http11Required = 0xd,
}

impl ErrorCode {
    pub fn from_wire(value: u32) -> Self {
        num_traits::FromPrimitive::from_u32(value).unwrap_or(ErrorCode::InternalError)
    }
}

/// https://httpwg.org/specs/rfc7540.html#SettingValues
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive, enum_map::Enum,
)]
#[repr(u16)]
pub enum SettingsParameter {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
    MaxFrameSize = 0x5,
    MaxHeaderListSize = 0x6,
}

/// The connection-level view of a SETTINGS parameter set, as opposed to the
/// wire-level `(id, value)` list carried inside a `Frame::Settings`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: false,
            max_concurrent_streams: 100,
            initial_window_size: 65_535,
            max_frame_size: 16_384,
            max_header_list_size: 8192,
        }
    }
}

impl Settings {
    /// Applies one `(id, value)` pair from a received SETTINGS frame.
    /// Duplicate ids within a single frame apply sequentially: call this
    /// once per pair in wire order and the last call wins, matching
    /// h2spec 6.5.3/1.
    pub fn apply(&mut self, param: SettingsParameter, value: u32) {
        match param {
            SettingsParameter::HeaderTableSize => self.header_table_size = value,
            SettingsParameter::EnablePush => self.enable_push = value != 0,
            SettingsParameter::MaxConcurrentStreams => self.max_concurrent_streams = value,
            SettingsParameter::InitialWindowSize => self.initial_window_size = value,
            SettingsParameter::MaxFrameSize => self.max_frame_size = value,
            SettingsParameter::MaxHeaderListSize => self.max_header_list_size = value,
        }
    }
}
