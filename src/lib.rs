#![warn(future_incompatible, nonstandard_style, rust_2018_idioms, unused)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::similar_names,
    clippy::cast_possible_truncation, // TODO
    clippy::too_many_lines, // TODO
)]

//! A server-side HTTP/2 (RFC 9113) protocol engine: frame codec, HPACK
//! (RFC 7541), stream state machine, flow control, and the flood/abuse
//! defenses called for by CVE-2023-44487 (rapid reset), HPACK bombs and
//! CONTINUATION floods. This crate speaks frames and header lists; it has
//! no opinion on request routing or application semantics -- callers drive
//! a [`Connection`] over any `AsyncRead + AsyncWrite` transport and receive
//! events through an [`Observer`] impl of their own.

mod buffer_pool;
mod config;
mod connection;
mod error;
mod flags;
mod flow_control;
mod frame;
mod header_validator;
mod hpack;
mod metrics;
mod security;
mod stream;
mod types;
mod writer;

pub use bytes::Bytes;
pub use config::{BufferPoolConfig, Config, ConfigBuilder, FlowControlStrategy, RateLimits, RapidResetLimits, Timeouts};
pub use connection::{Connection, NullObserver, Observer, CONNECTION_PREFACE};
pub use error::ProtocolError;
pub use frame::{Frame, FrameHeader, RawSetting, FRAME_HEADER_LEN};
pub use hpack::{Decoder as HpackDecoder, Encoder as HpackEncoder, HpackError};
pub use metrics::Metrics;
pub use stream::{StreamEvent, StreamState};
pub use types::{ErrorCode, HeaderList, Settings, SettingsParameter, StreamId};
