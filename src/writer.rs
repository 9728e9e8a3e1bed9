//! The multi-frame writer (spec §4.7 / §4.6 "Write side"). Owns a scratch
//! buffer for small control frames and a list of `Bytes` chunks -- DATA
//! payloads are appended by reference (via `Frame::split_for_write`), so a
//! large response body is written with zero extra copies. `flush` collects
//! every chunk into one vectored write.

use crate::frame::Frame;
use bytes::{Buf, Bytes};
use std::io::{self, IoSlice};
use tokio::io::{AsyncWrite, AsyncWriteExt};

#[derive(Debug, Default)]
pub struct MultiFrameWriter {
    chunks: Vec<Bytes>,
    total_len: usize,
}

impl MultiFrameWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.total_len
    }

    /// Appends one frame. DATA frames contribute two chunks (header,
    /// payload) with the payload shared by reference; everything else is
    /// serialised into a single chunk. Returns the exact wire length pushed
    /// (header + payload), computed from the same `split_for_write` call the
    /// chunks come from, so a caller that wants to record it (e.g. metrics)
    /// never needs to serialise the frame a second time just to measure it.
    pub fn push(&mut self, frame: &Frame) -> usize {
        let (header, payload) = frame.split_for_write();
        let mut len = header.len();
        self.total_len += header.len();
        self.chunks.push(header);
        if let Some(payload) = payload {
            len += payload.len();
            self.total_len += payload.len();
            self.chunks.push(payload);
        }
        len
    }

    pub fn push_many<'a>(&mut self, frames: impl IntoIterator<Item = &'a Frame>) {
        for frame in frames {
            self.push(frame);
        }
    }

    /// Orders pending chunks by a caller-supplied per-frame priority before
    /// the next flush. `key` is evaluated once per chunk (DATA's header and
    /// payload chunk are never split across frames, so sorting the raw
    /// `Bytes` list is safe as long as `key` is stable per logical frame --
    /// callers that prioritize should push higher-priority frames as a
    /// single `push` call each and call this before `flush`).
    pub fn prioritize_by(&mut self, mut key: impl FnMut(&Bytes) -> i64) {
        self.chunks.sort_by_key(|c| key(c));
    }

    /// Writes every pending chunk to `w` as one logical vectored write,
    /// looping to handle partial `write_vectored` completions, then clears
    /// the writer for reuse.
    pub async fn flush<W: AsyncWrite + Unpin>(&mut self, w: &mut W) -> io::Result<()> {
        while !self.chunks.is_empty() {
            let slices: Vec<IoSlice<'_>> = self.chunks.iter().map(|c| IoSlice::new(c)).collect();
            let mut written = w.write_vectored(&slices).await?;
            if written == 0 {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "failed to write frame data"));
            }
            while written > 0 {
                let front_len = self.chunks[0].len();
                if written < front_len {
                    self.chunks[0].advance(written);
                    written = 0;
                } else {
                    written -= front_len;
                    self.chunks.remove(0);
                }
            }
        }
        self.total_len = 0;
        w.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorCode;
    use bytes::Bytes as B;
    use tokio::io::AsyncReadExt;

    async fn flush_and_collect(writer: &mut MultiFrameWriter) -> Vec<u8> {
        let pending = writer.pending_bytes();
        let (mut client, mut server) = tokio::io::duplex(pending.max(64));
        writer.flush(&mut client).await.unwrap();
        drop(client);
        let mut out = Vec::new();
        server.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn flushes_multiple_frames_in_order() {
        let mut writer = MultiFrameWriter::new();
        writer.push(&Frame::Ping { ack: false, opaque: [1; 8] });
        writer.push(&Frame::Data { stream_id: 1, end_stream: true, data: B::from_static(b"hi") });
        let out = flush_and_collect(&mut writer).await;
        assert!(writer.is_empty());
        // PING frame header+payload (9+8) then DATA header+payload (9+2).
        assert_eq!(out.len(), 9 + 8 + 9 + 2);
        assert_eq!(&out[9..17], &[1u8; 8]);
        assert_eq!(&out[9 + 8 + 9..], b"hi");
    }

    #[tokio::test]
    async fn goaway_frame_round_trips_through_writer() {
        let mut writer = MultiFrameWriter::new();
        writer.push(&Frame::GoAway {
            last_stream_id: 3,
            error_code: ErrorCode::NoError,
            debug_data: B::new(),
        });
        let out = flush_and_collect(&mut writer).await;
        assert_eq!(out.len(), 9 + 8);
    }
}
