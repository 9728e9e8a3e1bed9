//! Bucketed buffer reuse (spec §4.7). Buckets are keyed by power-of-two
//! sizes; `acquire` zeroes the requested prefix of a reused buffer so a
//! previous connection's bytes never leak into a new frame.
//!
//! `release` exists for callers that own a `BytesMut` outright once they're
//! done with it. `Connection::read_frame` isn't such a caller: its payload is
//! immediately frozen into the `Bytes` a `Frame` carries, and that `Bytes` is
//! handed to the application (or retained across CONTINUATION) rather than
//! dropped at a point this crate controls, so there's no safe moment to
//! reclaim it without copying. The pool still bounds peak allocation via
//! `max_buffer_size`; it's sized for a future writer-side or trailer-copy
//! caller rather than the inbound DATA/HEADERS path.

use bytes::BytesMut;
use std::sync::Mutex;

fn bucket_size(n: usize) -> usize {
    n.next_power_of_two().max(64)
}

#[derive(Debug)]
struct Buckets {
    by_size: std::collections::HashMap<usize, Vec<BytesMut>>,
}

/// Thread-safe: connections share one pool, so acquisition is mutex-guarded
/// rather than per-connection (spec §5 "Shared resources").
#[derive(Debug)]
pub struct BufferPool {
    buckets: Mutex<Buckets>,
    max_pool_size: usize,
    max_buffer_size: usize,
}

impl BufferPool {
    #[must_use]
    pub fn new(max_pool_size: usize, max_buffer_size: usize) -> Self {
        Self {
            buckets: Mutex::new(Buckets { by_size: std::collections::HashMap::new() }),
            max_pool_size,
            max_buffer_size,
        }
    }

    /// Returns a buffer of exactly `n` bytes, zeroed, backed by a bucket
    /// sized `>= n`. Requests above `max_buffer_size` bypass the pool
    /// entirely and allocate fresh.
    pub fn acquire(&self, n: usize) -> BytesMut {
        if n > self.max_buffer_size {
            let mut buf = BytesMut::with_capacity(n);
            buf.resize(n, 0);
            return buf;
        }
        let size = bucket_size(n);
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = buckets.by_size.entry(size).or_default();
        let mut buf = bucket.pop().unwrap_or_else(|| BytesMut::with_capacity(size));
        buf.resize(n, 0);
        buf
    }

    /// Returns a buffer to its bucket for reuse, unless that bucket is
    /// already at `max_pool_size` or the buffer is oversized.
    pub fn release(&self, mut buf: BytesMut) {
        let cap = buf.capacity();
        if cap == 0 || cap > self.max_buffer_size {
            return;
        }
        buf.clear();
        let size = bucket_size(cap);
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = buckets.by_size.entry(size).or_default();
        if bucket.len() < self.max_pool_size {
            bucket.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(64, 1 << 20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_zeroes_reused_buffer() {
        let pool = BufferPool::default();
        let mut buf = pool.acquire(16);
        buf.copy_from_slice(&[0xffu8; 16]);
        pool.release(buf);
        let reused = pool.acquire(16);
        assert_eq!(reused.as_ref(), &[0u8; 16]);
    }

    #[test]
    fn oversized_request_bypasses_the_pool() {
        let pool = BufferPool::new(4, 1024);
        let buf = pool.acquire(4096);
        assert_eq!(buf.len(), 4096);
        pool.release(buf);
        let buckets = pool.buckets.lock().unwrap();
        assert!(buckets.by_size.is_empty());
    }

    #[test]
    fn pool_cap_limits_retained_buffers() {
        let pool = BufferPool::new(1, 1024);
        pool.release(pool.acquire(32));
        pool.release(pool.acquire(32));
        let buckets = pool.buckets.lock().unwrap();
        assert_eq!(buckets.by_size.get(&64).map(Vec::len), Some(1));
    }
}
