//! The flood/rate defenses of spec §4.6: per-connection token-bucket rate
//! limiters and the rapid-reset tracker for CVE-2023-44487. Every connection
//! owns its own instances (spec §9 "Global mutable state" note) and a
//! monotonic clock is required to resist wall-clock skew -- callers pass in
//! `Instant::now()` rather than this module reading the clock itself, which
//! keeps it independent of the runtime and trivially testable.

use crate::config::{RapidResetLimits, RateLimits};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A simple per-second token bucket: `budget` tokens are available, and the
/// bucket refills fully once a second has elapsed since `window_start`. This
/// matches the "default budgets per 1-second window" framing of spec §4.6
/// rather than a smoothed/leaky-bucket scheme -- simplicity the spec's
/// phrasing implies is sufficient.
#[derive(Debug, Clone)]
struct TokenBucket {
    budget: u32,
    capacity: u32,
    window_start: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, now: Instant) -> Self {
        Self { budget: capacity, capacity, window_start: now }
    }

    /// Returns `true` if the event is allowed (and consumes a token).
    fn try_consume(&mut self, now: Instant) -> bool {
        if now.duration_since(self.window_start) >= Duration::from_secs(1) {
            self.window_start = now;
            self.budget = self.capacity;
        }
        if self.budget == 0 {
            return false;
        }
        self.budget -= 1;
        true
    }
}

/// One bucket per inbound-frame flood vector named in spec §4.6.
#[derive(Debug, Clone)]
pub struct RateLimiters {
    ping: TokenBucket,
    settings: TokenBucket,
    rst_stream: TokenBucket,
    priority: TokenBucket,
    pending_ping_acks: VecDeque<[u8; 8]>,
    max_pending_ping_acks: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitKind {
    Ping,
    Settings,
    RstStream,
    Priority,
}

impl RateLimiters {
    #[must_use]
    pub fn new(limits: RateLimits, now: Instant) -> Self {
        Self {
            ping: TokenBucket::new(limits.ping_per_sec, now),
            settings: TokenBucket::new(limits.settings_per_sec, now),
            rst_stream: TokenBucket::new(limits.rst_stream_per_sec, now),
            priority: TokenBucket::new(limits.priority_per_sec, now),
            pending_ping_acks: VecDeque::new(),
            max_pending_ping_acks: limits.max_pending_ping_acks,
        }
    }

    #[must_use]
    pub fn check(&mut self, kind: RateLimitKind, now: Instant) -> bool {
        match kind {
            RateLimitKind::Ping => self.ping.try_consume(now),
            RateLimitKind::Settings => self.settings.try_consume(now),
            RateLimitKind::RstStream => self.rst_stream.try_consume(now),
            RateLimitKind::Priority => self.priority.try_consume(now),
        }
    }

    /// Registers an outbound PING awaiting its ACK; oldest is evicted FIFO
    /// once the queue grows past the configured cap (spec §4.6).
    pub fn push_pending_ping(&mut self, opaque: [u8; 8]) {
        if self.pending_ping_acks.len() >= self.max_pending_ping_acks {
            self.pending_ping_acks.pop_front();
        }
        self.pending_ping_acks.push_back(opaque);
    }

    pub fn resolve_pending_ping(&mut self, opaque: [u8; 8]) -> bool {
        if let Some(pos) = self.pending_ping_acks.iter().position(|o| *o == opaque) {
            self.pending_ping_acks.remove(pos);
            true
        } else {
            false
        }
    }
}

/// The CVE-2023-44487 defense: tracks recent stream creations and "rapid
/// resets" (a stream cancelled within `rapid_reset_threshold` of creation,
/// having never produced DATA to the handler).
#[derive(Debug, Clone)]
pub struct RapidResetTracker {
    limits: RapidResetLimits,
    stream_creations: VecDeque<Instant>,
    rapid_resets: VecDeque<Instant>,
    pending_unheadered: usize,
    banned_until: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RapidResetVerdict {
    Ok,
    Ban,
}

impl RapidResetTracker {
    #[must_use]
    pub fn new(limits: RapidResetLimits) -> Self {
        Self {
            limits,
            stream_creations: VecDeque::new(),
            rapid_resets: VecDeque::new(),
            pending_unheadered: 0,
            banned_until: None,
        }
    }

    #[must_use]
    pub fn is_banned(&self, now: Instant) -> bool {
        matches!(self.banned_until, Some(until) if now < until)
    }

    /// Call when a peer-initiated stream is created. Returns `Ban` if this
    /// push exceeds the creation-rate or pending-stream budgets.
    pub fn record_stream_created(&mut self, now: Instant) -> RapidResetVerdict {
        self.stream_creations.push_back(now);
        while let Some(&front) = self.stream_creations.front() {
            if now.duration_since(front) > Duration::from_secs(1) {
                self.stream_creations.pop_front();
            } else {
                break;
            }
        }
        self.pending_unheadered += 1;
        if self.stream_creations.len() as u32 > self.limits.max_stream_creations_per_sec
            || self.pending_unheadered > self.limits.max_pending_unheadered_streams
        {
            self.ban(now);
            return RapidResetVerdict::Ban;
        }
        RapidResetVerdict::Ok
    }

    /// Call once a stream has delivered at least one DATA frame (or
    /// completed normally) to the handler: it can no longer count as
    /// "rapid" if reset afterwards.
    pub fn record_stream_headered(&mut self) {
        self.pending_unheadered = self.pending_unheadered.saturating_sub(1);
    }

    /// Call when a stream is cancelled (RST_STREAM either direction).
    /// `created_at` / `never_produced_data` determine whether this counts
    /// as a rapid reset per spec's glossary definition.
    pub fn record_stream_reset(
        &mut self,
        now: Instant,
        created_at: Instant,
        never_produced_data: bool,
    ) -> RapidResetVerdict {
        if never_produced_data {
            self.pending_unheadered = self.pending_unheadered.saturating_sub(1);
        }
        if !never_produced_data || now.duration_since(created_at) > self.limits.rapid_reset_threshold {
            return RapidResetVerdict::Ok;
        }
        self.rapid_resets.push_back(now);
        while let Some(&front) = self.rapid_resets.front() {
            if now.duration_since(front) > Duration::from_secs(60) {
                self.rapid_resets.pop_front();
            } else {
                break;
            }
        }
        if self.rapid_resets.len() as u32 > self.limits.max_rapid_resets_per_minute {
            self.ban(now);
            return RapidResetVerdict::Ban;
        }
        RapidResetVerdict::Ok
    }

    fn ban(&mut self, now: Instant) {
        self.banned_until = Some(now + self.limits.ban_duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_bucket_refills_after_a_second() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(2, now);
        assert!(bucket.try_consume(now));
        assert!(bucket.try_consume(now));
        assert!(!bucket.try_consume(now));
        assert!(bucket.try_consume(now + Duration::from_secs(2)));
    }

    #[test]
    fn rapid_reset_flood_trips_ban() {
        let limits = RapidResetLimits { max_rapid_resets_per_minute: 2, ..RapidResetLimits::default() };
        let mut tracker = RapidResetTracker::new(limits);
        let t0 = Instant::now();
        for i in 0..3 {
            let created = t0 + Duration::from_millis(i * 10);
            let verdict = tracker.record_stream_reset(created + Duration::from_millis(1), created, true);
            if i == 2 {
                assert_eq!(verdict, RapidResetVerdict::Ban);
            }
        }
        assert!(tracker.is_banned(t0 + Duration::from_millis(50)));
    }

    #[test]
    fn slow_cancellation_does_not_count_as_rapid() {
        let mut tracker = RapidResetTracker::new(RapidResetLimits::default());
        let created = Instant::now();
        let verdict = tracker.record_stream_reset(created + Duration::from_secs(5), created, true);
        assert_eq!(verdict, RapidResetVerdict::Ok);
    }

    #[test]
    fn pending_ping_queue_evicts_oldest_fifo() {
        let mut limiters = RateLimiters::new(
            RateLimits { max_pending_ping_acks: 2, ..RateLimits::default() },
            Instant::now(),
        );
        limiters.push_pending_ping([1; 8]);
        limiters.push_pending_ping([2; 8]);
        limiters.push_pending_ping([3; 8]);
        assert!(!limiters.resolve_pending_ping([1; 8]));
        assert!(limiters.resolve_pending_ping([3; 8]));
    }
}
