//! Every knob named in spec §6 "Recognised configuration options", plus the
//! flood/rate defaults of §4.6 and the buffer-pool sizes of §4.7, collected
//! into one plain data struct. No env/file parsing lives here -- that is the
//! excluded CLI/config-loading collaborator (spec §1); callers build a
//! `Config` however they like and hand it to `Connection::new`.

use std::time::Duration;

/// The four adaptive WINDOW_UPDATE strategies named in spec §4.5 / §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControlStrategy {
    Conservative,
    Moderate,
    Aggressive,
    Dynamic,
}

impl Default for FlowControlStrategy {
    fn default() -> Self {
        FlowControlStrategy::Conservative
    }
}

/// Per-second inbound budgets for the flood defenses of spec §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub ping_per_sec: u32,
    pub settings_per_sec: u32,
    pub rst_stream_per_sec: u32,
    pub priority_per_sec: u32,
    pub max_pending_ping_acks: usize,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            ping_per_sec: 10,
            settings_per_sec: 5,
            rst_stream_per_sec: 100,
            priority_per_sec: 100,
            max_pending_ping_acks: 100,
        }
    }
}

/// Rapid-reset defense (CVE-2023-44487) budgets, spec §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RapidResetLimits {
    pub max_stream_creations_per_sec: u32,
    pub max_rapid_resets_per_minute: u32,
    pub max_pending_unheadered_streams: usize,
    pub rapid_reset_threshold: Duration,
    pub ban_duration: Duration,
}

impl Default for RapidResetLimits {
    fn default() -> Self {
        Self {
            max_stream_creations_per_sec: 100,
            max_rapid_resets_per_minute: 50,
            max_pending_unheadered_streams: 1000,
            rapid_reset_threshold: Duration::from_millis(100),
            ban_duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolConfig {
    pub max_pool_size: usize,
    pub max_buffer_size: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 64,
            max_buffer_size: 1 << 20, // 1 MiB
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub idle: Duration,
    pub handshake: Duration,
    pub h2c_upgrade: Duration,
    pub settings_ack: Duration,
    pub handler: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(300),
            handshake: Duration::from_secs(10),
            h2c_upgrade: Duration::from_secs(5),
            settings_ack: Duration::from_secs(10),
            handler: Duration::from_secs(60),
        }
    }
}

/// The single piece of state threaded into `Connection::new` (spec §10.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub header_table_size: u32,
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
    pub enable_h2c: bool,
    pub flow_control_strategy: FlowControlStrategy,
    pub rate_limits: RateLimits,
    pub rapid_reset: RapidResetLimits,
    pub buffer_pool: BufferPoolConfig,
    pub timeouts: Timeouts,
    pub max_continuation_size: usize,
    pub max_continuation_frames: usize,
    pub max_total_streams: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            max_concurrent_streams: 100,
            initial_window_size: 65_535,
            max_frame_size: 16_384,
            max_header_list_size: 8192,
            enable_h2c: false,
            flow_control_strategy: FlowControlStrategy::default(),
            rate_limits: RateLimits::default(),
            rapid_reset: RapidResetLimits::default(),
            buffer_pool: BufferPoolConfig::default(),
            timeouts: Timeouts::default(),
            max_continuation_size: 1 << 20,
            max_continuation_frames: 100,
            max_total_streams: 1 << 31,
        }
    }
}

impl Config {
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder(Config::default())
    }
}

/// Builder-style construction, matching the teacher's general preference for
/// small fluent setters over a struct literal with every field spelled out.
#[derive(Debug, Clone, Copy)]
pub struct ConfigBuilder(Config);

impl ConfigBuilder {
    #[must_use]
    pub fn header_table_size(mut self, v: u32) -> Self {
        self.0.header_table_size = v;
        self
    }

    #[must_use]
    pub fn max_concurrent_streams(mut self, v: u32) -> Self {
        self.0.max_concurrent_streams = v;
        self
    }

    #[must_use]
    pub fn initial_window_size(mut self, v: u32) -> Self {
        self.0.initial_window_size = v;
        self
    }

    #[must_use]
    pub fn max_frame_size(mut self, v: u32) -> Self {
        self.0.max_frame_size = v;
        self
    }

    #[must_use]
    pub fn max_header_list_size(mut self, v: u32) -> Self {
        self.0.max_header_list_size = v;
        self
    }

    #[must_use]
    pub fn enable_h2c(mut self, v: bool) -> Self {
        self.0.enable_h2c = v;
        self
    }

    #[must_use]
    pub fn flow_control_strategy(mut self, v: FlowControlStrategy) -> Self {
        self.0.flow_control_strategy = v;
        self
    }

    #[must_use]
    pub fn build(self) -> Config {
        self.0
    }
}
