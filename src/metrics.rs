//! Named in the data model (`Connection.metrics`, spec §3) and in the
//! `dump_state` contract (spec §6), but not otherwise typed by the spec.
//! Plain `u64` counters -- no external metrics-exporter dependency, since
//! none of the example crates wire one into an in-process protocol engine.

use std::fmt::Write as _;

#[derive(Debug, Default, Clone, Copy)]
pub struct Metrics {
    pub frames_received: u64,
    pub frames_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub streams_opened: u64,
    pub streams_reset: u64,
    pub rapid_resets_detected: u64,
    pub flow_control_stalls: u64,
    pub rate_limit_rejections: u64,
    pub settings_acked: u64,
    pub goaways_sent: u64,
    pub pings_sent: u64,
    pub pings_received: u64,
}

impl Metrics {
    pub fn record_frame_received(&mut self, bytes: u64) {
        self.frames_received += 1;
        self.bytes_received += bytes;
    }

    pub fn record_frame_sent(&mut self, bytes: u64) {
        self.frames_sent += 1;
        self.bytes_sent += bytes;
    }

    pub fn dump(&self, out: &mut String) {
        let _ = writeln!(out, "  frames: {} recv / {} sent", self.frames_received, self.frames_sent);
        let _ = writeln!(out, "  bytes: {} recv / {} sent", self.bytes_received, self.bytes_sent);
        let _ = writeln!(
            out,
            "  streams: {} opened / {} reset / {} rapid-reset",
            self.streams_opened, self.streams_reset, self.rapid_resets_detected
        );
        let _ = writeln!(out, "  flow-control stalls: {}", self.flow_control_stalls);
        let _ = writeln!(out, "  rate-limit rejections: {}", self.rate_limit_rejections);
        let _ = writeln!(
            out,
            "  settings acked: {}, goaways sent: {}, pings: {} sent / {} recv",
            self.settings_acked, self.goaways_sent, self.pings_sent, self.pings_received
        );
    }
}
