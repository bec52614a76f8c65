//! Playback tuning constants and controller configuration.
//!
//! The constants are the design defaults for the stream controller; the
//! [`ControllerConfig`] struct carries the same values as runtime state so
//! hosts and tests can tighten or loosen them without recompiling.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Buffering
// ─────────────────────────────────────────────────────────────────────────────

/// Minimum stored duration per stream before the native player is prepared.
///
/// Prepare and Seek both hold the pipeline until every initialized stream
/// has at least this much encoded data queued.
pub const PRE_BUFFER_DURATION: Duration = Duration::from_secs(2);

/// Poll interval for the prebuffer wait loop.
pub const PREBUFFER_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Target buffer depth the accountant asks producers to maintain.
pub const TARGET_BUFFER_DEPTH: Duration = Duration::from_secs(10);

/// Buffered duration below which a stream is reported as empty.
pub const BUFFER_EMPTY_EPSILON: Duration = Duration::from_millis(100);

// ─────────────────────────────────────────────────────────────────────────────
// Cadences
// ─────────────────────────────────────────────────────────────────────────────

/// Interval between playing-time reads published on the event subject.
pub const CLOCK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Interval between buffer-level reports sent upstream while transferring.
pub const BUFFER_EVENT_INTERVAL: Duration = Duration::from_secs(1);

/// Consecutive playing-time read failures tolerated before the clock
/// generator declares playback failed and exits.
pub const CLOCK_MAX_READ_ERRORS: u32 = 3;

// ─────────────────────────────────────────────────────────────────────────────
// Channels
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of the player event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Configuration for the stream controller.
///
/// Groups the timing parameters that control prebuffering, the clock
/// generator, and upstream buffer reporting. Defaults mirror the module
/// constants; tests shrink them to keep paused-clock runs short.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ControllerConfig {
    /// Minimum stored duration per stream before PrepareAsync/SeekAsync.
    pub pre_buffer_duration: Duration,

    /// Poll interval for the prebuffer wait loop.
    pub prebuffer_poll_interval: Duration,

    /// Cadence of the clock generator.
    pub clock_poll_interval: Duration,

    /// Cadence of upstream `DataRequest` reports.
    pub buffer_event_interval: Duration,

    /// Buffer depth the per-stream accountant asks producers to maintain.
    pub target_buffer_depth: Duration,

    /// Capacity of the player event broadcast channel.
    pub event_channel_capacity: usize,
}

impl ControllerConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.pre_buffer_duration.is_zero() {
            return Err("pre_buffer_duration must be > 0".to_string());
        }
        if self.prebuffer_poll_interval.is_zero() {
            return Err("prebuffer_poll_interval must be > 0".to_string());
        }
        if self.clock_poll_interval.is_zero() {
            return Err("clock_poll_interval must be > 0".to_string());
        }
        if self.target_buffer_depth < self.pre_buffer_duration {
            return Err("target_buffer_depth must be >= pre_buffer_duration".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        Ok(())
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            pre_buffer_duration: PRE_BUFFER_DURATION,
            prebuffer_poll_interval: PREBUFFER_POLL_INTERVAL,
            clock_poll_interval: CLOCK_POLL_INTERVAL,
            buffer_event_interval: BUFFER_EVENT_INTERVAL,
            target_buffer_depth: TARGET_BUFFER_DEPTH,
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}
