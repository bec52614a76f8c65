//! Per-stream buffer-level accounting.
//!
//! The accountant ingests packet PTS on enqueue/dequeue and turns the
//! difference into the [`DataRequest`] hint sent upstream, plus a coarse
//! "needs buffering" signal used for reporting.

use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{BUFFER_EMPTY_EPSILON, TARGET_BUFFER_DEPTH};
use crate::packet::{DataRequest, StreamConfig, StreamKind};

#[derive(Default)]
struct Accounting {
    /// PTS of the newest packet enqueued.
    last_in: Option<Duration>,
    /// PTS of the newest packet handed to the native player.
    last_out: Option<Duration>,
    /// Set once an EOS marker passed through; suppresses empty reports.
    eos_seen: bool,
    /// Average bitrate from the current codec configuration (bits/s).
    average_bitrate: u64,
    /// While set, the buffer reports itself full regardless of levels.
    report_full: bool,
}

impl Accounting {
    fn buffered(&self) -> Duration {
        match (self.last_in, self.last_out) {
            (Some(last_in), Some(last_out)) => last_in.saturating_sub(last_out),
            (Some(_), None) => Duration::ZERO,
            _ => Duration::ZERO,
        }
    }
}

/// Buffer-level accountant for one elementary stream.
pub struct StreamBuffer {
    kind: StreamKind,
    target_depth: Duration,
    inner: Mutex<Accounting>,
}

impl StreamBuffer {
    /// Creates an accountant with the given target depth.
    pub fn new(kind: StreamKind, target_depth: Duration) -> Self {
        Self {
            kind,
            target_depth,
            inner: Mutex::new(Accounting::default()),
        }
    }

    /// Creates an accountant with the default target depth.
    pub fn with_default_depth(kind: StreamKind) -> Self {
        Self::new(kind, TARGET_BUFFER_DEPTH)
    }

    /// Records a packet entering storage.
    pub fn data_in(&self, pts: Duration) {
        let mut inner = self.inner.lock();
        inner.last_in = Some(pts);
        if inner.last_out.is_none() {
            inner.last_out = Some(pts);
        }
    }

    /// Records a packet leaving for the native player.
    pub fn data_out(&self, pts: Duration) {
        self.inner.lock().last_out = Some(pts);
    }

    /// Records that the stream's EOS marker passed through; the buffer
    /// no longer reports empty.
    pub fn mark_eos_dts(&self) {
        self.inner.lock().eos_seen = true;
    }

    /// Pulls sizing inputs (average bitrate) from a codec configuration.
    pub fn update_buffer_configuration(&self, config: &StreamConfig) {
        self.inner.lock().average_bitrate = config.average_bitrate();
    }

    /// Clears all accounting. Called around seeks.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let average_bitrate = inner.average_bitrate;
        *inner = Accounting {
            average_bitrate,
            ..Accounting::default()
        };
    }

    /// Forces full-buffer reporting (no data needed) until
    /// `report_actual_buffer` is called.
    pub fn report_full_buffer(&self) {
        self.inner.lock().report_full = true;
    }

    /// Restores level-based reporting.
    pub fn report_actual_buffer(&self) {
        self.inner.lock().report_full = false;
    }

    /// Current buffered duration estimate.
    #[must_use]
    pub fn buffered_duration(&self) -> Duration {
        self.inner.lock().buffered()
    }

    /// Whether the buffer is effectively empty and an underrun is imminent.
    #[must_use]
    pub fn is_buffer_empty(&self) -> bool {
        let inner = self.inner.lock();
        !inner.eos_seen && inner.buffered() < BUFFER_EMPTY_EPSILON
    }

    /// Coarse signal: the stream is below its target depth and more data
    /// should be fetched.
    #[must_use]
    pub fn needs_more_data(&self) -> bool {
        let inner = self.inner.lock();
        !inner.report_full && !inner.eos_seen && inner.buffered() < self.target_depth
    }

    /// Builds the current buffer-fill hint for the provider side.
    #[must_use]
    pub fn data_request(&self) -> DataRequest {
        let inner = self.inner.lock();
        let buffered = inner.buffered();
        let duration_needed = if inner.report_full || inner.eos_seen {
            Duration::ZERO
        } else {
            self.target_depth.saturating_sub(buffered)
        };
        // bits = seconds * bitrate; bytes = bits / 8. Millisecond math
        // keeps this in integers.
        let bytes_needed = duration_needed.as_millis() as u64 * inner.average_bitrate / 8000;
        DataRequest {
            kind: self.kind,
            bytes_needed,
            duration_needed,
            is_buffer_empty: !inner.eos_seen && buffered < BUFFER_EMPTY_EPSILON,
        }
    }
}
