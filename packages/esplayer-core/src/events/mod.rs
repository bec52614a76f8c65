//! Event system for host applications and the data-provider side.
//!
//! This module provides:
//! - [`PlayerEvent`], the ordered subject published by the controller
//! - [`EventScheduler`], the single-threaded dispatch context all
//!   observers are marshaled onto
//!
//! Delivery guarantees: events are observed in publication order, and
//! observer callbacks run on the scheduler's dispatcher task only, giving
//! them implicit mutual exclusion.

mod scheduler;

pub use scheduler::EventScheduler;

use std::time::Duration;

use serde::Serialize;

use crate::packet::{DataRequest, PlayerState};

/// Events published by the stream controller.
///
/// Host applications subscribe via the controller and see every variant in
/// the order it was produced on the event scheduler.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlayerEvent {
    /// Playback state machine transition.
    StateChanged {
        /// The new state; also cached for polling consumers.
        state: PlayerState,
    },
    /// Periodic position report from the clock generator.
    TimeUpdated {
        /// Current playing time read from the native player.
        position: Duration,
    },
    /// An external seek began. Published exactly once per seek call,
    /// strictly before the matching `SeekCompleted`.
    SeekStarted {
        /// Monotonic seek generation.
        #[serde(rename = "seekId")]
        seek_id: u64,
        /// Requested target position (already clamped).
        position: Duration,
    },
    /// An external seek finished (successfully, with an error, or through
    /// a destructive reconfiguration).
    SeekCompleted {
        /// Generation of the seek that finished.
        #[serde(rename = "seekId")]
        seek_id: u64,
    },
    /// Unrecoverable playback failure. Cancellation is never reported here.
    PlaybackError {
        /// Short human-readable tag ("Start Failed", "Seek Failed", ...).
        message: String,
    },
    /// Buffering started (`true`) or ended (`false`).
    BufferingStateChanged { buffering: bool },
    /// Coarse buffering progress for UI (0 when buffering begins,
    /// 100 when it ends).
    BufferingProgress { percent: u8 },
    /// Buffer-fill hint for the data-provider side.
    DataNeeded {
        /// Current per-stream request.
        request: DataRequest,
    },
    /// The native player reported global end of stream.
    EndOfStream,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::StreamKind;

    #[test]
    fn events_serialize_with_camel_case_tags() {
        let event = PlayerEvent::SeekStarted {
            seek_id: 2,
            position: Duration::from_secs(5),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "seekStarted");
        assert_eq!(json["seekId"], 2);
    }

    #[test]
    fn data_request_serializes_fields() {
        let event = PlayerEvent::DataNeeded {
            request: DataRequest {
                kind: StreamKind::Video,
                bytes_needed: 1024,
                duration_needed: Duration::from_secs(4),
                is_buffer_empty: false,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["request"]["kind"], "video");
        assert_eq!(json["request"]["bytesNeeded"], 1024);
    }
}
