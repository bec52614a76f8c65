//! Trait abstraction for the data-provider side.
//!
//! A provider demuxes some source (DASH, HLS, RTSP, local files) into
//! elementary-stream packets and codec configurations. The controller
//! never depends on a concrete provider; the connector wires the two
//! through this seam.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::PlayerResult;
use crate::packet::{
    DataRequest, DrmDescription, DrmInitData, Packet, PlayerState, StreamConfig,
};

/// Events published by a data provider.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// Total clip duration became known (or changed for live content).
    ClipDurationChanged(Duration),
    /// DRM initialization data was found in the container.
    DrmInitDataFound(DrmInitData),
    /// A license source was resolved; packets may now carry sessions.
    SetDrmConfiguration(DrmDescription),
    /// A stream's codec configuration is ready.
    StreamConfigReady(StreamConfig),
    /// An encoded packet is ready for playback.
    PacketReady(Packet),
    /// The provider hit an unrecoverable error.
    StreamError(String),
    /// The provider started (`true`) or finished (`false`) buffering.
    BufferingStateChanged(bool),
}

/// Trait for the packet producer feeding the controller.
///
/// The event stream carries media flowing downstream; the `on_*` sinks
/// carry playback feedback flowing upstream. Both directions are wired by
/// the connector and delivered on the event scheduler.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Subscribes to the provider's event stream.
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;

    /// Playback position feedback.
    fn on_time_updated(&self, position: Duration);

    /// Playback state feedback.
    fn on_state_changed(&self, state: PlayerState);

    /// Buffer-fill feedback; the provider should pace fetching to match.
    fn on_data_state_changed(&self, request: DataRequest);

    /// Player-side buffering feedback.
    fn on_buffering_state_changed(&self, buffering: bool);

    /// Repositions the producer.
    ///
    /// Completes once the producer acknowledged the new position; packets
    /// published afterwards belong to the new seek generation. Returns the
    /// actual position seeked to (e.g. snapped to a segment boundary).
    async fn seek(&self, position: Duration) -> PlayerResult<Duration>;
}
