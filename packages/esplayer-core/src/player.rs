//! Outward-facing player traits.
//!
//! [`Player`] is the surface the core exposes to glue code and hosts;
//! [`PlayerClient`] is the data-provider-side hook the core calls to
//! reposition the producer during a client-initiated seek.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::PlayerResult;
use crate::events::PlayerEvent;
use crate::packet::{Packet, StreamConfig};

/// Playback surface provided by the core.
///
/// Implemented by the stream controller; consumed by the glue layer and
/// host applications.
#[async_trait]
pub trait Player: Send + Sync {
    /// Starts or resumes playback. Legal when prepared or paused.
    fn play(&self) -> PlayerResult<()>;

    /// Pauses playback, retaining position.
    fn pause(&self) -> PlayerResult<()>;

    /// Stops playback. A no-op outside Playing/Paused.
    fn stop(&self) -> PlayerResult<()>;

    /// Repositions playback. Suspends until the pipeline settled at the
    /// new position; returns the position actually reached.
    async fn seek(&self, position: Duration) -> PlayerResult<Duration>;

    /// Pushes a codec configuration for one stream.
    fn set_stream_config(&self, config: StreamConfig) -> PlayerResult<()>;

    /// Appends one elementary-stream packet.
    fn append_packet(&self, packet: Packet) -> PlayerResult<()>;

    /// Announces the clip duration. Optional; implementations without a
    /// use for it may reject with `InvalidState`.
    fn set_duration(&self, duration: Duration) -> PlayerResult<()>;

    /// Subscribes to the ordered player event subject.
    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent>;

    /// The installed data-provider-side client, if any.
    fn client(&self) -> Option<Arc<dyn PlayerClient>>;

    /// Installs the data-provider-side client.
    fn set_client(&self, client: Arc<dyn PlayerClient>);
}

/// Data-provider-side seek hook.
///
/// While `seek` is in flight both subscription halves between the
/// provider and the player are suspended; observers see no cross-talk
/// from either side.
#[async_trait]
pub trait PlayerClient: Send + Sync {
    /// Repositions the producer and returns the position actually
    /// seeked to.
    async fn seek(&self, position: Duration, token: CancellationToken) -> PlayerResult<Duration>;
}
