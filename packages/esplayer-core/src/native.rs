//! Trait abstractions for the native platform player.
//!
//! The controller treats the platform player as an opaque collaborator:
//! production bindings implement [`NativePlayer`], and [`NativePlayerFactory`]
//! lets the reconfigure pipeline replace the instance wholesale after a
//! destructive codec change. Tests provide scripted fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{NativeError, PlayerResult};
use crate::packet::{Packet, StreamConfig, StreamKind};

/// Lifecycle state reported by the native player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativePlayerState {
    /// Created but not prepared.
    Idle,
    /// Prepared; `start` is legal.
    Ready,
    /// Decoding and rendering.
    Playing,
    /// Suspended; `resume` is legal.
    Paused,
}

/// Per-stream decoder buffer level reported by the native player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    /// Decoder buffer ran dry; the transfer task should be woken.
    Underrun,
    /// Decoder buffer is full; submissions will report [`SubmitStatus::Full`].
    Overrun,
}

/// Asynchronous notifications from the native player.
#[derive(Debug, Clone)]
pub enum NativeEvent {
    /// All streams finished rendering. Global: the controller completes
    /// every stream when this arrives.
    EndOfStream,
    /// Unrecoverable platform failure.
    Error(String),
    /// Decoder buffer level crossed a threshold for one stream.
    BufferStatus {
        kind: StreamKind,
        status: BufferStatus,
    },
}

/// Outcome of submitting a packet to the native player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    /// Packet accepted.
    Accepted,
    /// Decoder buffer full; retry after a wakeup.
    Full,
}

/// Opaque handle to the display surface video is rendered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayHandle(pub u64);

/// Callback invoked by the native player, per stream, when it is ready to
/// accept data during prepare or seek.
///
/// May be called from any platform thread; callers marshal onto the event
/// scheduler before touching controller state.
pub type StreamReadyCallback = Arc<dyn Fn(StreamKind) + Send + Sync>;

/// Trait for the opaque native platform player.
///
/// Used by the controller for every playback operation. Methods are
/// synchronous where the platform API completes inline; `prepare` and
/// `seek` suspend until the platform reports completion.
#[async_trait]
pub trait NativePlayer: Send + Sync {
    /// Opens the underlying platform handle. Called once after creation.
    fn open(&self) -> Result<(), NativeError>;

    /// Enables the trust zone for protected content decode paths.
    fn set_trust_zone_use(&self, enabled: bool) -> Result<(), NativeError>;

    /// Binds the display surface video is rendered into.
    fn set_display(&self, display: DisplayHandle) -> Result<(), NativeError>;

    /// Returns the current lifecycle state.
    fn state(&self) -> NativePlayerState;

    /// Starts rendering. Legal in [`NativePlayerState::Ready`].
    fn start(&self) -> Result<(), NativeError>;

    /// Pauses rendering. Legal in [`NativePlayerState::Playing`].
    fn pause(&self) -> Result<(), NativeError>;

    /// Resumes rendering. Legal in [`NativePlayerState::Paused`].
    fn resume(&self) -> Result<(), NativeError>;

    /// Stops rendering and returns to [`NativePlayerState::Ready`].
    fn stop(&self) -> Result<(), NativeError>;

    /// Prepares the decode pipeline.
    ///
    /// `on_ready` is invoked once per configured stream when the platform
    /// is ready to accept that stream's data; preparation completes after
    /// every stream has delivered its initial buffers.
    async fn prepare(&self, on_ready: StreamReadyCallback) -> Result<(), NativeError>;

    /// Repositions the decode pipeline.
    ///
    /// `on_ready` is invoked per stream when the platform wants data at
    /// the new position.
    async fn seek(
        &self,
        position: Duration,
        on_ready: StreamReadyCallback,
    ) -> Result<(), NativeError>;

    /// Reads the current playback position.
    fn playing_time(&self) -> Result<Duration, NativeError>;

    /// Pushes a codec configuration for one stream.
    fn set_stream_config(&self, config: &StreamConfig) -> Result<(), NativeError>;

    /// Submits one encoded packet.
    ///
    /// Returns [`SubmitStatus::Full`] when the decoder buffer cannot accept
    /// more data; the caller parks until a buffer-status wakeup.
    async fn submit_packet(&self, packet: &Packet) -> Result<SubmitStatus, NativeError>;

    /// Submits an end-of-stream marker for one stream.
    fn submit_eos(&self, kind: StreamKind) -> Result<(), NativeError>;

    /// Subscribes to asynchronous player notifications.
    fn subscribe(&self) -> broadcast::Receiver<NativeEvent>;
}

/// Factory for native player instances.
///
/// The controller creates its first instance at construction and a
/// replacement during destructive reconfiguration.
pub trait NativePlayerFactory: Send + Sync {
    /// Creates a fresh, unopened native player.
    fn create(&self) -> PlayerResult<Arc<dyn NativePlayer>>;
}
