//! esplayer core - elementary-stream playback control.
//!
//! This crate mediates between a producer of encoded media packets (a
//! [`DataProvider`]) and a native platform player that consumes
//! pre-demuxed elementary-stream buffers (a [`NativePlayer`]). It owns the
//! playback state machine, per-stream transfer tasks, prebuffering, the
//! playback clock, and an ordered event subject.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`packet`]: Core data model (streams, packets, codec configs)
//! - [`storage`]: Per-stream packet FIFO with duration accounting
//! - [`buffer`]: Per-stream buffer-level accounting
//! - [`stream`]: Per-stream transfer tasks
//! - [`controller`]: Playback orchestration and the state machine
//! - [`player_controller`]: Glue routing provider events into the core
//! - [`connector`]: Subscription bus between provider and controller
//! - [`events`]: Ordered event subject and single-threaded dispatch
//! - [`native`]: Trait seam for the opaque platform player
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! External collaborators plug in through trait objects:
//!
//! - [`NativePlayer`](native::NativePlayer) / [`NativePlayerFactory`](native::NativePlayerFactory):
//!   the platform decode pipeline, replaced wholesale on destructive
//!   reconfiguration
//! - [`DataProvider`](provider::DataProvider): the demuxer side
//! - [`Player`](player::Player) / [`PlayerClient`](player::PlayerClient):
//!   the outward playback surface and the provider-side seek hook

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod config;
pub mod connector;
pub mod controller;
pub mod error;
pub mod events;
pub mod native;
pub mod packet;
pub mod player;
pub mod player_controller;
pub mod provider;
pub mod storage;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types at the crate root
pub use buffer::StreamBuffer;
pub use config::ControllerConfig;
pub use connector::DataProviderConnector;
pub use controller::StreamController;
pub use error::{NativeError, PlayerError, PlayerResult};
pub use events::{EventScheduler, PlayerEvent};
pub use player::{Player, PlayerClient};
pub use player_controller::PlayerController;
pub use provider::{DataProvider, ProviderEvent};
pub use storage::PacketStorage;

// Re-export the data model
pub use packet::{
    AudioStreamConfig, DataRequest, DrmDescription, DrmInitData, DrmSessionHandle, Packet,
    PacketPayload, PlayerState, StreamConfig, StreamKind, VideoStreamConfig,
};

// Re-export the native player seam
pub use native::{
    BufferStatus, DisplayHandle, NativeEvent, NativePlayer, NativePlayerFactory,
    NativePlayerState, StreamReadyCallback, SubmitStatus,
};

// Re-export stream transfer types
pub use stream::{ConfigOutcome, EsStream, EsStreamState, SeekOutcome, StreamSignal};
