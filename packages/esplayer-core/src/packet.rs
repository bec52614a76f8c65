//! Core data model: stream kinds, packets, codec configurations, and the
//! buffer-fill hint sent upstream.
//!
//! The packet payload invariant (exactly one of data / config / end-of-stream)
//! is expressed as an enum so invalid packets are unrepresentable.

use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

/// Kind of an elementary stream handled by the controller.
///
/// The set of kinds is fixed when the controller is initialized; one
/// transfer pipeline exists per initialized kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Audio,
    Video,
}

impl StreamKind {
    /// Number of stream kinds the controller can host.
    pub const COUNT: usize = 2;

    /// All stream kinds, in index order.
    pub const ALL: [StreamKind; StreamKind::COUNT] = [StreamKind::Audio, StreamKind::Video];

    /// Returns the kind as a short string identifier (e.g., "audio").
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    /// Returns the slot index for per-kind storage arrays.
    #[must_use]
    pub(crate) const fn index(&self) -> usize {
        match self {
            Self::Audio => 0,
            Self::Video => 1,
        }
    }
}

/// Opaque handle to a DRM decryption session attached to encrypted packets.
///
/// Key management is a collaborator concern; the controller only carries
/// the handle from the provider side to the native player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrmSessionHandle(pub u64);

/// DRM initialization data discovered in the container or manifest.
#[derive(Debug, Clone)]
pub struct DrmInitData {
    /// Stream the init data belongs to.
    pub kind: StreamKind,
    /// Scheme identifier (e.g. a UUID string for CENC schemes).
    pub scheme: String,
    /// Raw initialization payload.
    pub init_data: Bytes,
}

/// DRM configuration announced by the provider once a license source is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrmDescription {
    /// Scheme identifier matching the init data.
    pub scheme: String,
    /// License server the session should be provisioned against.
    pub license_url: String,
}

/// Payload of a [`Packet`]. Exactly one of encoded data, a codec
/// configuration, or an end-of-stream marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketPayload {
    /// Encoded access unit.
    Data(Bytes),
    /// In-band codec configuration change.
    Config(StreamConfig),
    /// End of the elementary stream.
    Eos,
}

/// A single elementary-stream packet flowing from the provider to the
/// native player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Stream this packet belongs to.
    pub kind: StreamKind,
    /// Presentation timestamp.
    pub pts: Duration,
    /// Decode timestamp. Submission order to the native player is
    /// monotonic in DTS per stream.
    pub dts: Duration,
    /// Whether the access unit is a keyframe (sync sample).
    pub keyframe: bool,
    /// Seek generation in effect when the producer emitted the packet.
    /// Packets of a generation older than the current target are dropped
    /// by the transfer task.
    pub generation: u64,
    /// Decryption session for encrypted payloads.
    pub drm: Option<DrmSessionHandle>,
    /// The payload proper.
    pub payload: PacketPayload,
}

impl Packet {
    /// Creates a data packet carrying an encoded access unit.
    pub fn data(kind: StreamKind, pts: Duration, dts: Duration, data: Bytes) -> Self {
        Self {
            kind,
            pts,
            dts,
            keyframe: false,
            generation: 0,
            drm: None,
            payload: PacketPayload::Data(data),
        }
    }

    /// Creates an in-band configuration packet.
    pub fn config(kind: StreamKind, pts: Duration, config: StreamConfig) -> Self {
        Self {
            kind,
            pts,
            dts: pts,
            keyframe: false,
            generation: 0,
            drm: None,
            payload: PacketPayload::Config(config),
        }
    }

    /// Creates an end-of-stream marker packet.
    pub fn eos(kind: StreamKind) -> Self {
        Self {
            kind,
            pts: Duration::ZERO,
            dts: Duration::ZERO,
            keyframe: false,
            generation: 0,
            drm: None,
            payload: PacketPayload::Eos,
        }
    }

    /// Marks the packet as a keyframe.
    #[must_use]
    pub fn with_keyframe(mut self, keyframe: bool) -> Self {
        self.keyframe = keyframe;
        self
    }

    /// Stamps the seek generation the packet was produced under.
    #[must_use]
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Attaches a DRM session handle.
    #[must_use]
    pub fn with_drm(mut self, drm: DrmSessionHandle) -> Self {
        self.drm = Some(drm);
        self
    }

    /// Returns `true` for end-of-stream marker packets.
    #[must_use]
    pub fn is_eos(&self) -> bool {
        matches!(self.payload, PacketPayload::Eos)
    }

    /// Returns `true` for in-band configuration packets.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self.payload, PacketPayload::Config(_))
    }
}

/// Audio codec descriptor for the native player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioStreamConfig {
    /// Codec identifier (e.g. "aac", "ac3", "opus").
    pub codec: String,
    /// Codec-specific extradata (e.g. AudioSpecificConfig).
    pub extradata: Bytes,
    /// Samples per second.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u16,
    /// Bits per sample.
    pub bits_per_sample: u16,
    /// Average bitrate in bits per second, used for buffer sizing.
    pub average_bitrate: u64,
}

/// Video codec descriptor for the native player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoStreamConfig {
    /// Codec identifier (e.g. "h264", "hevc", "vp9").
    pub codec: String,
    /// Codec-specific extradata (e.g. SPS/PPS).
    pub extradata: Bytes,
    /// Coded width in pixels.
    pub width: u32,
    /// Coded height in pixels.
    pub height: u32,
    /// Frame rate numerator.
    pub frame_rate_num: u32,
    /// Frame rate denominator.
    pub frame_rate_den: u32,
    /// Average bitrate in bits per second, used for buffer sizing.
    pub average_bitrate: u64,
}

/// Codec configuration for one elementary stream. Equality is by value;
/// an arriving config equal to the current one is a duplicate and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamConfig {
    Audio(AudioStreamConfig),
    Video(VideoStreamConfig),
}

impl StreamConfig {
    /// Returns the stream kind this configuration belongs to.
    #[must_use]
    pub fn kind(&self) -> StreamKind {
        match self {
            Self::Audio(_) => StreamKind::Audio,
            Self::Video(_) => StreamKind::Video,
        }
    }

    /// Returns the codec identifier.
    #[must_use]
    pub fn codec(&self) -> &str {
        match self {
            Self::Audio(c) => &c.codec,
            Self::Video(c) => &c.codec,
        }
    }

    /// Returns the codec extradata.
    #[must_use]
    pub fn extradata(&self) -> &Bytes {
        match self {
            Self::Audio(c) => &c.extradata,
            Self::Video(c) => &c.extradata,
        }
    }

    /// Average bitrate in bits per second.
    #[must_use]
    pub fn average_bitrate(&self) -> u64 {
        match self {
            Self::Audio(c) => c.average_bitrate,
            Self::Video(c) => c.average_bitrate,
        }
    }

    /// Whether replacing `self` with `next` requires tearing down the
    /// running native player.
    ///
    /// A codec or extradata change cannot be absorbed mid-stream; parameter
    /// changes within the same codec setup (bitrate, frame rate) can.
    #[must_use]
    pub fn requires_restart(&self, next: &StreamConfig) -> bool {
        self.kind() != next.kind()
            || self.codec() != next.codec()
            || self.extradata() != next.extradata()
    }
}

/// Buffer-fill hint emitted upstream so the provider can pace fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRequest {
    /// Stream the request applies to.
    pub kind: StreamKind,
    /// Bytes the provider should fetch to reach the target depth.
    pub bytes_needed: u64,
    /// Duration the provider should fetch to reach the target depth.
    pub duration_needed: Duration,
    /// Whether the buffer is effectively empty (imminent underrun).
    pub is_buffer_empty: bool,
}

/// Externally observable playback state. The last published value is
/// cached and queryable between events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    /// No prepared media.
    #[default]
    Idle,
    /// Streams configured, prebuffered, native player prepared.
    Prepared,
    /// Clock running, transfer enabled.
    Playing,
    /// Transfer and clock suspended, position retained.
    Paused,
    /// A playback error was published; terminal.
    Error,
    /// The native player reported end of stream; terminal.
    Completed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio_config(codec: &str, extradata: &'static [u8]) -> StreamConfig {
        StreamConfig::Audio(AudioStreamConfig {
            codec: codec.to_string(),
            extradata: Bytes::from_static(extradata),
            sample_rate: 48000,
            channels: 2,
            bits_per_sample: 16,
            average_bitrate: 128_000,
        })
    }

    #[test]
    fn stream_kind_as_str() {
        assert_eq!(StreamKind::Audio.as_str(), "audio");
        assert_eq!(StreamKind::Video.as_str(), "video");
    }

    #[test]
    fn packet_constructors_set_payload() {
        let data = Packet::data(
            StreamKind::Audio,
            Duration::from_millis(40),
            Duration::from_millis(40),
            Bytes::from_static(&[1, 2, 3]),
        );
        assert!(!data.is_eos());
        assert!(!data.is_config());

        let eos = Packet::eos(StreamKind::Video);
        assert!(eos.is_eos());

        let config = Packet::config(
            StreamKind::Audio,
            Duration::ZERO,
            audio_config("aac", &[0x12]),
        );
        assert!(config.is_config());
    }

    #[test]
    fn generation_stamp_is_carried() {
        let packet = Packet::eos(StreamKind::Audio).with_generation(3);
        assert_eq!(packet.generation, 3);
    }

    #[test]
    fn equal_configs_do_not_require_restart() {
        let a = audio_config("aac", &[0x12, 0x10]);
        let b = audio_config("aac", &[0x12, 0x10]);
        assert_eq!(a, b);
        assert!(!a.requires_restart(&b));
    }

    #[test]
    fn codec_change_requires_restart() {
        let a = audio_config("aac", &[0x12, 0x10]);
        let b = audio_config("ac3", &[0x12, 0x10]);
        assert!(a.requires_restart(&b));
    }

    #[test]
    fn extradata_change_requires_restart() {
        let a = audio_config("aac", &[0x12, 0x10]);
        let b = audio_config("aac", &[0x11, 0x90]);
        assert!(a.requires_restart(&b));
    }
}
