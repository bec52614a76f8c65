//! Shared test fixtures: scripted fakes for the native player and the
//! data provider, plus packet and config builders.
//!
//! These are used by multiple test modules to avoid duplication.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::{NativeError, PlayerResult};
use crate::native::{
    BufferStatus, DisplayHandle, NativeEvent, NativePlayer, NativePlayerFactory, NativePlayerState,
    StreamReadyCallback, SubmitStatus,
};
use crate::packet::{
    AudioStreamConfig, DataRequest, Packet, PlayerState, StreamConfig, StreamKind,
    VideoStreamConfig,
};
use crate::provider::{DataProvider, ProviderEvent};

/// Builds an audio config with the given codec and extradata.
pub(crate) fn audio_config(codec: &str, extradata: &'static [u8]) -> StreamConfig {
    StreamConfig::Audio(AudioStreamConfig {
        codec: codec.to_string(),
        extradata: Bytes::from_static(extradata),
        sample_rate: 48000,
        channels: 2,
        bits_per_sample: 16,
        average_bitrate: 128_000,
    })
}

/// Builds a video config with the given codec and extradata.
pub(crate) fn video_config(codec: &str, extradata: &'static [u8]) -> StreamConfig {
    StreamConfig::Video(VideoStreamConfig {
        codec: codec.to_string(),
        extradata: Bytes::from_static(extradata),
        width: 1920,
        height: 1080,
        frame_rate_num: 30,
        frame_rate_den: 1,
        average_bitrate: 4_000_000,
    })
}

/// Builds a data packet with equal PTS/DTS at the given millisecond offset.
pub(crate) fn data_packet(kind: StreamKind, pts_ms: u64) -> Packet {
    Packet::data(
        kind,
        Duration::from_millis(pts_ms),
        Duration::from_millis(pts_ms),
        Bytes::from_static(&[0xAB; 16]),
    )
}

/// Scripted fake of the native platform player.
///
/// Records every submission and lifecycle call; failure toggles let tests
/// drive the error paths.
pub(crate) struct FakeNativePlayer {
    state: Mutex<NativePlayerState>,
    events: broadcast::Sender<NativeEvent>,
    configs: Mutex<Vec<StreamConfig>>,
    submitted: Mutex<Vec<Packet>>,
    eos_streams: Mutex<Vec<StreamKind>>,
    submit_attempts: AtomicUsize,
    buffer_full: AtomicBool,
    fail_prepare: AtomicBool,
    fail_seek: AtomicBool,
    fail_start: AtomicBool,
    fail_playing_time: AtomicBool,
    playing_time: Mutex<Duration>,
    seeked_to: Mutex<Vec<Duration>>,
    stop_calls: AtomicUsize,
}

impl FakeNativePlayer {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(NativePlayerState::Idle),
            events,
            configs: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            eos_streams: Mutex::new(Vec::new()),
            submit_attempts: AtomicUsize::new(0),
            buffer_full: AtomicBool::new(false),
            fail_prepare: AtomicBool::new(false),
            fail_seek: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            fail_playing_time: AtomicBool::new(false),
            playing_time: Mutex::new(Duration::ZERO),
            seeked_to: Mutex::new(Vec::new()),
            stop_calls: AtomicUsize::new(0),
        }
    }

    pub fn config_count(&self) -> usize {
        self.configs.lock().len()
    }

    pub fn submitted(&self) -> Vec<Packet> {
        self.submitted.lock().clone()
    }

    pub fn submitted_count(&self) -> usize {
        self.submitted.lock().len()
    }

    pub fn submit_attempts(&self) -> usize {
        self.submit_attempts.load(Ordering::SeqCst)
    }

    pub fn eos_count(&self) -> usize {
        self.eos_streams.lock().len()
    }

    pub fn seeked_to(&self) -> Vec<Duration> {
        self.seeked_to.lock().clone()
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn set_buffer_full(&self, full: bool) {
        self.buffer_full.store(full, Ordering::SeqCst);
    }

    pub fn set_fail_prepare(&self, fail: bool) {
        self.fail_prepare.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_playing_time(&self, fail: bool) {
        self.fail_playing_time.store(fail, Ordering::SeqCst);
    }

    pub fn set_playing_time(&self, position: Duration) {
        *self.playing_time.lock() = position;
    }

    /// Emits an asynchronous native event to subscribers.
    pub fn emit(&self, event: NativeEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_underrun(&self, kind: StreamKind) {
        self.emit(NativeEvent::BufferStatus {
            kind,
            status: BufferStatus::Underrun,
        });
    }

    fn configured_kinds(&self) -> Vec<StreamKind> {
        let mut kinds: Vec<StreamKind> = Vec::new();
        for config in self.configs.lock().iter() {
            if !kinds.contains(&config.kind()) {
                kinds.push(config.kind());
            }
        }
        kinds
    }
}

#[async_trait]
impl NativePlayer for FakeNativePlayer {
    fn open(&self) -> Result<(), NativeError> {
        Ok(())
    }

    fn set_trust_zone_use(&self, _enabled: bool) -> Result<(), NativeError> {
        Ok(())
    }

    fn set_display(&self, _display: DisplayHandle) -> Result<(), NativeError> {
        Ok(())
    }

    fn state(&self) -> NativePlayerState {
        *self.state.lock()
    }

    fn start(&self) -> Result<(), NativeError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(NativeError::new("start rejected"));
        }
        *self.state.lock() = NativePlayerState::Playing;
        Ok(())
    }

    fn pause(&self) -> Result<(), NativeError> {
        *self.state.lock() = NativePlayerState::Paused;
        Ok(())
    }

    fn resume(&self) -> Result<(), NativeError> {
        *self.state.lock() = NativePlayerState::Playing;
        Ok(())
    }

    fn stop(&self) -> Result<(), NativeError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = NativePlayerState::Ready;
        Ok(())
    }

    async fn prepare(&self, on_ready: StreamReadyCallback) -> Result<(), NativeError> {
        if self.fail_prepare.load(Ordering::SeqCst) {
            return Err(NativeError::new("prepare rejected"));
        }
        for kind in self.configured_kinds() {
            on_ready(kind);
        }
        *self.state.lock() = NativePlayerState::Ready;
        Ok(())
    }

    async fn seek(
        &self,
        position: Duration,
        on_ready: StreamReadyCallback,
    ) -> Result<(), NativeError> {
        if self.fail_seek.load(Ordering::SeqCst) {
            return Err(NativeError::new("seek rejected"));
        }
        self.seeked_to.lock().push(position);
        *self.playing_time.lock() = position;
        for kind in self.configured_kinds() {
            on_ready(kind);
        }
        Ok(())
    }

    fn playing_time(&self) -> Result<Duration, NativeError> {
        if self.fail_playing_time.load(Ordering::SeqCst) {
            return Err(NativeError::new("position unavailable"));
        }
        Ok(*self.playing_time.lock())
    }

    fn set_stream_config(&self, config: &StreamConfig) -> Result<(), NativeError> {
        self.configs.lock().push(config.clone());
        Ok(())
    }

    async fn submit_packet(&self, packet: &Packet) -> Result<SubmitStatus, NativeError> {
        self.submit_attempts.fetch_add(1, Ordering::SeqCst);
        if self.buffer_full.load(Ordering::SeqCst) {
            return Ok(SubmitStatus::Full);
        }
        self.submitted.lock().push(packet.clone());
        Ok(SubmitStatus::Accepted)
    }

    fn submit_eos(&self, kind: StreamKind) -> Result<(), NativeError> {
        self.eos_streams.lock().push(kind);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<NativeEvent> {
        self.events.subscribe()
    }
}

/// Factory handing out [`FakeNativePlayer`] instances and remembering them.
pub(crate) struct FakeNativePlayerFactory {
    created: Mutex<Vec<Arc<FakeNativePlayer>>>,
}

impl FakeNativePlayerFactory {
    pub fn new() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    /// The most recently created player.
    pub fn latest(&self) -> Arc<FakeNativePlayer> {
        self.created
            .lock()
            .last()
            .cloned()
            .expect("no native player created yet")
    }
}

impl NativePlayerFactory for FakeNativePlayerFactory {
    fn create(&self) -> PlayerResult<Arc<dyn NativePlayer>> {
        let player = Arc::new(FakeNativePlayer::new());
        self.created.lock().push(Arc::clone(&player));
        Ok(player)
    }
}

/// Recording fake of the data-provider side.
pub(crate) struct FakeDataProvider {
    events: broadcast::Sender<ProviderEvent>,
    time_updates: Mutex<Vec<Duration>>,
    state_changes: Mutex<Vec<PlayerState>>,
    data_requests: Mutex<Vec<DataRequest>>,
    buffering_reports: Mutex<Vec<bool>>,
    seeks: Mutex<Vec<Duration>>,
    /// Invoked inside `seek` before it returns, while subscriptions are
    /// suspended. Lets tests publish events that must not be observed.
    on_seek: Mutex<Option<Box<dyn Fn() + Send>>>,
}

impl FakeDataProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            events,
            time_updates: Mutex::new(Vec::new()),
            state_changes: Mutex::new(Vec::new()),
            data_requests: Mutex::new(Vec::new()),
            buffering_reports: Mutex::new(Vec::new()),
            seeks: Mutex::new(Vec::new()),
            on_seek: Mutex::new(None),
        }
    }

    /// Publishes a provider event to current subscribers.
    pub fn publish(&self, event: ProviderEvent) {
        let _ = self.events.send(event);
    }

    pub fn time_updates(&self) -> Vec<Duration> {
        self.time_updates.lock().clone()
    }

    pub fn state_changes(&self) -> Vec<PlayerState> {
        self.state_changes.lock().clone()
    }

    pub fn data_requests(&self) -> Vec<DataRequest> {
        self.data_requests.lock().clone()
    }

    pub fn buffering_reports(&self) -> Vec<bool> {
        self.buffering_reports.lock().clone()
    }

    pub fn seeks(&self) -> Vec<Duration> {
        self.seeks.lock().clone()
    }

    pub fn set_on_seek(&self, hook: impl Fn() + Send + 'static) {
        *self.on_seek.lock() = Some(Box::new(hook));
    }
}

#[async_trait]
impl DataProvider for FakeDataProvider {
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    fn on_time_updated(&self, position: Duration) {
        self.time_updates.lock().push(position);
    }

    fn on_state_changed(&self, state: PlayerState) {
        self.state_changes.lock().push(state);
    }

    fn on_data_state_changed(&self, request: DataRequest) {
        self.data_requests.lock().push(request);
    }

    fn on_buffering_state_changed(&self, buffering: bool) {
        self.buffering_reports.lock().push(buffering);
    }

    async fn seek(&self, position: Duration) -> PlayerResult<Duration> {
        self.seeks.lock().push(position);
        if let Some(hook) = self.on_seek.lock().as_ref() {
            hook();
        }
        Ok(position)
    }
}
