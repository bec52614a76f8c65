//! Per-stream transfer task between packet storage and the native player.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buffer::StreamBuffer;
use crate::error::{PlayerError, PlayerResult};
use crate::native::{NativePlayer, SubmitStatus};
use crate::packet::{Packet, PacketPayload, StreamConfig, StreamKind};
use crate::storage::PacketStorage;

/// Transfer pipeline state for one stream.
///
/// Idle → Configured → Starting → Transferring ⇄ Stopped; any state may
/// transition to Disabled, which is terminal for input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EsStreamState {
    Idle,
    Configured,
    Starting,
    Transferring,
    Stopped,
    Disabled,
}

/// Outcome of an out-of-band codec configuration push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOutcome {
    /// Config applied (or recognized as a duplicate).
    Accepted,
    /// Transfer is running; the config was queued at the current packet
    /// boundary and will apply, or trigger a reconfigure, when drained.
    QueuedForLater,
}

/// Outcome of installing a new seek generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    /// Stream repositioned; transfer can resume on the same player.
    Ok,
    /// The codec configuration changed across the seek boundary; the
    /// native player must be torn down and recreated.
    RestartRequired,
}

/// Upward signals from a transfer task to the controller.
///
/// Modeled as channel messages so streams hold no reference back to the
/// controller.
#[derive(Debug, Clone)]
pub enum StreamSignal {
    /// A destructive configuration change was reached in-band; the
    /// controller must run the reconfigure pipeline.
    Reconfigure { kind: StreamKind },
    /// The transfer task hit an unrecoverable error.
    PlaybackError { kind: StreamKind, message: String },
}

/// Outcome of applying an in-band configuration packet inside the
/// transfer loop.
enum InbandOutcome {
    Applied,
    Restart,
    Failed(String),
}

/// One Transferring episode: the task plus the token that parks it.
#[derive(Default)]
struct Episode {
    token: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl Episode {
    fn is_running(&self) -> bool {
        self.token.as_ref().is_some_and(|t| !t.is_cancelled())
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// Per-stream transfer pipeline.
///
/// Pulls packets from [`PacketStorage`], drops generations older than the
/// current seek target, and pushes the rest into the bound native player,
/// parking on decoder back-pressure until [`EsStream::wakeup`].
pub struct EsStream {
    weak_self: Weak<EsStream>,
    kind: StreamKind,
    storage: Arc<PacketStorage>,
    buffer: Arc<StreamBuffer>,
    /// Non-owning reference to the current native player; replaced
    /// atomically during reconfiguration.
    player: RwLock<Option<Arc<dyn NativePlayer>>>,
    state: Mutex<EsStreamState>,
    current_config: Mutex<Option<StreamConfig>>,
    /// Config waiting to be applied after a restart.
    pending_config: Mutex<Option<StreamConfig>>,
    /// Seek generation packets must match to reach the native player.
    target_generation: AtomicU64,
    wakeup: Notify,
    episode: Mutex<Episode>,
    signals: mpsc::UnboundedSender<StreamSignal>,
}

impl EsStream {
    /// Creates a transfer pipeline for one stream kind.
    pub fn new(
        kind: StreamKind,
        storage: Arc<PacketStorage>,
        buffer: Arc<StreamBuffer>,
        signals: mpsc::UnboundedSender<StreamSignal>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            kind,
            storage,
            buffer,
            player: RwLock::new(None),
            state: Mutex::new(EsStreamState::Idle),
            current_config: Mutex::new(None),
            pending_config: Mutex::new(None),
            target_generation: AtomicU64::new(0),
            wakeup: Notify::new(),
            episode: Mutex::new(Episode::default()),
            signals,
        })
    }

    /// Stream kind this pipeline serves.
    #[must_use]
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Current pipeline state.
    #[must_use]
    pub fn state(&self) -> EsStreamState {
        *self.state.lock()
    }

    /// Whether a codec configuration has been accepted.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.current_config.lock().is_some()
    }

    fn current_player(&self) -> Option<Arc<dyn NativePlayer>> {
        self.player.read().clone()
    }

    fn emit(&self, signal: StreamSignal) {
        if self.signals.send(signal).is_err() {
            log::trace!("[EsStream] {} signal listener gone", self.kind.as_str());
        }
    }

    fn emit_error(&self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("[EsStream] {} error: {}", self.kind.as_str(), message);
        self.emit(StreamSignal::PlaybackError {
            kind: self.kind,
            message,
        });
    }

    /// Binds the native player the transfer task submits into.
    ///
    /// Valid while transfer is not running (Idle, Configured, Stopped).
    pub fn set_player(&self, player: Arc<dyn NativePlayer>) -> PlayerResult<()> {
        let state = *self.state.lock();
        match state {
            EsStreamState::Idle | EsStreamState::Configured | EsStreamState::Stopped => {
                *self.player.write() = Some(player);
                Ok(())
            }
            _ => Err(PlayerError::InvalidState(format!(
                "cannot bind player while {:?}",
                state
            ))),
        }
    }

    /// Pushes a codec configuration from the provider side.
    ///
    /// The first config moves Idle → Configured and is applied to the
    /// native player immediately. While transferring, a differing config
    /// is queued at the current packet boundary and resolved by the
    /// transfer loop (apply, or emit a reconfigure signal when
    /// destructive).
    pub fn set_stream_config(&self, config: StreamConfig) -> PlayerResult<ConfigOutcome> {
        if config.kind() != self.kind {
            return Err(PlayerError::InvalidArgument(format!(
                "{} config pushed to {} stream",
                config.kind().as_str(),
                self.kind.as_str()
            )));
        }
        let state = *self.state.lock();
        match state {
            EsStreamState::Disabled => {
                Err(PlayerError::InvalidState("stream disabled".to_string()))
            }
            EsStreamState::Starting | EsStreamState::Transferring => {
                if self.current_config.lock().as_ref() == Some(&config) {
                    return Ok(ConfigOutcome::Accepted);
                }
                *self.pending_config.lock() = Some(config.clone());
                let generation = self.target_generation.load(Ordering::SeqCst);
                let boundary =
                    Packet::config(self.kind, Duration::ZERO, config).with_generation(generation);
                self.storage.add(boundary)?;
                log::info!(
                    "[EsStream] {} config change queued at packet boundary",
                    self.kind.as_str()
                );
                Ok(ConfigOutcome::QueuedForLater)
            }
            EsStreamState::Idle | EsStreamState::Configured | EsStreamState::Stopped => {
                if self.current_config.lock().as_ref() == Some(&config) {
                    return Ok(ConfigOutcome::Accepted);
                }
                self.apply_config(&config)?;
                let mut st = self.state.lock();
                if *st == EsStreamState::Idle {
                    *st = EsStreamState::Configured;
                }
                Ok(ConfigOutcome::Accepted)
            }
        }
    }

    /// Applies a configuration to the bound player and records it.
    fn apply_config(&self, config: &StreamConfig) -> PlayerResult<()> {
        let player = self.current_player().ok_or_else(|| {
            PlayerError::InvalidState(format!("{} has no native player", self.kind.as_str()))
        })?;
        player.set_stream_config(config).map_err(|e| {
            PlayerError::UnsupportedStream(format!("{}: {}", config.codec(), e))
        })?;
        self.buffer.update_buffer_configuration(config);
        *self.current_config.lock() = Some(config.clone());
        Ok(())
    }

    /// Re-applies the effective configuration after the native player has
    /// been replaced, promoting any pending config.
    pub fn reset_stream_config(&self) -> PlayerResult<()> {
        let pending = self.pending_config.lock().take();
        let config = match pending {
            Some(config) => config,
            None => self
                .current_config
                .lock()
                .clone()
                .ok_or_else(|| PlayerError::InvalidState("no configuration to reapply".to_string()))?,
        };
        self.apply_config(&config)?;
        let mut state = self.state.lock();
        if *state != EsStreamState::Disabled {
            *state = EsStreamState::Configured;
        }
        Ok(())
    }

    /// Starts (or resumes) the transfer task.
    pub fn start(&self) -> PlayerResult<()> {
        let mut state = self.state.lock();
        match *state {
            EsStreamState::Disabled => {
                Err(PlayerError::InvalidState("stream disabled".to_string()))
            }
            EsStreamState::Idle => Err(PlayerError::InvalidState(format!(
                "{} not configured",
                self.kind.as_str()
            ))),
            EsStreamState::Transferring => {
                self.wakeup.notify_one();
                Ok(())
            }
            EsStreamState::Configured | EsStreamState::Starting | EsStreamState::Stopped => {
                let mut episode = self.episode.lock();
                if !episode.is_running() {
                    let Some(stream) = self.weak_self.upgrade() else {
                        return Err(PlayerError::InvalidState("stream dropped".to_string()));
                    };
                    *state = EsStreamState::Starting;
                    let token = CancellationToken::new();
                    let task_token = token.clone();
                    episode.token = Some(token);
                    episode.handle =
                        Some(tokio::spawn(async move { stream.transfer_loop(task_token).await }));
                }
                *state = EsStreamState::Transferring;
                self.wakeup.notify_one();
                Ok(())
            }
        }
    }

    /// Parks the transfer task at its next safe point.
    ///
    /// Queued packets are kept. Idempotent, callable from any state.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if let Some(token) = self.episode.lock().token.as_ref() {
            token.cancel();
        }
        if !matches!(*state, EsStreamState::Disabled | EsStreamState::Idle) {
            *state = EsStreamState::Stopped;
        }
    }

    /// Disables the stream: transfer parks and further input is rejected.
    /// Terminal.
    pub fn disable(&self) {
        {
            let mut state = self.state.lock();
            if let Some(token) = self.episode.lock().token.as_ref() {
                token.cancel();
            }
            *state = EsStreamState::Disabled;
        }
        if let Err(e) = self.storage.disable(self.kind) {
            log::debug!("[EsStream] {} disable storage: {}", self.kind.as_str(), e);
        }
        log::info!("[EsStream] {} disabled", self.kind.as_str());
    }

    /// Installs a new target seek generation and discards stale storage.
    ///
    /// Returns [`SeekOutcome::RestartRequired`] when the codec
    /// configuration changed across the seek boundary.
    pub async fn seek(
        &self,
        seek_id: u64,
        position: Duration,
        token: &CancellationToken,
    ) -> PlayerResult<SeekOutcome> {
        if token.is_cancelled() {
            return Err(PlayerError::Cancelled);
        }
        self.target_generation.store(seek_id, Ordering::SeqCst);
        let dropped = self.storage.drop_until_generation(self.kind, seek_id)?;
        self.buffer.reset();
        log::debug!(
            "[EsStream] {} seek to {:?} (generation {}, {} stale packets dropped)",
            self.kind.as_str(),
            position,
            seek_id,
            dropped
        );

        let current = self.current_config.lock().clone();
        let pending = self.pending_config.lock().clone();
        if let (Some(current), Some(pending)) = (current, pending) {
            if current.requires_restart(&pending) {
                return Ok(SeekOutcome::RestartRequired);
            }
        }
        Ok(SeekOutcome::Ok)
    }

    /// Takes the completion handle of the current transfer episode.
    ///
    /// The controller awaits it to observe quiescence after a stop.
    pub fn active_task(&self) -> Option<JoinHandle<()>> {
        self.episode.lock().handle.take()
    }

    /// Nudges a transfer task parked on decoder back-pressure.
    pub fn wakeup(&self) {
        self.wakeup.notify_one();
    }

    /// Body of the transfer task.
    async fn transfer_loop(self: Arc<Self>, token: CancellationToken) {
        log::debug!("[EsStream] {} transfer task started", self.kind.as_str());
        loop {
            let packet = tokio::select! {
                _ = token.cancelled() => break,
                result = self.storage.take(self.kind) => match result {
                    Ok(packet) => packet,
                    Err(PlayerError::StorageClosed) => {
                        log::debug!("[EsStream] {} storage closed", self.kind.as_str());
                        break;
                    }
                    Err(e) => {
                        self.emit_error(format!("storage failure: {e}"));
                        break;
                    }
                },
            };

            let target = self.target_generation.load(Ordering::SeqCst);
            if packet.generation < target {
                log::trace!(
                    "[EsStream] {} dropping stale packet (generation {} < {})",
                    self.kind.as_str(),
                    packet.generation,
                    target
                );
                continue;
            }

            match packet.payload {
                PacketPayload::Eos => {
                    if let Some(player) = self.current_player() {
                        if let Err(e) = player.submit_eos(self.kind) {
                            self.emit_error(format!("eos submit failed: {e}"));
                        }
                    }
                    self.buffer.mark_eos_dts();
                    log::info!("[EsStream] {} end of stream submitted", self.kind.as_str());
                    break;
                }
                PacketPayload::Config(ref config) => match self.apply_inband_config(config) {
                    InbandOutcome::Applied => {}
                    InbandOutcome::Restart => {
                        log::info!(
                            "[EsStream] {} destructive reconfiguration reached",
                            self.kind.as_str()
                        );
                        self.emit(StreamSignal::Reconfigure { kind: self.kind });
                        break;
                    }
                    InbandOutcome::Failed(message) => {
                        self.emit_error(message);
                        break;
                    }
                },
                PacketPayload::Data(_) => {
                    if !self.submit_until_accepted(&packet, &token).await {
                        break;
                    }
                }
            }
        }
        log::debug!("[EsStream] {} transfer task parked", self.kind.as_str());
    }

    /// Resolves an in-band configuration packet against the current config.
    fn apply_inband_config(&self, next: &StreamConfig) -> InbandOutcome {
        let current = self.current_config.lock().clone();
        match current {
            Some(ref current) if current == next => InbandOutcome::Applied,
            Some(ref current) if current.requires_restart(next) => {
                *self.pending_config.lock() = Some(next.clone());
                InbandOutcome::Restart
            }
            _ => match self.apply_config(next) {
                Ok(()) => InbandOutcome::Applied,
                Err(e) => InbandOutcome::Failed(format!("config apply failed: {e}")),
            },
        }
    }

    /// Submits one data packet, parking on back-pressure until a wakeup.
    ///
    /// Returns `false` when the loop should exit (cancelled or failed).
    async fn submit_until_accepted(&self, packet: &Packet, token: &CancellationToken) -> bool {
        loop {
            let Some(player) = self.current_player() else {
                self.emit_error("no native player bound");
                return false;
            };
            match player.submit_packet(packet).await {
                Ok(SubmitStatus::Accepted) => {
                    self.buffer.data_out(packet.pts);
                    return true;
                }
                Ok(SubmitStatus::Full) => {
                    log::trace!(
                        "[EsStream] {} player buffer full, parking",
                        self.kind.as_str()
                    );
                    tokio::select! {
                        _ = token.cancelled() => return false,
                        _ = self.wakeup.notified() => {}
                    }
                }
                Err(e) => {
                    self.emit_error(format!("packet submit failed: {e}"));
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{audio_config, data_packet, FakeNativePlayer};
    use tokio::time::{sleep, Duration as TokioDuration};

    fn harness() -> (
        Arc<EsStream>,
        Arc<PacketStorage>,
        Arc<FakeNativePlayer>,
        mpsc::UnboundedReceiver<StreamSignal>,
    ) {
        let storage = Arc::new(PacketStorage::new());
        storage.init(StreamKind::Audio).unwrap();
        let buffer = Arc::new(StreamBuffer::with_default_depth(StreamKind::Audio));
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = EsStream::new(StreamKind::Audio, Arc::clone(&storage), buffer, tx);
        let player = Arc::new(FakeNativePlayer::new());
        stream.set_player(player.clone()).unwrap();
        (stream, storage, player, rx)
    }

    /// Polls until `condition` holds or the paused clock ran out of road.
    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            sleep(TokioDuration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn first_config_moves_idle_to_configured() {
        let (stream, _storage, player, _rx) = harness();
        assert_eq!(stream.state(), EsStreamState::Idle);

        let outcome = stream.set_stream_config(audio_config("aac", &[0x12])).unwrap();
        assert_eq!(outcome, ConfigOutcome::Accepted);
        assert_eq!(stream.state(), EsStreamState::Configured);
        assert_eq!(player.config_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_config_is_accepted_without_reapply() {
        let (stream, _storage, player, _rx) = harness();
        stream.set_stream_config(audio_config("aac", &[0x12])).unwrap();
        let outcome = stream.set_stream_config(audio_config("aac", &[0x12])).unwrap();
        assert_eq!(outcome, ConfigOutcome::Accepted);
        assert_eq!(player.config_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transfer_submits_data_packets_in_dts_order() {
        let (stream, storage, player, _rx) = harness();
        stream.set_stream_config(audio_config("aac", &[0x12])).unwrap();
        storage.add(data_packet(StreamKind::Audio, 0)).unwrap();
        storage.add(data_packet(StreamKind::Audio, 40)).unwrap();
        storage.add(data_packet(StreamKind::Audio, 80)).unwrap();

        stream.start().unwrap();
        wait_until(|| player.submitted_count() == 3).await;

        let dts: Vec<_> = player.submitted().iter().map(|p| p.dts).collect();
        assert_eq!(
            dts,
            vec![
                Duration::from_millis(0),
                Duration::from_millis(40),
                Duration::from_millis(80)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generation_packets_never_reach_the_player() {
        let (stream, storage, player, _rx) = harness();
        stream.set_stream_config(audio_config("aac", &[0x12])).unwrap();

        let token = CancellationToken::new();
        let outcome = stream.seek(1, Duration::from_secs(2), &token).await.unwrap();
        assert_eq!(outcome, SeekOutcome::Ok);

        storage
            .add(data_packet(StreamKind::Audio, 0).with_generation(0))
            .unwrap();
        storage
            .add(data_packet(StreamKind::Audio, 2000).with_generation(1))
            .unwrap();

        stream.start().unwrap();
        wait_until(|| player.submitted_count() == 1).await;
        sleep(TokioDuration::from_millis(100)).await;

        assert_eq!(player.submitted_count(), 1);
        assert_eq!(player.submitted()[0].generation, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn eos_is_submitted_and_task_parks() {
        let (stream, storage, player, _rx) = harness();
        stream.set_stream_config(audio_config("aac", &[0x12])).unwrap();
        storage.add(data_packet(StreamKind::Audio, 0)).unwrap();
        storage.add(Packet::eos(StreamKind::Audio)).unwrap();

        stream.start().unwrap();
        wait_until(|| player.eos_count() == 1).await;

        let task = stream.active_task().expect("transfer task handle");
        task.await.unwrap();
        assert_eq!(player.submitted_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn destructive_inband_config_emits_reconfigure() {
        let (stream, storage, player, mut rx) = harness();
        stream.set_stream_config(audio_config("aac", &[0x12])).unwrap();
        storage.add(data_packet(StreamKind::Audio, 0)).unwrap();
        stream.start().unwrap();
        wait_until(|| player.submitted_count() == 1).await;

        // Out-of-band config change while transferring queues a boundary
        // packet and resolves through the transfer loop.
        let outcome = stream.set_stream_config(audio_config("ac3", &[0x50])).unwrap();
        assert_eq!(outcome, ConfigOutcome::QueuedForLater);

        let signal = rx.recv().await.unwrap();
        assert!(matches!(
            signal,
            StreamSignal::Reconfigure {
                kind: StreamKind::Audio
            }
        ));

        // The task parked at the boundary.
        stream.active_task().unwrap().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn compatible_inband_config_is_applied_without_restart() {
        let (stream, storage, player, mut rx) = harness();
        let mut base = audio_config("aac", &[0x12]);
        stream.set_stream_config(base.clone()).unwrap();
        storage.add(data_packet(StreamKind::Audio, 0)).unwrap();
        stream.start().unwrap();
        wait_until(|| player.submitted_count() == 1).await;

        // Same codec and extradata, new bitrate: absorbed mid-stream.
        if let StreamConfig::Audio(ref mut audio) = base {
            audio.average_bitrate = 256_000;
        }
        stream.set_stream_config(base).unwrap();
        storage.add(data_packet(StreamKind::Audio, 40)).unwrap();

        wait_until(|| player.submitted_count() == 2).await;
        assert_eq!(player.config_count(), 2);
        assert!(rx.try_recv().is_err(), "no reconfigure signal expected");
    }

    #[tokio::test(start_paused = true)]
    async fn backpressure_parks_until_wakeup() {
        let (stream, storage, player, _rx) = harness();
        stream.set_stream_config(audio_config("aac", &[0x12])).unwrap();
        player.set_buffer_full(true);
        storage.add(data_packet(StreamKind::Audio, 0)).unwrap();

        stream.start().unwrap();
        wait_until(|| player.submit_attempts() >= 1).await;
        assert_eq!(player.submitted_count(), 0);

        player.set_buffer_full(false);
        stream.wakeup();
        wait_until(|| player.submitted_count() == 1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_parks_without_clearing_queue() {
        let (stream, storage, player, _rx) = harness();
        stream.set_stream_config(audio_config("aac", &[0x12])).unwrap();
        storage.add(data_packet(StreamKind::Audio, 0)).unwrap();
        stream.start().unwrap();
        wait_until(|| player.submitted_count() == 1).await;

        storage.add(data_packet(StreamKind::Audio, 40)).unwrap();
        storage.add(data_packet(StreamKind::Audio, 80)).unwrap();
        stream.stop();
        stream.stop(); // idempotent
        stream.active_task().unwrap().await.unwrap();

        // Parked at a safe point; queued packets survive.
        assert!(storage.len(StreamKind::Audio) >= 1);
        assert_eq!(stream.state(), EsStreamState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn seek_with_destructive_pending_requires_restart() {
        let (stream, _storage, _player, _rx) = harness();
        stream.set_stream_config(audio_config("aac", &[0x12])).unwrap();
        stream.start().unwrap();
        stream.set_stream_config(audio_config("ac3", &[0x50])).unwrap();
        stream.stop();

        let token = CancellationToken::new();
        let outcome = stream.seek(1, Duration::ZERO, &token).await.unwrap();
        assert_eq!(outcome, SeekOutcome::RestartRequired);
    }

    #[tokio::test(start_paused = true)]
    async fn seek_with_cancelled_token_is_cancelled() {
        let (stream, _storage, _player, _rx) = harness();
        let token = CancellationToken::new();
        token.cancel();
        let err = stream.seek(1, Duration::ZERO, &token).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn disable_rejects_further_input() {
        let (stream, storage, _player, _rx) = harness();
        stream.set_stream_config(audio_config("aac", &[0x12])).unwrap();
        stream.disable();

        assert_eq!(stream.state(), EsStreamState::Disabled);
        assert!(storage.add(data_packet(StreamKind::Audio, 0)).is_err());
        assert!(stream.start().is_err());
    }
}
