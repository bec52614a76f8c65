//! Stream controller: playback orchestration over the native player.
//!
//! Responsibilities:
//! - Own the playback state machine and the cached observable state
//! - Serialize Prepare/Seek/Reconfigure against each other
//! - Prebuffer every initialized stream before the native player runs
//! - Drive the clock generator and upstream buffer-level reports
//! - React to native player events (EOS, errors, buffer status)
//! - Replace the native player wholesale on destructive reconfiguration

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::buffer::StreamBuffer;
use crate::config::{ControllerConfig, CLOCK_MAX_READ_ERRORS};
use crate::error::{PlayerError, PlayerResult};
use crate::events::{EventScheduler, PlayerEvent};
use crate::native::{
    BufferStatus, DisplayHandle, NativeEvent, NativePlayer, NativePlayerFactory, NativePlayerState,
    StreamReadyCallback,
};
use crate::packet::{Packet, PacketPayload, PlayerState, StreamConfig, StreamKind};
use crate::player::{Player, PlayerClient};
use crate::storage::PacketStorage;
use crate::stream::{EsStream, EsStreamState, SeekOutcome, StreamSignal};

/// Internal controller state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControllerState {
    Uninitialized,
    Initialized,
    Preparing,
    Ready,
    Playing,
    Paused,
    Seeking,
    Reconfiguring,
    Stopping,
    Disposed,
}

/// A background task plus the token that stops it.
struct TaskSlot {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl TaskSlot {
    fn is_running(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }
}

/// Per-kind transfer pipeline and its accountant.
struct StreamSlot {
    stream: Arc<EsStream>,
    buffer: Arc<StreamBuffer>,
}

/// Orchestrator for multi-stream elementary-stream playback.
///
/// Owns the native player, per-stream storage/buffers/transfer tasks, the
/// clock generator, and the event subject. All mutating entry points are
/// safe to call concurrently; Prepare, Seek, and Reconfigure additionally
/// exclude each other through a single-permit async mutex.
pub struct StreamController {
    weak_self: Weak<StreamController>,
    config: ControllerConfig,
    scheduler: Arc<EventScheduler>,
    factory: Arc<dyn NativePlayerFactory>,
    display: Option<DisplayHandle>,
    /// Current native player; replaced wholesale during reconfiguration.
    player: RwLock<Arc<dyn NativePlayer>>,
    storage: Arc<PacketStorage>,
    streams: DashMap<StreamKind, StreamSlot>,
    /// Single-permit serializer for exclusive operations. The holder may
    /// suspend while holding it.
    serializer: tokio::sync::Mutex<()>,
    /// Controller-wide cancellation, fired on dispose.
    active_token: CancellationToken,
    /// Monotonic seek generation; 0 until the first seek.
    seek_id: AtomicU64,
    controller_state: Mutex<ControllerState>,
    /// Last published observable state.
    player_state: Mutex<PlayerState>,
    /// Last position read by the clock or settled by a seek.
    last_position: Mutex<Duration>,
    clip_duration: Mutex<Option<Duration>>,
    clock: Mutex<Option<TaskSlot>>,
    native_pump: Mutex<Option<TaskSlot>>,
    signal_pump: Mutex<Option<TaskSlot>>,
    signal_tx: mpsc::UnboundedSender<StreamSignal>,
    client: RwLock<Option<Arc<dyn PlayerClient>>>,
    disposed: AtomicBool,
}

impl StreamController {
    /// Creates a controller around a freshly created native player.
    ///
    /// The player is created through `factory`, opened, switched to trust
    /// zone use, and bound to `display` when one is given.
    pub fn new(
        factory: Arc<dyn NativePlayerFactory>,
        display: Option<DisplayHandle>,
        config: ControllerConfig,
    ) -> PlayerResult<Arc<Self>> {
        config.validate().map_err(PlayerError::InvalidArgument)?;

        let player = factory.create()?;
        Self::open_native(player.as_ref(), display)?;

        let scheduler = Arc::new(EventScheduler::new(config.event_channel_capacity));
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let controller = Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            config,
            scheduler,
            factory,
            display,
            player: RwLock::new(player),
            storage: Arc::new(PacketStorage::new()),
            streams: DashMap::new(),
            serializer: tokio::sync::Mutex::new(()),
            active_token: CancellationToken::new(),
            seek_id: AtomicU64::new(0),
            controller_state: Mutex::new(ControllerState::Uninitialized),
            player_state: Mutex::new(PlayerState::Idle),
            last_position: Mutex::new(Duration::ZERO),
            clip_duration: Mutex::new(None),
            clock: Mutex::new(None),
            native_pump: Mutex::new(None),
            signal_pump: Mutex::new(None),
            signal_tx,
            client: RwLock::new(None),
            disposed: AtomicBool::new(false),
        });

        controller.spawn_native_pump();
        controller.spawn_signal_pump(signal_rx);
        Ok(controller)
    }

    fn open_native(
        player: &dyn NativePlayer,
        display: Option<DisplayHandle>,
    ) -> PlayerResult<()> {
        player.open()?;
        player.set_trust_zone_use(true)?;
        if let Some(display) = display {
            player.set_display(display)?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────

    fn current_player(&self) -> Arc<dyn NativePlayer> {
        Arc::clone(&self.player.read())
    }

    /// The event scheduler; glue code publishes through it.
    pub(crate) fn events(&self) -> &Arc<EventScheduler> {
        &self.scheduler
    }

    /// Subscribes to the ordered player event subject.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.scheduler.subscribe()
    }

    /// Last published observable state.
    #[must_use]
    pub fn state(&self) -> PlayerState {
        *self.player_state.lock()
    }

    /// Last position read by the clock generator or settled by a seek.
    #[must_use]
    pub fn current_time(&self) -> Duration {
        *self.last_position.lock()
    }

    /// Clip duration announced by the provider side, when known.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        *self.clip_duration.lock()
    }

    /// Seek generation currently in effect. Packets appended by the glue
    /// layer are stamped with it.
    #[must_use]
    pub(crate) fn current_generation(&self) -> u64 {
        self.seek_id.load(Ordering::SeqCst)
    }

    /// Advances the seek generation. Called once per external seek before
    /// the producer is repositioned, so post-acknowledge packets carry the
    /// new generation.
    pub(crate) fn begin_seek_generation(&self) -> u64 {
        self.seek_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn ensure_not_disposed(&self) -> PlayerResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(PlayerError::Disposed);
        }
        Ok(())
    }

    fn all_streams_configured(&self) -> bool {
        !self.streams.is_empty() && self.streams.iter().all(|s| s.value().stream.is_configured())
    }

    fn set_player_state(&self, state: PlayerState) {
        *self.player_state.lock() = state;
        self.scheduler.publish(PlayerEvent::StateChanged { state });
    }

    fn publish_error(&self, message: impl Into<String>) {
        self.scheduler.publish(PlayerEvent::PlaybackError {
            message: message.into(),
        });
    }

    // ─────────────────────────────────────────────────────────────────────
    // Stream setup
    // ─────────────────────────────────────────────────────────────────────

    /// Initializes the pipeline for one stream kind: storage FIFO, buffer
    /// accountant, and transfer task scaffolding.
    ///
    /// # Errors
    /// `InvalidArgument` when the kind is already initialized.
    pub fn initialize(&self, kind: StreamKind) -> PlayerResult<()> {
        self.ensure_not_disposed()?;
        self.storage.init(kind)?;

        let buffer = Arc::new(StreamBuffer::new(kind, self.config.target_buffer_depth));
        let stream = EsStream::new(
            kind,
            Arc::clone(&self.storage),
            Arc::clone(&buffer),
            self.signal_tx.clone(),
        );
        stream.set_player(self.current_player())?;
        self.streams.insert(kind, StreamSlot { stream, buffer });

        let mut state = self.controller_state.lock();
        if *state == ControllerState::Uninitialized {
            *state = ControllerState::Initialized;
        }
        log::info!("[Controller] {} stream initialized", kind.as_str());
        Ok(())
    }

    /// Pushes a codec configuration to the matching stream.
    ///
    /// When the last initialized stream becomes configured, preparation
    /// starts in the background: prebuffer, native prepare, clock start,
    /// `Prepared` published.
    pub fn set_stream_config(&self, config: StreamConfig) -> PlayerResult<()> {
        self.ensure_not_disposed()?;
        let kind = config.kind();
        let slot = self.streams.get(&kind).ok_or_else(|| {
            PlayerError::InvalidArgument(format!("{} not initialized", kind.as_str()))
        })?;
        slot.value().stream.set_stream_config(config)?;
        drop(slot);

        if self.all_streams_configured() {
            let mut state = self.controller_state.lock();
            if *state == ControllerState::Initialized {
                *state = ControllerState::Preparing;
                drop(state);
                self.spawn_prepare();
            }
        }
        Ok(())
    }

    /// Appends one packet to its stream's storage and accounts it.
    pub fn append_packet(&self, packet: Packet) -> PlayerResult<()> {
        self.ensure_not_disposed()?;
        let slot = self.streams.get(&packet.kind).ok_or_else(|| {
            PlayerError::InvalidArgument(format!("{} not initialized", packet.kind.as_str()))
        })?;
        if matches!(packet.payload, PacketPayload::Data(_)) {
            slot.value().buffer.data_in(packet.pts);
        }
        drop(slot);
        self.storage.add(packet)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Prepare
    // ─────────────────────────────────────────────────────────────────────

    fn spawn_prepare(&self) {
        let Some(controller) = self.weak_self.upgrade() else {
            return;
        };
        tokio::spawn(async move { controller.run_prepare().await });
    }

    async fn run_prepare(self: Arc<Self>) {
        let token = self.active_token.child_token();
        match self.prepare_pipeline(&token).await {
            Ok(()) => log::info!("[Controller] prepared"),
            Err(e) if e.is_cancelled() => {
                log::info!("[Controller] prepare cancelled");
                self.disable_transfer();
                if !self.disposed.load(Ordering::SeqCst) {
                    *self.controller_state.lock() = ControllerState::Initialized;
                }
            }
            Err(e) => {
                log::error!("[Controller] prepare failed: {}", e);
                self.disable_transfer();
                *self.controller_state.lock() = ControllerState::Initialized;
                self.publish_error("Start Failed");
            }
        }
    }

    async fn prepare_pipeline(&self, token: &CancellationToken) -> PlayerResult<()> {
        let _permit = self.serializer.lock().await;
        self.prebuffer(token).await?;

        let player = self.current_player();
        let on_ready = self.ready_callback();
        tokio::select! {
            _ = token.cancelled() => return Err(PlayerError::Cancelled),
            result = player.prepare(on_ready) => result?,
        }

        self.start_clock();
        *self.controller_state.lock() = ControllerState::Ready;
        self.set_player_state(PlayerState::Prepared);
        Ok(())
    }

    /// Waits until every initialized stream has at least the prebuffer
    /// depth stored, polling storage on a fixed cadence.
    async fn prebuffer(&self, token: &CancellationToken) -> PlayerResult<()> {
        loop {
            let ready = self
                .streams
                .iter()
                .all(|s| self.storage.duration(*s.key()) >= self.config.pre_buffer_duration);
            if ready {
                return Ok(());
            }
            tokio::select! {
                _ = token.cancelled() => return Err(PlayerError::Cancelled),
                _ = tokio::time::sleep(self.config.prebuffer_poll_interval) => {}
            }
        }
    }

    /// Builds the per-stream ready callback handed to native prepare/seek.
    ///
    /// The native side may invoke it from any thread; the closure marshals
    /// onto the event scheduler before touching controller state.
    fn ready_callback(&self) -> StreamReadyCallback {
        let controller = self.weak_self.clone();
        let scheduler = Arc::clone(&self.scheduler);
        Arc::new(move |kind| {
            let controller = controller.clone();
            scheduler.run_on_scheduler(move || {
                let Some(controller) = controller.upgrade() else {
                    return;
                };
                if let Some(slot) = controller.streams.get(&kind) {
                    if let Err(e) = slot.value().stream.start() {
                        log::warn!(
                            "[Controller] {} start from ready callback failed: {}",
                            kind.as_str(),
                            e
                        );
                    }
                };
            });
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Play / Pause / Stop (non-suspending)
    // ─────────────────────────────────────────────────────────────────────

    /// Starts or resumes playback.
    ///
    /// Interprets the native state: Playing is a no-op, Ready starts,
    /// Paused resumes, anything else is an error.
    pub fn play(&self) -> PlayerResult<()> {
        self.ensure_not_disposed()?;
        if !self.all_streams_configured() {
            return Err(PlayerError::InvalidState(
                "not all streams configured".to_string(),
            ));
        }

        let player = self.current_player();
        match player.state() {
            NativePlayerState::Playing => {}
            NativePlayerState::Ready => player.start().map_err(|e| {
                self.publish_error("Start Failed");
                PlayerError::from(e)
            })?,
            NativePlayerState::Paused => player.resume().map_err(|e| {
                self.publish_error("Start Failed");
                PlayerError::from(e)
            })?,
            other => {
                return Err(PlayerError::InvalidState(format!(
                    "cannot play from native state {:?}",
                    other
                )))
            }
        }

        self.enable_transfer();
        self.start_clock();
        *self.controller_state.lock() = ControllerState::Playing;
        self.set_player_state(PlayerState::Playing);
        Ok(())
    }

    /// Pauses playback: transfer disabled, native paused, clock stopped.
    pub fn pause(&self) -> PlayerResult<()> {
        self.ensure_not_disposed()?;
        self.disable_transfer();
        if let Err(e) = self.current_player().pause() {
            log::debug!("[Controller] native pause suppressed: {}", e);
        }
        self.stop_clock();
        *self.controller_state.lock() = ControllerState::Paused;
        self.set_player_state(PlayerState::Paused);
        Ok(())
    }

    /// Stops playback. A no-op (publishing nothing) unless the native
    /// player is Playing or Paused.
    pub fn stop(&self) -> PlayerResult<()> {
        self.ensure_not_disposed()?;
        let player = self.current_player();
        if !matches!(
            player.state(),
            NativePlayerState::Playing | NativePlayerState::Paused
        ) {
            return Ok(());
        }
        *self.controller_state.lock() = ControllerState::Stopping;
        self.disable_transfer();
        if let Err(e) = player.stop() {
            log::debug!("[Controller] native stop suppressed: {}", e);
        }
        self.stop_clock();
        *self.controller_state.lock() = ControllerState::Ready;
        self.set_player_state(PlayerState::Idle);
        Ok(())
    }

    fn enable_transfer(&self) {
        for slot in self.streams.iter() {
            if let Err(e) = slot.value().stream.start() {
                log::warn!(
                    "[Controller] {} transfer start failed: {}",
                    slot.key().as_str(),
                    e
                );
            }
        }
    }

    fn disable_transfer(&self) {
        for slot in self.streams.iter() {
            slot.value().stream.stop();
        }
    }

    fn disable_input(&self) {
        for slot in self.streams.iter() {
            slot.value().stream.disable();
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Seek
    // ─────────────────────────────────────────────────────────────────────

    /// Repositions playback.
    ///
    /// Advances the seek generation, quiesces transfer and the clock,
    /// brackets the pipeline with `SeekStarted`/`SeekCompleted`, and takes
    /// the reconfigure detour when a stream reports a destructive config
    /// change across the boundary.
    pub async fn seek(&self, position: Duration) -> PlayerResult<Duration> {
        self.ensure_not_disposed()?;
        let seek_id = self.begin_seek_generation();
        self.seek_with_generation(seek_id, position).await
    }

    /// Seek pipeline for an already-advanced generation. The glue layer
    /// uses this after repositioning the producer under the same id.
    pub(crate) async fn seek_with_generation(
        &self,
        seek_id: u64,
        position: Duration,
    ) -> PlayerResult<Duration> {
        self.ensure_not_disposed()?;
        let token = self.active_token.child_token();

        // Quiesce transfer tasks and the clock before announcing the seek.
        self.seek_stream_initialize(&token).await?;
        *self.controller_state.lock() = ControllerState::Seeking;
        self.scheduler
            .publish(PlayerEvent::SeekStarted { seek_id, position });

        let result = self.seek_pipeline(seek_id, position, &token).await;

        // SeekCompleted is published on every exit path except a
        // dispose-driven cancellation.
        if !self.active_token.is_cancelled() {
            self.scheduler.publish(PlayerEvent::SeekCompleted { seek_id });
        }

        match result {
            Ok(()) => {
                *self.last_position.lock() = position;
                Ok(position)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                log::error!("[Controller] seek failed: {}", e);
                self.publish_error("Seek Failed");
                Err(e)
            }
        }
    }

    async fn seek_stream_initialize(&self, token: &CancellationToken) -> PlayerResult<()> {
        self.disable_transfer();
        self.stop_clock();

        let mut tasks: Vec<JoinHandle<()>> = self
            .streams
            .iter()
            .filter_map(|s| s.value().stream.active_task())
            .collect();
        if let Some(clock) = self.take_clock_task() {
            tasks.push(clock);
        }
        for task in tasks {
            tokio::select! {
                _ = token.cancelled() => return Err(PlayerError::Cancelled),
                _ = task => {}
            }
        }
        Ok(())
    }

    async fn seek_pipeline(
        &self,
        seek_id: u64,
        position: Duration,
        token: &CancellationToken,
    ) -> PlayerResult<()> {
        let _permit = self.serializer.lock().await;

        // Install the new generation on every stream concurrently.
        let streams: Vec<Arc<EsStream>> = self
            .streams
            .iter()
            .map(|s| Arc::clone(&s.value().stream))
            .collect();
        let seeks = streams.iter().map(|stream| {
            let stream = Arc::clone(stream);
            let token = token.clone();
            async move { stream.seek(seek_id, position, &token).await }
        });
        let outcomes = futures::future::join_all(seeks).await;

        let mut restart_required = false;
        for outcome in outcomes {
            if outcome? == SeekOutcome::RestartRequired {
                restart_required = true;
            }
        }

        if restart_required {
            log::info!("[Controller] seek crossed a destructive reconfiguration");
            self.reconfigure_pipeline(token).await?;
            return Ok(());
        }

        self.prebuffer(token).await?;

        let player = self.current_player();
        let on_ready = self.ready_callback();
        tokio::select! {
            _ = token.cancelled() => return Err(PlayerError::Cancelled),
            result = player.seek(position, on_ready) => result?,
        }

        self.start_clock();
        *self.controller_state.lock() = ControllerState::Playing;
        self.set_player_state(PlayerState::Playing);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reconfigure
    // ─────────────────────────────────────────────────────────────────────

    async fn run_reconfigure(self: Arc<Self>) {
        let token = self.active_token.child_token();
        let result = {
            let _permit = self.serializer.lock().await;
            self.reconfigure_pipeline(&token).await
        };
        match result {
            Ok(()) => log::info!("[Controller] reconfiguration complete"),
            Err(e) if e.is_cancelled() => log::info!("[Controller] reconfiguration cancelled"),
            Err(e) => {
                log::error!("[Controller] reconfiguration failed: {}", e);
                self.disable_transfer();
                self.publish_error("Restart Error");
            }
        }
    }

    /// Replaces the native player and restarts playback. The caller must
    /// hold the operation serializer.
    async fn reconfigure_pipeline(&self, token: &CancellationToken) -> PlayerResult<()> {
        *self.controller_state.lock() = ControllerState::Reconfiguring;
        self.disable_transfer();
        self.prebuffer(token).await?;
        self.stop_clock();

        let mut tasks: Vec<JoinHandle<()>> = self
            .streams
            .iter()
            .filter_map(|s| s.value().stream.active_task())
            .collect();
        if let Some(clock) = self.take_clock_task() {
            tasks.push(clock);
        }
        for task in tasks {
            tokio::select! {
                _ = token.cancelled() => return Err(PlayerError::Cancelled),
                _ = task => {}
            }
        }

        // Tear down the old player; dropping the Arc releases the
        // platform handle.
        self.stop_native_pump();
        if let Err(e) = self.current_player().stop() {
            log::debug!("[Controller] old player stop suppressed: {}", e);
        }

        let new_player = self.factory.create()?;
        Self::open_native(new_player.as_ref(), self.display)?;
        *self.player.write() = Arc::clone(&new_player);
        self.spawn_native_pump();

        for slot in self.streams.iter() {
            let stream = &slot.value().stream;
            if stream.state() == EsStreamState::Disabled {
                continue;
            }
            stream.set_player(Arc::clone(&new_player))?;
            stream.reset_stream_config()?;
        }

        let on_ready = self.ready_callback();
        tokio::select! {
            _ = token.cancelled() => return Err(PlayerError::Cancelled),
            result = new_player.prepare(on_ready) => result?,
        }

        self.play()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Clock generator
    // ─────────────────────────────────────────────────────────────────────

    fn start_clock(&self) {
        let mut clock = self.clock.lock();
        if clock.as_ref().is_some_and(TaskSlot::is_running) {
            return;
        }

        let token = self.active_token.child_token();
        let task_token = token.clone();
        let controller = self.weak_self.clone();
        let poll_interval = self.config.clock_poll_interval;
        let ticks_per_report = (self.config.buffer_event_interval.as_millis()
            / self.config.clock_poll_interval.as_millis().max(1))
        .max(1) as u64;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut consecutive_errors: u32 = 0;
            let mut tick: u64 = 0;
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                match controller.current_player().playing_time() {
                    Ok(position) => {
                        consecutive_errors = 0;
                        *controller.last_position.lock() = position;
                        controller
                            .scheduler
                            .publish(PlayerEvent::TimeUpdated { position });
                    }
                    Err(e) => {
                        consecutive_errors += 1;
                        log::debug!("[Clock] transient read error: {}", e);
                        if consecutive_errors >= CLOCK_MAX_READ_ERRORS {
                            controller.disable_transfer();
                            controller.publish_error("Playback Error");
                            break;
                        }
                    }
                }
                tick += 1;
                if tick % ticks_per_report == 0 {
                    controller.report_buffer_levels();
                }
            }
            log::debug!("[Clock] generator stopped");
        });

        *clock = Some(TaskSlot { token, handle });
    }

    fn stop_clock(&self) {
        if let Some(slot) = self.clock.lock().as_ref() {
            slot.token.cancel();
        }
    }

    fn take_clock_task(&self) -> Option<JoinHandle<()>> {
        self.clock.lock().take().map(|slot| {
            slot.token.cancel();
            slot.handle
        })
    }

    /// Publishes the current buffer-fill hints for streams below target.
    fn report_buffer_levels(&self) {
        for slot in self.streams.iter() {
            let buffer = &slot.value().buffer;
            if buffer.needs_more_data() {
                self.scheduler.publish(PlayerEvent::DataNeeded {
                    request: buffer.data_request(),
                });
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Native event handling
    // ─────────────────────────────────────────────────────────────────────

    fn spawn_native_pump(&self) {
        let mut rx = self.current_player().subscribe();
        let token = self.active_token.child_token();
        let task_token = token.clone();
        let controller = self.weak_self.clone();

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = task_token.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("[Controller] native events lagged by {}", n);
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                controller.dispatch_native_event(event);
            }
        });

        *self.native_pump.lock() = Some(TaskSlot { token, handle });
    }

    fn stop_native_pump(&self) {
        if let Some(slot) = self.native_pump.lock().take() {
            slot.token.cancel();
        }
    }

    /// Marshals a native event onto the scheduler, then reacts to it.
    fn dispatch_native_event(&self, event: NativeEvent) {
        let controller = self.weak_self.clone();
        self.scheduler.run_on_scheduler(move || {
            let Some(controller) = controller.upgrade() else {
                return;
            };
            match event {
                NativeEvent::BufferStatus { kind, status } => match status {
                    BufferStatus::Underrun => {
                        if let Some(slot) = controller.streams.get(&kind) {
                            slot.value().stream.wakeup();
                        }
                    }
                    BufferStatus::Overrun => {
                        log::debug!("[Controller] {} decoder overrun noted", kind.as_str());
                    }
                },
                NativeEvent::EndOfStream => controller.handle_eos(),
                NativeEvent::Error(message) => controller.handle_native_error(message),
            }
        });
    }

    /// EOS from the native player is global: every stream is done.
    fn handle_eos(&self) {
        log::info!("[Controller] end of stream reached");
        self.disable_transfer();
        self.disable_input();
        self.stop_clock();
        self.set_player_state(PlayerState::Completed);
        self.scheduler.publish(PlayerEvent::EndOfStream);
    }

    fn handle_native_error(&self, message: String) {
        log::error!("[Controller] native player error: {}", message);
        self.disable_transfer();
        self.disable_input();
        self.stop_clock();
        *self.player_state.lock() = PlayerState::Error;
        self.publish_error(message);
    }

    /// Reports a provider-side stream failure: transfer stops and the
    /// error is published.
    pub(crate) fn report_playback_error(&self, message: String) {
        self.disable_transfer();
        self.stop_clock();
        *self.player_state.lock() = PlayerState::Error;
        self.publish_error(message);
    }

    fn spawn_signal_pump(&self, mut rx: mpsc::UnboundedReceiver<StreamSignal>) {
        let token = self.active_token.child_token();
        let task_token = token.clone();
        let controller = self.weak_self.clone();

        let handle = tokio::spawn(async move {
            loop {
                let signal = tokio::select! {
                    _ = task_token.cancelled() => break,
                    signal = rx.recv() => match signal {
                        Some(signal) => signal,
                        None => break,
                    },
                };
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                match signal {
                    StreamSignal::Reconfigure { kind } => {
                        log::info!(
                            "[Controller] {} requested reconfiguration",
                            kind.as_str()
                        );
                        let controller = Arc::clone(&controller);
                        tokio::spawn(async move { controller.run_reconfigure().await });
                    }
                    StreamSignal::PlaybackError { kind, message } => {
                        log::error!(
                            "[Controller] {} transfer error: {}",
                            kind.as_str(),
                            message
                        );
                        controller.report_playback_error(message);
                    }
                }
            }
        });

        *self.signal_pump.lock() = Some(TaskSlot { token, handle });
    }

    // ─────────────────────────────────────────────────────────────────────
    // Dispose
    // ─────────────────────────────────────────────────────────────────────

    /// Releases every owned resource: cancels in-flight operations, parks
    /// and awaits all tasks, closes storage and the event subject.
    /// Idempotent; further public calls fail with `Disposed`.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("[Controller] disposing");
        self.active_token.cancel();

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        for slot in self.streams.iter() {
            slot.value().stream.stop();
            if let Some(task) = slot.value().stream.active_task() {
                tasks.push(task);
            }
        }
        if let Some(clock) = self.take_clock_task() {
            tasks.push(clock);
        }
        if let Some(slot) = self.native_pump.lock().take() {
            slot.token.cancel();
            tasks.push(slot.handle);
        }
        if let Some(slot) = self.signal_pump.lock().take() {
            slot.token.cancel();
            tasks.push(slot.handle);
        }
        for task in tasks {
            let _ = task.await;
        }

        if let Err(e) = self.current_player().stop() {
            log::trace!("[Controller] final stop suppressed: {}", e);
        }
        self.storage.dispose();
        self.scheduler.close().await;
        *self.controller_state.lock() = ControllerState::Disposed;
        log::info!("[Controller] disposed");
    }
}

#[async_trait]
impl Player for StreamController {
    fn play(&self) -> PlayerResult<()> {
        StreamController::play(self)
    }

    fn pause(&self) -> PlayerResult<()> {
        StreamController::pause(self)
    }

    fn stop(&self) -> PlayerResult<()> {
        StreamController::stop(self)
    }

    async fn seek(&self, position: Duration) -> PlayerResult<Duration> {
        StreamController::seek(self, position).await
    }

    fn set_stream_config(&self, config: StreamConfig) -> PlayerResult<()> {
        StreamController::set_stream_config(self, config)
    }

    fn append_packet(&self, packet: Packet) -> PlayerResult<()> {
        StreamController::append_packet(self, packet)
    }

    fn set_duration(&self, duration: Duration) -> PlayerResult<()> {
        *self.clip_duration.lock() = Some(duration);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        StreamController::subscribe(self)
    }

    fn client(&self) -> Option<Arc<dyn PlayerClient>> {
        self.client.read().clone()
    }

    fn set_client(&self, client: Arc<dyn PlayerClient>) {
        *self.client.write() = Some(client);
    }
}
