//! Glue between the data-provider side and the stream controller.
//!
//! Routes provider events into per-stream storage and the core, stamps
//! packets with the current seek generation and DRM session, clamps and
//! serializes external seeks, and turns provider buffering reports into
//! pause/resume with coarse progress events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::controller::StreamController;
use crate::error::{PlayerError, PlayerResult};
use crate::events::PlayerEvent;
use crate::packet::{
    DrmDescription, DrmInitData, DrmSessionHandle, Packet, PacketPayload, PlayerState, StreamKind,
};
use crate::player::{Player, PlayerClient};
use crate::provider::ProviderEvent;

/// Provider-facing playback controller.
pub struct PlayerController {
    core: Arc<StreamController>,
    /// Guards against re-entrant external seeks.
    seeking: AtomicBool,
    /// Cancellation scope handed to the client-side seek.
    token: CancellationToken,
    /// DRM init data per stream, retained until a configuration arrives.
    drm_init: Mutex<HashMap<StreamKind, DrmInitData>>,
    /// Active decryption session per stream, stamped onto data packets.
    drm_sessions: Mutex<HashMap<StreamKind, DrmSessionHandle>>,
    next_drm_session: AtomicU64,
}

impl PlayerController {
    /// Creates the glue layer over a stream controller.
    pub fn new(core: Arc<StreamController>) -> Self {
        Self {
            core,
            seeking: AtomicBool::new(false),
            token: CancellationToken::new(),
            drm_init: Mutex::new(HashMap::new()),
            drm_sessions: Mutex::new(HashMap::new()),
            next_drm_session: AtomicU64::new(0),
        }
    }

    /// The underlying playback core.
    #[must_use]
    pub fn player(&self) -> &Arc<StreamController> {
        &self.core
    }

    /// Subscribes to the player event subject.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.core.subscribe()
    }

    /// Last published playback state.
    #[must_use]
    pub fn state(&self) -> PlayerState {
        self.core.state()
    }

    /// Current playback position.
    #[must_use]
    pub fn current_time(&self) -> Duration {
        self.core.current_time()
    }

    /// Clip duration, once announced by the provider.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.core.duration()
    }

    /// Installs the data-provider-side seek client.
    pub fn set_client(&self, client: Arc<dyn PlayerClient>) {
        self.core.set_client(client);
    }

    /// External seek entry point.
    ///
    /// Rejects re-entrant calls, clamps the target to the known duration,
    /// repositions the producer through the installed client (which
    /// suspends both subscription halves), then runs the core seek
    /// pipeline under the same generation.
    pub async fn seek(&self, to: Duration) -> PlayerResult<Duration> {
        if self.seeking.swap(true, Ordering::SeqCst) {
            return Err(PlayerError::InvalidState(
                "seek already in progress".to_string(),
            ));
        }
        let result = self.seek_inner(to).await;
        self.seeking.store(false, Ordering::SeqCst);
        result
    }

    async fn seek_inner(&self, to: Duration) -> PlayerResult<Duration> {
        let clamped = to.min(self.core.duration().unwrap_or(Duration::ZERO));
        log::info!("[PlayerController] seek to {:?} (requested {:?})", clamped, to);

        // Advance the generation before the producer acknowledges, so
        // packets published after the acknowledge carry it.
        let seek_id = self.core.begin_seek_generation();
        let position = match self.core.client() {
            Some(client) => client.seek(clamped, self.token.child_token()).await?,
            None => clamped,
        };
        self.core.seek_with_generation(seek_id, position).await
    }

    /// Routes one provider event into the pipeline.
    pub fn handle_provider_event(&self, event: ProviderEvent) {
        match event {
            ProviderEvent::ClipDurationChanged(duration) => {
                log::info!("[PlayerController] clip duration {:?}", duration);
                if let Err(e) = self.core.set_duration(duration) {
                    log::debug!("[PlayerController] duration not applied: {}", e);
                }
            }
            ProviderEvent::DrmInitDataFound(init) => {
                log::info!(
                    "[PlayerController] {} drm init data ({})",
                    init.kind.as_str(),
                    init.scheme
                );
                self.drm_init.lock().insert(init.kind, init);
            }
            ProviderEvent::SetDrmConfiguration(description) => self.configure_drm(&description),
            ProviderEvent::StreamConfigReady(config) => {
                if let Err(e) = self.core.set_stream_config(config) {
                    log::error!("[PlayerController] config rejected: {}", e);
                    self.core.report_playback_error(e.to_string());
                }
            }
            ProviderEvent::PacketReady(packet) => self.append(packet),
            ProviderEvent::StreamError(message) => {
                log::error!("[PlayerController] stream error: {}", message);
                self.core.report_playback_error(message);
            }
            ProviderEvent::BufferingStateChanged(buffering) => {
                self.on_buffering_state_changed(buffering)
            }
        }
    }

    /// Stamps and appends one packet.
    fn append(&self, packet: Packet) {
        let mut packet = packet.with_generation(self.core.current_generation());
        if packet.drm.is_none() && matches!(packet.payload, PacketPayload::Data(_)) {
            if let Some(handle) = self.drm_sessions.lock().get(&packet.kind) {
                packet = packet.with_drm(*handle);
            }
        }
        if let Err(e) = self.core.append_packet(packet) {
            log::debug!("[PlayerController] packet dropped: {}", e);
        }
    }

    /// Opens a decryption session for every stream whose init data matches
    /// the configured scheme. Key exchange itself is a collaborator
    /// concern; only the handle travels with the packets.
    fn configure_drm(&self, description: &DrmDescription) {
        let init = self.drm_init.lock();
        let mut sessions = self.drm_sessions.lock();
        for (kind, data) in init.iter() {
            if data.scheme == description.scheme {
                let handle =
                    DrmSessionHandle(self.next_drm_session.fetch_add(1, Ordering::SeqCst) + 1);
                sessions.insert(*kind, handle);
                log::info!(
                    "[PlayerController] {} drm session {:?} ({})",
                    kind.as_str(),
                    handle,
                    description.license_url
                );
            }
        }
    }

    /// Provider-side buffering gates playback: pause with progress 0 while
    /// buffering, resume with progress 100 when done.
    fn on_buffering_state_changed(&self, buffering: bool) {
        let events = self.core.events();
        events.publish(PlayerEvent::BufferingStateChanged { buffering });
        if buffering {
            if let Err(e) = self.core.pause() {
                log::debug!("[PlayerController] buffering pause suppressed: {}", e);
            }
            events.publish(PlayerEvent::BufferingProgress { percent: 0 });
        } else {
            if let Err(e) = self.core.play() {
                log::debug!("[PlayerController] buffering resume suppressed: {}", e);
            }
            events.publish(PlayerEvent::BufferingProgress { percent: 100 });
        }
    }
}
