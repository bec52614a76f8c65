//! Subscription bus between a data provider and a player controller.
//!
//! Two subscription halves are maintained: player events flowing to the
//! provider's feedback sinks, and provider events flowing into the
//! controller. The embedded [`PlayerClient`] suspends both halves while a
//! client-initiated seek repositions the producer, and rebuilds them on
//! every exit path.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{PlayerError, PlayerResult};
use crate::events::PlayerEvent;
use crate::player::PlayerClient;
use crate::player_controller::PlayerController;
use crate::provider::DataProvider;

/// A forwarding task plus the token that stops it.
struct Subscription {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SubscriptionHalves {
    /// PlayerController → DataProvider feedback.
    player_half: Option<Subscription>,
    /// DataProvider → PlayerController media flow.
    provider_half: Option<Subscription>,
}

/// Connects a [`DataProvider`] and a [`PlayerController`] pair.
///
/// Holds non-owning references to both; owns only its subscription
/// handles. The halves are rebuilt on every connect and around every
/// client-initiated seek.
pub struct DataProviderConnector {
    controller: Arc<PlayerController>,
    provider: Arc<dyn DataProvider>,
    halves: tokio::sync::Mutex<SubscriptionHalves>,
}

impl std::fmt::Debug for DataProviderConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataProviderConnector").finish()
    }
}

impl DataProviderConnector {
    /// Connects the pair and installs the seek client on the player.
    ///
    /// # Errors
    /// `InvalidArgument` when either collaborator is missing.
    pub async fn connect(
        controller: Option<Arc<PlayerController>>,
        provider: Option<Arc<dyn DataProvider>>,
    ) -> PlayerResult<Arc<Self>> {
        let controller = controller.ok_or_else(|| {
            PlayerError::InvalidArgument("player controller is required".to_string())
        })?;
        let provider = provider.ok_or_else(|| {
            PlayerError::InvalidArgument("data provider is required".to_string())
        })?;

        let connector = Arc::new(Self {
            controller,
            provider,
            halves: tokio::sync::Mutex::new(SubscriptionHalves::default()),
        });
        let client: Arc<dyn PlayerClient> = Arc::new(ConnectorClient {
            connector: Arc::downgrade(&connector),
        });
        connector.controller.set_client(client);

        {
            let mut halves = connector.halves.lock().await;
            connector.build_subscriptions(&mut halves);
        }
        log::info!("[Connector] provider and player connected");
        Ok(connector)
    }

    /// Tears both subscription halves down.
    pub async fn disconnect(&self) {
        let mut halves = self.halves.lock().await;
        Self::teardown(&mut halves).await;
        log::info!("[Connector] disconnected");
    }

    async fn teardown(halves: &mut SubscriptionHalves) {
        for subscription in [halves.player_half.take(), halves.provider_half.take()]
            .into_iter()
            .flatten()
        {
            subscription.token.cancel();
            let _ = subscription.handle.await;
        }
    }

    fn build_subscriptions(&self, halves: &mut SubscriptionHalves) {
        halves.player_half = Some(self.spawn_player_half());
        halves.provider_half = Some(self.spawn_provider_half());
    }

    /// Forwards player events to the provider's feedback sinks.
    fn spawn_player_half(&self) -> Subscription {
        let mut rx = self.controller.subscribe();
        let provider = Arc::clone(&self.provider);
        let token = CancellationToken::new();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = task_token.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("[Connector] player events lagged by {}", n);
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };
                match event {
                    PlayerEvent::TimeUpdated { position } => provider.on_time_updated(position),
                    PlayerEvent::StateChanged { state } => provider.on_state_changed(state),
                    PlayerEvent::DataNeeded { request } => provider.on_data_state_changed(request),
                    PlayerEvent::BufferingStateChanged { buffering } => {
                        provider.on_buffering_state_changed(buffering)
                    }
                    _ => {}
                }
            }
        });

        Subscription { token, handle }
    }

    /// Forwards provider events into the controller, marshaled onto the
    /// event scheduler so handlers run single-threaded.
    fn spawn_provider_half(&self) -> Subscription {
        let mut rx = self.provider.subscribe();
        let controller = Arc::clone(&self.controller);
        let scheduler = Arc::clone(controller.player().events());
        let token = CancellationToken::new();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = task_token.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("[Connector] provider events lagged by {}", n);
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };
                let controller = Arc::clone(&controller);
                scheduler.run_on_scheduler(move || controller.handle_provider_event(event));
            }
        });

        Subscription { token, handle }
    }

    /// Suspends both halves, repositions the producer, rebuilds.
    async fn client_seek(
        &self,
        position: Duration,
        token: CancellationToken,
    ) -> PlayerResult<Duration> {
        let mut halves = self.halves.lock().await;
        Self::teardown(&mut halves).await;
        log::info!("[Connector] subscriptions suspended for seek");

        let result = tokio::select! {
            _ = token.cancelled() => Err(PlayerError::Cancelled),
            result = self.provider.seek(position) => result,
        };

        // Rebuilt on success, failure, and cancellation alike.
        self.build_subscriptions(&mut halves);
        log::info!("[Connector] subscriptions rebuilt after seek");
        result
    }
}

/// The player-side seek client embedded in the connector.
struct ConnectorClient {
    connector: Weak<DataProviderConnector>,
}

#[async_trait]
impl PlayerClient for ConnectorClient {
    async fn seek(&self, position: Duration, token: CancellationToken) -> PlayerResult<Duration> {
        let connector = self.connector.upgrade().ok_or_else(|| {
            PlayerError::InvalidState("connector no longer alive".to_string())
        })?;
        connector.client_seek(position, token).await
    }
}
