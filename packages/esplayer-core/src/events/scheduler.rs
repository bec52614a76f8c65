//! Single-threaded event dispatch.
//!
//! The scheduler is the nominated dispatch context of the controller: every
//! event publication and every closure marshaled from an untrusted platform
//! callback is funneled through one mpsc queue drained by a single
//! dispatcher task. Subscribers therefore observe events in publication
//! order and never concurrently.

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::PlayerEvent;

/// Work item accepted by the dispatcher task.
enum Dispatch {
    /// Publish an event to all subscribers.
    Event(PlayerEvent),
    /// Run a closure on the dispatcher task. Used to marshal native
    /// callbacks onto the scheduler before they touch controller state.
    Task(Box<dyn FnOnce() + Send>),
}

/// Ordered, single-threaded event subject.
///
/// Publication is thread-safe and non-blocking; delivery happens on the
/// internal dispatcher task in publication order.
pub struct EventScheduler {
    /// Ingress queue. `None` after close; publications are then dropped.
    tx: RwLock<Option<mpsc::UnboundedSender<Dispatch>>>,
    subject: broadcast::Sender<PlayerEvent>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl EventScheduler {
    /// Creates a scheduler and spawns its dispatcher task.
    ///
    /// `capacity` bounds the broadcast channel; a subscriber that lags
    /// beyond it loses the oldest events, which is logged and tolerated.
    pub fn new(capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Dispatch>();
        let (subject, _) = broadcast::channel(capacity);
        let subject_tx = subject.clone();

        let dispatcher = tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                match item {
                    Dispatch::Event(event) => {
                        tracing::trace!(?event, "dispatch");
                        if let Err(e) = subject_tx.send(event) {
                            log::trace!("[Events] No subscribers: {}", e);
                        }
                    }
                    Dispatch::Task(task) => task(),
                }
            }
            log::debug!("[Events] Dispatcher drained and exiting");
        });

        Self {
            tx: RwLock::new(Some(tx)),
            subject,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Queues an event for ordered delivery.
    ///
    /// Safe to call from any thread, including inside observer callbacks.
    /// After `close()` the event is silently dropped.
    pub fn publish(&self, event: PlayerEvent) {
        if let Some(tx) = self.tx.read().as_ref() {
            let _ = tx.send(Dispatch::Event(event));
        } else {
            log::trace!("[Events] Publish after close dropped");
        }
    }

    /// Runs a closure on the dispatcher task, after all previously queued
    /// events.
    ///
    /// This is the marshaling point for callbacks arriving from unknown
    /// platform threads.
    pub fn run_on_scheduler(&self, task: impl FnOnce() + Send + 'static) {
        if let Some(tx) = self.tx.read().as_ref() {
            let _ = tx.send(Dispatch::Task(Box::new(task)));
        } else {
            log::trace!("[Events] Marshaled task after close dropped");
        }
    }

    /// Subscribes to the event subject.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.subject.subscribe()
    }

    /// Closes the ingress queue and waits for queued work to drain.
    ///
    /// Idempotent; publications racing with close are dropped.
    pub async fn close(&self) {
        let tx = self.tx.write().take();
        drop(tx);
        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
