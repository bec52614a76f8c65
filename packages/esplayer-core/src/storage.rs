//! Per-stream packet FIFO with duration accounting.
//!
//! Producers enqueue from the event scheduler; the single consumer is the
//! stream's transfer task. The stored-duration estimate (last PTS in minus
//! first PTS not yet out) is what the prebuffer loop polls before the
//! native player is prepared.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{PlayerError, PlayerResult};
use crate::packet::{Packet, PacketPayload, StreamKind};

/// Queue contents plus the PTS bookkeeping that must stay consistent
/// with them.
#[derive(Default)]
struct SlotQueue {
    packets: VecDeque<Packet>,
    /// PTS of the newest data packet enqueued.
    last_pts_in: Option<Duration>,
    /// PTS of the oldest data packet not yet consumed.
    pts_out: Option<Duration>,
}

impl SlotQueue {
    fn stored_duration(&self) -> Duration {
        match (self.last_pts_in, self.pts_out) {
            (Some(last_in), Some(out)) => last_in.saturating_sub(out),
            _ => Duration::ZERO,
        }
    }

    /// Recomputes PTS bookkeeping from the remaining packets after a
    /// generation-based discard.
    fn recompute_bounds(&mut self) {
        let mut data_pts = self
            .packets
            .iter()
            .filter(|p| matches!(p.payload, PacketPayload::Data(_)))
            .map(|p| p.pts);
        self.pts_out = data_pts.next();
        self.last_pts_in = data_pts.last().or(self.pts_out);
    }
}

/// One stream's FIFO slot.
struct Slot {
    queue: Mutex<SlotQueue>,
    arrival: Notify,
    /// Set by `mark_complete`; `take` drains the queue then fails with
    /// `StorageClosed`.
    closed: AtomicBool,
    /// Set by `disable`; further `add` calls are rejected.
    disabled: AtomicBool,
}

impl Slot {
    fn new() -> Self {
        Self {
            queue: Mutex::new(SlotQueue::default()),
            arrival: Notify::new(),
            closed: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
        }
    }
}

/// Per-stream packet FIFO shared between the producer side and the
/// transfer tasks.
///
/// One slot exists per initialized [`StreamKind`] for the controller's
/// lifetime.
pub struct PacketStorage {
    slots: [OnceLock<Slot>; StreamKind::COUNT],
    disposed: AtomicBool,
}

impl PacketStorage {
    /// Creates storage with no initialized streams.
    pub fn new() -> Self {
        Self {
            slots: [OnceLock::new(), OnceLock::new()],
            disposed: AtomicBool::new(false),
        }
    }

    fn slot(&self, kind: StreamKind) -> PlayerResult<&Slot> {
        self.slots[kind.index()]
            .get()
            .ok_or_else(|| PlayerError::InvalidArgument(format!("{} not initialized", kind.as_str())))
    }

    /// Initializes the FIFO for one stream kind.
    ///
    /// # Errors
    /// `InvalidArgument` if the kind was already initialized.
    pub fn init(&self, kind: StreamKind) -> PlayerResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(PlayerError::Disposed);
        }
        self.slots[kind.index()]
            .set(Slot::new())
            .map_err(|_| PlayerError::InvalidArgument(format!("{} already initialized", kind.as_str())))
    }

    /// Returns whether the kind has been initialized.
    #[must_use]
    pub fn is_initialized(&self, kind: StreamKind) -> bool {
        self.slots[kind.index()].get().is_some()
    }

    /// Enqueues a packet for its stream.
    ///
    /// # Errors
    /// `InvalidState` when the stream is disabled or completed;
    /// `InvalidArgument` when it was never initialized.
    pub fn add(&self, packet: Packet) -> PlayerResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(PlayerError::Disposed);
        }
        let slot = self.slot(packet.kind)?;
        if slot.disabled.load(Ordering::SeqCst) {
            return Err(PlayerError::InvalidState(format!(
                "{} input disabled",
                packet.kind.as_str()
            )));
        }
        if slot.closed.load(Ordering::SeqCst) {
            return Err(PlayerError::InvalidState(format!(
                "{} input completed",
                packet.kind.as_str()
            )));
        }

        {
            let mut queue = slot.queue.lock();
            if matches!(packet.payload, PacketPayload::Data(_)) {
                queue.last_pts_in = Some(packet.pts);
                if queue.pts_out.is_none() {
                    queue.pts_out = Some(packet.pts);
                }
            }
            queue.packets.push_back(packet);
        }
        slot.arrival.notify_one();
        Ok(())
    }

    /// Dequeues the next packet, suspending until one arrives.
    ///
    /// # Errors
    /// `StorageClosed` once the queue is drained after `mark_complete`
    /// (or dispose).
    pub async fn take(&self, kind: StreamKind) -> PlayerResult<Packet> {
        let slot = self.slot(kind)?;
        loop {
            let notified = slot.arrival.notified();
            tokio::pin!(notified);
            {
                let mut queue = slot.queue.lock();
                if let Some(packet) = queue.packets.pop_front() {
                    if matches!(packet.payload, PacketPayload::Data(_)) {
                        queue.pts_out = Some(packet.pts);
                    }
                    return Ok(packet);
                }
                if slot.closed.load(Ordering::SeqCst) || self.disposed.load(Ordering::SeqCst) {
                    return Err(PlayerError::StorageClosed);
                }
            }
            notified.as_mut().await;
        }
    }

    /// Returns the stored duration estimate for one stream.
    ///
    /// Zero for uninitialized streams so prebuffer polling can run before
    /// the first packet arrives.
    #[must_use]
    pub fn duration(&self, kind: StreamKind) -> Duration {
        match self.slots[kind.index()].get() {
            Some(slot) => slot.queue.lock().stored_duration(),
            None => Duration::ZERO,
        }
    }

    /// Number of packets currently queued for one stream.
    #[must_use]
    pub fn len(&self, kind: StreamKind) -> usize {
        match self.slots[kind.index()].get() {
            Some(slot) => slot.queue.lock().packets.len(),
            None => 0,
        }
    }

    /// Discards all queued packets and resets the duration accounting.
    pub fn clear(&self, kind: StreamKind) -> PlayerResult<()> {
        let slot = self.slot(kind)?;
        let mut queue = slot.queue.lock();
        queue.packets.clear();
        queue.last_pts_in = None;
        queue.pts_out = None;
        Ok(())
    }

    /// Discards queued packets whose generation predates `generation`.
    ///
    /// Used by the seek pipeline: everything up to the first packet of the
    /// target generation is stale.
    pub fn drop_until_generation(&self, kind: StreamKind, generation: u64) -> PlayerResult<usize> {
        let slot = self.slot(kind)?;
        let mut queue = slot.queue.lock();
        let before = queue.packets.len();
        while queue
            .packets
            .front()
            .is_some_and(|p| p.generation < generation)
        {
            queue.packets.pop_front();
        }
        let dropped = before - queue.packets.len();
        if dropped > 0 {
            queue.recompute_bounds();
            log::debug!(
                "[Storage] Dropped {} stale {} packets below generation {}",
                dropped,
                kind.as_str(),
                generation
            );
        }
        Ok(dropped)
    }

    /// Marks the stream complete: queued packets still drain, then `take`
    /// fails with `StorageClosed`.
    pub fn mark_complete(&self, kind: StreamKind) -> PlayerResult<()> {
        let slot = self.slot(kind)?;
        slot.closed.store(true, Ordering::SeqCst);
        slot.arrival.notify_waiters();
        Ok(())
    }

    /// Rejects further input for the stream. Terminal.
    pub fn disable(&self, kind: StreamKind) -> PlayerResult<()> {
        let slot = self.slot(kind)?;
        slot.disabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Closes every initialized stream and releases queued packets.
    /// Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        for slot in self.slots.iter().filter_map(OnceLock::get) {
            slot.closed.store(true, Ordering::SeqCst);
            slot.queue.lock().packets.clear();
            slot.arrival.notify_waiters();
        }
    }
}

impl Default for PacketStorage {
    fn default() -> Self {
        Self::new()
    }
}
