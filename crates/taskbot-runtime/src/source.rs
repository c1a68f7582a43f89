//! In-process update source.
//!
//! [`ChannelSource`] is an [`UpdateSource`] fed through an mpsc channel. It is
//! what the demo bot's console mode and the runtime tests poll from, and it
//! implements the redelivery contract a real long-polling transport has:
//! every handed-out update stays pending until acknowledged, and an update
//! acknowledged with [`Delivery::Retry`] is handed out again, up to
//! `max_redeliveries` times.
//!
//! ```rust,ignore
//! let (sender, source) = ChannelSource::new(64, 3);
//! sender.send(Event::message(1, 1, "/start", json!({}))).await?;
//! drop(sender); // the source reports `Closed` once everything is acked
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use taskbot_core::{Delivery, Event, TransportError, TransportResult, Update, UpdateSource};
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc};
use tracing::{debug, trace, warn};

const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Producer half of a [`ChannelSource`].
///
/// Cloneable; the source is closed once every sender is dropped.
#[derive(Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<Update>,
    next_id: Arc<AtomicU64>,
}

impl ChannelSender {
    /// Queues an event under the next update id and returns that id.
    pub async fn send(&self, event: Event) -> TransportResult<u64> {
        let update_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.send_update(Update { update_id, event }).await?;
        Ok(update_id)
    }

    /// Queues an update with a caller-chosen id.
    pub async fn send_update(&self, update: Update) -> TransportResult<()> {
        self.tx
            .send(update)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

impl std::fmt::Debug for ChannelSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSender")
            .field("closed", &self.tx.is_closed())
            .finish_non_exhaustive()
    }
}

struct Pending {
    update: Update,
    redeliveries: u32,
}

#[derive(Default)]
struct Ledger {
    /// Handed out and not yet acknowledged.
    pending: HashMap<u64, Pending>,
    /// Acknowledged with `Retry`, waiting to be handed out again.
    redeliver: VecDeque<u64>,
}

/// An mpsc-backed [`UpdateSource`] with at-least-once redelivery.
pub struct ChannelSource {
    rx: AsyncMutex<mpsc::Receiver<Update>>,
    ledger: Mutex<Ledger>,
    redelivery: Notify,
    max_redeliveries: u32,
    poll_timeout: Duration,
}

impl ChannelSource {
    /// Creates a source buffering up to `capacity` unpolled updates.
    pub fn new(capacity: usize, max_redeliveries: u32) -> (ChannelSender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sender = ChannelSender {
            tx,
            next_id: Arc::new(AtomicU64::new(0)),
        };
        let source = Self {
            rx: AsyncMutex::new(rx),
            ledger: Mutex::new(Ledger::default()),
            redelivery: Notify::new(),
            max_redeliveries,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        };
        (sender, source)
    }

    /// How long an idle poll waits before returning an empty batch.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Number of updates handed out and not yet acknowledged.
    pub fn pending(&self) -> usize {
        self.ledger.lock().pending.len()
    }

    fn take_redeliveries(&self, max: usize) -> Vec<Update> {
        let mut ledger = self.ledger.lock();
        let Ledger { pending, redeliver } = &mut *ledger;
        let mut batch = Vec::new();
        while batch.len() < max {
            let Some(update_id) = redeliver.pop_front() else {
                break;
            };
            if let Some(entry) = pending.get(&update_id) {
                batch.push(entry.update.clone());
            }
        }
        batch
    }

    fn track(&self, batch: &[Update]) {
        let mut ledger = self.ledger.lock();
        for update in batch {
            ledger
                .pending
                .entry(update.update_id)
                .or_insert_with(|| Pending {
                    update: update.clone(),
                    redeliveries: 0,
                });
        }
    }
}

#[async_trait]
impl UpdateSource for ChannelSource {
    async fn poll(&self, max: usize) -> TransportResult<Vec<Update>> {
        let max = max.max(1);
        let mut batch = self.take_redeliveries(max);
        let mut rx = self.rx.lock().await;

        if batch.is_empty() {
            tokio::select! {
                biased;
                received = rx.recv() => match received {
                    Some(update) => batch.push(update),
                    None if self.pending() > 0 => {
                        // Closed, but acks still in flight may ask for redelivery.
                        let _ = tokio::time::timeout(self.poll_timeout, self.redelivery.notified()).await;
                        batch = self.take_redeliveries(max);
                    }
                    None => return Err(TransportError::Closed),
                },
                _ = self.redelivery.notified() => batch = self.take_redeliveries(max),
                _ = tokio::time::sleep(self.poll_timeout) => {}
            }
        }

        while batch.len() < max {
            match rx.try_recv() {
                Ok(update) => batch.push(update),
                Err(_) => break,
            }
        }
        drop(rx);

        self.track(&batch);
        trace!(count = batch.len(), "Polled updates");
        Ok(batch)
    }

    async fn ack(&self, update_id: u64, delivery: Delivery) -> TransportResult<()> {
        let mut guard = self.ledger.lock();
        let ledger = &mut *guard;
        let Some(entry) = ledger.pending.get_mut(&update_id) else {
            return Err(TransportError::Ack {
                update_id,
                reason: "update is not pending".to_string(),
            });
        };

        match delivery {
            Delivery::Processed => {
                ledger.pending.remove(&update_id);
            }
            Delivery::Retry if entry.redeliveries < self.max_redeliveries => {
                entry.redeliveries += 1;
                debug!(update_id, attempt = entry.redeliveries, "Update queued for redelivery");
                ledger.redeliver.push_back(update_id);
            }
            Delivery::Retry => {
                warn!(
                    update_id,
                    max_redeliveries = self.max_redeliveries,
                    "Redelivery limit reached, dropping update"
                );
                ledger.pending.remove(&update_id);
            }
        }
        drop(guard);
        // Wakes a poll waiting on redelivery or on the last pending ack.
        self.redelivery.notify_one();
        Ok(())
    }
}

impl std::fmt::Debug for ChannelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSource")
            .field("pending", &self.pending())
            .field("max_redeliveries", &self.max_redeliveries)
            .finish_non_exhaustive()
    }
}
