//! Per-key serialization of dispatch cycles.
//!
//! Cycles for the same [`FsmKey`] run one at a time, in the order they were
//! enqueued. Cycles for different keys never wait on each other.
//!
//! Each key keeps a tail: the completion signal of the most recently
//! enqueued ticket. A new ticket takes the current tail as its predecessor
//! and becomes the tail itself, which forms a FIFO chain without any
//! per-key task.
//!
//! ```rust,ignore
//! let mut ticket = sequencer.enqueue(key); // synchronous: fixes the order
//! ticket.acquire().await;                  // waits for the predecessor
//! run_cycle().await;
//! drop(ticket);                            // releases the successor
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::trace;

use taskbot_core::FsmKey;

struct Tail {
    generation: u64,
    done: oneshot::Receiver<()>,
}

#[derive(Default)]
struct Inner {
    tails: Mutex<HashMap<FsmKey, Tail>>,
    generation: AtomicU64,
}

/// Hands out per-key FIFO tickets.
#[derive(Clone, Default)]
pub struct KeySequencer {
    inner: Arc<Inner>,
}

impl KeySequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a place in `key`'s queue.
    ///
    /// Order is fixed at this call, not when the ticket is awaited.
    pub fn enqueue(&self, key: FsmKey) -> Ticket {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let previous = self.inner.tails.lock().insert(
            key,
            Tail {
                generation,
                done: rx,
            },
        );
        trace!(%key, generation, queued = previous.is_some(), "Ticket issued");
        Ticket {
            key,
            generation,
            previous: previous.map(|t| t.done),
            done: Some(tx),
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of keys with a cycle queued or running.
    pub fn active_keys(&self) -> usize {
        self.inner.tails.lock().len()
    }
}

impl std::fmt::Debug for KeySequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySequencer")
            .field("active_keys", &self.active_keys())
            .finish()
    }
}

/// A place in one key's queue. Dropping it lets the next ticket run.
pub struct Ticket {
    key: FsmKey,
    generation: u64,
    previous: Option<oneshot::Receiver<()>>,
    done: Option<oneshot::Sender<()>>,
    inner: Arc<Inner>,
}

impl Ticket {
    pub fn key(&self) -> FsmKey {
        self.key
    }

    /// Waits until every earlier ticket for the same key has been dropped.
    ///
    /// Cancel-safe: if the wait is abandoned, the ticket keeps its place.
    pub async fn acquire(&mut self) {
        if let Some(previous) = self.previous.as_mut() {
            // Err only means the predecessor was dropped, which is the signal.
            let _ = previous.await;
        }
        self.previous = None;
    }

    /// Returns `true` once the ticket no longer waits on a predecessor.
    pub fn is_acquired(&self) -> bool {
        self.previous.is_none()
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let release = Release {
            key: self.key,
            generation: self.generation,
            done: self.done.take(),
            inner: Arc::clone(&self.inner),
        };
        let Some(previous) = self.previous.take() else {
            release.run();
            return;
        };

        // Never ran: successors must still wait for our predecessor.
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = previous.await;
                    release.run();
                });
            }
            Err(_) => {
                std::thread::spawn(move || {
                    let _ = previous.blocking_recv();
                    release.run();
                });
            }
        }
    }
}

/// What a ticket hands back once its turn is over.
struct Release {
    key: FsmKey,
    generation: u64,
    done: Option<oneshot::Sender<()>>,
    inner: Arc<Inner>,
}

impl Release {
    fn run(self) {
        drop(self.done);

        let mut tails = self.inner.tails.lock();
        if tails
            .get(&self.key)
            .is_some_and(|t| t.generation == self.generation)
        {
            tails.remove(&self.key);
            trace!(key = %self.key, generation = self.generation, "Key released");
        }
    }
}

impl std::fmt::Debug for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticket")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .field("acquired", &self.is_acquired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_fifo_per_key() {
        let seq = KeySequencer::new();
        let key = FsmKey::new(1, 1);

        let mut first = seq.enqueue(key);
        let mut second = seq.enqueue(key);
        let mut third = seq.enqueue(key);

        assert_ready!(task::spawn(first.acquire()).poll());

        let mut second_turn = task::spawn(second.acquire());
        assert_pending!(second_turn.poll());
        drop(first);
        assert!(second_turn.is_woken());
        assert_ready!(second_turn.poll());
        drop(second_turn);

        let mut third_turn = task::spawn(third.acquire());
        assert_pending!(third_turn.poll());
        drop(third_turn);
        drop(second);
        assert_ready!(task::spawn(third.acquire()).poll());
        drop(third);

        assert_eq!(seq.active_keys(), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let seq = KeySequencer::new();
        let _a = seq.enqueue(FsmKey::new(1, 1));
        let mut b = seq.enqueue(FsmKey::new(1, 2));
        assert_ready!(task::spawn(b.acquire()).poll());
        assert_eq!(seq.active_keys(), 2);
    }

    #[tokio::test]
    async fn test_dropping_a_waiting_ticket_keeps_order() {
        let seq = KeySequencer::new();
        let key = FsmKey::new(5, 5);

        let first = seq.enqueue(key);
        let abandoned = seq.enqueue(key);
        let mut third = seq.enqueue(key);

        drop(abandoned);
        tokio::task::yield_now().await;

        let mut third_turn = task::spawn(third.acquire());
        assert_pending!(third_turn.poll());
        drop(third_turn);

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), third.acquire())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_tail_entry_survives_until_last_ticket() {
        let seq = KeySequencer::new();
        let key = FsmKey::new(2, 2);
        let mut first = seq.enqueue(key);
        let second = seq.enqueue(key);
        first.acquire().await;
        drop(first);
        // The second ticket is still the tail.
        assert_eq!(seq.active_keys(), 1);
        drop(second);
        wait_until_idle(&seq).await;
        assert_eq!(seq.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_tail_is_released() {
        let seq = KeySequencer::new();
        let key = FsmKey::new(7, 7);
        let mut running = seq.enqueue(key);
        running.acquire().await;

        let abandoned = seq.enqueue(key);
        drop(abandoned);
        tokio::task::yield_now().await;
        assert_eq!(seq.active_keys(), 1);

        drop(running);
        wait_until_idle(&seq).await;
        assert_eq!(seq.active_keys(), 0);

        let mut next = seq.enqueue(key);
        assert_ready!(task::spawn(next.acquire()).poll());
    }

    #[test]
    fn test_drop_outside_runtime_keeps_order() {
        let seq = KeySequencer::new();
        let key = FsmKey::new(8, 8);
        let first = seq.enqueue(key);
        let abandoned = seq.enqueue(key);
        let mut third = seq.enqueue(key);

        drop(abandoned);
        std::thread::sleep(Duration::from_millis(20));
        let mut third_turn = task::spawn(third.acquire());
        assert_pending!(third_turn.poll());

        drop(first);
        let mut ready = false;
        for _ in 0..100 {
            if third_turn.poll().is_ready() {
                ready = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(ready);
        drop(third_turn);
        drop(third);
        assert_eq!(seq.active_keys(), 0);
    }

    async fn wait_until_idle(seq: &KeySequencer) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while seq.active_keys() != 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
