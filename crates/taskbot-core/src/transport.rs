//! Transport boundary.
//!
//! The transport is a pull-based feed of [`Update`]s. Delivery is
//! at-least-once: an update is acknowledged with a [`Delivery`] only after the
//! dispatcher has driven it to a terminal state, and a source may hand the
//! same update out again if it is never acknowledged or is acknowledged with
//! [`Delivery::Retry`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportResult;
use crate::event::Event;

/// One update fetched from the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    /// Monotonic offset assigned by the platform.
    pub update_id: u64,
    pub event: Event,
}

/// How an update should be acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// The update reached a terminal state and must not be redelivered.
    Processed,
    /// Processing failed transiently; the source should redeliver.
    Retry,
}

/// A pull-based source of updates.
#[async_trait]
pub trait UpdateSource: Send + Sync + 'static {
    /// Waits for and returns up to `max` updates.
    ///
    /// An empty batch means the poll timed out with nothing to deliver.
    async fn poll(&self, max: usize) -> TransportResult<Vec<Update>>;

    /// Acknowledges an update previously returned by [`poll`](Self::poll).
    async fn ack(&self, update_id: u64, delivery: Delivery) -> TransportResult<()>;
}
