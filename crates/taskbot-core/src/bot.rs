//! Outbound bot API.
//!
//! The [`Bot`] trait is the only way handlers talk back to the messaging
//! platform. Keyboards and other UI are passed through as opaque JSON markup;
//! the engine never inspects them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiError, ApiResult};
use crate::event::ChatId;

/// An outbound text message with optional opaque reply markup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markup: Option<Value>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            markup: None,
        }
    }

    /// Attaches reply markup, e.g. an inline keyboard.
    pub fn with_markup(mut self, markup: Value) -> Self {
        self.markup = Some(markup);
        self
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

/// An active bot account able to send messages.
#[async_trait]
pub trait Bot: Send + Sync + 'static {
    /// Returns the bot's identifier (usually its username).
    fn id(&self) -> &str;

    /// Sends `reply` to `chat_id`, returning the platform's message id.
    async fn send(&self, chat_id: ChatId, reply: Reply) -> ApiResult<i64>;

    /// Acknowledges an interactive action so the client stops its spinner.
    ///
    /// The default implementation does nothing.
    async fn answer_action(&self, _action_id: &str, _text: Option<&str>) -> ApiResult<()> {
        Ok(())
    }
}

/// A shared bot handle.
pub type BoxedBot = Arc<dyn Bot>;

/// A message captured by [`OutboxBot`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub message_id: i64,
    pub chat_id: ChatId,
    pub reply: Reply,
}

/// A [`Bot`] that records outgoing messages in memory.
///
/// Used by the demo bot's console mode and by tests.
#[derive(Default)]
pub struct OutboxBot {
    sent: Mutex<Vec<SentMessage>>,
    next_id: AtomicI64,
    disconnected: AtomicBool,
}

impl OutboxBot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent send fail with [`ApiError::NotConnected`].
    pub fn set_disconnected(&self, disconnected: bool) {
        self.disconnected.store(disconnected, Ordering::SeqCst);
    }

    /// Returns a copy of every message sent so far.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    /// Returns the texts sent to `chat_id`, in order.
    pub fn texts_to(&self, chat_id: ChatId) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .map(|m| m.reply.text.clone())
            .collect()
    }

    /// Removes and returns every recorded message.
    pub fn drain(&self) -> Vec<SentMessage> {
        std::mem::take(&mut *self.sent.lock())
    }
}

#[async_trait]
impl Bot for OutboxBot {
    fn id(&self) -> &str {
        "outbox"
    }

    async fn send(&self, chat_id: ChatId, reply: Reply) -> ApiResult<i64> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(ApiError::NotConnected);
        }
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.lock().push(SentMessage {
            message_id,
            chat_id,
            reply,
        });
        Ok(message_id)
    }
}
