//! Inbound events.
//!
//! An [`Event`] describes exactly one inbound occurrence delivered by the
//! transport: either a text message or an interactive action (a button press).
//! Events are immutable once built; the dispatcher owns one for the duration of
//! a single dispatch cycle and hands out shared references only.
//!
//! The platform's original update is kept verbatim in `raw_payload` so that
//! handlers can reach fields the engine does not model.
//!
//! ```rust,ignore
//! let event = Event::message(42, 7, "/start", json!({"from": {"id": 7}}));
//! assert_eq!(event.key(), FsmKey::new(42, 7));
//! assert_eq!(event.text(), Some("/start"));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fsm::FsmKey;

/// Identifier of a chat (private chat, group, channel).
pub type ChatId = i64;

/// Stable external identifier of a user.
pub type UserId = i64;

/// A text message sent by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub text: String,
    #[serde(default)]
    pub raw_payload: Value,
}

/// An interactive action, such as an inline-keyboard button press.
///
/// `action_id` is the opaque payload attached to the button when it was sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub action_id: String,
    #[serde(default)]
    pub raw_payload: Value,
}

/// One inbound occurrence from the messaging transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Message(MessageEvent),
    Action(ActionEvent),
}

impl Event {
    /// Builds a message event.
    pub fn message(
        chat_id: ChatId,
        user_id: UserId,
        text: impl Into<String>,
        raw_payload: Value,
    ) -> Self {
        Self::Message(MessageEvent {
            chat_id,
            user_id,
            text: text.into(),
            raw_payload,
        })
    }

    /// Builds an action event.
    pub fn action(
        chat_id: ChatId,
        user_id: UserId,
        action_id: impl Into<String>,
        raw_payload: Value,
    ) -> Self {
        Self::Action(ActionEvent {
            chat_id,
            user_id,
            action_id: action_id.into(),
            raw_payload,
        })
    }

    pub fn chat_id(&self) -> ChatId {
        match self {
            Self::Message(m) => m.chat_id,
            Self::Action(a) => a.chat_id,
        }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            Self::Message(m) => m.user_id,
            Self::Action(a) => a.user_id,
        }
    }

    /// The conversation slot this event belongs to.
    pub fn key(&self) -> FsmKey {
        FsmKey::new(self.chat_id(), self.user_id())
    }

    /// Returns `"message"` or `"action"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Action(_) => "action",
        }
    }

    /// The message text, if this is a message event.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Message(m) => Some(&m.text),
            Self::Action(_) => None,
        }
    }

    /// The action payload, if this is an action event.
    pub fn action_id(&self) -> Option<&str> {
        match self {
            Self::Message(_) => None,
            Self::Action(a) => Some(&a.action_id),
        }
    }

    pub fn raw_payload(&self) -> &Value {
        match self {
            Self::Message(m) => &m.raw_payload,
            Self::Action(a) => &a.raw_payload,
        }
    }

    /// Parses the `from` object of the raw payload.
    ///
    /// Falls back to a sender carrying only the user id when the payload has
    /// no usable `from` field.
    pub fn sender(&self) -> Sender {
        self.raw_payload()
            .get("from")
            .and_then(|from| Sender::deserialize(from).ok())
            .map(|mut sender| {
                if sender.id == 0 {
                    sender.id = self.user_id();
                }
                sender
            })
            .unwrap_or_else(|| Sender::anonymous(self.user_id()))
    }
}

/// Profile of the user that produced an event, as reported by the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    #[serde(default)]
    pub id: UserId,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
}

impl Sender {
    fn anonymous(id: UserId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accessors() {
        let msg = Event::message(1, 2, "hello", Value::Null);
        assert_eq!(msg.chat_id(), 1);
        assert_eq!(msg.user_id(), 2);
        assert_eq!(msg.text(), Some("hello"));
        assert_eq!(msg.action_id(), None);
        assert_eq!(msg.kind(), "message");

        let action = Event::action(1, 2, "lang:en", Value::Null);
        assert_eq!(action.text(), None);
        assert_eq!(action.action_id(), Some("lang:en"));
        assert_eq!(action.kind(), "action");
        assert_eq!(action.key(), FsmKey::new(1, 2));
    }

    #[test]
    fn test_sender_from_payload() {
        let event = Event::message(
            1,
            2,
            "hi",
            json!({"from": {"id": 2, "first_name": "Ann", "language_code": "en"}}),
        );
        let sender = event.sender();
        assert_eq!(sender.id, 2);
        assert_eq!(sender.first_name, "Ann");
        assert_eq!(sender.last_name, "");
        assert_eq!(sender.language_code.as_deref(), Some("en"));
    }

    #[test]
    fn test_sender_without_payload() {
        let event = Event::action(1, 9, "x", Value::Null);
        let sender = event.sender();
        assert_eq!(sender.id, 9);
        assert!(sender.username.is_none());
    }

    #[test]
    fn test_event_serde_tag() {
        let event = Event::message(1, 2, "hi", Value::Null);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "message");
        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }
}
