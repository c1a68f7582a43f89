//! Composable event filters.
//!
//! A [`Filter`] is a pure predicate over an event and the FSM snapshot taken
//! at routing time. Filters are combined with [`and`](Filter::and),
//! [`or`](Filter::or) and [`not`](Filter::not):
//!
//! ```rust,ignore
//! use taskbot_framework::Filter;
//!
//! // Plain text while waiting for the task description.
//! let filter = Filter::plain_text().and(Filter::state(TaskState::AwaitingTaskText));
//!
//! // Any callback whose id starts with "lang:".
//! let filter = Filter::action_prefix("lang:");
//! ```
//!
//! # Catch-all filters
//!
//! [`Filter::any`] matches every event. The router refuses registrations
//! that would sit behind a catch-all in the same category, so the flag is
//! tracked through combinators: `a.and(b)` is a catch-all only if both sides
//! are, `a.or(b)` if either side is.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use taskbot_core::{Event, FilterError, FsmRecord, StateName, UserId};

/// A type-erased filter predicate.
pub type CheckFn =
    Arc<dyn Fn(&Event, Option<&FsmRecord>) -> Result<bool, FilterError> + Send + Sync>;

/// A predicate deciding whether a registration handles an event.
#[derive(Clone)]
pub struct Filter {
    check: CheckFn,
    catch_all: bool,
    label: Arc<str>,
}

impl Filter {
    /// Creates a filter from an infallible predicate.
    pub fn new<F>(label: &str, f: F) -> Self
    where
        F: Fn(&Event, Option<&FsmRecord>) -> bool + Send + Sync + 'static,
    {
        Self::try_new(label, move |event, state| Ok(f(event, state)))
    }

    /// Creates a filter from a predicate that may fail.
    ///
    /// A failing filter is treated as a non-match by the router.
    pub fn try_new<F>(label: &str, f: F) -> Self
    where
        F: Fn(&Event, Option<&FsmRecord>) -> Result<bool, FilterError> + Send + Sync + 'static,
    {
        Self {
            check: Arc::new(f),
            catch_all: false,
            label: Arc::from(label),
        }
    }

    /// Evaluates the filter.
    ///
    /// `state` is `None` when the conversation slot is empty.
    pub fn check(&self, event: &Event, state: Option<&FsmRecord>) -> Result<bool, FilterError> {
        (self.check)(event, state)
    }

    /// Returns `true` if this filter matches every event.
    pub fn is_catch_all(&self) -> bool {
        self.catch_all
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    // ─── Combinators ──────────────────────────────────────────────────────────

    pub fn and(self, other: Filter) -> Filter {
        let label = format!("({} & {})", self.label, other.label);
        let catch_all = self.catch_all && other.catch_all;
        let (a, b) = (self.check, other.check);
        Filter {
            check: Arc::new(move |event, state| Ok(a(event, state)? && b(event, state)?)),
            catch_all,
            label: Arc::from(label),
        }
    }

    pub fn or(self, other: Filter) -> Filter {
        let label = format!("({} | {})", self.label, other.label);
        let catch_all = self.catch_all || other.catch_all;
        let (a, b) = (self.check, other.check);
        Filter {
            check: Arc::new(move |event, state| Ok(a(event, state)? || b(event, state)?)),
            catch_all,
            label: Arc::from(label),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Filter {
        let label = format!("!{}", self.label);
        let check = self.check;
        Filter {
            check: Arc::new(move |event, state| Ok(!check(event, state)?)),
            catch_all: false,
            label: Arc::from(label),
        }
    }

    // ─── Event filters ────────────────────────────────────────────────────────

    /// Matches every event.
    pub fn any() -> Self {
        Self {
            catch_all: true,
            ..Self::new("any", |_, _| true)
        }
    }

    pub fn message() -> Self {
        Self::new("message", |event, _| matches!(event, Event::Message(_)))
    }

    pub fn action() -> Self {
        Self::new("action", |event, _| matches!(event, Event::Action(_)))
    }

    /// Messages whose text equals `text` exactly.
    pub fn text_eq(text: impl Into<String>) -> Self {
        let text = text.into();
        let label = format!("text == {text:?}");
        Self::new(&label, move |event, _| event.text() == Some(text.as_str()))
    }

    /// Messages that are not commands.
    pub fn plain_text() -> Self {
        Self::new("plain_text", |event, _| {
            event.text().is_some_and(|t| !t.starts_with('/'))
        })
    }

    /// Messages carrying the command `/name`, optionally addressed as
    /// `/name@bot` and followed by arguments.
    pub fn command(name: impl Into<String>) -> Self {
        let name = name.into();
        let label = format!("/{name}");
        Self::new(&label, move |event, _| {
            event
                .text()
                .and_then(command_name)
                .is_some_and(|cmd| cmd == name)
        })
    }

    /// Actions whose id equals `id` exactly.
    pub fn action_eq(id: impl Into<String>) -> Self {
        let id = id.into();
        let label = format!("action == {id:?}");
        Self::new(&label, move |event, _| event.action_id() == Some(id.as_str()))
    }

    pub fn action_prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let label = format!("action ^= {prefix:?}");
        Self::new(&label, move |event, _| {
            event.action_id().is_some_and(|id| id.starts_with(&prefix))
        })
    }

    /// Compares the raw payload value at a JSON pointer (RFC 6901).
    ///
    /// Fails when the pointer is malformed, which the router reports and
    /// treats as a non-match.
    pub fn payload_eq(pointer: impl Into<String>, value: Value) -> Self {
        let pointer = pointer.into();
        let label = format!("payload{pointer} == {value}");
        Self::try_new(&label, move |event, _| {
            if !pointer.is_empty() && !pointer.starts_with('/') {
                return Err(FilterError::new(format!("invalid JSON pointer '{pointer}'")));
            }
            Ok(event.raw_payload().pointer(&pointer) == Some(&value))
        })
    }

    pub fn user_in(ids: impl IntoIterator<Item = UserId>) -> Self {
        let ids: HashSet<UserId> = ids.into_iter().collect();
        Self::new("user_in", move |event, _| ids.contains(&event.user_id()))
    }

    // ─── State filters ────────────────────────────────────────────────────────

    /// Conversations currently in `state`.
    pub fn state(state: impl Into<StateName>) -> Self {
        let state = state.into();
        let label = format!("state == {state}");
        Self::new(&label, move |_, record| {
            record.is_some_and(|r| r.is_in(&state))
        })
    }

    /// Conversations with no active state.
    pub fn idle() -> Self {
        Self::new("idle", |_, record| record.is_none_or(FsmRecord::is_idle))
    }

    /// Conversations in any non-idle state.
    pub fn any_state() -> Self {
        Self::new("any_state", |_, record| {
            record.is_some_and(|r| !r.is_idle())
        })
    }
}

/// Extracts `name` from `/name@bot args`.
fn command_name(text: &str) -> Option<&str> {
    let head = text.strip_prefix('/')?.split_whitespace().next()?;
    let name = head.split('@').next().unwrap_or(head);
    (!name.is_empty()).then_some(name)
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("label", &self.label)
            .field("catch_all", &self.catch_all)
            .finish()
    }
}
