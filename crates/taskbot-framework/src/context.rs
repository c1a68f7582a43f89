//! Per-event context handed to middlewares and handlers.
//!
//! One [`Context`] is created for each dispatch cycle and shared as an
//! `Arc<Context>` by every middleware and the selected handler. It carries:
//!
//! - the immutable [`Event`] and the [`Bot`](taskbot_core::Bot) handle;
//! - an [`FsmContext`] scoped to the event's `(chat, user)` key;
//! - a typed extension map that middlewares use to inject values for later
//!   stages (resources, locale, translator);
//! - the cycle's lifecycle state.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn ask_person(ctx: Arc<Context>) -> HandlerResult<Reply> {
//!     let i18n = ctx.i18n()?;
//!     ctx.fsm().set_field("task_text", ctx.event().text()).await?;
//!     ctx.fsm().set_state(TaskState::AwaitingTaskPerson).await?;
//!     Ok(Reply::text(i18n.t("ask_person")))
//! }
//! ```

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::trace;

use taskbot_core::{
    ApiResult, BoxedBot, Event, FsmKey, FsmRecord, FsmState, FsmStore, Reply, StateName,
    StorageError, StorageResult,
};

use crate::error::{DispatchError, DispatchResult};
use crate::outcome::CycleState;
use crate::resources::{I18n, Locale, SharedResources};

// =============================================================================
// FsmContext
// =============================================================================

/// FSM access scoped to one `(chat, user)` key.
///
/// Every write goes straight to storage and is awaited, so a handler that
/// returns has no writes still in flight.
#[derive(Clone)]
pub struct FsmContext {
    key: FsmKey,
    store: FsmStore,
}

impl FsmContext {
    pub fn new(key: FsmKey, store: FsmStore) -> Self {
        Self { key, store }
    }

    pub fn key(&self) -> FsmKey {
        self.key
    }

    /// Reads the current record; an absent record reads as idle.
    pub async fn get(&self) -> StorageResult<FsmRecord> {
        self.store.get(&self.key).await
    }

    /// Reads the raw record, `None` if the slot is empty or expired.
    pub async fn snapshot(&self) -> StorageResult<Option<FsmRecord>> {
        self.store.storage().get(&self.key).await
    }

    pub async fn state(&self) -> StorageResult<Option<StateName>> {
        Ok(self.get().await?.state)
    }

    /// Reads the current state as a typed state enum.
    pub async fn state_as<S: FsmState>(&self) -> StorageResult<Option<S>> {
        Ok(self.get().await?.state_as())
    }

    pub async fn set_state(&self, state: impl Into<StateName>) -> StorageResult<()> {
        let state = state.into();
        trace!(key = %self.key, state = %state, "Setting state");
        self.store.set_state(&self.key, Some(state)).await
    }

    /// Returns to the idle state, keeping data.
    pub async fn reset_state(&self) -> StorageResult<()> {
        trace!(key = %self.key, "Resetting state");
        self.store.set_state(&self.key, None).await
    }

    /// Merges `patch` into the data map.
    pub async fn update_data(&self, patch: Map<String, Value>) -> StorageResult<FsmRecord> {
        self.store.update_data(&self.key, patch).await
    }

    /// Sets a single data field.
    pub async fn set_field(&self, name: &str, value: impl Serialize) -> StorageResult<FsmRecord> {
        let value = serde_json::to_value(value).map_err(StorageError::from)?;
        let mut patch = Map::new();
        patch.insert(name.to_string(), value);
        self.update_data(patch).await
    }

    /// Drops both state and data.
    pub async fn clear(&self) -> StorageResult<()> {
        trace!(key = %self.key, "Clearing state");
        self.store.clear(&self.key).await
    }
}

impl std::fmt::Debug for FsmContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsmContext")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Context
// =============================================================================

/// The context shared by every stage of one dispatch cycle.
pub struct Context {
    event: Event,
    bot: BoxedBot,
    fsm: FsmContext,
    /// Values injected by middlewares, keyed by type.
    extensions: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    short_circuited: AtomicBool,
    cycle_state: Mutex<CycleState>,
}

impl Context {
    pub fn new(event: Event, bot: BoxedBot, fsm: FsmContext) -> Self {
        Self {
            event,
            bot,
            fsm,
            extensions: Mutex::new(HashMap::new()),
            short_circuited: AtomicBool::new(false),
            cycle_state: Mutex::new(CycleState::Received),
        }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn bot(&self) -> &BoxedBot {
        &self.bot
    }

    /// Returns a clone of the bot `Arc`.
    pub fn bot_arc(&self) -> BoxedBot {
        self.bot.clone()
    }

    pub fn fsm(&self) -> &FsmContext {
        &self.fsm
    }

    pub fn key(&self) -> FsmKey {
        self.fsm.key()
    }

    /// Sends a reply to the chat the event came from.
    pub async fn reply(&self, reply: impl Into<Reply>) -> ApiResult<i64> {
        self.bot.send(self.event.chat_id(), reply.into()).await
    }

    // ─── Extensions ───────────────────────────────────────────────────────────

    /// Stores a value for later stages of this cycle, replacing any previous
    /// value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&self, value: T) {
        self.extensions
            .lock()
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Returns a clone of the injected value of type `T`.
    pub fn get<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.extensions
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Like [`get`](Self::get) but fails with
    /// [`DispatchError::MissingResource`].
    pub fn require<T: Clone + Send + Sync + 'static>(&self) -> DispatchResult<T> {
        self.get::<T>()
            .ok_or(DispatchError::MissingResource(type_name::<T>()))
    }

    /// Removes and returns the injected value of type `T`.
    pub fn take<T: Send + Sync + 'static>(&self) -> Option<T> {
        self.extensions
            .lock()
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|b| *b)
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.extensions.lock().contains_key(&TypeId::of::<T>())
    }

    /// Shared resources injected by
    /// [`ResourceInjection`](crate::middleware::ResourceInjection).
    pub fn resources(&self) -> DispatchResult<Arc<SharedResources>> {
        self.require::<Arc<SharedResources>>()
    }

    /// The locale picked by [`LocaleResolver`](crate::middleware::LocaleResolver).
    pub fn locale(&self) -> DispatchResult<String> {
        self.require::<Locale>().map(|l| l.0)
    }

    /// The translator bound to this event's locale.
    pub fn i18n(&self) -> DispatchResult<I18n> {
        self.require::<I18n>()
    }

    // ─── Lifecycle ────────────────────────────────────────────────────────────

    /// Marks the cycle as stopped by a middleware.
    pub fn short_circuit(&self) {
        self.short_circuited.store(true, Ordering::SeqCst);
    }

    pub fn is_short_circuited(&self) -> bool {
        self.short_circuited.load(Ordering::SeqCst)
    }

    pub fn cycle_state(&self) -> CycleState {
        *self.cycle_state.lock()
    }

    pub(crate) fn advance(&self, next: CycleState) {
        let mut state = self.cycle_state.lock();
        trace!(from = %*state, to = %next, "Cycle state transition");
        *state = next;
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("event", &self.event)
            .field("key", &self.key())
            .field("cycle_state", &self.cycle_state())
            .field("is_short_circuited", &self.is_short_circuited())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use taskbot_core::OutboxBot;

    fn context() -> Context {
        let event = Event::message(10, 20, "hi", Value::Null);
        let fsm = FsmContext::new(event.key(), FsmStore::in_memory(Duration::from_secs(60)));
        Context::new(event, Arc::new(OutboxBot::new()), fsm)
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Marker(u32);

    #[test]
    fn test_extensions() {
        let ctx = context();
        assert!(ctx.get::<Marker>().is_none());
        assert!(matches!(
            ctx.require::<Marker>(),
            Err(DispatchError::MissingResource(_))
        ));

        ctx.insert(Marker(1));
        ctx.insert(Marker(2));
        assert!(ctx.contains::<Marker>());
        assert_eq!(ctx.get::<Marker>(), Some(Marker(2)));
        assert_eq!(ctx.take::<Marker>(), Some(Marker(2)));
        assert!(!ctx.contains::<Marker>());
    }

    #[test]
    fn test_lifecycle_flags() {
        let ctx = context();
        assert_eq!(ctx.cycle_state(), CycleState::Received);
        ctx.advance(CycleState::MiddlewareRunning);
        assert_eq!(ctx.cycle_state(), CycleState::MiddlewareRunning);
        assert!(!ctx.is_short_circuited());
        ctx.short_circuit();
        assert!(ctx.is_short_circuited());
    }

    #[tokio::test]
    async fn test_fsm_context_writes() {
        let ctx = context();
        let fsm = ctx.fsm();
        assert!(fsm.snapshot().await.unwrap().is_none());

        fsm.set_state("awaiting").await.unwrap();
        fsm.set_field("task_text", "buy milk").await.unwrap();
        let record = fsm.get().await.unwrap();
        assert_eq!(record.state, Some(StateName::new("awaiting")));
        assert_eq!(record.field::<String>("task_text").as_deref(), Some("buy milk"));

        fsm.reset_state().await.unwrap();
        assert!(fsm.state().await.unwrap().is_none());
        assert!(fsm.get().await.unwrap().data.contains_key("task_text"));

        fsm.clear().await.unwrap();
        assert!(fsm.snapshot().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reply_goes_to_event_chat() {
        let bot = Arc::new(OutboxBot::new());
        let event = Event::message(7, 8, "hi", Value::Null);
        let fsm = FsmContext::new(event.key(), FsmStore::in_memory(Duration::from_secs(60)));
        let ctx = Context::new(event, bot.clone(), fsm);

        ctx.reply("pong").await.unwrap();
        assert_eq!(bot.texts_to(7), vec!["pong"]);
    }
}
