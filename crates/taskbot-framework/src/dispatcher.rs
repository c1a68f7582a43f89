//! Event dispatcher for the Taskbot framework.
//!
//! The [`Dispatcher`] drives one dispatch cycle per event:
//!
//! 1. wait for earlier events with the same `(chat, user)` key to finish;
//! 2. snapshot the FSM record for the key;
//! 3. run the middleware chain, ending in the router;
//! 4. report a terminal [`CycleState`].
//!
//! Events with different keys run concurrently. Routing tables and the
//! middleware chain are frozen by [`DispatcherBuilder::build`].
//!
//! ```rust,ignore
//! let dispatcher = Dispatcher::builder(bot, FsmStore::in_memory(ttl))
//!     .standard_middlewares(resources)
//!     .include_router(settings_router())?
//!     .include_router(task_router())?
//!     .event_timeout(Duration::from_secs(30))
//!     .build();
//!
//! let report = dispatcher.dispatch(event).await;
//! source.ack(update_id, report.delivery()).await?;
//! ```
//!
//! # Failure semantics
//!
//! - A handler error keeps whatever FSM writes the handler completed.
//! - A timeout cancels the cycle and restores the snapshot taken in step 2.
//! - An unreachable FSM store and timeouts ask the transport for
//!   redelivery; every other failure is final.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{Instrument, debug, debug_span, error, info, warn};

use taskbot_core::{BoxedBot, Event, FsmKey, FsmRecord, FsmStore};

use crate::context::{Context, FsmContext};
use crate::error::{DispatchError, RegistrationError};
use crate::handler::BoxFuture;
use crate::middleware::{BoxedMiddleware, Middleware, Next, standard_chain};
use crate::outcome::{CycleReport, CycleState, Outcome};
use crate::resources::SharedResources;
use crate::router::{RouteTable, Router};
use crate::sequencer::{KeySequencer, Ticket};

/// Called for cycles that failed in a handler or on FSM storage, before the
/// failure is reported.
pub type ErrorHandler =
    Arc<dyn Fn(Arc<Context>, Arc<DispatchError>) -> BoxFuture<'static, ()> + Send + Sync>;

// =============================================================================
// Builder
// =============================================================================

/// Assembles a [`Dispatcher`].
pub struct DispatcherBuilder {
    bot: BoxedBot,
    fsm: FsmStore,
    middlewares: Vec<BoxedMiddleware>,
    routes: RouteTable,
    event_timeout: Option<Duration>,
    on_error: Option<ErrorHandler>,
}

impl DispatcherBuilder {
    /// Appends a middleware to the chain.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Appends several shared middlewares, in order.
    pub fn middlewares(mut self, middlewares: impl IntoIterator<Item = BoxedMiddleware>) -> Self {
        self.middlewares.extend(middlewares);
        self
    }

    /// Appends the standard chain built around `resources`.
    pub fn standard_middlewares(self, resources: Arc<SharedResources>) -> Self {
        self.middlewares(standard_chain(resources))
    }

    /// Appends a router. Routers are consulted in inclusion order within
    /// each category.
    ///
    /// Fails if a catch-all in an already included router would hide one of
    /// `router`'s registrations.
    pub fn include_router(mut self, router: Router) -> Result<Self, RegistrationError> {
        self.routes.include(router)?;
        Ok(self)
    }

    /// Bounds the whole cycle, middlewares included.
    pub fn event_timeout(mut self, timeout: Duration) -> Self {
        self.event_timeout = Some(timeout);
        self
    }

    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Context>, Arc<DispatchError>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_error = Some(Arc::new(move |ctx, err| Box::pin(f(ctx, err))));
        self
    }

    pub fn build(self) -> Dispatcher {
        info!(
            middlewares = self.middlewares.len(),
            registrations = self.routes.len(),
            event_timeout = ?self.event_timeout,
            "Dispatcher built"
        );
        Dispatcher {
            inner: Arc::new(Inner {
                bot: self.bot,
                fsm: self.fsm,
                chain: Arc::from(self.middlewares),
                routes: Arc::new(self.routes),
                sequencer: KeySequencer::new(),
                event_timeout: self.event_timeout,
                on_error: self.on_error,
            }),
        }
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

struct Inner {
    bot: BoxedBot,
    fsm: FsmStore,
    chain: Arc<[BoxedMiddleware]>,
    routes: Arc<RouteTable>,
    sequencer: KeySequencer,
    event_timeout: Option<Duration>,
    on_error: Option<ErrorHandler>,
}

/// The central event dispatcher.
///
/// Cheap to clone; clones share routing tables and the per-key queues.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn builder(bot: BoxedBot, fsm: FsmStore) -> DispatcherBuilder {
        DispatcherBuilder {
            bot,
            fsm,
            middlewares: Vec::new(),
            routes: RouteTable::default(),
            event_timeout: None,
            on_error: None,
        }
    }

    pub fn bot(&self) -> &BoxedBot {
        &self.inner.bot
    }

    pub fn fsm(&self) -> &FsmStore {
        &self.inner.fsm
    }

    pub fn registration_count(&self) -> usize {
        self.inner.routes.len()
    }

    /// Keys with a cycle queued or running.
    pub fn active_keys(&self) -> usize {
        self.inner.sequencer.active_keys()
    }

    /// Dispatches an event and waits for its cycle to finish.
    pub async fn dispatch(&self, event: Event) -> CycleReport {
        let ticket = self.inner.sequencer.enqueue(event.key());
        self.process(ticket, event).await
    }

    /// Dispatches an event on a new task.
    ///
    /// The event's place in its key's queue is taken before this returns, so
    /// events submitted in order for one key are processed in that order.
    pub fn submit(&self, event: Event) -> JoinHandle<CycleReport> {
        let ticket = self.inner.sequencer.enqueue(event.key());
        let this = self.clone();
        tokio::spawn(async move { this.process(ticket, event).await })
    }

    async fn process(&self, mut ticket: Ticket, event: Event) -> CycleReport {
        let key = event.key();
        let span = debug_span!("dispatch", %key, kind = event.kind());
        async move {
            ticket.acquire().await;
            let report = self.run_cycle(key, event).await;
            drop(ticket);
            report
        }
        .instrument(span)
        .await
    }

    async fn run_cycle(&self, key: FsmKey, event: Event) -> CycleReport {
        let inner = &self.inner;
        let fsm = FsmContext::new(key, inner.fsm.clone());
        let ctx = Arc::new(Context::new(event, Arc::clone(&inner.bot), fsm));
        debug!("Event received");

        let snapshot = match inner.fsm.get(&key).await {
            Ok(record) => record,
            Err(err) => return self.fail(&ctx, err.into()).await,
        };

        ctx.advance(CycleState::MiddlewareRunning);
        let next = Next::new(Arc::clone(&inner.chain), inner.routes.clone());
        let result = match inner.event_timeout {
            Some(limit) => match tokio::time::timeout(limit, next.run(Arc::clone(&ctx))).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        timeout = ?limit,
                        reached = %ctx.cycle_state(),
                        "Cycle timed out, restoring state snapshot"
                    );
                    self.rollback(key, snapshot).await;
                    Err(DispatchError::Timeout(limit))
                }
            },
            None => next.run(Arc::clone(&ctx)).await,
        };

        match result {
            Ok(outcome) => {
                ctx.advance(outcome.terminal_state());
                match &outcome {
                    Outcome::Handled { handler } => debug!(handler = %handler, "Event handled"),
                    Outcome::NoMatch => debug!("Event dropped: no matching handler"),
                    Outcome::ShortCircuited { middleware } => {
                        debug!(middleware = %middleware, "Event dropped by middleware")
                    }
                }
                CycleReport::finished(key, outcome)
            }
            Err(err) => self.fail(&ctx, err).await,
        }
    }

    async fn rollback(&self, key: FsmKey, snapshot: FsmRecord) {
        let fsm = &self.inner.fsm;
        if matches!(fsm.get(&key).await, Ok(ref current) if *current == snapshot) {
            return;
        }
        if let Err(err) = fsm.restore(&key, snapshot).await {
            error!(error = %err, "Failed to restore state snapshot");
        }
    }

    async fn fail(&self, ctx: &Arc<Context>, err: DispatchError) -> CycleReport {
        ctx.advance(CycleState::Failed);
        if err.is_retryable() {
            warn!(error = %err, "Dispatch failed, event may be redelivered");
        } else {
            error!(error = %err, "Dispatch failed");
        }

        let err = Arc::new(err);
        let reportable = matches!(
            *err,
            DispatchError::Handler { .. } | DispatchError::StoreUnavailable(_)
        );
        if let Some(on_error) = self.inner.on_error.as_ref().filter(|_| reportable) {
            on_error(Arc::clone(ctx), Arc::clone(&err)).await;
        }
        CycleReport::failed(ctx.key(), err)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("middlewares", &self.inner.chain.len())
            .field("registrations", &self.registration_count())
            .field("event_timeout", &self.inner.event_timeout)
            .finish_non_exhaustive()
    }
}
