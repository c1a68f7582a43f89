//! Middleware chain.
//!
//! Middlewares wrap routing. Each one receives the context and a [`Next`]
//! handle, and either passes control on (possibly doing work before and
//! after) or stops the chain by returning without calling [`Next::run`]:
//!
//! ```text
//! ResourceInjection → BanCheck → ActivityCounter → LocaleResolver → TranslatorInjection → router
//! ```
//!
//! Chains are fixed when the dispatcher is built. A middleware's own failure
//! ends the cycle as fatal; errors coming back from `next` pass through
//! untouched.
//!
//! # Example
//!
//! ```rust,ignore
//! use taskbot_framework::middleware::from_fn;
//!
//! let timing = from_fn("timing", |ctx, next| async move {
//!     let started = std::time::Instant::now();
//!     let outcome = next.run(ctx).await;
//!     tracing::debug!(elapsed = ?started.elapsed(), "Cycle done");
//!     outcome
//! });
//! ```

mod builtin;

pub use builtin::{
    ActivityCounter, BanCheck, LocaleResolver, ResourceInjection, TranslatorInjection,
    standard_chain,
};

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::context::Context;
use crate::error::DispatchResult;
use crate::handler::BoxFuture;
use crate::outcome::Outcome;

/// A stage wrapped around routing.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Name used in logs and in [`Outcome::ShortCircuited`].
    fn name(&self) -> &str;

    /// Processes the event; call `next.run(ctx)` to continue the chain.
    async fn handle(&self, ctx: Arc<Context>, next: Next) -> DispatchResult<Outcome>;
}

/// A shared middleware handle.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// The stage at the end of the chain.
#[async_trait]
pub(crate) trait Endpoint: Send + Sync + 'static {
    async fn call(&self, ctx: Arc<Context>) -> DispatchResult<Outcome>;
}

/// The remainder of the chain.
///
/// `Next` is consumed by [`run`](Next::run), so a middleware can continue
/// the chain at most once.
pub struct Next {
    chain: Arc<[BoxedMiddleware]>,
    index: usize,
    endpoint: Arc<dyn Endpoint>,
}

impl Next {
    pub(crate) fn new(chain: Arc<[BoxedMiddleware]>, endpoint: Arc<dyn Endpoint>) -> Self {
        Self {
            chain,
            index: 0,
            endpoint,
        }
    }

    /// Runs the rest of the chain, ending with routing.
    pub fn run(self, ctx: Arc<Context>) -> BoxFuture<'static, DispatchResult<Outcome>> {
        Box::pin(async move {
            match self.chain.get(self.index).cloned() {
                Some(middleware) => {
                    trace!(middleware = middleware.name(), "Entering middleware");
                    let next = Next {
                        chain: self.chain,
                        index: self.index + 1,
                        endpoint: self.endpoint,
                    };
                    middleware.handle(ctx, next).await
                }
                None => self.endpoint.call(ctx).await,
            }
        })
    }

    /// Number of middlewares still ahead of the router.
    pub fn remaining(&self) -> usize {
        self.chain.len().saturating_sub(self.index)
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.remaining())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// from_fn
// =============================================================================

/// A middleware built from a closure. See [`from_fn`].
pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

/// Builds a middleware from an async closure taking the context and [`Next`].
pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> FnMiddleware<F>
where
    F: Fn(Arc<Context>, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DispatchResult<Outcome>> + Send + 'static,
{
    FnMiddleware {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Arc<Context>, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DispatchResult<Outcome>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: Arc<Context>, next: Next) -> DispatchResult<Outcome> {
        (self.f)(ctx, next).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FsmContext;
    use crate::error::DispatchError;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::time::Duration;
    use taskbot_core::{Event, FsmStore, OutboxBot};

    struct Recorder(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Endpoint for Recorder {
        async fn call(&self, _ctx: Arc<Context>) -> DispatchResult<Outcome> {
            self.0.lock().push("endpoint".into());
            Ok(Outcome::Handled {
                handler: "h".into(),
            })
        }
    }

    fn context() -> Arc<Context> {
        let event = Event::message(1, 1, "x", Value::Null);
        let fsm = FsmContext::new(event.key(), FsmStore::in_memory(Duration::from_secs(60)));
        Arc::new(Context::new(event, Arc::new(OutboxBot::new()), fsm))
    }

    fn tracing_mw(log: Arc<Mutex<Vec<String>>>, name: &'static str) -> BoxedMiddleware {
        Arc::new(from_fn(name, move |ctx, next: Next| {
            let log = log.clone();
            async move {
                log.lock().push(format!("{name}:before"));
                let outcome = next.run(ctx).await;
                log.lock().push(format!("{name}:after"));
                outcome
            }
        }))
    }

    #[tokio::test]
    async fn test_chain_wraps_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain: Arc<[BoxedMiddleware]> =
            Arc::from(vec![tracing_mw(log.clone(), "a"), tracing_mw(log.clone(), "b")]);
        let next = Next::new(chain, Arc::new(Recorder(log.clone())));
        assert_eq!(next.remaining(), 2);

        let outcome = next.run(context()).await.unwrap();
        assert_eq!(outcome.handler(), Some("h"));
        assert_eq!(
            *log.lock(),
            vec!["a:before", "b:before", "endpoint", "b:after", "a:after"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_skips_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stop: BoxedMiddleware = Arc::new(from_fn("stop", |ctx: Arc<Context>, _next| async move {
            ctx.short_circuit();
            Ok::<_, DispatchError>(Outcome::short_circuited("stop"))
        }));
        let chain: Arc<[BoxedMiddleware]> = Arc::from(vec![stop, tracing_mw(log.clone(), "b")]);
        let ctx = context();

        let outcome = Next::new(chain, Arc::new(Recorder(log.clone())))
            .run(ctx.clone())
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::short_circuited("stop"));
        assert!(ctx.is_short_circuited());
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_middleware_failure() {
        let fail: BoxedMiddleware = Arc::new(from_fn("fail", |_ctx, _next| async {
            Err::<Outcome, _>(DispatchError::middleware("fail", "nope"))
        }));
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = Next::new(Arc::from(vec![fail]), Arc::new(Recorder(log.clone())))
            .run(context())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::MiddlewareFatal { .. }));
        assert!(log.lock().is_empty());
    }
}
