//! Handler system for the Taskbot framework.
//!
//! Any `async fn(Arc<Context>) -> R` is a [`Handler`] as long as `R`
//! implements [`HandlerResponse`]. The response decides what happens after
//! the handler body returns:
//!
//! | Return type          | Effect                                          |
//! |----------------------|-------------------------------------------------|
//! | `()`                 | nothing                                         |
//! | `String`, [`Reply`]  | sent to the event's chat                        |
//! | `Option<T>`          | `T`'s effect if present                         |
//! | `Result<T, E>`       | `T`'s effect, or a handler failure              |
//!
//! # Example
//!
//! ```rust,ignore
//! async fn welcome(ctx: Arc<Context>) -> HandlerResult<Reply> {
//!     let i18n = ctx.i18n()?;
//!     Ok(Reply::text(i18n.t("start")))
//! }
//!
//! async fn log_only(ctx: Arc<Context>) {
//!     tracing::info!(event = ?ctx.event(), "Seen");
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use taskbot_core::Reply;

use crate::context::Context;
use crate::error::BoxError;

/// A type alias for a boxed, pinned future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The result type most handlers return.
pub type HandlerResult<T = ()> = Result<T, BoxError>;

// ============================================================================
// Handler Trait
// ============================================================================

/// An event handler.
///
/// Implemented for every `Fn(Arc<Context>) -> impl Future<Output = R>` where
/// `R: HandlerResponse`.
pub trait Handler: Send + Sync + 'static {
    /// Runs the handler and applies its response.
    fn call(&self, ctx: Arc<Context>) -> BoxFuture<'static, HandlerResult>;
}

/// A type-erased handler that can be stored in routing tables.
pub type BoxedHandler = Arc<dyn Handler>;

impl<F, Fut, R> Handler for F
where
    F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: HandlerResponse,
{
    fn call(&self, ctx: Arc<Context>) -> BoxFuture<'static, HandlerResult> {
        let fut = (self)(Arc::clone(&ctx));
        Box::pin(async move { fut.await.respond(&ctx).await })
    }
}

/// Convert a handler into a boxed handler.
pub fn into_handler<H: Handler>(handler: H) -> BoxedHandler {
    Arc::new(handler)
}

// ============================================================================
// Handler responses
// ============================================================================

/// What a handler's return value does once the handler body finishes.
#[async_trait]
pub trait HandlerResponse: Send + 'static {
    async fn respond(self, ctx: &Context) -> HandlerResult;
}

#[async_trait]
impl HandlerResponse for () {
    async fn respond(self, _ctx: &Context) -> HandlerResult {
        Ok(())
    }
}

#[async_trait]
impl HandlerResponse for Reply {
    async fn respond(self, ctx: &Context) -> HandlerResult {
        ctx.reply(self).await?;
        Ok(())
    }
}

#[async_trait]
impl HandlerResponse for String {
    async fn respond(self, ctx: &Context) -> HandlerResult {
        Reply::text(self).respond(ctx).await
    }
}

#[async_trait]
impl<T: HandlerResponse> HandlerResponse for Option<T> {
    async fn respond(self, ctx: &Context) -> HandlerResult {
        match self {
            Some(inner) => inner.respond(ctx).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<T, E> HandlerResponse for Result<T, E>
where
    T: HandlerResponse,
    E: Into<BoxError> + Send + 'static,
{
    async fn respond(self, ctx: &Context) -> HandlerResult {
        match self {
            Ok(inner) => inner.respond(ctx).await,
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FsmContext;
    use serde_json::Value;
    use std::time::Duration;
    use taskbot_core::{Event, FsmStore, OutboxBot, StorageError};

    fn context(bot: Arc<OutboxBot>) -> Arc<Context> {
        let event = Event::message(3, 4, "hi", Value::Null);
        let fsm = FsmContext::new(event.key(), FsmStore::in_memory(Duration::from_secs(60)));
        Arc::new(Context::new(event, bot, fsm))
    }

    async fn unit(_ctx: Arc<Context>) {}

    async fn text(_ctx: Arc<Context>) -> String {
        "hello".to_string()
    }

    async fn maybe(_ctx: Arc<Context>) -> Option<Reply> {
        None
    }

    async fn failing(_ctx: Arc<Context>) -> HandlerResult<Reply> {
        Err(StorageError::Unavailable("down".into()).into())
    }

    #[tokio::test]
    async fn test_responses() {
        let bot = Arc::new(OutboxBot::new());
        let ctx = context(bot.clone());

        into_handler(unit).call(ctx.clone()).await.unwrap();
        into_handler(maybe).call(ctx.clone()).await.unwrap();
        assert!(bot.sent().is_empty());

        into_handler(text).call(ctx.clone()).await.unwrap();
        assert_eq!(bot.texts_to(3), vec!["hello"]);

        let err = into_handler(failing).call(ctx.clone()).await.unwrap_err();
        assert!(err.downcast_ref::<StorageError>().is_some());
    }

    #[tokio::test]
    async fn test_closure_handler() {
        let bot = Arc::new(OutboxBot::new());
        let ctx = context(bot.clone());

        let handler = into_handler(|ctx: Arc<Context>| async move {
            let text = ctx.event().text().unwrap_or_default().to_uppercase();
            Ok::<_, BoxError>(Reply::text(text))
        });
        handler.call(ctx).await.unwrap();
        assert_eq!(bot.texts_to(3), vec!["HI"]);
    }

    #[tokio::test]
    async fn test_send_failure_is_an_error() {
        let bot = Arc::new(OutboxBot::new());
        bot.set_disconnected(true);
        let err = into_handler(text).call(context(bot)).await.unwrap_err();
        assert_eq!(err.to_string(), "bot is not connected");
    }
}
