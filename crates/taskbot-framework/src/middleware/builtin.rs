//! The standard middleware chain.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, trace};

use taskbot_core::NewUser;

use super::{BoxedMiddleware, Middleware, Next};
use crate::context::Context;
use crate::error::{DispatchError, DispatchResult};
use crate::outcome::Outcome;
use crate::resources::{I18n, Locale, SharedResources};

/// Returns the standard chain in its required order.
pub fn standard_chain(resources: Arc<SharedResources>) -> Vec<BoxedMiddleware> {
    vec![
        Arc::new(ResourceInjection::new(resources)),
        Arc::new(BanCheck),
        Arc::new(ActivityCounter),
        Arc::new(LocaleResolver),
        Arc::new(TranslatorInjection),
    ]
}

// =============================================================================
// ResourceInjection
// =============================================================================

/// Makes [`SharedResources`] available through [`Context::resources`].
#[derive(Debug, Clone)]
pub struct ResourceInjection {
    resources: Arc<SharedResources>,
}

impl ResourceInjection {
    pub fn new(resources: Arc<SharedResources>) -> Self {
        Self { resources }
    }
}

#[async_trait]
impl Middleware for ResourceInjection {
    fn name(&self) -> &str {
        "resource_injection"
    }

    async fn handle(&self, ctx: Arc<Context>, next: Next) -> DispatchResult<Outcome> {
        ctx.insert(Arc::clone(&self.resources));
        next.run(ctx).await
    }
}

// =============================================================================
// BanCheck
// =============================================================================

/// Drops events from banned users before anything else sees them.
#[derive(Debug, Clone, Copy, Default)]
pub struct BanCheck;

#[async_trait]
impl Middleware for BanCheck {
    fn name(&self) -> &str {
        "ban_check"
    }

    async fn handle(&self, ctx: Arc<Context>, next: Next) -> DispatchResult<Outcome> {
        let resources = ctx
            .resources()
            .map_err(|e| DispatchError::middleware(self.name(), e))?;
        let user_id = ctx.event().user_id();
        let banned = resources
            .users
            .get_banned(user_id)
            .await
            .map_err(|e| DispatchError::middleware(self.name(), e))?;

        if banned == Some(true) {
            info!(user_id, "Ignoring event from banned user");
            ctx.short_circuit();
            return Ok(Outcome::short_circuited(self.name()));
        }
        next.run(ctx).await
    }
}

// =============================================================================
// ActivityCounter
// =============================================================================

/// Registers unknown users and counts every event that gets past the ban
/// check.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivityCounter;

#[async_trait]
impl Middleware for ActivityCounter {
    fn name(&self) -> &str {
        "activity_counter"
    }

    async fn handle(&self, ctx: Arc<Context>, next: Next) -> DispatchResult<Outcome> {
        let resources = ctx
            .resources()
            .map_err(|e| DispatchError::middleware(self.name(), e))?;
        let user_id = ctx.event().user_id();

        // Keyed by the event's user id, same as the activity counter.
        let new_user = NewUser {
            user_id,
            ..NewUser::from_sender(&ctx.event().sender(), resources.translator.default_locale())
        };
        let created = resources
            .users
            .add_user(new_user)
            .await
            .map_err(|e| DispatchError::middleware(self.name(), e))?;
        if created {
            info!(user_id, "Registered new user");
        }

        let activity = resources
            .activity
            .record_activity(user_id)
            .await
            .map_err(|e| DispatchError::middleware(self.name(), e))?;
        debug!(user_id, activity, "Activity recorded");

        let started = Instant::now();
        let outcome = next.run(ctx).await;
        trace!(user_id, elapsed = ?started.elapsed(), "Event processed");
        outcome
    }
}

// =============================================================================
// LocaleResolver
// =============================================================================

/// Picks the locale for the event.
///
/// The user's stored language wins, then the language reported by the
/// platform, then the translator's default. Only locales the translator has
/// tables for are accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocaleResolver;

#[async_trait]
impl Middleware for LocaleResolver {
    fn name(&self) -> &str {
        "locale_resolver"
    }

    async fn handle(&self, ctx: Arc<Context>, next: Next) -> DispatchResult<Outcome> {
        let resources = ctx
            .resources()
            .map_err(|e| DispatchError::middleware(self.name(), e))?;
        let translator = &resources.translator;
        let stored = resources
            .users
            .get_language(ctx.event().user_id())
            .await
            .map_err(|e| DispatchError::middleware(self.name(), e))?;

        let locale = stored
            .filter(|l| translator.is_available(l))
            .or_else(|| {
                ctx.event()
                    .sender()
                    .language_code
                    .filter(|l| translator.is_available(l))
            })
            .unwrap_or_else(|| translator.default_locale().to_string());

        trace!(locale = %locale, "Locale resolved");
        ctx.insert(Locale(locale));
        next.run(ctx).await
    }
}

// =============================================================================
// TranslatorInjection
// =============================================================================

/// Binds the translator to the resolved locale and injects it as [`I18n`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TranslatorInjection;

#[async_trait]
impl Middleware for TranslatorInjection {
    fn name(&self) -> &str {
        "translator_injection"
    }

    async fn handle(&self, ctx: Arc<Context>, next: Next) -> DispatchResult<Outcome> {
        let resources = ctx
            .resources()
            .map_err(|e| DispatchError::middleware(self.name(), e))?;
        let translator = Arc::clone(&resources.translator);
        let locale = ctx
            .get::<Locale>()
            .map(|l| l.0)
            .unwrap_or_else(|| translator.default_locale().to_string());

        ctx.insert(I18n::new(locale, translator));
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FsmContext;
    use crate::middleware::Endpoint;
    use serde_json::{Value, json};
    use std::time::Duration;
    use taskbot_core::{
        ActivityStore, Event, FsmStore, MemoryActivityStore, MemoryUserStore, OutboxBot,
        StoreError, StoreResult, Translations, UserId, UserRecord, UserStore,
    };

    /// Ends the chain and reports what the handler would have seen.
    struct Greeting;

    #[async_trait]
    impl Endpoint for Greeting {
        async fn call(&self, ctx: Arc<Context>) -> DispatchResult<Outcome> {
            let i18n = ctx.i18n()?;
            Ok(Outcome::Handled {
                handler: i18n.t("hello"),
            })
        }
    }

    struct Fixture {
        users: Arc<MemoryUserStore>,
        activity: Arc<MemoryActivityStore>,
        resources: Arc<SharedResources>,
    }

    fn fixture() -> Fixture {
        let users = Arc::new(MemoryUserStore::new());
        let activity = Arc::new(MemoryActivityStore::new());
        let translator = Translations::new("ru")
            .with_locale("ru", [("hello", "привет")])
            .with_locale("en", [("hello", "hello")]);
        let resources = Arc::new(SharedResources::new(
            users.clone(),
            activity.clone(),
            Arc::new(translator),
        ));
        Fixture {
            users,
            activity,
            resources,
        }
    }

    async fn run(
        resources: Arc<SharedResources>,
        event: Event,
    ) -> (Arc<Context>, DispatchResult<Outcome>) {
        let fsm = FsmContext::new(event.key(), FsmStore::in_memory(Duration::from_secs(60)));
        let ctx = Arc::new(Context::new(event, Arc::new(OutboxBot::new()), fsm));
        let chain: Arc<[BoxedMiddleware]> = Arc::from(standard_chain(resources));
        let outcome = Next::new(chain, Arc::new(Greeting)).run(ctx.clone()).await;
        (ctx, outcome)
    }

    fn message_from(user_id: UserId, language_code: &str) -> Event {
        Event::message(
            user_id,
            user_id,
            "hi",
            json!({"from": {"id": user_id, "first_name": "Ann", "language_code": language_code}}),
        )
    }

    #[tokio::test]
    async fn test_new_user_gets_registered_and_counted() {
        let f = fixture();
        let (ctx, outcome) = run(f.resources.clone(), message_from(1, "en")).await;

        assert_eq!(outcome.unwrap().handler(), Some("привет"));
        let user = f.users.get_user(1).await.unwrap().unwrap();
        assert_eq!(user.first_name, "Ann");
        assert_eq!(user.language, "ru");
        assert_eq!(f.activity.activity(1).await.unwrap(), 1);
        assert_eq!(ctx.locale().unwrap(), "ru");
    }

    #[tokio::test]
    async fn test_banned_user_is_dropped_before_counting() {
        let f = fixture();
        run(f.resources.clone(), message_from(1, "en")).await.1.unwrap();
        f.users.set_banned(1, true).await.unwrap();

        let (ctx, outcome) = run(f.resources.clone(), message_from(1, "en")).await;
        assert_eq!(outcome.unwrap(), Outcome::short_circuited("ban_check"));
        assert!(ctx.is_short_circuited());
        assert!(!ctx.contains::<I18n>());
        assert_eq!(f.activity.activity(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_locale_resolution_order() {
        let f = fixture();
        run(f.resources.clone(), message_from(1, "en")).await.1.unwrap();

        f.users.set_language(1, "en").await.unwrap();
        let (ctx, _) = run(f.resources.clone(), message_from(1, "de")).await;
        assert_eq!(ctx.locale().unwrap(), "en");
        assert_eq!(ctx.i18n().unwrap().t("hello"), "hello");

        // Unsupported stored language falls through to the sender's language.
        f.users.set_language(1, "de").await.unwrap();
        let (ctx, _) = run(f.resources.clone(), message_from(1, "en")).await;
        assert_eq!(ctx.locale().unwrap(), "en");

        let (ctx, _) = run(f.resources.clone(), message_from(1, "fr")).await;
        assert_eq!(ctx.locale().unwrap(), "ru");
    }

    struct DownUsers;

    #[async_trait]
    impl UserStore for DownUsers {
        async fn add_user(&self, _user: NewUser) -> StoreResult<bool> {
            Err(StoreError::Unavailable("db down".into()))
        }
        async fn get_user(&self, _user_id: UserId) -> StoreResult<Option<UserRecord>> {
            Err(StoreError::Unavailable("db down".into()))
        }
        async fn get_language(&self, _user_id: UserId) -> StoreResult<Option<String>> {
            Err(StoreError::Unavailable("db down".into()))
        }
        async fn set_language(&self, _user_id: UserId, _language: &str) -> StoreResult<()> {
            Err(StoreError::Unavailable("db down".into()))
        }
        async fn get_alive(&self, _user_id: UserId) -> StoreResult<Option<bool>> {
            Err(StoreError::Unavailable("db down".into()))
        }
        async fn set_alive(&self, _user_id: UserId, _alive: bool) -> StoreResult<()> {
            Err(StoreError::Unavailable("db down".into()))
        }
        async fn get_banned(&self, _user_id: UserId) -> StoreResult<Option<bool>> {
            Err(StoreError::Unavailable("db down".into()))
        }
        async fn set_banned(&self, _user_id: UserId, _banned: bool) -> StoreResult<()> {
            Err(StoreError::Unavailable("db down".into()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_fatal() {
        let resources = Arc::new(SharedResources::new(
            Arc::new(DownUsers),
            Arc::new(MemoryActivityStore::new()),
            Arc::new(Translations::new("ru").with_locale("ru", [("hello", "привет")])),
        ));
        let (_, outcome) = run(resources, message_from(1, "en")).await;
        assert!(matches!(
            outcome,
            Err(DispatchError::MiddlewareFatal { ref middleware, .. }) if middleware == "ban_check"
        ));
    }

    #[tokio::test]
    async fn test_missing_resources() {
        let event = Event::message(1, 1, "x", Value::Null);
        let fsm = FsmContext::new(event.key(), FsmStore::in_memory(Duration::from_secs(60)));
        let ctx = Arc::new(Context::new(event, Arc::new(OutboxBot::new()), fsm));
        let chain: Arc<[BoxedMiddleware]> = Arc::from(vec![Arc::new(BanCheck) as BoxedMiddleware]);

        let err = Next::new(chain, Arc::new(Greeting)).run(ctx).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::MiddlewareFatal { ref middleware, ref source }
                if middleware == "ban_check" && source.to_string().contains("was not injected")
        ));
    }

    #[tokio::test]
    async fn test_user_is_registered_under_event_user_id() {
        let f = fixture();
        let event = Event::message(
            3,
            3,
            "hi",
            json!({"from": {"id": 99, "first_name": "Ann"}}),
        );
        run(f.resources.clone(), event).await.1.unwrap();

        assert_eq!(f.users.get_user(3).await.unwrap().unwrap().first_name, "Ann");
        assert_eq!(f.users.get_user(99).await.unwrap(), None);
        assert_eq!(f.activity.activity(3).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_user_without_sender_profile_is_registered() {
        let f = fixture();
        run(f.resources.clone(), Event::message(4, 4, "hi", Value::Null))
            .await
            .1
            .unwrap();

        assert!(f.users.get_user(4).await.unwrap().is_some());
        assert_eq!(f.activity.activity(4).await.unwrap(), 1);
    }
}
