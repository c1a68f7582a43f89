//! Task Bot
//!
//! A bot that walks users through creating a task and assigning it to
//! someone, built on the Taskbot engine.
//!
//! Routers are included in this order, so earlier ones win within a
//! category:
//!
//! | Router     | Handles                                          |
//! |------------|--------------------------------------------------|
//! | `settings` | `/language` and `lang:*` button presses          |
//! | `admin`    | `/ban`, `/unban`, `/stats` from admins           |
//! | `user`     | `/start`, `/help`, `/newtask`, `/cancel`, task flow |
//! | `others`   | everything else                                  |
//!
//! Handlers that both notify someone and move the conversation forward send
//! first and write the FSM state last. A failed send therefore leaves the
//! user in the same state, and resending the same answer retries the step.

pub mod handlers;
pub mod states;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use taskbot::core::{BoxedBot, BoxedTranslator, FsmStore, Translations};
use taskbot::framework::{Context, DispatchError, Dispatcher, RegistrationError, SharedResources};
use tracing::warn;

pub use states::{TASK_TEXT, TaskState};

const EN: &str = include_str!("../locales/en.json");
const RU: &str = include_str!("../locales/ru.json");

/// The bundled English and Russian tables, Russian being the default.
pub fn bundled_translations() -> Result<Translations, String> {
    let parse = |name: &str, source: &str| {
        serde_json::from_str::<Value>(source).map_err(|e| format!("locale '{name}': {e}"))
    };
    let bundle = json!({
        "default": "ru",
        "en": parse("en", EN)?,
        "ru": parse("ru", RU)?,
    });
    Translations::from_json(&bundle)
}

/// Builds the dispatcher with the standard middlewares and every router.
pub fn build_dispatcher(
    bot: BoxedBot,
    fsm: FsmStore,
    resources: Arc<SharedResources>,
    event_timeout: Duration,
) -> Result<Dispatcher, RegistrationError> {
    let admins = resources.admin_ids.iter().copied().collect::<Vec<_>>();
    let translator = Arc::clone(&resources.translator);

    Ok(Dispatcher::builder(bot, fsm)
        .standard_middlewares(resources)
        .include_router(handlers::settings::router()?)?
        .include_router(handlers::admin::router(admins)?)?
        .include_router(handlers::user::router()?)?
        .include_router(handlers::others::router()?)?
        .event_timeout(event_timeout)
        .on_error(move |ctx, err| apologize(ctx, err, Arc::clone(&translator)))
        .build())
}

/// Sends a generic apology after a failed cycle.
async fn apologize(ctx: Arc<Context>, err: Arc<DispatchError>, translator: BoxedTranslator) {
    // The locale is unknown if the cycle failed before the translator was
    // injected.
    let text = match ctx.i18n() {
        Ok(i18n) => i18n.t("error"),
        Err(_) => translator.translate(translator.default_locale(), "error"),
    };
    if let Err(send_err) = ctx.reply(text).await {
        warn!(error = %send_err, cause = %err, "Failed to send apology");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskbot::core::Translator;

    #[test]
    fn test_bundled_translations() {
        let t = bundled_translations().unwrap();
        assert_eq!(t.default_locale(), "ru");
        assert_eq!(t.available_locales(), vec!["en", "ru"]);
        assert_eq!(t.translate("en", "lang_name"), "English");
        assert_eq!(t.translate("ru", "lang_name"), "Русский");
    }
}
