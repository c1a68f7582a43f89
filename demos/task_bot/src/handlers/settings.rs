//! Language settings.

use std::sync::Arc;

use serde_json::{Value, json};
use taskbot::core::Reply;
use taskbot::framework::{
    Category, Context, Filter, HandlerResult, I18n, RegistrationError, Router,
};
use tracing::info;

/// Prefix of the language buttons' action ids, followed by the locale.
pub const LANG_PREFIX: &str = "lang:";

pub fn router() -> Result<Router, RegistrationError> {
    let mut router = Router::new("settings");
    router
        .register_named(
            "language_menu",
            Category::Command,
            Filter::command("language"),
            language_menu,
        )?
        .register_named(
            "language_set",
            Category::Action,
            Filter::action_prefix(LANG_PREFIX),
            set_language,
        )?;
    Ok(router)
}

/// Replies with one button per available locale.
async fn language_menu(ctx: Arc<Context>) -> HandlerResult<Reply> {
    let i18n = ctx.i18n()?;
    let translator = i18n.translator();
    let buttons: Vec<Value> = translator
        .available_locales()
        .into_iter()
        .map(|locale| {
            json!({
                "text": translator.translate(&locale, "lang_name"),
                "callback_data": format!("{LANG_PREFIX}{locale}"),
            })
        })
        .collect();

    Ok(Reply::text(i18n.t("language_choose"))
        .with_markup(json!({ "inline_keyboard": [buttons] })))
}

async fn set_language(ctx: Arc<Context>) -> HandlerResult {
    let i18n = ctx.i18n()?;
    let action_id = ctx.event().action_id().unwrap_or_default();
    let locale = action_id.trim_start_matches(LANG_PREFIX);

    if !i18n.translator().is_available(locale) {
        let text = i18n.t("language_unknown");
        ctx.bot().answer_action(action_id, Some(text.as_str())).await?;
        return Ok(());
    }

    let user_id = ctx.event().user_id();
    ctx.resources()?
        .users
        .set_language(user_id, locale)
        .await?;
    info!(user_id, locale, "Language changed");

    let confirmed = I18n::new(locale, Arc::clone(i18n.translator()));
    ctx.bot().answer_action(action_id, None).await?;
    ctx.reply(confirmed.t("language_saved")).await?;
    Ok(())
}
