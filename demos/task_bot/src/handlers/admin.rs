//! Administrative commands, available only to configured admins.

use std::sync::Arc;

use taskbot::core::UserId;
use taskbot::framework::{Category, Context, Filter, HandlerResult, RegistrationError, Router};
use tracing::info;

use super::{command_arg, fill};

pub fn router(admins: impl IntoIterator<Item = UserId>) -> Result<Router, RegistrationError> {
    let admins: Vec<UserId> = admins.into_iter().collect();
    let admin = || Filter::user_in(admins.iter().copied());

    let mut router = Router::new("admin");
    router
        .register_named("ban", Category::Command, Filter::command("ban").and(admin()), ban)?
        .register_named(
            "unban",
            Category::Command,
            Filter::command("unban").and(admin()),
            unban,
        )?
        .register_named("stats", Category::Command, Filter::command("stats").and(admin()), stats)?;
    Ok(router)
}

async fn ban(ctx: Arc<Context>) -> HandlerResult<String> {
    set_banned(&ctx, "ban", true).await
}

async fn unban(ctx: Arc<Context>) -> HandlerResult<String> {
    set_banned(&ctx, "unban", false).await
}

async fn set_banned(ctx: &Context, command: &str, banned: bool) -> HandlerResult<String> {
    let i18n = ctx.i18n()?;
    let Some(target) = command_arg(ctx).and_then(|arg| arg.parse::<UserId>().ok()) else {
        return Ok(fill(i18n.t("ban_usage"), &[("command", command)]));
    };
    let id = target.to_string();

    let resources = ctx.resources()?;
    let users = &resources.users;
    if users.get_user(target).await?.is_none() {
        return Ok(fill(i18n.t("user_not_found"), &[("id", id.as_str())]));
    }

    users.set_banned(target, banned).await?;
    info!(admin = ctx.event().user_id(), target, banned, "Ban status changed");

    let key = if banned { "user_banned" } else { "user_unbanned" };
    Ok(fill(i18n.t(key), &[("id", id.as_str())]))
}

async fn stats(ctx: Arc<Context>) -> HandlerResult<String> {
    let i18n = ctx.i18n()?;
    let resources = ctx.resources()?;
    let target = command_arg(&ctx)
        .and_then(|arg| arg.parse::<UserId>().ok())
        .unwrap_or_else(|| ctx.event().user_id());

    let count = resources.activity.activity(target).await?;
    Ok(fill(
        i18n.t("stats"),
        &[
            ("id", target.to_string().as_str()),
            ("count", count.to_string().as_str()),
        ],
    ))
}
