//! Fallback for anything no other router handled.

use std::sync::Arc;

use taskbot::framework::{Category, Context, Filter, HandlerResult, RegistrationError, Router};
use tracing::debug;

pub fn router() -> Result<Router, RegistrationError> {
    let mut router = Router::new("others");
    router.register_named("fallback", Category::Fallback, Filter::any(), fallback)?;
    Ok(router)
}

async fn fallback(ctx: Arc<Context>) -> HandlerResult {
    if let Some(action_id) = ctx.event().action_id() {
        // Stale buttons still need an answer or the client keeps spinning.
        debug!(action_id, "Unhandled action");
        ctx.bot().answer_action(action_id, None).await?;
        return Ok(());
    }
    ctx.reply(ctx.i18n()?.t("unknown")).await?;
    Ok(())
}
