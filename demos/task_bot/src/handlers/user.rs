//! The task flow.

use std::sync::Arc;

use taskbot::core::{ApiError, Reply, UserId};
use taskbot::framework::{
    Category, Context, Filter, HandlerResult, I18n, RegistrationError, Router,
};
use tracing::{debug, info, warn};

use super::fill;
use crate::states::{TASK_TEXT, TaskState};

pub fn router() -> Result<Router, RegistrationError> {
    let mut router = Router::new("user");
    router
        .register_named(
            "welcome",
            Category::Command,
            Filter::command("start").and(Filter::idle()),
            welcome,
        )?
        .register_named("restart", Category::Command, Filter::command("start"), restart)?
        .register_named("help", Category::Command, Filter::command("help"), help)?
        .register_named("new_task", Category::Command, Filter::command("newtask"), new_task)?
        .register_named(
            "cancel",
            Category::Command,
            Filter::command("cancel").and(Filter::any_state()),
            cancel,
        )?
        .register_named(
            "task_text",
            Category::Text,
            Filter::state(TaskState::AwaitingTaskText).and(Filter::plain_text()),
            save_task_text,
        )?
        .register_named(
            "task_person",
            Category::Text,
            Filter::state(TaskState::AwaitingTaskPerson).and(Filter::plain_text()),
            save_task_person,
        )?;
    Ok(router)
}

async fn welcome(ctx: Arc<Context>) -> HandlerResult<Reply> {
    Ok(Reply::text(ctx.i18n()?.t("start")))
}

/// `/start` in the middle of a flow drops the flow first.
async fn restart(ctx: Arc<Context>) -> HandlerResult<Reply> {
    ctx.fsm().clear().await?;
    Ok(Reply::text(ctx.i18n()?.t("start")))
}

async fn help(ctx: Arc<Context>) -> HandlerResult<String> {
    Ok(ctx.i18n()?.t("help"))
}

async fn new_task(ctx: Arc<Context>) -> HandlerResult {
    let i18n = ctx.i18n()?;
    ctx.reply(i18n.t("task_text_prompt")).await?;
    ctx.fsm().clear().await?;
    ctx.fsm().set_state(TaskState::AwaitingTaskText).await?;
    Ok(())
}

async fn cancel(ctx: Arc<Context>) -> HandlerResult {
    ctx.fsm().clear().await?;
    ctx.reply(ctx.i18n()?.t("cancelled")).await?;
    Ok(())
}

async fn save_task_text(ctx: Arc<Context>) -> HandlerResult {
    let i18n = ctx.i18n()?;
    let text = ctx.event().text().unwrap_or_default().trim().to_string();

    ctx.reply(i18n.t("task_person_prompt")).await?;
    ctx.fsm().set_field(TASK_TEXT, &text).await?;
    ctx.fsm().set_state(TaskState::AwaitingTaskPerson).await?;
    debug!(task = %text, "Task text saved");
    Ok(())
}

async fn save_task_person(ctx: Arc<Context>) -> HandlerResult {
    let i18n = ctx.i18n()?;
    let person = ctx.event().text().unwrap_or_default().trim().to_string();

    let record = ctx.fsm().get().await?;
    let Some(task) = record.field::<String>(TASK_TEXT) else {
        // The data expired or was never written; ask for the text again.
        warn!("Task text missing in awaiting_task_person, restarting the flow");
        ctx.reply(i18n.t("task_text_prompt")).await?;
        ctx.fsm().set_state(TaskState::AwaitingTaskText).await?;
        return Ok(());
    };

    notify_assignee(&ctx, &person, &task).await?;
    ctx.reply(fill(
        i18n.t("task_created"),
        &[("task", task.as_str()), ("person", person.as_str())],
    ))
    .await?;

    ctx.fsm().clear().await?;
    info!(task = %task, person = %person, "Task created");
    Ok(())
}

/// Tells a registered assignee about the task.
///
/// Assignees given by name are not reachable and are skipped. An assignee
/// who blocked the bot is marked as not alive instead of failing the step.
async fn notify_assignee(ctx: &Context, person: &str, task: &str) -> HandlerResult {
    let Ok(assignee) = person.parse::<UserId>() else {
        return Ok(());
    };
    let resources = ctx.resources()?;
    let Some(user) = resources.users.get_user(assignee).await? else {
        debug!(assignee, "Assignee is not registered, skipping notification");
        return Ok(());
    };
    if !user.is_alive {
        return Ok(());
    }

    let text = fill(
        I18n::new(user.language, Arc::clone(&resources.translator)).t("task_assigned"),
        &[("task", task)],
    );
    match ctx.bot().send(assignee, Reply::text(text)).await {
        Ok(_) => Ok(()),
        Err(ApiError::Rejected { code, description }) => {
            warn!(assignee, code, description = %description, "Assignee unreachable");
            resources.users.set_alive(assignee, false).await?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
