//! Task Bot console runner.
//!
//! Runs the bot against standard input: every line is a message from one
//! user, and a line starting with `!` is a button press whose action id is
//! the rest of the line. Replies are printed to standard output.
//!
//! ```bash
//! cargo run --package task-bot -- --user-id 7 --admin
//! > /newtask
//! > buy milk
//! > 7
//! > !lang:en
//! ```
//!
//! Configuration is read from `taskbot.toml` and `TASKBOT_*` variables as
//! usual; the bot token defaults to a placeholder since nothing is sent to a
//! real platform.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use async_trait::async_trait;
use clap::Parser;
use serde_json::json;
use taskbot::core::{
    ApiResult, Bot, ChatId, Event, MemoryActivityStore, MemoryStorage, MemoryUserStore, Reply,
    UserId,
};
use taskbot::framework::SharedResources;
use taskbot::runtime::{BotRuntime, ChannelSource, TaskbotConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(version, about = "Task Bot console runner")]
struct Cli {
    /// Configuration file, instead of searching the default locations.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile (development, production, ...).
    #[arg(short, long)]
    profile: Option<String>,

    /// User id the console speaks as.
    #[arg(long, default_value_t = 1)]
    user_id: UserId,

    /// Add the console user to the admin list.
    #[arg(long)]
    admin: bool,
}

/// Prints outgoing messages instead of sending them.
struct ConsoleBot;

#[async_trait]
impl Bot for ConsoleBot {
    fn id(&self) -> &str {
        "console"
    }

    async fn send(&self, chat_id: ChatId, reply: Reply) -> ApiResult<i64> {
        println!("[to {chat_id}] {}", reply.text);
        if let Some(markup) = reply.markup {
            println!("[markup] {markup}");
        }
        Ok(0)
    }

    async fn answer_action(&self, action_id: &str, text: Option<&str>) -> ApiResult<()> {
        if let Some(text) = text {
            println!("[answer {action_id}] {text}");
        }
        Ok(())
    }
}

fn event_from_line(line: &str, user_id: UserId) -> Event {
    let raw = json!({ "from": { "id": user_id, "first_name": "Console" } });
    match line.strip_prefix('!') {
        Some(action_id) => Event::action(user_id, user_id, action_id, raw),
        None => Event::message(user_id, user_id, line, raw),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut defaults = TaskbotConfig::default();
    defaults.bot.token = "console".to_string();

    let mut builder = BotRuntime::builder().merge(defaults);
    if let Some(path) = &cli.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &cli.profile {
        builder = builder.profile(profile);
    }
    let runtime = builder.build().context("failed to load configuration")?;
    let config = runtime.config().clone();

    let translator = Arc::new(task_bot::bundled_translations().map_err(|e| anyhow!(e))?);
    let mut admins = config.bot.admin_ids.clone();
    if cli.admin {
        admins.push(cli.user_id);
    }
    let resources = Arc::new(
        SharedResources::new(
            Arc::new(MemoryUserStore::new()),
            Arc::new(MemoryActivityStore::new()),
            translator,
        )
        .with_admins(admins),
    );

    let fsm = runtime.fsm_store(Arc::new(MemoryStorage::new()));
    let dispatcher = task_bot::build_dispatcher(
        Arc::new(ConsoleBot),
        fsm,
        resources,
        config.dispatch.event_timeout(),
    )?;

    let (sender, source) = ChannelSource::new(
        config.dispatch.poll_batch_size,
        config.dispatch.max_redeliveries,
    );
    let user_id = cli.user_id;
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    if sender.send(event_from_line(line.trim(), user_id)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "Failed to read standard input");
                    break;
                }
            }
        }
        info!("Standard input closed");
    });

    let stats = runtime.run(dispatcher, Arc::new(source)).await?;
    info!(?stats, "Bye");
    Ok(())
}
