//! # Taskbot
//!
//! A dispatch engine for conversational bots whose users walk through
//! multi-step dialogs.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  Update  ┌────────────┐   ┌─────────────────┐   ┌──────────┐
//! │ UpdateSource │────────▶│ BotRuntime │──▶│   Dispatcher    │──▶│  Router  │──▶ Handler
//! └──────────────┘   ack   └────────────┘   │ (per-key queue) │   └──────────┘
//!        ▲                       │          │   middlewares   │        │
//!        └───────────────────────┘          └─────────────────┘        ▼
//!                                                                   FsmStore
//! ```
//!
//! - **Core** ([`core`]): events, FSM storage, the bot API, relational and
//!   translation boundaries
//! - **Framework** ([`framework`]): filters, routers, middlewares and the
//!   dispatcher that serialises cycles per (chat, user) key
//! - **Runtime** ([`runtime`]): configuration, logging and the polling loop
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use taskbot::prelude::*;
//!
//! let mut router = Router::new("user");
//! router.register(Category::Command, Filter::command("start"), |ctx: Arc<Context>| async move {
//!     ctx.fsm().reset_state().await?;
//!     Ok::<_, BoxError>("Hello!".to_string())
//! })?;
//!
//! let runtime = BotRuntime::builder().build()?;
//! let dispatcher = Dispatcher::builder(bot, runtime.fsm_store(storage))
//!     .standard_middlewares(resources)
//!     .include_router(router)?
//!     .build();
//! runtime.run(dispatcher, Arc::new(source)).await?;
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use taskbot_core as core;
pub use taskbot_framework as framework;
pub use taskbot_runtime as runtime;

/// Commonly used types for building a bot.
///
/// ```rust,ignore
/// use taskbot::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    // Runtime
    pub use taskbot_runtime::{BotRuntime, ChannelSender, ChannelSource, TaskbotConfig};

    // Dispatch
    pub use taskbot_framework::{
        BoxError, Category, Context, CycleReport, DispatchError, Dispatcher, Filter,
        HandlerResult, Middleware, Next, Outcome, RegistrationError, Router, SharedResources,
        from_fn,
    };

    // Core types
    pub use taskbot_core::{
        Bot, BoxedBot, Event, FsmKey, FsmRecord, FsmState, FsmStore, MemoryStorage, Reply,
        StateName, Translations, Translator,
    };
}
