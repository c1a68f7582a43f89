//! Taskbot Runtime - process plumbing for a Taskbot bot.
//!
//! This crate provides:
//! - Layered configuration loading and validation ([`config`])
//! - Logging initialisation from configuration ([`logging`])
//! - The polling loop driving a dispatcher from an update source, the FSM
//!   expiry sweeper and graceful shutdown ([`BotRuntime`])
//! - An in-process update source with redelivery ([`ChannelSource`])
//!
//! ```rust,ignore
//! use taskbot_runtime::BotRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = BotRuntime::builder().build()?;
//!     let dispatcher = my_bot::build_dispatcher(&runtime)?;
//!     runtime.run(dispatcher, Arc::new(my_source)).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod source;

pub use config::{ConfigError, ConfigLoader, ConfigResult, TaskbotConfig, load_config};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{BotRuntime, RunStats, RuntimeBuilder};
pub use source::{ChannelSender, ChannelSource};

// Re-export tracing for use by bot crates
pub use tracing;

/// Logging macros for bot code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
