//! Configuration module for the Taskbot runtime.
//!
//! Configuration is layered with figment (defaults, files, `TASKBOT_*`
//! environment variables, programmatic overrides), validated once, and
//! immutable afterwards.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    BotConfig, DatabaseConfig, DispatchConfig, FsmConfig, LogFormat, LogLevel, LogOutput,
    LoggingConfig, SpanEventConfig, TaskbotConfig,
};
pub use validation::validate_config;
