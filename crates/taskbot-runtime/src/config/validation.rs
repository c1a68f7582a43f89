//! Configuration validation.

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    BotConfig, DatabaseConfig, DispatchConfig, FsmConfig, LogFormat, LogOutput, LoggingConfig,
    TaskbotConfig,
};

/// Validates the entire configuration.
pub fn validate_config(config: &TaskbotConfig) -> ConfigResult<()> {
    validate_bot_config(&config.bot)?;
    validate_database_config(&config.database)?;
    validate_fsm_config(&config.fsm)?;
    validate_dispatch_config(&config.dispatch)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_bot_config(bot: &BotConfig) -> ConfigResult<()> {
    if bot.token.trim().is_empty() {
        return Err(ConfigError::missing_field("bot.token"));
    }
    Ok(())
}

fn validate_database_config(db: &DatabaseConfig) -> ConfigResult<()> {
    if db.host.is_empty() {
        return Err(ConfigError::missing_field("database.host"));
    }
    validate_port(db.port, "database.port")?;
    if db.name.is_empty() {
        return Err(ConfigError::missing_field("database.name"));
    }
    Ok(())
}

fn validate_fsm_config(fsm: &FsmConfig) -> ConfigResult<()> {
    if fsm.host.is_empty() {
        return Err(ConfigError::missing_field("fsm.host"));
    }
    validate_port(fsm.port, "fsm.port")?;
    if fsm.ttl_secs == 0 {
        return Err(ConfigError::validation("fsm.ttl_secs must be greater than 0"));
    }
    if fsm.sweep_interval_secs == 0 {
        return Err(ConfigError::validation(
            "fsm.sweep_interval_secs must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_dispatch_config(dispatch: &DispatchConfig) -> ConfigResult<()> {
    if dispatch.event_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "dispatch.event_timeout_ms must be greater than 0",
        ));
    }
    if dispatch.poll_batch_size == 0 {
        return Err(ConfigError::validation(
            "dispatch.poll_batch_size must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    if logging.format == LogFormat::Json && !cfg!(feature = "json-log") {
        return Err(ConfigError::validation(
            "logging.format = \"json\" requires the json-log feature",
        ));
    }
    for target in logging.filters.keys() {
        if target.is_empty() || target.contains(char::is_whitespace) {
            return Err(ConfigError::validation(format!(
                "Invalid logging filter target: '{target}'"
            )));
        }
    }
    Ok(())
}

fn validate_port(port: u16, field: &str) -> ConfigResult<()> {
    if port == 0 {
        return Err(ConfigError::InvalidPort {
            field: field.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use std::path::PathBuf;

    fn valid() -> TaskbotConfig {
        let mut config = TaskbotConfig::default();
        config.bot.token = "123:abc".into();
        config
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn test_empty_token() {
        let mut config = valid();
        config.bot.token = "  ".into();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn test_zero_ports() {
        let mut config = valid();
        config.fsm.port = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort { ref field } if field == "fsm.port"));

        let mut config = valid();
        config.database.port = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_durations() {
        let mut config = valid();
        config.fsm.ttl_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = valid();
        config.dispatch.event_timeout_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = valid();
        config.dispatch.poll_batch_size = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_file_output_needs_path() {
        let mut config = valid();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());

        config.logging.file_path = Some(PathBuf::from("taskbot.log"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_filter_targets() {
        let mut config = valid();
        config
            .logging
            .filters
            .insert("bad target".into(), LogLevel::Debug);
        assert!(validate_config(&config).is_err());
    }
}
