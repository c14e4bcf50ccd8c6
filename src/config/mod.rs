//! The `config` module resolves the runtime configuration.
//!
//! Sources are layered: an optional `config/default.{toml,yaml,json}` file, then
//! environment variables prefixed with `AMQP_LOGGER` (nested keys separated by
//! `__`, e.g. `AMQP_LOGGER_AMQP__URL`). Whatever is present is merged with
//! [`Settings::default`] in one place.

mod settings;

use std::path::Path;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    AmqpSettings, ConsoleSettings, ExchangeOptions, Format, LoggingSettings, ReconnectSettings,
    Settings,
};

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "AMQP_LOGGER";

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Returns a `Settings` struct containing the transport configurations
pub fn load_config() -> Result<Settings, ConfigError> {
    build(File::with_name("config/default").required(false))
}

/// Same as [`load_config`] but reads the given file, which must exist.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
    build(File::from(path.as_ref()).required(true))
}

fn build<S>(file: S) -> Result<Settings, ConfigError>
where
    S: config::Source + Send + Sync + 'static,
{
    let builder = Config::builder().add_source(file).add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    Ok(partial.resolve(Settings::default()))
}
