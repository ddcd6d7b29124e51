//! Configuration loading.
//!
//! Sources, later ones overriding earlier ones:
//! 1. built-in defaults (`Settings::default`)
//! 2. `config/default.{toml,yaml,json}` relative to the working directory
//! 3. `ROOMLINK_*` environment variables, sections split by `__`
//!    (for example `ROOMLINK_SERVER__PORT=7100`), after `.env` is loaded

mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    AuthSettings, DatabaseSettings, ListenMode, LogSettings, ServerSettings, SessionSettings,
    Settings,
};

/// Loads the configuration and merges it with default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    let _ = dotenvy::dotenv();

    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("ROOMLINK")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("auth.allowed_origins")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge_onto(Settings::default()))
}

#[cfg(test)]
mod tests;
