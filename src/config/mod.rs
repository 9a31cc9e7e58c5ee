mod settings;

#[cfg(test)]
mod tests;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BrokerSettings, DeliverySettings, LoggingSettings, PartialSettings, Settings,
};

/// Loads the configuration from `config/default` (any format the `config`
/// crate understands, optional) and `EVENTLINK_*` environment variables,
/// after loading a `.env` file if one exists.
///
/// Nested keys use a double underscore: `EVENTLINK_BROKER__HOST`.
/// Returns the merged `Settings`, with defaults for anything not provided.
pub fn load_config() -> Result<Settings, ConfigError> {
    let _ = dotenvy::dotenv();

    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("EVENTLINK")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(Settings::merge(partial))
}
