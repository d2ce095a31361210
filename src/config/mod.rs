//! Configuration loading.
//!
//! Values come from `config/default.*` in the working directory, an
//! optional explicit file and `TALONMQ__SECTION__KEY` environment
//! variables, in increasing order of precedence, layered over
//! [`Settings::default`].

mod settings;

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};

use crate::broker::BrokerOptions;
use crate::protocol::MAX_REQUEST_SIZE;
use crate::utils::memory::parse_memory;

pub use settings::{
    BrokerSettings, LoggingSettings, PartialBrokerSettings, PartialLoggingSettings,
    PartialServerSettings, PartialSettings, ServerSettings, Settings,
};

/// Loads the configuration from the default file, `path` when given, and
/// environment variables, merged over the default values.
pub fn load_config(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut builder =
        Config::builder().add_source(File::with_name("config/default").required(false));
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }
    let config = builder
        .add_source(Environment::with_prefix("TALONMQ").separator("__"))
        .build()?;

    let partial: PartialSettings = config.try_deserialize()?;
    let settings = partial.merge_into(Settings::default());
    settings.validate()?;
    Ok(settings)
}

impl Settings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_request_size == 0 || self.server.max_request_size > MAX_REQUEST_SIZE {
            return Err(ConfigError::Message(format!(
                "server.max_request_size must be between 1 and {MAX_REQUEST_SIZE}"
            )));
        }
        if self.server.max_clients == 0 {
            return Err(ConfigError::Message(
                "server.max_clients must be at least 1".to_string(),
            ));
        }
        self.max_memory_bytes()?;
        Ok(())
    }

    pub fn max_memory_bytes(&self) -> Result<u64, ConfigError> {
        parse_memory(&self.broker.max_memory).ok_or_else(|| {
            ConfigError::Message(format!(
                "broker.max_memory: unrecognised size {:?}",
                self.broker.max_memory
            ))
        })
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.broker.save_timeout_secs)
    }

    /// Builds the broker options described by these settings.
    pub fn broker_options(&self) -> Result<BrokerOptions, ConfigError> {
        let storage = &self.broker.storage_path;
        Ok(BrokerOptions {
            admin_name: self.broker.admin_name.clone(),
            admin_password: self.broker.admin_password.clone(),
            max_memory: self.max_memory_bytes()?,
            max_clients: self.server.max_clients,
            client_timeout_ms: self.server.client_timeout_secs.saturating_mul(1000),
            storage_path: (!storage.as_os_str().is_empty()).then(|| storage.clone()),
        })
    }
}
