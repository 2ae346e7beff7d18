//! Configuration for volumed.
//!
//! Settings come from built-in defaults overridden by `VOLUMED__`-prefixed
//! environment variables, with `__` separating nested keys
//! (`VOLUMED__VOLUMES__ROOT=/srv/volumes`).
//!
//! # Example
//!
//! ```no_run
//! use volumed::infrastructure::config::Settings;
//!
//! let settings = Settings::new().expect("Failed to load configuration");
//! ```

pub mod namespace;
pub mod reaper;
pub mod server;
pub mod telemetry;
pub mod volumes;

pub use namespace::NamespaceSettings;
pub use reaper::ReaperSettings;
pub use server::ServerSettings;
pub use telemetry::TelemetrySettings;
pub use volumes::VolumeSettings;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment};
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Logging settings.
    pub telemetry: TelemetrySettings,
    /// Volume storage settings.
    pub volumes: VolumeSettings,
    /// Import namespacing settings.
    #[serde(default)]
    pub namespace: NamespaceSettings,
    /// Expiry reaper settings.
    #[serde(default)]
    pub reaper: ReaperSettings,
}

impl Settings {
    /// Loads settings from defaults and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be built or deserialized.
    pub fn new() -> Result<Self, ConfigError> {
        defaults()?
            .add_source(Environment::with_prefix("VOLUMED").separator("__"))
            .build()?
            .try_deserialize()
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 7788)?
        .set_default("telemetry.log_level", "info")?
        .set_default("telemetry.json", true)?
        .set_default("volumes.root", "/var/lib/volumed")?
        .set_default("volumes.driver", "naive")
}

/// Helper for strong typing addresses
pub struct BindAddress(pub String, pub u16);

impl BindAddress {
    /// Converts the bind address to a `SocketAddr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the IP address string cannot be parsed.
    pub fn to_socket_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        let ip = self
            .0
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid IP address '{}': {e}", self.0))?;
        Ok(std::net::SocketAddr::new(ip, self.1))
    }
}

impl From<&ServerSettings> for BindAddress {
    fn from(server: &ServerSettings) -> Self {
        Self(server.host.clone(), server.port)
    }
}
