// Configuration layer: built-in defaults, an optional `config.ini` next to
// the binary's working directory, then `WEIGHT_RELAY__SECTION__KEY`
// environment variables, in increasing priority.

use crate::error::{Error, Result};
use config::{ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Default configuration file, resolved against the working directory.
pub const CONFIG_FILE: &str = "config.ini";

const ENV_PREFIX: &str = "WEIGHT_RELAY";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    pub api: ApiSettings,
    pub serial: SerialSettings,
    pub harness: HarnessSettings,
}

/// Backend location and the device account used to log in.
#[derive(Clone, Deserialize, PartialEq)]
pub struct ApiSettings {
    pub url: String,
    pub email: String,
    pub password: String,
}

// Keep the password out of log lines.
impl fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSettings")
            .field("url", &self.url)
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    /// Seconds; fractions allowed.
    pub read_timeout: f64,
}

impl SerialSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.read_timeout)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HarnessSettings {
    /// Name of the backend's session cookie sent next to `XSRF-TOKEN`.
    pub session_cookie: String,
}

impl Settings {
    /// Load settings from `config.ini` in the working directory.
    pub fn load() -> Result<Self> {
        Self::from_file(Path::new(CONFIG_FILE))
    }

    /// Load settings from the given INI file. A missing file is not an
    /// error: the defaults (and environment overrides) are used instead.
    pub fn from_file(path: &Path) -> Result<Self> {
        let settings: Settings = config::Config::builder()
            .set_default("api.url", "http://192.168.1.165/api")?
            .set_default("api.email", "weight.device@example.com")?
            .set_default("api.password", "password")?
            .set_default("serial.port", "/dev/ttyUSB0")?
            .set_default("serial.baud_rate", 9600)?
            .set_default("serial.read_timeout", 1.0)?
            .set_default("harness.session_cookie", "harvestsystem_session")?
            .add_source(File::from(path).format(FileFormat::Ini).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        tracing::debug!("Loaded settings: {:?}", settings);
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.serial.baud_rate == 0 {
            return Err(invalid("serial.baud_rate must be positive"));
        }
        if !self.serial.read_timeout.is_finite() || self.serial.read_timeout < 0.0 {
            return Err(invalid("serial.read_timeout must be a non-negative number"));
        }
        if self.api.url.trim().is_empty() {
            return Err(invalid("api.url must not be empty"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    Error::Config(ConfigError::Message(message.to_string()))
}
