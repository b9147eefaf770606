//! CLI settings.
//!
//! Layered with figment, later layers winning:
//!
//! 1. built-in defaults
//! 2. the TOML file given with `--config` (or `config/metrology.toml` if present)
//! 3. `METROLOGY_*` environment variables, e.g. `METROLOGY_PROFILE_DIR=/opt/profiles`

use anyhow::{ensure, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "config/metrology.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "METROLOGY_";

/// Settings shared by every subcommand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Reply timeout for raw `send`/`query`; profiles carry their own
    pub default_timeout_ms: u64,
    /// Directory of device profiles
    pub profile_dir: PathBuf,
    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,
    /// Sweep settle time per point
    pub settle_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_timeout_ms: metrology_core::transport::DEFAULT_TIMEOUT_MS,
            profile_dir: PathBuf::from("config/devices"),
            log_json: false,
            settle_ms: 3000,
        }
    }
}

impl Settings {
    /// Load defaults, the config file and the environment.
    ///
    /// An explicit `path` must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let figment = match path {
            Some(path) => {
                ensure!(path.is_file(), "Config file not found: {}", path.display());
                Self::figment(Some(path))
            }
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                Self::figment(default.is_file().then_some(default))
            }
        }
        .merge(Env::prefixed(ENV_PREFIX));

        let settings: Settings = figment
            .extract()
            .context("Failed to extract settings")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults plus an optional TOML file, without the environment layer.
    pub fn figment(path: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(Settings::default()));
        match path {
            Some(path) => figment.merge(Toml::file(path)),
            None => figment,
        }
    }

    /// Reject values no run can use.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.default_timeout_ms > 0,
            "default_timeout_ms must be greater than zero"
        );
        Ok(())
    }

    /// [`Self::default_timeout_ms`] as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// [`Self::settle_ms`] as a duration.
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}
