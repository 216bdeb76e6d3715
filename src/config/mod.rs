//! Tool settings.
//!
//! Settings come from an optional YAML file (`--config`, or
//! `~/.fleet/fleet.yaml` when present). Every key has a default, so an
//! empty or missing file is a valid configuration.

mod duration;

pub use duration::parse_duration_string;

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the settings file looked up under the home directory.
const SETTINGS_FILE: &str = "fleet.yaml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory holding identity records. `~/.fleet/state` when unset.
    pub state_dir: Option<PathBuf>,
    /// Compose file for the shared database/cache tier.
    pub infra_compose_file: PathBuf,
    /// Compose file used for every instance.
    pub instance_compose_file: PathBuf,
    /// Compose project name of the shared tier.
    pub infra_project: String,
    /// Prefix of every instance's compose project and volume names.
    pub unit_prefix: String,
    /// Database service inside the shared tier.
    pub database_service: String,
    /// Cache service inside the shared tier.
    pub cache_service: String,
    /// Administrative login of the database server.
    pub admin_user: String,
    pub default_port: u16,
    pub port_attempts: u32,
    /// Cache namespaces up to and including this index are reserved.
    pub namespace_floor: u32,
    pub health_interval: String,
    pub health_attempts: u32,
    /// Instance services gated on health, in order.
    pub services: Vec<String>,
    /// Instance services whose images `update` pulls. Defaults to `services`.
    pub images: Option<Vec<String>>,
    pub command_timeout: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: None,
            infra_compose_file: PathBuf::from("infra/docker-compose.yml"),
            instance_compose_file: PathBuf::from("instance/docker-compose.yml"),
            infra_project: "fleet-infra".to_string(),
            unit_prefix: "fleet".to_string(),
            database_service: "postgres".to_string(),
            cache_service: "redis".to_string(),
            admin_user: "postgres".to_string(),
            default_port: 5678,
            port_attempts: 1000,
            namespace_floor: 2,
            health_interval: "5s".to_string(),
            health_attempts: 30,
            services: vec![
                "primary".to_string(),
                "ingress".to_string(),
                "worker".to_string(),
            ],
            images: None,
            command_timeout: "120s".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from the default location if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("Cannot read '{}': {}", path.display(), e))
        })?;
        let settings = Self::parse(&contents)?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Parse settings from YAML text and validate them.
    pub fn parse(contents: &str) -> Result<Self> {
        let settings: Settings = if contents.trim().is_empty() {
            Settings::default()
        } else {
            serde_yaml::from_str(contents)?
        };
        settings.validate()?;
        Ok(settings)
    }

    fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".fleet").join(SETTINGS_FILE))
    }

    fn validate(&self) -> Result<()> {
        self.health_interval()?;
        self.command_timeout()?;
        if self.health_attempts == 0 {
            return Err(Error::Config("health_attempts must be at least 1".to_string()));
        }
        if self.port_attempts == 0 {
            return Err(Error::Config("port_attempts must be at least 1".to_string()));
        }
        if self.services.is_empty() {
            return Err(Error::Config("services must name at least one service".to_string()));
        }
        if self.unit_prefix.is_empty() {
            return Err(Error::Config("unit_prefix cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn health_interval(&self) -> Result<Duration> {
        parse_duration_string(&self.health_interval).ok_or_else(|| {
            Error::Config(format!(
                "Invalid health_interval '{}' (expected e.g. \"5s\")",
                self.health_interval
            ))
        })
    }

    pub fn command_timeout(&self) -> Result<Duration> {
        parse_duration_string(&self.command_timeout).ok_or_else(|| {
            Error::Config(format!(
                "Invalid command_timeout '{}' (expected e.g. \"120s\")",
                self.command_timeout
            ))
        })
    }

    /// State directory, falling back to `~/.fleet/state`.
    pub fn resolved_state_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.state_dir {
            return Ok(dir.clone());
        }
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;
        Ok(home.join(".fleet").join("state"))
    }

    /// Services whose images are refreshed by `update`.
    pub fn image_services(&self) -> Vec<String> {
        self.images.clone().unwrap_or_else(|| self.services.clone())
    }
}
