//! Read-only JSON configuration for the command line front end.

use std::io;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::experiment::data::{BatteryChemistry, DischargeParameters};

pub const DEFAULT_CONFIG_FILE: &str = "battery_discharge.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid configuration file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid discharge parameters: {0}")]
    InvalidParameters(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub preset: Option<BatteryChemistry>,       // used when no explicit parameters are given
    pub parameters: Option<DischargeParameters>,
    pub serial_number: Option<String>,          // preferred load when several are attached
    pub port: Option<String>,                   // skips discovery when set
    pub log_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            preset: None,
            parameters: None,
            serial_number: None,
            port: None,
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl AppConfig {
    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_json(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Explicit parameters win over the preset, which wins over the defaults.
    pub fn discharge_parameters(&self) -> Result<DischargeParameters> {
        let params = self
            .parameters
            .or_else(|| self.preset.map(|p| p.parameters()))
            .unwrap_or_default();
        params.validate().map_err(ConfigError::InvalidParameters)?;
        Ok(params)
    }
}
