//! Runtime configuration.

use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::tiss::DEFAULT_MAX_GUIAS_POR_LOTE;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

fn default_padrao_tiss() -> String {
    "4.01.00".to_owned()
}

fn default_max_guias() -> usize {
    DEFAULT_MAX_GUIAS_POR_LOTE
}

fn default_hash_algorithm() -> String {
    "SHA-256".to_owned()
}

fn default_price_tolerance() -> Decimal {
    // 15%
    Decimal::new(15, 2)
}

fn default_true() -> bool {
    true
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClinicaConfig {
    #[serde(default)]
    pub tiss: TissConfig,
    #[serde(default)]
    pub authz: AuthzConfig,
}

/// TISS billing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TissConfig {
    /// TISS standard version written into lot artifacts.
    #[serde(default = "default_padrao_tiss")]
    pub padrao_tiss: String,
    #[serde(default = "default_max_guias")]
    pub max_guias_por_lote: usize,
    /// Label written next to the artifact hash.
    #[serde(default = "default_hash_algorithm")]
    pub hash_algorithm: String,
    /// Allowed relative deviation of a unit price from the TUSS reference price.
    #[serde(default = "default_price_tolerance")]
    pub price_tolerance: Decimal,
}

impl Default for TissConfig {
    fn default() -> Self {
        Self {
            padrao_tiss: default_padrao_tiss(),
            max_guias_por_lote: default_max_guias(),
            hash_algorithm: default_hash_algorithm(),
            price_tolerance: default_price_tolerance(),
        }
    }
}

/// Permission engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthzConfig {
    /// Emit a `warn!` event for each denied action.
    #[serde(default = "default_true")]
    pub log_denials: bool,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self { log_denials: true }
    }
}

impl ClinicaConfig {
    pub const ENV_CONFIG_PATH: &'static str = "CLINICA_CONFIG";

    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: ClinicaConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&raw)?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Load from `CLINICA_CONFIG` if set, else the first existing candidate,
    /// else defaults.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> ConfigResult<Self> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return Self::from_path(env_path);
        }
        for candidate in candidates {
            if candidate.as_ref().exists() {
                return Self::from_path(candidate);
            }
        }
        debug!("no configuration file found, using defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.tiss.max_guias_por_lote == 0 {
            return Err(ConfigError::Invalid("max_guias_por_lote must be positive".into()));
        }
        if self.tiss.price_tolerance < Decimal::ZERO || self.tiss.price_tolerance > Decimal::ONE {
            return Err(ConfigError::Invalid(
                "price_tolerance must be between 0 and 1".into(),
            ));
        }
        if self.tiss.padrao_tiss.trim().is_empty() {
            return Err(ConfigError::Invalid("padrao_tiss is empty".into()));
        }
        Ok(())
    }
}
