use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which cells a cascade re-evaluates after an edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecalcMode {
    /// The edited cell and everything reachable forward from it
    #[default]
    Affected,
    /// Every formula cell in calculation order
    Full,
}

impl FromStr for RecalcMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "affected" => Ok(RecalcMode::Affected),
            "full" => Ok(RecalcMode::Full),
            _ => Err(ConfigError::InvalidValue {
                key: "recalc_mode".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for RecalcMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecalcMode::Affected => write!(f, "affected"),
            RecalcMode::Full => write!(f, "full"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Recalculation engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum nesting of on-demand evaluation before `#DEPTH!`
    pub max_calculation_depth: u32,
    pub recalc_mode: RecalcMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_calculation_depth: Self::DEFAULT_MAX_DEPTH,
            recalc_mode: RecalcMode::default(),
        }
    }
}

impl EngineConfig {
    pub const DEFAULT_MAX_DEPTH: u32 = 100;

    /// Load configuration from environment variables
    ///
    /// Reads `CELLGRAPH_MAX_DEPTH` and `CELLGRAPH_RECALC_MODE`; unset
    /// variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with a custom variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(depth) = lookup("CELLGRAPH_MAX_DEPTH") {
            config.max_calculation_depth =
                depth.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: "CELLGRAPH_MAX_DEPTH".to_string(),
                    value: depth.clone(),
                })?;
        }
        if let Some(mode) = lookup("CELLGRAPH_RECALC_MODE") {
            config.recalc_mode = mode.parse()?;
        }

        config.validate()
    }

    /// Load configuration from a JSON document; missing fields use defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.max_calculation_depth == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_calculation_depth".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(self)
    }
}
