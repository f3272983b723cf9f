//! Engine configuration: weight sampling, gate drive and training knobs as
//! TOML values.
//!
//! Each section implements `Default` from `config::defaults`, so a missing
//! file or a partial file behaves exactly like the built-in settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults::{
    CONFIG_ENV_VAR, DEFAULT_CLOSEST_TO_ZERO, DEFAULT_LEARNING_RATE, DEFAULT_MAX_GRAD_NORM,
    DEFAULT_MAX_WEIGHT, DEFAULT_MIN_WEIGHT, DEFAULT_WEIGHT_SEED, LOCAL_CONFIG_FILE,
};
use crate::network::cell::GateDrive;
use crate::network::sampling::{RandomWeightSampler, WeightBounds};

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration.
///
/// Load with `EngineConfig::load()` which searches:
/// 1. `$RECURRENT_MESH_CONFIG` env var
/// 2. `./recurrent_mesh.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bounds and seed for every freshly sampled weight
    #[serde(default)]
    pub weights: WeightConfig,

    /// Gated cell behaviour
    #[serde(default)]
    pub cell: CellConfig,

    /// Gradient-subtraction settings
    #[serde(default)]
    pub training: TrainingConfig,
}

impl EngineConfig {
    /// Load configuration using the standard search order, falling back to
    /// the next source whenever one is missing or invalid.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded engine config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(path = %local.display(), "Loaded engine config");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No engine config found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file. Unknown keys are logged, not rejected.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }
        let config: Self = toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Engine config saved");
        Ok(())
    }

    /// Check every section, collecting all violations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = super::validation::validate_ranges(self);

        // NaN/Inf never satisfy the comparisons above
        if let Ok(s) = toml::to_string(self) {
            if s.contains("nan") || s.contains("inf") {
                errors.push("config contains NaN or Inf values; all numbers must be finite".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Weights
// ============================================================================

/// Sampling bounds shared by table connections, gate weights and range
/// connection matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightConfig {
    #[serde(default = "default_min_weight")]
    pub min: f64,

    #[serde(default = "default_max_weight")]
    pub max: f64,

    /// Pull toward zero; 0 samples magnitudes uniformly.
    #[serde(default = "default_closest_to_zero")]
    pub closest_to_zero: f64,

    #[serde(default = "default_weight_seed")]
    pub seed: u64,
}

fn default_min_weight() -> f64 { DEFAULT_MIN_WEIGHT }
fn default_max_weight() -> f64 { DEFAULT_MAX_WEIGHT }
fn default_closest_to_zero() -> f64 { DEFAULT_CLOSEST_TO_ZERO }
fn default_weight_seed() -> u64 { DEFAULT_WEIGHT_SEED }

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            min: default_min_weight(),
            max: default_max_weight(),
            closest_to_zero: default_closest_to_zero(),
            seed: default_weight_seed(),
        }
    }
}

impl WeightConfig {
    pub fn bounds(&self) -> WeightBounds {
        WeightBounds {
            min: self.min,
            max: self.max,
            closest_to_zero: self.closest_to_zero,
        }
    }

    pub fn sampler(&self) -> RandomWeightSampler {
        RandomWeightSampler::new(self.seed)
    }
}

// ============================================================================
// Cell
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellConfig {
    /// What feeds the shared gate pre-activation.
    #[serde(default)]
    pub gate_drive: GateDrive,
}

// ============================================================================
// Training
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Global L2 gradient norm cap. 0 disables clipping.
    #[serde(default = "default_max_grad_norm")]
    pub max_grad_norm: f64,
}

fn default_learning_rate() -> f64 { DEFAULT_LEARNING_RATE }
fn default_max_grad_norm() -> f64 { DEFAULT_MAX_GRAD_NORM }

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            max_grad_norm: default_max_grad_norm(),
        }
    }
}
