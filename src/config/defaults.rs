//! Engine-wide default constants.
//!
//! Grouped by config section. Every `Default` impl in the config module reads
//! from here so the built-in behaviour is defined in one place.

// ============================================================================
// Weight Sampling
// ============================================================================

/// Lower bound for freshly sampled weights.
pub const DEFAULT_MIN_WEIGHT: f64 = -1.0;

/// Upper bound for freshly sampled weights.
pub const DEFAULT_MAX_WEIGHT: f64 = 1.0;

/// Pull toward zero for sampled weights. 0 = uniform magnitude.
pub const DEFAULT_CLOSEST_TO_ZERO: f64 = 1.0;

/// Seed for the default weight sampler.
pub const DEFAULT_WEIGHT_SEED: u64 = 42;

// ============================================================================
// Training
// ============================================================================

/// Gradient-subtraction step size.
pub const DEFAULT_LEARNING_RATE: f64 = 0.01;

/// Global L2 norm above which gradients are rescaled. 0 disables clipping.
pub const DEFAULT_MAX_GRAD_NORM: f64 = 5.0;

// ============================================================================
// Loading
// ============================================================================

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "RECURRENT_MESH_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "recurrent_mesh.toml";
