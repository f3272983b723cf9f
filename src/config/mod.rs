//! Engine Configuration Module
//!
//! Weight-sampling bounds, gate drive and training settings loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `RECURRENT_MESH_CONFIG` environment variable (path to TOML file)
//! 2. `recurrent_mesh.toml` in the current working directory
//! 3. Built-in defaults (`config::defaults`)
//!
//! ## Usage
//!
//! ```ignore
//! let config = EngineConfig::load();
//! let bounds = config.weights.bounds();
//! let mut sampler = config.weights.sampler();
//! ```

mod engine_config;
pub mod defaults;
pub mod validation;

pub use engine_config::*;
