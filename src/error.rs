//! Engine error taxonomy.
//!
//! Shape and layer errors are programmer errors surfaced immediately;
//! `ConnectionNotFound` and `NetworkNotFound` are absence conditions the
//! caller can avoid by querying first.

use thiserror::Error;

use crate::composition::Source;
use crate::network::Position;

/// Errors produced by the network and composition layers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("connection position {position} lies outside the activation grid")]
    PositionOutOfGrid { position: Position },

    #[error("no connection from {0}")]
    ConnectionNotFound(Source),

    #[error("network {0} not found in composition")]
    NetworkNotFound(usize),

    #[error("invalid layer {index}: {reason}")]
    InvalidLayer { index: usize, reason: &'static str },

    #[error("range [{from}, {to}) is invalid for a side of length {len}")]
    RangeOutOfBounds { from: usize, to: usize, len: usize },

    #[error("network has no neuron layers")]
    EmptyNetwork,

    #[error("invalid weight bounds: min={min}, max={max}, closest_to_zero={closest_to_zero}")]
    InvalidWeightBounds {
        min: f64,
        max: f64,
        closest_to_zero: f64,
    },

    #[error("trace length mismatch: expected {expected} time steps, got {actual}")]
    TraceMismatch { expected: usize, actual: usize },

    #[error("network {0} appears more than once in the execution order")]
    DuplicateExecution(usize),

    #[error("execution order is empty")]
    EmptyExecutionOrder,
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;
