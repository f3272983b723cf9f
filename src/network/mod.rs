//! Layered recurrent networks built from gated cells.
//!
//! Neurons are addressed on an activation grid by [`Position`]: grid layer 0
//! is the network input, grid layer `l >= 1` holds the activations of neuron
//! layer `l - 1`, and the last grid layer is the network output.
//!
//! ```text
//! grid[0]      input vector
//! grid[1..L]   hidden layers
//! grid[L]      output layer
//! ```
//!
//! Connectivity is sparse: every neuron owns a [`ConnectionTable`] listing the
//! grid positions it reads and the weight applied to each. Topology edits
//! (inserting a layer, adding a neuron or connection) keep every table
//! consistent with the grid.

pub mod activation;
pub mod sampling;
pub mod connections;
pub mod cell;
pub mod recurrent;

pub use cell::{CellState, GateDrive, LstmGradients, LstmNeuron, LstmTrace};
pub use connections::{ConnectionId, ConnectionTable};
pub use recurrent::{ExecutionRecord, NetworkGradients, RecurrentNetwork};
pub use sampling::{RandomWeightSampler, WeightBounds, WeightSampler};

use std::fmt;

/// Location of a neuron on the activation grid. Layer 0 is the input layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    pub layer: usize,
    pub neuron: usize,
}

impl Position {
    pub const fn new(layer: usize, neuron: usize) -> Self {
        Self { layer, neuron }
    }

    /// Look up this position on an activation grid.
    #[inline]
    pub fn read(self, grid: &[Vec<f64>]) -> Option<f64> {
        grid.get(self.layer).and_then(|layer| layer.get(self.neuron)).copied()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.layer, self.neuron)
    }
}
