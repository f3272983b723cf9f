//! Sparse per-neuron connection storage.
//!
//! A [`ConnectionTable`] keeps two index-aligned vectors: the grid position
//! each connection reads and the weight applied to it. Entries are only ever
//! appended, so a [`ConnectionId`] stays valid for the life of the table.
//! Layer insertion rewrites positions in bulk and never reorders entries.

use crate::error::{EngineError, Result};
use crate::network::sampling::{WeightBounds, WeightSampler};
use crate::network::Position;

/// Stable handle to one entry of a [`ConnectionTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub usize);

/// Parallel arrays of connected positions and weights.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionTable {
    positions: Vec<Position>,
    weights: Vec<f64>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a connection. Duplicate positions are allowed and contribute
    /// independently.
    pub fn add_connection(&mut self, position: Position, weight: f64) -> ConnectionId {
        self.positions.push(position);
        self.weights.push(weight);
        debug_assert_eq!(self.positions.len(), self.weights.len());
        ConnectionId(self.weights.len() - 1)
    }

    /// Append a connection whose weight comes from `sampler`.
    pub fn add_sampled_connection<S: WeightSampler + ?Sized>(
        &mut self,
        position: Position,
        bounds: &WeightBounds,
        sampler: &mut S,
    ) -> ConnectionId {
        let weight = sampler.sample(bounds);
        self.add_connection(position, weight)
    }

    /// Re-index after a layer was inserted at grid index `insertion_index`.
    ///
    /// Every stored position with `layer >= insertion_index` moves down by one
    /// layer. When the inserted layer is the immediate predecessor of the
    /// owning neuron's layer, one sampled connection per neuron of the new
    /// layer is appended. Calling this twice for one edit shifts twice.
    pub fn adjust_for_inserted_layer<S: WeightSampler + ?Sized>(
        &mut self,
        insertion_index: usize,
        inserted_into_immediate_predecessor: bool,
        inserted_layer_length: usize,
        bounds: &WeightBounds,
        sampler: &mut S,
    ) {
        for position in &mut self.positions {
            if position.layer >= insertion_index {
                position.layer += 1;
            }
        }

        if !inserted_into_immediate_predecessor {
            return;
        }

        for neuron in 0..inserted_layer_length {
            self.add_sampled_connection(Position::new(insertion_index, neuron), bounds, sampler);
        }
    }

    /// Number of stored connections.
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Source positions, indexed by [`ConnectionId`].
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Weights, parallel to [`positions`](Self::positions).
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn weight(&self, id: ConnectionId) -> Option<f64> {
        self.weights.get(id.0).copied()
    }

    /// Replace the weight of `id`, returning the old one.
    pub fn set_weight(&mut self, id: ConnectionId, weight: f64) -> Option<f64> {
        self.weights.get_mut(id.0).map(|w| std::mem::replace(w, weight))
    }

    /// `(position, weight)` pairs in table order.
    pub fn iter(&self) -> impl Iterator<Item = (Position, f64)> + '_ {
        self.positions.iter().copied().zip(self.weights.iter().copied())
    }

    /// `bias + sum(weight_i * grid[position_i])`.
    pub fn linear_combination(&self, bias: f64, grid: &[Vec<f64>]) -> Result<f64> {
        let mut sum = bias;
        for (position, weight) in self.iter() {
            let activation = position
                .read(grid)
                .ok_or(EngineError::PositionOutOfGrid { position })?;
            sum += activation * weight;
        }
        Ok(sum)
    }

    /// `weight_i -= learning_rate * gradients[i]`, aligned by entry.
    pub fn subtract_gradients(&mut self, gradients: &[f64], learning_rate: f64) -> Result<()> {
        if gradients.len() != self.weights.len() {
            return Err(EngineError::ShapeMismatch {
                context: "connection gradients",
                expected: self.weights.len(),
                actual: gradients.len(),
            });
        }
        for (w, g) in self.weights.iter_mut().zip(gradients) {
            *w -= learning_rate * g;
        }
        Ok(())
    }
}
