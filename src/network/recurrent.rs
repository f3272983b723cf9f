//! RecurrentNetwork: layered gated neurons over a position-addressed grid.
//!
//! Owns the neuron parameters and one [`CellState`] per neuron. Each forward
//! step returns an [`ExecutionRecord`] (activation grid + traces) that the
//! caller retains for the whole sequence; [`RecurrentNetwork::gradients`]
//! then runs backpropagation through time over those records.

use std::borrow::Borrow;

use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::network::cell::{CellState, GateDrive, LstmGradients, LstmNeuron, LstmTrace, StateGradient};
use crate::network::connections::{ConnectionId, ConnectionTable};
use crate::network::sampling::{WeightBounds, WeightSampler};
use crate::network::Position;

/// Everything one forward step produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    /// Activation grid: `[input, layer 1, ..., output]`.
    pub activations: Vec<Vec<f64>>,
    /// Traces per neuron layer (`traces[k]` belongs to grid layer `k + 1`).
    pub traces: Vec<Vec<LstmTrace>>,
}

impl ExecutionRecord {
    /// Grid layer 0.
    pub fn input(&self) -> &[f64] {
        self.activations.first().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Last grid layer.
    pub fn output(&self) -> &[f64] {
        self.activations.last().map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Result of backpropagation through a recorded sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkGradients {
    /// Parameter gradients per neuron, shaped like the network's layers.
    pub neurons: Vec<Vec<LstmGradients>>,
    /// dL/d(input) for every time step.
    pub input_gradients: Vec<Vec<f64>>,
}

impl NetworkGradients {
    /// Zeroed gradients shaped like `network` for a sequence of `time_steps`.
    pub fn zeros_for(network: &RecurrentNetwork, time_steps: usize) -> Self {
        Self {
            neurons: network
                .layers
                .iter()
                .map(|layer| layer.iter().map(LstmGradients::zeros_for).collect())
                .collect(),
            input_gradients: vec![vec![0.0; network.input_length]; time_steps],
        }
    }

    /// Every parameter gradient, flattened.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.neurons.iter().flatten().flat_map(LstmGradients::values)
    }

    /// Multiply every parameter gradient by `factor`. Input gradients are left alone.
    pub fn scale(&mut self, factor: f64) {
        for grads in self.neurons.iter_mut().flatten() {
            grads.scale(factor);
        }
    }
}

/// A recurrent network of gated neurons.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrentNetwork {
    input_length: usize,
    layers: Vec<Vec<LstmNeuron>>,
    states: Vec<Vec<CellState>>,
    drive: GateDrive,
}

impl RecurrentNetwork {
    /// Build a network whose every neuron reads the whole preceding layer.
    /// Connection and gate weights come from `sampler`.
    pub fn new<S: WeightSampler + ?Sized>(
        input_length: usize,
        layer_lengths: &[usize],
        drive: GateDrive,
        bounds: &WeightBounds,
        sampler: &mut S,
    ) -> Result<Self> {
        bounds.validate()?;
        if layer_lengths.is_empty() {
            return Err(EngineError::EmptyNetwork);
        }
        if let Some(index) = layer_lengths.iter().position(|&len| len == 0) {
            return Err(EngineError::InvalidLayer {
                index: index + 1,
                reason: "layers must contain at least one neuron",
            });
        }

        let mut layers = Vec::with_capacity(layer_lengths.len());
        let mut previous_length = input_length;
        for (k, &length) in layer_lengths.iter().enumerate() {
            let layer: Vec<LstmNeuron> = (0..length)
                .map(|_| Self::dense_neuron(k, previous_length, bounds, sampler))
                .collect();
            layers.push(layer);
            previous_length = length;
        }

        Self::from_layers(input_length, layers, drive)
    }

    /// Build a network from explicit neurons. Every connection must read an
    /// existing position on an earlier grid layer.
    pub fn from_layers(input_length: usize, layers: Vec<Vec<LstmNeuron>>, drive: GateDrive) -> Result<Self> {
        if layers.is_empty() {
            return Err(EngineError::EmptyNetwork);
        }
        let states = layers.iter().map(|layer| vec![CellState::default(); layer.len()]).collect();
        let network = Self { input_length, layers, states, drive };

        for (k, layer) in network.layers.iter().enumerate() {
            if layer.is_empty() {
                return Err(EngineError::InvalidLayer {
                    index: k + 1,
                    reason: "layers must contain at least one neuron",
                });
            }
            for neuron in layer {
                for &position in neuron.connections.positions() {
                    network.check_source(position, k + 1)?;
                }
            }
        }

        Ok(network)
    }

    fn dense_neuron<S: WeightSampler + ?Sized>(
        source_layer: usize,
        source_length: usize,
        bounds: &WeightBounds,
        sampler: &mut S,
    ) -> LstmNeuron {
        let mut table = ConnectionTable::new();
        for neuron in 0..source_length {
            table.add_sampled_connection(Position::new(source_layer, neuron), bounds, sampler);
        }
        LstmNeuron::sampled(table, bounds, sampler)
    }

    /// `position` must be a valid source for a neuron on `target_layer`.
    fn check_source(&self, position: Position, target_layer: usize) -> Result<()> {
        let exists = self
            .layer_length(position.layer)
            .is_some_and(|len| position.neuron < len);
        if position.layer >= target_layer || !exists {
            return Err(EngineError::PositionOutOfGrid { position });
        }
        Ok(())
    }

    pub fn input_length(&self) -> usize {
        self.input_length
    }

    pub fn output_length(&self) -> usize {
        self.layers.last().map_or(0, Vec::len)
    }

    /// Number of neuron layers (grid layers minus the input layer).
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Length of grid layer `grid_layer`; layer 0 is the input.
    pub fn layer_length(&self, grid_layer: usize) -> Option<usize> {
        if grid_layer == 0 {
            Some(self.input_length)
        } else {
            self.layers.get(grid_layer - 1).map(Vec::len)
        }
    }

    /// Gate drive shared by every neuron.
    pub fn drive(&self) -> GateDrive {
        self.drive
    }

    pub fn set_drive(&mut self, drive: GateDrive) {
        self.drive = drive;
    }

    pub fn neuron(&self, position: Position) -> Option<&LstmNeuron> {
        position
            .layer
            .checked_sub(1)
            .and_then(|k| self.layers.get(k))
            .and_then(|layer| layer.get(position.neuron))
    }

    pub fn neuron_mut(&mut self, position: Position) -> Option<&mut LstmNeuron> {
        position
            .layer
            .checked_sub(1)
            .and_then(|k| self.layers.get_mut(k))
            .and_then(|layer| layer.get_mut(position.neuron))
    }

    /// Current recurrent state of the neuron at `position`.
    pub fn state(&self, position: Position) -> Option<CellState> {
        position
            .layer
            .checked_sub(1)
            .and_then(|k| self.states.get(k))
            .and_then(|layer| layer.get(position.neuron))
            .copied()
    }

    /// Zero every cell and hidden state. Call between independent sequences.
    pub fn reset_state(&mut self) {
        for state in self.states.iter_mut().flatten() {
            state.reset();
        }
    }

    /// Mark the start of an independent sequence.
    pub fn begin_sequence(&mut self) {
        self.reset_state();
    }

    /// Run one time step. On error no cell state changes.
    pub fn execute(&mut self, input: &[f64]) -> Result<ExecutionRecord> {
        if input.len() != self.input_length {
            return Err(EngineError::ShapeMismatch {
                context: "network input",
                expected: self.input_length,
                actual: input.len(),
            });
        }

        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(input.to_vec());
        let mut traces = Vec::with_capacity(self.layers.len());
        let mut next_states = self.states.clone();

        for (layer, states) in self.layers.iter().zip(next_states.iter_mut()) {
            let mut outputs = Vec::with_capacity(layer.len());
            let mut layer_traces = Vec::with_capacity(layer.len());
            for (neuron, state) in layer.iter().zip(states.iter_mut()) {
                let (activation, trace) = neuron.execute(state, &activations, self.drive)?;
                outputs.push(activation);
                layer_traces.push(trace);
            }
            activations.push(outputs);
            traces.push(layer_traces);
        }

        self.states = next_states;
        Ok(ExecutionRecord { activations, traces })
    }

    /// Backpropagation through time over a recorded sequence.
    ///
    /// `records[t]` must come from consecutive `execute` calls; `output_costs[t]`
    /// is dL/d(output) at step `t`. The state before the first record is
    /// treated as a constant. Gradients
    /// flow backward through the connection weights within a step and through
    /// every neuron's hidden and cell state across steps.
    pub fn gradients<R: Borrow<ExecutionRecord>>(
        &self,
        records: &[R],
        output_costs: &[Vec<f64>],
    ) -> Result<NetworkGradients> {
        if records.len() != output_costs.len() {
            return Err(EngineError::TraceMismatch {
                expected: records.len(),
                actual: output_costs.len(),
            });
        }

        let mut grads = NetworkGradients::zeros_for(self, records.len());
        let mut carry: Vec<Vec<StateGradient>> = self
            .layers
            .iter()
            .map(|layer| vec![StateGradient::default(); layer.len()])
            .collect();

        for (t, (record, cost)) in records.iter().zip(output_costs).enumerate().rev() {
            let record = record.borrow();
            self.check_record(record)?;
            if cost.len() != self.output_length() {
                return Err(EngineError::ShapeMismatch {
                    context: "output cost gradient",
                    expected: self.output_length(),
                    actual: cost.len(),
                });
            }

            let mut d_grid: Vec<Vec<f64>> = record.activations.iter().map(|l| vec![0.0; l.len()]).collect();
            if let Some(last) = d_grid.last_mut() {
                for (d, c) in last.iter_mut().zip(cost) {
                    *d += c;
                }
            }

            for k in (0..self.layers.len()).rev() {
                for n in 0..self.layers[k].len() {
                    let upstream = StateGradient {
                        hidden: d_grid[k + 1][n] + carry[k][n].hidden,
                        cell: carry[k][n].cell,
                    };
                    carry[k][n] = self.layers[k][n].backward(
                        &record.traces[k][n],
                        &record.activations,
                        upstream,
                        self.drive,
                        &mut grads.neurons[k][n],
                        &mut d_grid,
                    )?;
                }
            }

            grads.input_gradients[t] = std::mem::take(&mut d_grid[0]);
        }

        debug!(
            time_steps = records.len(),
            layers = self.layers.len(),
            "Network BPTT complete"
        );
        Ok(grads)
    }

    fn check_record(&self, record: &ExecutionRecord) -> Result<()> {
        if record.traces.len() != self.layers.len() || record.activations.len() != self.layers.len() + 1 {
            return Err(EngineError::ShapeMismatch {
                context: "execution record layers",
                expected: self.layers.len(),
                actual: record.traces.len(),
            });
        }
        for (layer, traces) in self.layers.iter().zip(&record.traces) {
            if layer.len() != traces.len() {
                return Err(EngineError::ShapeMismatch {
                    context: "execution record neurons",
                    expected: layer.len(),
                    actual: traces.len(),
                });
            }
        }
        for (grid_layer, row) in record.activations.iter().enumerate() {
            let expected = self.layer_length(grid_layer).unwrap_or(0);
            if row.len() != expected {
                return Err(EngineError::ShapeMismatch {
                    context: "execution record activations",
                    expected,
                    actual: row.len(),
                });
            }
        }
        Ok(())
    }

    /// Subtract `learning_rate * gradient` from every parameter.
    pub fn apply_gradients(&mut self, grads: &NetworkGradients, learning_rate: f64) -> Result<()> {
        if grads.neurons.len() != self.layers.len() {
            return Err(EngineError::ShapeMismatch {
                context: "network gradients",
                expected: self.layers.len(),
                actual: grads.neurons.len(),
            });
        }
        for (layer, layer_grads) in self.layers.iter_mut().zip(&grads.neurons) {
            if layer.len() != layer_grads.len() {
                return Err(EngineError::ShapeMismatch {
                    context: "layer gradients",
                    expected: layer.len(),
                    actual: layer_grads.len(),
                });
            }
            for (neuron, g) in layer.iter_mut().zip(layer_grads) {
                neuron.apply_gradient_step(g, learning_rate)?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Topology edits
    // ========================================================================

    /// Insert a new hidden layer of `length` neurons at grid index
    /// `grid_index`, shifting it and every later layer down by one.
    ///
    /// New neurons read the whole preceding layer. Every existing table is
    /// re-indexed, and neurons directly after the new layer gain one
    /// connection per new neuron. The output layer always stays last.
    pub fn insert_layer<S: WeightSampler + ?Sized>(
        &mut self,
        grid_index: usize,
        length: usize,
        bounds: &WeightBounds,
        sampler: &mut S,
    ) -> Result<()> {
        bounds.validate()?;
        if grid_index == 0 || grid_index > self.layers.len() {
            return Err(EngineError::InvalidLayer {
                index: grid_index,
                reason: "hidden layers can only be inserted between the input and output layers",
            });
        }
        if length == 0 {
            return Err(EngineError::InvalidLayer {
                index: grid_index,
                reason: "layers must contain at least one neuron",
            });
        }

        for (k, layer) in self.layers.iter_mut().enumerate() {
            let old_grid_layer = k + 1;
            let new_grid_layer = if old_grid_layer >= grid_index {
                old_grid_layer + 1
            } else {
                old_grid_layer
            };
            let immediate = new_grid_layer == grid_index + 1;
            for neuron in layer.iter_mut() {
                neuron
                    .connections
                    .adjust_for_inserted_layer(grid_index, immediate, length, bounds, sampler);
            }
        }

        let source_layer = grid_index - 1;
        let source_length = self.layer_length(source_layer).unwrap_or(0);
        let layer: Vec<LstmNeuron> = (0..length)
            .map(|_| Self::dense_neuron(source_layer, source_length, bounds, sampler))
            .collect();

        self.layers.insert(grid_index - 1, layer);
        self.states.insert(grid_index - 1, vec![CellState::default(); length]);

        info!(grid_index, length, layers = self.layers.len(), "Inserted hidden layer");
        Ok(())
    }

    /// Append a neuron to hidden grid layer `grid_layer`, reading the whole
    /// preceding layer. Downstream neurons are not connected to it.
    pub fn add_neuron<S: WeightSampler + ?Sized>(
        &mut self,
        grid_layer: usize,
        bounds: &WeightBounds,
        sampler: &mut S,
    ) -> Result<Position> {
        bounds.validate()?;
        if grid_layer == 0 || grid_layer >= self.layers.len() {
            return Err(EngineError::InvalidLayer {
                index: grid_layer,
                reason: "neurons can only be added to hidden layers",
            });
        }

        let source_length = self.layer_length(grid_layer - 1).unwrap_or(0);
        let neuron = Self::dense_neuron(grid_layer - 1, source_length, bounds, sampler);
        let k = grid_layer - 1;
        self.layers[k].push(neuron);
        self.states[k].push(CellState::default());

        let position = Position::new(grid_layer, self.layers[k].len() - 1);
        info!(%position, "Added neuron");
        Ok(position)
    }

    /// Connect `source` into the neuron at `target` with `weight`.
    pub fn add_connection(&mut self, target: Position, source: Position, weight: f64) -> Result<ConnectionId> {
        if self.neuron(target).is_none() {
            return Err(EngineError::PositionOutOfGrid { position: target });
        }
        self.check_source(source, target.layer)?;

        let neuron = self
            .neuron_mut(target)
            .ok_or(EngineError::PositionOutOfGrid { position: target })?;
        let id = neuron.connections.add_connection(source, weight);
        info!(%source, %target, weight, "Added connection");
        Ok(id)
    }
}
