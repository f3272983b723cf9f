//! Gated recurrent (LSTM-style) neuron.
//!
//! All three sigmoid paths share one gate value computed from the gate
//! pre-activation `p`, then weighted per gate:
//!
//! ```text
//! z        = bias + sum(w_i * a_i)
//! p        = h_prev                (GateDrive::HiddenState)
//!          = h_prev + z            (GateDrive::HiddenStateAndInput)
//! s        = sigmoid(p)
//! c        = c_prev * (s * W_forget)
//! c        = c + (s * W_store_sigmoid) * (tanh(p) * W_store_tanh)
//! h        = (s * W_output) * tanh(c)
//! ```
//!
//! Under `GateDrive::HiddenState`, `z` is computed and traced but never feeds
//! the gates, so the input combination receives no gradient.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::network::activation::{
    sigmoid, sigmoid_derivative_from_output, tanh, tanh_derivative_from_output,
};
use crate::network::connections::ConnectionTable;
use crate::network::sampling::{WeightBounds, WeightSampler};

/// What drives the shared gate pre-activation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDrive {
    /// Gates read only the previous hidden state.
    #[default]
    HiddenState,
    /// Gates read the previous hidden state plus the input combination.
    HiddenStateAndInput,
}

impl GateDrive {
    /// True when the input combination feeds the gate pre-activation.
    #[inline]
    pub fn couples_input(self) -> bool {
        matches!(self, Self::HiddenStateAndInput)
    }
}

/// Persistent per-neuron recurrent state. Zero at the start of a sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CellState {
    pub cell: f64,
    pub hidden: f64,
}

impl CellState {
    /// Back to zero cell and hidden state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Every intermediate value of one forward execution, for the backward pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LstmTrace {
    pub initial_cell_state: f64,
    pub initial_hidden_state: f64,
    pub linear_function: f64,
    pub gate_pre_activation: f64,
    /// Shared sigmoid output before any per-gate weight.
    pub hidden_sigmoid: f64,
    pub forget_gate: f64,
    pub after_forget_cell_state: f64,
    pub store_sigmoid_gate: f64,
    /// tanh of the gate pre-activation, before the store weight.
    pub store_tanh: f64,
    pub store_tanh_gate: f64,
    pub store_gate: f64,
    pub after_store_cell_state: f64,
    pub output_sigmoid_gate: f64,
    pub output_tanh: f64,
    pub output_cell_state: f64,
    pub output_hidden_state: f64,
}

/// Gradient of the cost with respect to a neuron's hidden and cell state.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StateGradient {
    pub hidden: f64,
    pub cell: f64,
}

/// Parameter gradients for one [`LstmNeuron`], aligned with its table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LstmGradients {
    pub bias: f64,
    pub forget_weight: f64,
    pub store_sigmoid_weight: f64,
    pub store_tanh_weight: f64,
    pub output_weight: f64,
    pub connection_weights: Vec<f64>,
}

impl LstmGradients {
    /// Zeroed accumulator with one connection slot per table entry of `neuron`.
    pub fn zeros_for(neuron: &LstmNeuron) -> Self {
        Self {
            connection_weights: vec![0.0; neuron.connections.len()],
            ..Self::default()
        }
    }

    /// Bias, the four gate weights, then connection weights in table order.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        [
            self.bias,
            self.forget_weight,
            self.store_sigmoid_weight,
            self.store_tanh_weight,
            self.output_weight,
        ]
        .into_iter()
        .chain(self.connection_weights.iter().copied())
    }

    /// Multiply every gradient by `factor`.
    pub fn scale(&mut self, factor: f64) {
        self.bias *= factor;
        self.forget_weight *= factor;
        self.store_sigmoid_weight *= factor;
        self.store_tanh_weight *= factor;
        self.output_weight *= factor;
        for g in &mut self.connection_weights {
            *g *= factor;
        }
    }
}

/// Stateless parameters of a gated neuron. State lives in [`CellState`].
#[derive(Debug, Clone, PartialEq)]
pub struct LstmNeuron {
    pub connections: ConnectionTable,
    pub bias: f64,
    pub forget_weight: f64,
    pub store_sigmoid_weight: f64,
    pub store_tanh_weight: f64,
    pub output_weight: f64,
}

impl LstmNeuron {
    /// Neuron with the given bias and every gate weight set to `gate_weight`.
    pub fn uniform(connections: ConnectionTable, bias: f64, gate_weight: f64) -> Self {
        Self {
            connections,
            bias,
            forget_weight: gate_weight,
            store_sigmoid_weight: gate_weight,
            store_tanh_weight: gate_weight,
            output_weight: gate_weight,
        }
    }

    /// Neuron with zero bias and sampled gate weights.
    pub fn sampled<S: WeightSampler + ?Sized>(
        connections: ConnectionTable,
        bounds: &WeightBounds,
        sampler: &mut S,
    ) -> Self {
        Self {
            connections,
            bias: 0.0,
            forget_weight: sampler.sample(bounds),
            store_sigmoid_weight: sampler.sample(bounds),
            store_tanh_weight: sampler.sample(bounds),
            output_weight: sampler.sample(bounds),
        }
    }

    /// Run one forward step, mutating `state` and returning the new hidden
    /// state with its trace. `state` is untouched on error.
    pub fn execute(
        &self,
        state: &mut CellState,
        grid: &[Vec<f64>],
        drive: GateDrive,
    ) -> Result<(f64, LstmTrace)> {
        let initial = *state;
        let linear_function = self.connections.linear_combination(self.bias, grid)?;

        let gate_pre_activation = if drive.couples_input() {
            initial.hidden + linear_function
        } else {
            initial.hidden
        };
        let hidden_sigmoid = sigmoid(gate_pre_activation);

        let forget_gate = hidden_sigmoid * self.forget_weight;
        state.cell *= forget_gate;
        let after_forget_cell_state = state.cell;

        let store_sigmoid_gate = hidden_sigmoid * self.store_sigmoid_weight;
        let store_tanh = tanh(gate_pre_activation);
        let store_tanh_gate = store_tanh * self.store_tanh_weight;
        let store_gate = store_sigmoid_gate * store_tanh_gate;
        state.cell += store_gate;
        let after_store_cell_state = state.cell;

        let output_sigmoid_gate = hidden_sigmoid * self.output_weight;
        let output_tanh = tanh(state.cell);
        state.hidden = output_sigmoid_gate * output_tanh;

        let trace = LstmTrace {
            initial_cell_state: initial.cell,
            initial_hidden_state: initial.hidden,
            linear_function,
            gate_pre_activation,
            hidden_sigmoid,
            forget_gate,
            after_forget_cell_state,
            store_sigmoid_gate,
            store_tanh,
            store_tanh_gate,
            store_gate,
            after_store_cell_state,
            output_sigmoid_gate,
            output_tanh,
            output_cell_state: state.cell,
            output_hidden_state: state.hidden,
        };

        Ok((state.hidden, trace))
    }

    /// Backprop one recorded step.
    ///
    /// `upstream` is dL/dh and dL/dc for this step's outputs. Parameter
    /// gradients accumulate into `grads`, input gradients into `d_grid` at
    /// the connected positions. Returns dL/dh_prev and dL/dc_prev.
    pub fn backward(
        &self,
        trace: &LstmTrace,
        grid: &[Vec<f64>],
        upstream: StateGradient,
        drive: GateDrive,
        grads: &mut LstmGradients,
        d_grid: &mut [Vec<f64>],
    ) -> Result<StateGradient> {
        if grads.connection_weights.len() != self.connections.len() {
            return Err(EngineError::ShapeMismatch {
                context: "neuron gradient accumulator",
                expected: self.connections.len(),
                actual: grads.connection_weights.len(),
            });
        }

        let s = trace.hidden_sigmoid;

        // h = output_sigmoid_gate * output_tanh
        let d_output_sigmoid = upstream.hidden * trace.output_tanh;
        let d_output_tanh = upstream.hidden * trace.output_sigmoid_gate;
        let d_cell = upstream.cell + d_output_tanh * tanh_derivative_from_output(trace.output_tanh);
        grads.output_weight += d_output_sigmoid * s;
        let mut d_s = d_output_sigmoid * self.output_weight;

        // c = after_forget + store_sigmoid_gate * store_tanh_gate
        let d_store_sigmoid = d_cell * trace.store_tanh_gate;
        let d_store_tanh_gate = d_cell * trace.store_sigmoid_gate;
        grads.store_sigmoid_weight += d_store_sigmoid * s;
        d_s += d_store_sigmoid * self.store_sigmoid_weight;
        grads.store_tanh_weight += d_store_tanh_gate * trace.store_tanh;
        let d_store_tanh = d_store_tanh_gate * self.store_tanh_weight;

        // after_forget = c_prev * forget_gate
        let d_forget = d_cell * trace.initial_cell_state;
        let d_cell_prev = d_cell * trace.forget_gate;
        grads.forget_weight += d_forget * s;
        d_s += d_forget * self.forget_weight;

        let d_pre = d_s * sigmoid_derivative_from_output(s)
            + d_store_tanh * tanh_derivative_from_output(trace.store_tanh);

        if drive.couples_input() {
            grads.bias += d_pre;
            for (i, (position, weight)) in self.connections.iter().enumerate() {
                let activation = position
                    .read(grid)
                    .ok_or(EngineError::PositionOutOfGrid { position })?;
                grads.connection_weights[i] += d_pre * activation;

                let slot = d_grid
                    .get_mut(position.layer)
                    .and_then(|layer| layer.get_mut(position.neuron))
                    .ok_or(EngineError::PositionOutOfGrid { position })?;
                *slot += d_pre * weight;
            }
        }

        Ok(StateGradient {
            hidden: d_pre,
            cell: d_cell_prev,
        })
    }

    /// `param -= learning_rate * gradient` for the bias, every gate weight
    /// and every connection weight.
    pub fn apply_gradient_step(&mut self, gradients: &LstmGradients, learning_rate: f64) -> Result<()> {
        self.connections
            .subtract_gradients(&gradients.connection_weights, learning_rate)?;
        self.bias -= learning_rate * gradients.bias;
        self.forget_weight -= learning_rate * gradients.forget_weight;
        self.store_sigmoid_weight -= learning_rate * gradients.store_sigmoid_weight;
        self.store_tanh_weight -= learning_rate * gradients.store_tanh_weight;
        self.output_weight -= learning_rate * gradients.output_weight;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Position;

    fn two_input_neuron() -> LstmNeuron {
        let mut table = ConnectionTable::new();
        table.add_connection(Position::new(0, 0), 0.8);
        table.add_connection(Position::new(0, 1), -0.6);
        LstmNeuron {
            connections: table,
            bias: 0.1,
            forget_weight: 0.9,
            store_sigmoid_weight: 1.2,
            store_tanh_weight: -0.7,
            output_weight: 1.1,
        }
    }

    #[test]
    fn test_zero_hidden_drives_gates_identically() {
        let neuron = LstmNeuron::uniform(ConnectionTable::new(), 0.0, 1.0);
        let mut state = CellState::default();
        let (_, trace) = neuron.execute(&mut state, &[vec![]], GateDrive::HiddenState).unwrap();

        assert!((trace.hidden_sigmoid - 0.5).abs() < 1e-12);
        assert_eq!(trace.forget_gate, trace.hidden_sigmoid);
        assert_eq!(trace.store_sigmoid_gate, trace.hidden_sigmoid);
        assert_eq!(trace.output_sigmoid_gate, trace.hidden_sigmoid);
    }

    #[test]
    fn test_zero_weights_give_zero_output_for_any_input() {
        let mut neuron = two_input_neuron();
        neuron.forget_weight = 0.0;
        neuron.store_sigmoid_weight = 0.0;
        neuron.store_tanh_weight = 0.0;
        neuron.output_weight = 0.0;

        for drive in [GateDrive::HiddenState, GateDrive::HiddenStateAndInput] {
            for input in [vec![0.0, 0.0], vec![3.0, -2.0], vec![-10.0, 7.5]] {
                let mut state = CellState::default();
                let (out, trace) = neuron.execute(&mut state, &[input], drive).unwrap();
                assert_eq!(out, 0.0);
                assert_eq!(state.cell, 0.0);
                assert_eq!(trace.store_gate, 0.0);
            }
        }
    }

    #[test]
    fn test_faithful_drive_ignores_input_combination() {
        let neuron = two_input_neuron();
        let mut a = CellState { cell: 0.3, hidden: 0.2 };
        let mut b = a;
        let (out_a, trace_a) = neuron.execute(&mut a, &[vec![1.0, 2.0]], GateDrive::HiddenState).unwrap();
        let (out_b, trace_b) = neuron.execute(&mut b, &[vec![-5.0, 9.0]], GateDrive::HiddenState).unwrap();

        assert_eq!(out_a, out_b);
        assert_ne!(trace_a.linear_function, trace_b.linear_function);
        assert!((trace_a.linear_function - (0.1 + 0.8 - 1.2)).abs() < 1e-12);
    }

    #[test]
    fn test_reset_matches_fresh_state() {
        let neuron = two_input_neuron();
        let grid = [vec![0.4, -0.9]];
        let drive = GateDrive::HiddenStateAndInput;

        let mut fresh = CellState::default();
        let (expected, expected_trace) = neuron.execute(&mut fresh, &grid, drive).unwrap();

        let mut used = CellState::default();
        for _ in 0..5 {
            neuron.execute(&mut used, &grid, drive).unwrap();
        }
        assert_ne!(used, CellState::default());

        used.reset();
        let (out, trace) = neuron.execute(&mut used, &grid, drive).unwrap();
        assert_eq!(out, expected);
        assert_eq!(trace, expected_trace);
    }

    #[test]
    fn test_trace_records_prior_state() {
        let neuron = two_input_neuron();
        let mut state = CellState { cell: 0.5, hidden: -0.25 };
        let (out, trace) = neuron.execute(&mut state, &[vec![1.0, 1.0]], GateDrive::HiddenState).unwrap();

        assert_eq!(trace.initial_cell_state, 0.5);
        assert_eq!(trace.initial_hidden_state, -0.25);
        assert_eq!(trace.output_hidden_state, out);
        assert_eq!(trace.output_cell_state, state.cell);
        assert!((trace.after_forget_cell_state - 0.5 * trace.forget_gate).abs() < 1e-12);
        assert!((trace.after_store_cell_state - (trace.after_forget_cell_state + trace.store_gate)).abs() < 1e-12);
    }

    #[test]
    fn test_error_leaves_state_untouched() {
        let neuron = two_input_neuron();
        let mut state = CellState { cell: 0.5, hidden: 0.5 };
        let result = neuron.execute(&mut state, &[vec![1.0]], GateDrive::HiddenState);
        assert!(result.is_err());
        assert_eq!(state, CellState { cell: 0.5, hidden: 0.5 });
    }

    #[test]
    fn test_apply_gradient_step() {
        let mut neuron = two_input_neuron();
        let original = neuron.clone();
        let grads = LstmGradients {
            bias: 0.5,
            forget_weight: -1.0,
            store_sigmoid_weight: 2.0,
            store_tanh_weight: 0.25,
            output_weight: -0.5,
            connection_weights: vec![1.0, -3.0],
        };
        let lr = 0.1;
        neuron.apply_gradient_step(&grads, lr).unwrap();

        assert!((neuron.bias - (original.bias - lr * 0.5)).abs() < 1e-12);
        assert!((neuron.forget_weight - (original.forget_weight + lr)).abs() < 1e-12);
        assert!((neuron.store_sigmoid_weight - (original.store_sigmoid_weight - lr * 2.0)).abs() < 1e-12);
        assert!((neuron.store_tanh_weight - (original.store_tanh_weight - lr * 0.25)).abs() < 1e-12);
        assert!((neuron.output_weight - (original.output_weight + lr * 0.5)).abs() < 1e-12);
        assert!((neuron.connections.weights()[0] - (0.8 - lr)).abs() < 1e-12);
        assert!((neuron.connections.weights()[1] - (-0.6 + lr * 3.0)).abs() < 1e-12);
    }

    // L = 0.7 * h + (-0.3) * c for one step from a non-zero state.
    fn step_loss(neuron: &LstmNeuron, start: CellState, grid: &[Vec<f64>], drive: GateDrive) -> f64 {
        let mut state = start;
        let (h, _) = neuron.execute(&mut state, grid, drive).unwrap();
        0.7 * h - 0.3 * state.cell
    }

    type Perturb<'a> = &'a dyn Fn(&mut LstmNeuron, &mut CellState, &mut Vec<Vec<f64>>, f64);

    fn numeric_gradient(
        neuron: &LstmNeuron,
        start: CellState,
        grid: &[Vec<f64>],
        drive: GateDrive,
        eps: f64,
        perturb: Perturb<'_>,
    ) -> f64 {
        let evaluate = |delta: f64| {
            let mut n = neuron.clone();
            let mut s = start;
            let mut g = grid.to_vec();
            perturb(&mut n, &mut s, &mut g, delta);
            step_loss(&n, s, &g, drive)
        };
        (evaluate(eps) - evaluate(-eps)) / (2.0 * eps)
    }

    fn nudge_weight(neuron: &mut LstmNeuron, index: usize, delta: f64) {
        let w = neuron.connections.weights()[index];
        neuron.connections.set_weight(crate::network::ConnectionId(index), w + delta);
    }

    fn assert_backward_matches_finite_difference(drive: GateDrive) {
        let neuron = two_input_neuron();
        let start = CellState { cell: 0.35, hidden: -0.2 };
        let grid = vec![vec![0.4, -0.9]];
        let eps = 1e-6;
        let tol = 1e-6;

        let mut state = start;
        let (_, trace) = neuron.execute(&mut state, &grid, drive).unwrap();
        let mut grads = LstmGradients::zeros_for(&neuron);
        let mut d_grid = vec![vec![0.0; 2]];
        let d_prev = neuron
            .backward(&trace, &grid, StateGradient { hidden: 0.7, cell: -0.3 }, drive, &mut grads, &mut d_grid)
            .unwrap();

        let fd = |perturb: &dyn Fn(&mut LstmNeuron, &mut CellState, &mut Vec<Vec<f64>>, f64)| {
            numeric_gradient(&neuron, start, &grid, drive, eps, perturb)
        };

        let checks: Vec<(&str, f64, f64)> = vec![
            ("bias", grads.bias, fd(&|n, _, _, e| n.bias += e)),
            ("forget", grads.forget_weight, fd(&|n, _, _, e| n.forget_weight += e)),
            ("store_sigmoid", grads.store_sigmoid_weight, fd(&|n, _, _, e| n.store_sigmoid_weight += e)),
            ("store_tanh", grads.store_tanh_weight, fd(&|n, _, _, e| n.store_tanh_weight += e)),
            ("output", grads.output_weight, fd(&|n, _, _, e| n.output_weight += e)),
            ("w0", grads.connection_weights[0], fd(&|n, _, _, e| nudge_weight(n, 0, e))),
            ("w1", grads.connection_weights[1], fd(&|n, _, _, e| nudge_weight(n, 1, e))),
            ("x0", d_grid[0][0], fd(&|_, _, g, e| g[0][0] += e)),
            ("x1", d_grid[0][1], fd(&|_, _, g, e| g[0][1] += e)),
            ("h_prev", d_prev.hidden, fd(&|_, s, _, e| s.hidden += e)),
            ("c_prev", d_prev.cell, fd(&|_, s, _, e| s.cell += e)),
        ];

        for (name, analytic, numeric) in checks {
            assert!(
                (analytic - numeric).abs() < tol,
                "{drive:?} {name}: analytic {analytic} vs numeric {numeric}"
            );
        }
        assert!(d_prev.hidden != 0.0 && d_prev.cell != 0.0);
        assert!(grads.forget_weight != 0.0);
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        assert_backward_matches_finite_difference(GateDrive::HiddenStateAndInput);
    }

    #[test]
    fn test_faithful_backward_matches_finite_difference() {
        assert_backward_matches_finite_difference(GateDrive::HiddenState);
    }

    #[test]
    fn test_faithful_backward_gives_no_input_gradient() {
        let neuron = two_input_neuron();
        let grid = vec![vec![0.4, -0.9]];
        let mut state = CellState { cell: 0.1, hidden: 0.3 };
        let (_, trace) = neuron.execute(&mut state, &grid, GateDrive::HiddenState).unwrap();

        let mut grads = LstmGradients::zeros_for(&neuron);
        let mut d_grid = vec![vec![0.0; 2]];
        let d_prev = neuron
            .backward(&trace, &grid, StateGradient { hidden: 1.0, cell: 0.0 }, GateDrive::HiddenState, &mut grads, &mut d_grid)
            .unwrap();

        assert_eq!(grads.bias, 0.0);
        assert!(grads.connection_weights.iter().all(|&g| g == 0.0));
        assert!(d_grid[0].iter().all(|&g| g == 0.0));
        assert!(d_prev.hidden != 0.0);
        assert!(grads.output_weight != 0.0);
    }
}
