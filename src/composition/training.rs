//! Sequence training for a composition.
//!
//! MSE cost on the last network in execution order, full BPTT through the
//! composition, global gradient-norm clipping, then plain gradient
//! subtraction on every network parameter and connection weight.

use tracing::{debug, warn};

use crate::composition::group::{CompositionGradients, NetworkComposition};
use crate::config::TrainingConfig;
use crate::error::{EngineError, Result};

/// Outcome of one [`train_sequence`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingReport {
    /// Mean per-step MSE before the update.
    pub loss: f64,
    /// Global gradient norm before clipping.
    pub grad_norm: f64,
    pub clipped: bool,
}

/// Mean squared error and its gradient with respect to `output`.
pub fn mse_cost(output: &[f64], target: &[f64]) -> Result<(f64, Vec<f64>)> {
    if output.len() != target.len() {
        return Err(EngineError::ShapeMismatch {
            context: "mse target",
            expected: output.len(),
            actual: target.len(),
        });
    }
    if output.is_empty() {
        return Ok((0.0, Vec::new()));
    }

    let n = output.len() as f64;
    let mut loss = 0.0;
    let gradient: Vec<f64> = output
        .iter()
        .zip(target)
        .map(|(o, t)| {
            let err = o - t;
            loss += err * err;
            2.0 * err / n
        })
        .collect();
    Ok((loss / n, gradient))
}

/// Rescale `grads` so their global L2 norm is at most `max_norm`.
/// Returns the norm before clipping. `max_norm <= 0` disables clipping.
pub fn clip_gradients(grads: &mut CompositionGradients, max_norm: f64) -> f64 {
    let norm = grads.l2_norm();
    if max_norm > 0.0 && norm > max_norm {
        warn!(norm, max_norm, "Clipping gradient norm");
        grads.scale(max_norm / norm);
    }
    norm
}

/// Run one sequence, backpropagate MSE against `targets` at the last network
/// in execution order, and apply one gradient-subtraction step.
pub fn train_sequence(
    composition: &mut NetworkComposition,
    inputs: &[Vec<f64>],
    targets: &[Vec<f64>],
    config: &TrainingConfig,
) -> Result<TrainingReport> {
    if inputs.len() != targets.len() {
        return Err(EngineError::TraceMismatch {
            expected: inputs.len(),
            actual: targets.len(),
        });
    }
    let last = *composition
        .execution_order()
        .last()
        .ok_or(EngineError::EmptyExecutionOrder)?;

    // ========================================================================
    // 1. Forward
    // ========================================================================
    let steps = composition.run_sequence(inputs)?;

    // ========================================================================
    // 2. Cost at the last network
    // ========================================================================
    let mut costs = composition.zero_output_costs(steps.len());
    let mut total = 0.0;
    for ((step, target), cost) in steps.iter().zip(targets).zip(&mut costs) {
        let output = step.output(last).ok_or(EngineError::NetworkNotFound(last))?;
        let (loss, gradient) = mse_cost(output, target)?;
        total += loss;
        cost[last] = gradient;
    }
    let loss = if steps.is_empty() { 0.0 } else { total / steps.len() as f64 };

    // ========================================================================
    // 3. Backward, clip, update
    // ========================================================================
    let mut grads = composition.gradients(&steps, &costs)?;
    let grad_norm = clip_gradients(&mut grads, config.max_grad_norm);
    composition.apply_gradients(&grads, config.learning_rate)?;

    let clipped = config.max_grad_norm > 0.0 && grad_norm > config.max_grad_norm;
    debug!(loss, grad_norm, clipped, "Training step complete");
    Ok(TrainingReport { loss, grad_norm, clipped })
}
