//! Ranged, weighted links between sub-networks.

use std::fmt;
use std::ops;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::network::sampling::{WeightBounds, WeightSampler};

/// Half-open index interval, or the whole side of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Range {
    Whole,
    Span { from: usize, to: usize },
}

impl Range {
    pub const fn span(from: usize, to: usize) -> Self {
        Self::Span { from, to }
    }

    /// Concrete bounds on a side of length `len`.
    pub fn resolve(self, len: usize) -> Result<ops::Range<usize>> {
        match self {
            Self::Whole => Ok(0..len),
            Self::Span { from, to } if from <= to && to <= len => Ok(from..to),
            Self::Span { from, to } => Err(EngineError::RangeOutOfBounds { from, to, len }),
        }
    }
}

/// Which side of a sub-network a range addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Input,
    Output,
}

/// Producer of a connection's data. `External` sorts before every network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Source {
    External,
    Network(usize),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::External => write!(f, "external input"),
            Self::Network(i) => write!(f, "network {i}"),
        }
    }
}

/// Dense weighted link from a source output range into an input range.
///
/// `weights[i][o]` scales source output `output_span.start + o` into input
/// `input_span.start + i`.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeConnection {
    source: Source,
    input_range: Range,
    output_range: Range,
    input_span: ops::Range<usize>,
    output_span: ops::Range<usize>,
    weights: Vec<Vec<f64>>,
}

impl RangeConnection {
    pub fn new(
        source: Source,
        (input_range, input_span): (Range, ops::Range<usize>),
        (output_range, output_span): (Range, ops::Range<usize>),
        weights: Vec<Vec<f64>>,
    ) -> Result<Self> {
        if weights.len() != input_span.len() {
            return Err(EngineError::ShapeMismatch {
                context: "range connection rows",
                expected: input_span.len(),
                actual: weights.len(),
            });
        }
        if let Some(row) = weights.iter().find(|row| row.len() != output_span.len()) {
            return Err(EngineError::ShapeMismatch {
                context: "range connection columns",
                expected: output_span.len(),
                actual: row.len(),
            });
        }
        Ok(Self {
            source,
            input_range,
            output_range,
            input_span,
            output_span,
            weights,
        })
    }

    /// Connection with every matrix entry drawn from `sampler`.
    pub fn sampled<S: WeightSampler + ?Sized>(
        source: Source,
        input: (Range, ops::Range<usize>),
        output: (Range, ops::Range<usize>),
        bounds: &WeightBounds,
        sampler: &mut S,
    ) -> Self {
        let columns = output.1.len();
        let weights = (0..input.1.len())
            .map(|_| (0..columns).map(|_| sampler.sample(bounds)).collect())
            .collect();
        Self {
            source,
            input_range: input.0,
            output_range: output.0,
            input_span: input.1,
            output_span: output.1,
            weights,
        }
    }

    pub fn source(&self) -> Source {
        self.source
    }

    /// Destination range as requested, before resolution.
    pub fn input_range(&self) -> Range {
        self.input_range
    }

    pub fn output_range(&self) -> Range {
        self.output_range
    }

    /// Resolved destination indices.
    pub fn input_span(&self) -> ops::Range<usize> {
        self.input_span.clone()
    }

    /// Resolved source indices.
    pub fn output_span(&self) -> ops::Range<usize> {
        self.output_span.clone()
    }

    /// `weights[i][o]` maps source slot `o` of the span to destination slot `i`.
    pub fn weights(&self) -> &[Vec<f64>] {
        &self.weights
    }

    /// Replace one matrix entry, returning the old value.
    pub fn set_weight(&mut self, input: usize, output: usize, weight: f64) -> Option<f64> {
        self.weights
            .get_mut(input)
            .and_then(|row| row.get_mut(output))
            .map(|w| std::mem::replace(w, weight))
    }

    fn check_lengths(&self, source_len: usize, destination_len: usize) -> Result<()> {
        if source_len < self.output_span.end {
            return Err(EngineError::ShapeMismatch {
                context: "range connection source",
                expected: self.output_span.end,
                actual: source_len,
            });
        }
        if destination_len < self.input_span.end {
            return Err(EngineError::ShapeMismatch {
                context: "range connection destination",
                expected: self.input_span.end,
                actual: destination_len,
            });
        }
        Ok(())
    }

    /// `buffer[input_span] += W * upstream[output_span]`.
    pub fn accumulate(&self, upstream: &[f64], buffer: &mut [f64]) -> Result<()> {
        self.check_lengths(upstream.len(), buffer.len())?;
        let source = &upstream[self.output_span.clone()];
        for (slot, row) in buffer[self.input_span.clone()].iter_mut().zip(&self.weights) {
            *slot += row.iter().zip(source).map(|(w, x)| w * x).sum::<f64>();
        }
        Ok(())
    }

    /// `upstream_gradient[output_span] += W^T * input_gradient[input_span]`.
    pub fn redistribute(&self, input_gradient: &[f64], upstream_gradient: &mut [f64]) -> Result<()> {
        self.check_lengths(upstream_gradient.len(), input_gradient.len())?;
        let target = &mut upstream_gradient[self.output_span.clone()];
        for (g, row) in input_gradient[self.input_span.clone()].iter().zip(&self.weights) {
            for (slot, w) in target.iter_mut().zip(row) {
                *slot += w * g;
            }
        }
        Ok(())
    }

    /// `d_weights[i][o] += input_gradient[i] * upstream[o]` over the spans.
    pub fn accumulate_weight_gradients(
        &self,
        input_gradient: &[f64],
        upstream: &[f64],
        d_weights: &mut [Vec<f64>],
    ) -> Result<()> {
        self.check_lengths(upstream.len(), input_gradient.len())?;
        if d_weights.len() != self.weights.len() {
            return Err(EngineError::ShapeMismatch {
                context: "range connection gradient rows",
                expected: self.weights.len(),
                actual: d_weights.len(),
            });
        }
        let source = &upstream[self.output_span.clone()];
        for (row, g) in d_weights.iter_mut().zip(&input_gradient[self.input_span.clone()]) {
            for (d, x) in row.iter_mut().zip(source) {
                *d += g * x;
            }
        }
        Ok(())
    }

    pub fn zero_gradients(&self) -> Vec<Vec<f64>> {
        vec![vec![0.0; self.output_span.len()]; self.input_span.len()]
    }

    pub fn subtract_gradients(&mut self, gradients: &[Vec<f64>], learning_rate: f64) -> Result<()> {
        if gradients.len() != self.weights.len()
            || gradients.iter().any(|row| row.len() != self.output_span.len())
        {
            return Err(EngineError::ShapeMismatch {
                context: "range connection gradients",
                expected: self.weights.len(),
                actual: gradients.len(),
            });
        }
        for (row, g_row) in self.weights.iter_mut().zip(gradients) {
            for (w, g) in row.iter_mut().zip(g_row) {
                *w -= learning_rate * g;
            }
        }
        Ok(())
    }
}
