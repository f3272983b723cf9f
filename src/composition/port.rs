//! SubNetworkPort: one network inside a composition.
//!
//! The port owns the wrapped [`RecurrentNetwork`], the buffer its inputs are
//! accumulated into, and the [`RangeConnection`]s that feed that buffer.
//! Connections stay sorted by [`Source`] so external input comes first and
//! networks follow in ascending index order.

use std::ops;

use tracing::info;

use crate::composition::range::{Range, RangeConnection, Side, Source};
use crate::error::{EngineError, Result};
use crate::network::sampling::{WeightBounds, WeightSampler};
use crate::network::{ExecutionRecord, RecurrentNetwork};

#[derive(Debug, Clone, PartialEq)]
pub struct SubNetworkPort {
    network: RecurrentNetwork,
    input: Vec<f64>,
    connections: Vec<RangeConnection>,
}

impl SubNetworkPort {
    pub fn new(network: RecurrentNetwork) -> Self {
        let input = vec![0.0; network.input_length()];
        Self {
            network,
            input,
            connections: Vec::new(),
        }
    }

    /// The wrapped network.
    pub fn network(&self) -> &RecurrentNetwork {
        &self.network
    }

    /// Mutable access for topology edits. Editing the input or output
    /// length invalidates existing connections.
    pub fn network_mut(&mut self) -> &mut RecurrentNetwork {
        &mut self.network
    }

    pub fn input_buffer(&self) -> &[f64] {
        &self.input
    }

    pub fn connections(&self) -> &[RangeConnection] {
        &self.connections
    }

    pub(crate) fn connections_mut(&mut self) -> &mut [RangeConnection] {
        &mut self.connections
    }

    pub fn reset_input_buffer(&mut self) {
        self.input.clear();
        self.input.resize(self.network.input_length(), 0.0);
    }

    /// Zero the input buffer and every cell state of the wrapped network.
    pub fn begin_sequence(&mut self) {
        self.reset_input_buffer();
        self.network.begin_sequence();
    }

    /// Add `connection`'s weighted share of `upstream` into the input buffer.
    pub fn receive(&mut self, upstream: &[f64], connection: &RangeConnection) -> Result<()> {
        connection.accumulate(upstream, &mut self.input)
    }

    /// Same as [`receive`](Self::receive) for one of this port's own connections.
    pub(crate) fn receive_via(&mut self, upstream: &[f64], index: usize) -> Result<()> {
        let Self { input, connections, .. } = self;
        let connection = connections
            .get(index)
            .ok_or(EngineError::ShapeMismatch {
                context: "connection index",
                expected: connections.len(),
                actual: index,
            })?;
        connection.accumulate(upstream, input)
    }

    /// Run the wrapped network on the current input buffer.
    pub fn execute(&mut self) -> Result<ExecutionRecord> {
        self.network.execute(&self.input)
    }

    /// Expand `range` against this port's input or output length.
    pub fn resolve_range(&self, range: Range, side: Side) -> Result<ops::Range<usize>> {
        let len = match side {
            Side::Input => self.network.input_length(),
            Side::Output => self.network.output_length(),
        };
        range.resolve(len)
    }

    /// Create a sampled connection from `source` and insert it before the
    /// first existing connection whose source is not smaller.
    ///
    /// `output_range` is resolved against `source_output_length`, the output
    /// length of the source (or the external input length).
    pub fn connect<S: WeightSampler + ?Sized>(
        &mut self,
        source: Source,
        source_output_length: usize,
        input_range: Range,
        output_range: Range,
        bounds: &WeightBounds,
        sampler: &mut S,
    ) -> Result<&RangeConnection> {
        bounds.validate()?;
        let input_span = self.resolve_range(input_range, Side::Input)?;
        let output_span = output_range.resolve(source_output_length)?;

        let connection = RangeConnection::sampled(
            source,
            (input_range, input_span.clone()),
            (output_range, output_span.clone()),
            bounds,
            sampler,
        );
        let at = self.connections.partition_point(|c| c.source() < source);
        self.connections.insert(at, connection);

        info!(
            %source,
            input_from = input_span.start,
            input_to = input_span.end,
            output_from = output_span.start,
            output_to = output_span.end,
            "Connected range"
        );
        Ok(&self.connections[at])
    }

    /// Whether any connection reads from `source`.
    pub fn is_connected_to(&self, source: Source) -> bool {
        self.connections.iter().any(|c| c.source() == source)
    }

    /// First connection from `source`.
    pub fn connection_to(&self, source: Source) -> Result<&RangeConnection> {
        self.connections
            .iter()
            .find(|c| c.source() == source)
            .ok_or(EngineError::ConnectionNotFound(source))
    }

    /// Mutable form of [`connection_to`](Self::connection_to), for editing weights.
    pub fn connection_to_mut(&mut self, source: Source) -> Result<&mut RangeConnection> {
        self.connections
            .iter_mut()
            .find(|c| c.source() == source)
            .ok_or(EngineError::ConnectionNotFound(source))
    }

    /// Indices of every connection from `source`.
    pub fn connections_from(&self, source: Source) -> impl Iterator<Item = usize> + '_ {
        self.connections
            .iter()
            .enumerate()
            .filter(move |(_, c)| c.source() == source)
            .map(|(i, _)| i)
    }
}
