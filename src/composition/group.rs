//! NetworkComposition: sub-networks wired by range connections.
//!
//! Forward: every step zeroes all input buffers, delivers the external input,
//! then runs networks in the caller's execution order, pushing each output
//! into the buffers of ports that have not run yet this step.
//!
//! Backward: networks are visited in reverse execution order. Each network's
//! accumulated output cost (its own cost plus whatever downstream consumers
//! redistributed to it) drives BPTT over its records; the resulting input
//! gradients flow through every incoming connection's `W^T` into the
//! upstream output cost, or into the external-input gradient.

use rayon::prelude::*;
use tracing::{debug, trace};

use crate::composition::port::SubNetworkPort;
use crate::composition::range::{Range, Source};
use crate::error::{EngineError, Result};
use crate::network::sampling::{WeightBounds, WeightSampler};
use crate::network::{ExecutionRecord, NetworkGradients, RecurrentNetwork};

/// Everything one composition step produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionStep {
    pub external_input: Vec<f64>,
    /// Indexed by network; `None` for networks outside the execution order.
    pub records: Vec<Option<ExecutionRecord>>,
}

impl CompositionStep {
    /// Output of `network` at this step, if it ran.
    pub fn output(&self, network: usize) -> Option<&[f64]> {
        self.records
            .get(network)
            .and_then(Option::as_ref)
            .map(ExecutionRecord::output)
    }
}

/// Gradients for a whole composition over one sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionGradients {
    /// Per network; `None` for networks outside the execution order.
    pub networks: Vec<Option<NetworkGradients>>,
    /// `connections[port][connection][i][o]`, aligned with each port's list.
    pub connections: Vec<Vec<Vec<Vec<f64>>>>,
    /// `output_costs_by_network[network][t]`: total dL/d(output) including
    /// redistribution. Network-major, unlike the step-major costs passed to
    /// [`NetworkComposition::gradients`].
    pub output_costs_by_network: Vec<Vec<Vec<f64>>>,
    /// dL/d(external input) for every step.
    pub external_input: Vec<Vec<f64>>,
}

impl CompositionGradients {
    /// Every trainable gradient, flattened.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        let networks = self.networks.iter().flatten().flat_map(NetworkGradients::values);
        let connections = self.connections.iter().flatten().flatten().flatten().copied();
        networks.chain(connections)
    }

    /// Global L2 norm over [`values`](Self::values).
    pub fn l2_norm(&self) -> f64 {
        self.values().map(|g| g * g).sum::<f64>().sqrt()
    }

    /// Multiply every trainable gradient by `factor`.
    pub fn scale(&mut self, factor: f64) {
        for grads in self.networks.iter_mut().flatten() {
            grads.scale(factor);
        }
        for g in self.connections.iter_mut().flatten().flatten().flatten() {
            *g *= factor;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkComposition {
    external_input_length: usize,
    ports: Vec<SubNetworkPort>,
    execution_order: Vec<usize>,
}

impl NetworkComposition {
    pub fn new(external_input_length: usize) -> Self {
        Self {
            external_input_length,
            ports: Vec::new(),
            execution_order: Vec::new(),
        }
    }

    pub fn external_input_length(&self) -> usize {
        self.external_input_length
    }

    /// Add a network and return its index. It does not run until it appears
    /// in the execution order.
    pub fn add_network(&mut self, network: RecurrentNetwork) -> usize {
        self.ports.push(SubNetworkPort::new(network));
        self.ports.len() - 1
    }

    pub fn network_count(&self) -> usize {
        self.ports.len()
    }

    pub fn ports(&self) -> &[SubNetworkPort] {
        &self.ports
    }

    pub fn port(&self, index: usize) -> Result<&SubNetworkPort> {
        self.ports.get(index).ok_or(EngineError::NetworkNotFound(index))
    }

    pub fn port_mut(&mut self, index: usize) -> Result<&mut SubNetworkPort> {
        self.ports.get_mut(index).ok_or(EngineError::NetworkNotFound(index))
    }

    fn source_output_length(&self, source: Source) -> Result<usize> {
        match source {
            Source::External => Ok(self.external_input_length),
            Source::Network(i) => Ok(self.port(i)?.network().output_length()),
        }
    }

    /// Route `output_range` of `source` into `input_range` of `destination`
    /// through a freshly sampled weight matrix.
    pub fn connect<S: WeightSampler + ?Sized>(
        &mut self,
        destination: usize,
        source: Source,
        input_range: Range,
        output_range: Range,
        bounds: &WeightBounds,
        sampler: &mut S,
    ) -> Result<()> {
        let source_output_length = self.source_output_length(source)?;
        self.port_mut(destination)?
            .connect(source, source_output_length, input_range, output_range, bounds, sampler)?;
        Ok(())
    }

    /// Set the order networks run in each step. Producers must precede their
    /// consumers; a connection whose source runs after its destination
    /// carries nothing. Only indices and duplicates are checked.
    pub fn set_execution_order(&mut self, order: Vec<usize>) -> Result<()> {
        let mut seen = vec![false; self.ports.len()];
        for &index in &order {
            let slot = seen.get_mut(index).ok_or(EngineError::NetworkNotFound(index))?;
            if *slot {
                return Err(EngineError::DuplicateExecution(index));
            }
            *slot = true;
        }
        self.execution_order = order;
        Ok(())
    }

    pub fn execution_order(&self) -> &[usize] {
        &self.execution_order
    }

    /// Position of each network in the execution order.
    fn ranks(&self) -> Vec<Option<usize>> {
        let mut ranks = vec![None; self.ports.len()];
        for (rank, &index) in self.execution_order.iter().enumerate() {
            ranks[index] = Some(rank);
        }
        ranks
    }

    /// Whether `source` delivers into network `destination` within a step.
    fn delivers(ranks: &[Option<usize>], source: Source, destination: usize) -> bool {
        match source {
            Source::External => true,
            Source::Network(s) => matches!(
                (ranks.get(s).copied().flatten(), ranks.get(destination).copied().flatten()),
                (Some(a), Some(b)) if a < b
            ),
        }
    }

    /// Zero every input buffer and every cell state.
    pub fn begin_sequence(&mut self) {
        for port in &mut self.ports {
            port.begin_sequence();
        }
    }

    /// Run one time step.
    pub fn step(&mut self, external_input: &[f64]) -> Result<CompositionStep> {
        if external_input.len() != self.external_input_length {
            return Err(EngineError::ShapeMismatch {
                context: "external input",
                expected: self.external_input_length,
                actual: external_input.len(),
            });
        }

        for port in &mut self.ports {
            port.reset_input_buffer();
            let external: Vec<usize> = port.connections_from(Source::External).collect();
            for ci in external {
                port.receive_via(external_input, ci)?;
            }
        }

        let mut records = vec![None; self.ports.len()];
        let mut executed = vec![false; self.ports.len()];
        for &index in &self.execution_order {
            let record = self.ports[index].execute()?;
            executed[index] = true;
            trace!(network = index, output = ?record.output(), "Network executed");

            for (p, port) in self.ports.iter_mut().enumerate() {
                if executed[p] {
                    continue;
                }
                let incoming: Vec<usize> = port.connections_from(Source::Network(index)).collect();
                for ci in incoming {
                    port.receive_via(record.output(), ci)?;
                }
            }
            records[index] = Some(record);
        }

        Ok(CompositionStep {
            external_input: external_input.to_vec(),
            records,
        })
    }

    /// Begin a sequence and run every step of it.
    pub fn run_sequence(&mut self, inputs: &[Vec<f64>]) -> Result<Vec<CompositionStep>> {
        self.begin_sequence();
        let steps = inputs.iter().map(|x| self.step(x)).collect::<Result<Vec<_>>>()?;
        debug!(
            time_steps = steps.len(),
            networks = self.execution_order.len(),
            "Composition sequence complete"
        );
        Ok(steps)
    }

    /// Run independent sequences in parallel, each on its own copy of the
    /// composition. `self` is not mutated.
    pub fn evaluate_sequences(&self, sequences: &[Vec<Vec<f64>>]) -> Result<Vec<Vec<CompositionStep>>> {
        sequences
            .par_iter()
            .map(|inputs| self.clone().run_sequence(inputs))
            .collect()
    }

    /// Zeroed `output_costs[t][network]` sized for this composition.
    pub fn zero_output_costs(&self, time_steps: usize) -> Vec<Vec<Vec<f64>>> {
        let per_step: Vec<Vec<f64>> = self
            .ports
            .iter()
            .map(|p| vec![0.0; p.network().output_length()])
            .collect();
        vec![per_step; time_steps]
    }

    /// Backward pass over a recorded sequence.
    ///
    /// `output_costs[t][network]` is the cost gradient on each network's own
    /// output at step `t` (see [`zero_output_costs`](Self::zero_output_costs)).
    pub fn gradients(&self, steps: &[CompositionStep], output_costs: &[Vec<Vec<f64>>]) -> Result<CompositionGradients> {
        if steps.len() != output_costs.len() {
            return Err(EngineError::TraceMismatch {
                expected: steps.len(),
                actual: output_costs.len(),
            });
        }
        let networks = self.ports.len();
        for costs in output_costs {
            if costs.len() != networks {
                return Err(EngineError::ShapeMismatch {
                    context: "per-network output costs",
                    expected: networks,
                    actual: costs.len(),
                });
            }
        }

        // accumulated[network][t]
        let mut accumulated: Vec<Vec<Vec<f64>>> = (0..networks)
            .map(|n| output_costs.iter().map(|step| step[n].clone()).collect())
            .collect();
        let mut external = vec![vec![0.0; self.external_input_length]; steps.len()];
        let mut network_grads = vec![None; networks];
        let mut connection_grads: Vec<Vec<Vec<Vec<f64>>>> = self
            .ports
            .iter()
            .map(|p| p.connections().iter().map(|c| c.zero_gradients()).collect())
            .collect();
        let ranks = self.ranks();

        for &index in self.execution_order.iter().rev() {
            let records = steps
                .iter()
                .map(|s| s.records.get(index).and_then(Option::as_ref))
                .collect::<Option<Vec<&ExecutionRecord>>>()
                .ok_or(EngineError::TraceMismatch {
                    expected: steps.len(),
                    actual: 0,
                })?;

            let port = &self.ports[index];
            let grads = port.network().gradients(&records, &accumulated[index])?;

            for (ci, connection) in port.connections().iter().enumerate() {
                let source = connection.source();
                if !Self::delivers(&ranks, source, index) {
                    continue;
                }
                for (t, step) in steps.iter().enumerate() {
                    let input_gradient = &grads.input_gradients[t];
                    let (upstream, target) = match source {
                        Source::External => (step.external_input.as_slice(), &mut external[t]),
                        Source::Network(s) => {
                            let output = step.output(s).ok_or(EngineError::NetworkNotFound(s))?;
                            (output, &mut accumulated[s][t])
                        }
                    };
                    connection.accumulate_weight_gradients(input_gradient, upstream, &mut connection_grads[index][ci])?;
                    connection.redistribute(input_gradient, target)?;
                }
            }

            network_grads[index] = Some(grads);
        }

        debug!(
            time_steps = steps.len(),
            networks = self.execution_order.len(),
            "Composition backward pass complete"
        );
        Ok(CompositionGradients {
            networks: network_grads,
            connections: connection_grads,
            output_costs_by_network: accumulated,
            external_input: external,
        })
    }

    /// Subtract `learning_rate * gradient` from every network parameter and
    /// every connection weight.
    pub fn apply_gradients(&mut self, grads: &CompositionGradients, learning_rate: f64) -> Result<()> {
        if grads.networks.len() != self.ports.len() || grads.connections.len() != self.ports.len() {
            return Err(EngineError::ShapeMismatch {
                context: "composition gradients",
                expected: self.ports.len(),
                actual: grads.networks.len(),
            });
        }
        for ((port, network_grads), connection_grads) in self.ports.iter_mut().zip(&grads.networks).zip(&grads.connections) {
            if let Some(g) = network_grads {
                port.network_mut().apply_gradients(g, learning_rate)?;
            }
            let connections = port.connections_mut();
            if connections.len() != connection_grads.len() {
                return Err(EngineError::ShapeMismatch {
                    context: "connection gradients",
                    expected: connections.len(),
                    actual: connection_grads.len(),
                });
            }
            for (connection, g) in connections.iter_mut().zip(connection_grads) {
                connection.subtract_gradients(g, learning_rate)?;
            }
        }
        Ok(())
    }
}
