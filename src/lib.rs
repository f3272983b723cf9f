//! recurrent-mesh: dynamic-topology recurrent network engine
//!
//! Forward and backward passes through layered networks of gated recurrent
//! cells, and through compositions of such networks wired together by
//! partial-range connections.
//!
//! ## Architecture
//!
//! - **Network**: sparse per-neuron connection tables, LSTM-style cells with
//!   full execution traces, backpropagation through time, topology edits
//! - **Composition**: sub-network ports with ranged weighted connections,
//!   topological forward routing, reverse-order gradient redistribution
//! - **Config**: TOML-backed weight bounds, gate drive and training settings

pub mod config;
pub mod error;
pub mod network;
pub mod composition;

pub use config::EngineConfig;
pub use error::{EngineError, Result};

pub use network::{
    CellState, ConnectionId, ConnectionTable, ExecutionRecord, GateDrive, LstmGradients, LstmNeuron,
    LstmTrace, NetworkGradients, Position, RandomWeightSampler, RecurrentNetwork, WeightBounds,
    WeightSampler,
};

pub use composition::{
    CompositionGradients, CompositionStep, NetworkComposition, Range, RangeConnection, Side, Source,
    SubNetworkPort,
};
