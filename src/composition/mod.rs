//! Composition of recurrent networks linked by ranged connections.
//!
//! A [`NetworkComposition`] owns one [`SubNetworkPort`] per network and runs
//! them in a caller-supplied topological order every time step. Connections
//! route a [`Range`] of a source's output (or of the external input) into a
//! range of the destination's input through a dense weight matrix.

pub mod group;
pub mod port;
pub mod range;
pub mod training;

pub use group::{CompositionGradients, CompositionStep, NetworkComposition};
pub use port::SubNetworkPort;
pub use range::{Range, RangeConnection, Side, Source};
pub use training::{clip_gradients, mse_cost, train_sequence, TrainingReport};
