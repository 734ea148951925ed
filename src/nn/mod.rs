//! Neural network building blocks for the TRPO agent

pub mod mlp;
pub mod params;
pub mod policy;

pub use mlp::{MLP, MLPConfig};
pub use params::{Parameter, ParameterSet, UpdateVector};
pub use policy::{PolicyNetwork, SoftmaxPolicy};
