//! Multi-Layer Perceptron (MLP) - Generic feedforward neural network
//!
//! Used directly as the value network of a TRPO agent, and as the weight
//! initialiser of [`SoftmaxPolicy`](super::SoftmaxPolicy).

use burn::{
    nn::{Linear, LinearConfig},
    prelude::*,
    tensor::{activation::relu, backend::Backend},
};

use super::ParameterSet;

/// Configuration for Multi-Layer Perceptron
#[derive(Config, Debug)]
pub struct MLPConfig {
    /// Input dimension
    pub input_dim: usize,
    /// Hidden layer dimensions (e.g., [128, 128] for two hidden layers of 128 units each)
    pub hidden_layers: Vec<usize>,
    /// Output dimension
    pub output_dim: usize,
}

/// Multi-Layer Perceptron implementation
///
/// Hidden layers use ReLU activation.
/// Output layer has no activation (linear).
#[derive(Module, Debug)]
pub struct MLP<B: Backend> {
    layers: Vec<Linear<B>>,
}

impl MLPConfig {
    /// Initialize the MLP with the given configuration
    pub fn init<B: Backend>(&self, device: &B::Device) -> MLP<B> {
        let layers = self
            .layer_dims()
            .into_iter()
            .map(|(fan_in, fan_out)| LinearConfig::new(fan_in, fan_out).init(device))
            .collect();

        MLP { layers }
    }

    /// `(fan_in, fan_out)` of every layer, input to output
    pub fn layer_dims(&self) -> Vec<(usize, usize)> {
        let mut dims = Vec::with_capacity(self.hidden_layers.len() + 1);
        let mut prev = self.input_dim;
        for &hidden in &self.hidden_layers {
            dims.push((prev, hidden));
            prev = hidden;
        }
        dims.push((prev, self.output_dim));
        dims
    }
}

impl<B: Backend> MLP<B> {
    /// Generic forward pass - works with any tensor dimension
    ///
    /// Applies ReLU activation to all hidden layers, no activation on output layer.
    /// The last dimension is always treated as the feature dimension.
    pub fn forward<const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, D> {
        let last = self.layers.len() - 1;
        let mut x = input;

        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x);
            if i < last {
                x = relu(x);
            }
        }

        x
    }

    /// Snapshot of the weights as a name-keyed set
    ///
    /// Names follow the module layout: `layers.{i}.weight` (`[fan_in, fan_out]`)
    /// and `layers.{i}.bias` (`[fan_out]`).
    pub fn to_parameters(&self) -> crate::error::Result<ParameterSet<B>> {
        let mut params = ParameterSet::new();
        for (i, layer) in self.layers.iter().enumerate() {
            params.insert(format!("layers.{i}.weight"), layer.weight.val())?;
            if let Some(bias) = &layer.bias {
                params.insert(format!("layers.{i}.bias"), bias.val())?;
            }
        }
        Ok(params)
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}
