//! Categorical policies evaluated from an explicit parameter set
//!
//! TRPO needs to evaluate the policy under parameters other than the live ones
//! (gradient probes, line-search candidates), on both the autodiff backend and
//! its inner backend. A policy is therefore a pure function of
//! `(parameters, states)`, and the live parameters are just the set the policy
//! happens to own.

use burn::{
    prelude::*,
    tensor::activation::{relu, softmax},
};

use crate::error::Result;

use super::{MLPConfig, ParameterSet};

/// A discrete-action policy network
///
/// `B` is the backend the live parameters are stored on; `forward_with` can be
/// run on any backend, which is how gradients are taken on an autodiff backend
/// wrapping `B`.
pub trait PolicyNetwork<B: Backend> {
    /// Action probabilities `[batch, actions]` for `states` (`[batch, features]`) under `params`
    fn forward_with<K: Backend>(
        &self,
        params: &ParameterSet<K>,
        states: Tensor<K, 2>,
    ) -> Result<Tensor<K, 2>>;

    /// The live parameters
    fn parameters(&self) -> &ParameterSet<B>;

    /// Overwrite the live parameters in place
    ///
    /// Either every value is replaced or, if the layout differs, none is.
    fn load_parameters(&mut self, params: ParameterSet<B>) -> Result<()>;

    /// Action probabilities under the live parameters
    fn predict(&self, states: Tensor<B, 2>) -> Result<Tensor<B, 2>> {
        self.forward_with(self.parameters(), states)
    }
}

/// Feed-forward softmax policy
///
/// Hidden layers use ReLU, the output layer is followed by a softmax over actions.
/// Weights are initialised through [`MLPConfig`] so they follow burn's default
/// `Linear` initialisation.
#[derive(Debug, Clone)]
pub struct SoftmaxPolicy<B: Backend> {
    num_layers: usize,
    params: ParameterSet<B>,
}

impl<B: Backend> SoftmaxPolicy<B> {
    pub fn new(config: &MLPConfig, device: &B::Device) -> Result<Self> {
        let mlp = config.init::<B>(device);
        Ok(Self {
            num_layers: mlp.num_layers(),
            params: mlp.to_parameters()?,
        })
    }

    /// Build a policy from explicit weights named `layers.{i}.weight` / `layers.{i}.bias`
    pub fn from_parameters(num_layers: usize, params: ParameterSet<B>) -> Result<Self> {
        for i in 0..num_layers {
            params.require(&format!("layers.{i}.weight"))?;
        }
        Ok(Self { num_layers, params })
    }
}

impl<B: Backend> PolicyNetwork<B> for SoftmaxPolicy<B> {
    fn forward_with<K: Backend>(
        &self,
        params: &ParameterSet<K>,
        states: Tensor<K, 2>,
    ) -> Result<Tensor<K, 2>> {
        let mut x = states;

        for i in 0..self.num_layers {
            let weight: Tensor<K, 2> = params.tensor(&format!("layers.{i}.weight"))?;
            x = x.matmul(weight);

            if let Some(bias) = params.get(&format!("layers.{i}.bias")) {
                x = x + bias.value().clone().unsqueeze_dim::<2>(0);
            }

            if i + 1 < self.num_layers {
                x = relu(x);
            }
        }

        Ok(softmax(x, 1))
    }

    fn parameters(&self) -> &ParameterSet<B> {
        &self.params
    }

    fn load_parameters(&mut self, params: ParameterSet<B>) -> Result<()> {
        self.params.assign(params)
    }
}
