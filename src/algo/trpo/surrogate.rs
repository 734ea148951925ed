//! Surrogate objective and KL divergence of a categorical policy
//!
//! Both are batch means over the same fixed batch: the states, the actions that
//! were taken, their advantages and the action probabilities of the policy that
//! collected them.

use burn::{
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};

use crate::{
    error::Result,
    nn::{ParameterSet, PolicyNetwork},
};

use super::natural_gradient::SurrogateModel;

const RATIO_EPS: f64 = 1e-7;
const LOG_EPS: f64 = 1e-12;

/// A fixed on-policy batch
#[derive(Debug, Clone)]
pub struct PolicyBatch<B: Backend> {
    /// `[batch, features]`
    pub states: Tensor<B, 2>,
    pub actions: Vec<usize>,
    /// `[batch]`
    pub advantages: Tensor<B, 1>,
    /// Pre-update action probabilities, `[batch, actions]`
    pub old_probs: Tensor<B, 2>,
}

impl<B: Backend> PolicyBatch<B> {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Taken actions as a `[batch, 1]` index tensor, on the device of the states
    fn action_indices(&self) -> Tensor<B, 2, Int> {
        let indices: Vec<i32> = self.actions.iter().map(|&a| a as i32).collect();
        Tensor::<B, 1, Int>::from_data(
            TensorData::from(indices.as_slice()).convert::<B::IntElem>(),
            &self.states.device(),
        )
        .unsqueeze_dim::<2>(1)
    }

    /// The same batch on an autodiff backend, as constants
    pub fn lift<A>(&self) -> PolicyBatch<A>
    where
        A: AutodiffBackend<InnerBackend = B>,
    {
        PolicyBatch {
            states: Tensor::from_inner(self.states.clone()),
            actions: self.actions.clone(),
            advantages: Tensor::from_inner(self.advantages.clone()),
            old_probs: Tensor::from_inner(self.old_probs.clone()),
        }
    }
}

/// `mean(p_new(a) / (p_old(a) + ε) · advantage)`
pub fn surrogate_objective<B: Backend>(probs: Tensor<B, 2>, batch: &PolicyBatch<B>) -> Tensor<B, 1> {
    let indices = batch.action_indices();
    let new: Tensor<B, 1> = probs.gather(1, indices.clone()).squeeze_dims(&[1]);
    let old: Tensor<B, 1> = batch.old_probs.clone().gather(1, indices).squeeze_dims(&[1]);

    (new / old.add_scalar(RATIO_EPS) * batch.advantages.clone()).mean()
}

/// `mean_batch Σ_a p_old · (log p_old − log(p_new + ε))`
pub fn mean_kl<B: Backend>(old_probs: Tensor<B, 2>, new_probs: Tensor<B, 2>) -> Tensor<B, 1> {
    let log_old = old_probs.clone().clamp_min(LOG_EPS).log();
    let log_new = new_probs.add_scalar(RATIO_EPS).log();

    (old_probs * (log_old - log_new)).sum_dim(1).mean()
}

/// Mean entropy of the rows of `probs`
pub fn mean_entropy<B: Backend>(probs: Tensor<B, 2>) -> Tensor<B, 1> {
    let log = probs.clone().clamp_min(LOG_EPS).log();
    (probs * log).sum_dim(1).neg().mean()
}

/// `(surrogate, kl)` of `params` on `batch`, read back to the host
pub fn evaluate<B, P>(policy: &P, params: &ParameterSet<B>, batch: &PolicyBatch<B>) -> Result<(f64, f64)>
where
    B: Backend,
    P: PolicyNetwork<B>,
{
    let probs = policy.forward_with(params, batch.states.clone())?;
    let objective = surrogate_objective(probs.clone(), batch)
        .into_scalar()
        .elem::<f64>();
    let kl = mean_kl(batch.old_probs.clone(), probs).into_scalar().elem::<f64>();
    Ok((objective, kl))
}

/// Gradients of the surrogate and the KL of a policy, taken on the autodiff backend `A`
pub struct PolicyObjective<'a, A, P>
where
    A: AutodiffBackend,
{
    policy: &'a P,
    params: &'a ParameterSet<A::InnerBackend>,
    batch: PolicyBatch<A>,
}

impl<'a, A, P> PolicyObjective<'a, A, P>
where
    A: AutodiffBackend,
    P: PolicyNetwork<A::InnerBackend>,
{
    pub fn new(policy: &'a P, params: &'a ParameterSet<A::InnerBackend>, batch: &PolicyBatch<A::InnerBackend>) -> Self {
        Self {
            policy,
            params,
            batch: batch.lift(),
        }
    }
}

impl<A, P> SurrogateModel<A::InnerBackend> for PolicyObjective<'_, A, P>
where
    A: AutodiffBackend,
    P: PolicyNetwork<A::InnerBackend>,
{
    fn parameters(&self) -> &ParameterSet<A::InnerBackend> {
        self.params
    }

    fn objective_gradient(&self) -> Result<ParameterSet<A::InnerBackend>> {
        let tracked = self.params.lift_tracked::<A>();
        let probs = self.policy.forward_with(&tracked, self.batch.states.clone())?;
        let objective = surrogate_objective(probs, &self.batch);
        tracked.gradients(&objective.backward())
    }

    fn divergence_gradient(&self, params: &ParameterSet<A::InnerBackend>) -> Result<ParameterSet<A::InnerBackend>> {
        let tracked = params.lift_tracked::<A>();
        let probs = self.policy.forward_with(&tracked, self.batch.states.clone())?;
        let kl = mean_kl(self.batch.old_probs.clone(), probs);
        tracked.gradients(&kl.backward())
    }
}
