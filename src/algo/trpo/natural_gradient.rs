//! Trust-region scaled natural gradient
//!
//! For a surrogate objective `L` and a divergence `D` from the pre-update policy,
//! the search direction solves `(H_D + damping·I)·s = ∇L` by conjugate gradient,
//! and is scaled by `β = sqrt(2·max_kl / (s·∇L))` so that the quadratic model of
//! `D` along the step equals the KL budget.

use burn::prelude::*;
use strum::Display;
use tracing::trace;

use crate::{
    error::Result,
    nn::{ParameterSet, UpdateVector},
};

use super::{
    conjugate_gradient::ConjugateGradient,
    operator::{dot, norm, HessianVectorProduct, LinearOperator},
};

const SCALE_EPS: f64 = 1e-7;

/// Objective and divergence gradients around the live parameters
pub trait SurrogateModel<B: Backend> {
    /// Parameters the gradients are taken at
    fn parameters(&self) -> &ParameterSet<B>;

    /// Gradient of the surrogate objective at [`parameters`](Self::parameters)
    fn objective_gradient(&self) -> Result<ParameterSet<B>>;

    /// Gradient of the divergence from the pre-update policy, taken at `params`
    fn divergence_gradient(&self, params: &ParameterSet<B>) -> Result<ParameterSet<B>>;
}

/// How the curvature system is split across parameter tensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum SolveStrategy {
    /// One solve and one trust-region scale per tensor.
    /// Curvature between different tensors is ignored.
    #[default]
    PerTensor,
    /// A single solve over every parameter concatenated into one vector
    GlobalFlattened,
}

/// Natural gradient step computation
#[derive(Debug, Clone, Copy)]
pub struct NaturalGradient {
    pub cg: ConjugateGradient,
    pub damping: f64,
    pub max_kl: f64,
    pub hvp_step: f64,
    pub strategy: SolveStrategy,
}

impl NaturalGradient {
    /// The update direction for every parameter of `model`
    ///
    /// The result has exactly the names, order and shapes of `model.parameters()`.
    pub fn compute<B, M>(&self, model: &M) -> Result<UpdateVector<B>>
    where
        B: Backend,
        M: SurrogateModel<B>,
    {
        let live = model.parameters();
        let grads = model.objective_gradient()?;
        live.check_layout(&grads)?;

        let mut update = UpdateVector::new();

        match self.strategy {
            SolveStrategy::PerTensor => {
                for param in live.iter() {
                    let name = param.name();
                    let g = grads.require(name)?.value().clone();

                    let hvp = HessianVectorProduct::new(
                        |value: Tensor<B, 1>| -> Result<Tensor<B, 1>> {
                            let probe = live.with_value(name, value)?;
                            Ok(model
                                .divergence_gradient(&probe)?
                                .require(name)?
                                .value()
                                .clone())
                        },
                        param.value().clone(),
                        self.damping,
                        self.hvp_step,
                    );

                    let step = self.scaled_step(&hvp, g)?;
                    trace!(parameter = name, norm = norm(&step), "natural gradient step");
                    update.push(name, param.shape().to_vec(), step)?;
                }
            }
            SolveStrategy::GlobalFlattened => {
                let (Some(point), Some(g)) = (live.flatten(), grads.flatten()) else {
                    return Ok(update);
                };

                let hvp = HessianVectorProduct::new(
                    |flat: Tensor<B, 1>| -> Result<Tensor<B, 1>> {
                        let probe = live.unflatten(flat)?;
                        let grad = model.divergence_gradient(&probe)?;
                        live.check_layout(&grad)?;
                        Ok(grad.flatten().unwrap_or_else(|| g.zeros_like()))
                    },
                    point,
                    self.damping,
                    self.hvp_step,
                );

                let step = self.scaled_step(&hvp, g.clone())?;
                trace!(norm = norm(&step), "natural gradient step (global)");

                for param in live.unflatten(step)?.iter() {
                    update.push(param.name(), param.shape().to_vec(), param.value().clone())?;
                }
            }
        }

        Ok(update)
    }

    /// `β·s` with `s` the CG solution of `A·s = g`
    fn scaled_step<B, A>(&self, operator: &A, g: Tensor<B, 1>) -> Result<Tensor<B, 1>>
    where
        B: Backend,
        A: LinearOperator<B>,
    {
        let solution = self.cg.solve(operator, g.clone())?;
        // s·g is non-negative for a positive semi-definite operator; clamp away round-off.
        let shs = dot(&solution.x, &g).max(0.0);
        let beta = (2.0 * self.max_kl / (shs + SCALE_EPS)).sqrt();
        Ok(solution.x.mul_scalar(beta))
    }
}
