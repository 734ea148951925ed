//! Conjugate gradient solver for `A·x = b` with a matrix-free `A`

use burn::prelude::*;
use tracing::debug;

use crate::error::Result;

use super::operator::{dot, LinearOperator};

const CURVATURE_EPS: f64 = 1e-9;
const RESIDUAL_EPS: f64 = 1e-7;

/// Result of a conjugate gradient solve
#[derive(Debug, Clone)]
pub struct CgSolution<B: Backend> {
    /// Approximate solution
    pub x: Tensor<B, 1>,
    /// Iterations actually run
    pub iterations: usize,
    /// `‖b − A·x‖` as tracked by the recurrence
    pub residual_norm: f64,
}

/// Conjugate gradient with a fixed iteration budget
///
/// Runs exactly `iterations` steps unless `residual_tolerance` is set, in which
/// case it stops as soon as the residual norm drops to the tolerance.
#[derive(Debug, Clone, Copy)]
pub struct ConjugateGradient {
    pub iterations: usize,
    pub residual_tolerance: Option<f64>,
}

impl ConjugateGradient {
    pub fn new(iterations: usize) -> Self {
        Self {
            iterations,
            residual_tolerance: None,
        }
    }

    pub fn with_residual_tolerance(mut self, tolerance: Option<f64>) -> Self {
        self.residual_tolerance = tolerance;
        self
    }

    pub fn solve<B, A>(&self, operator: &A, b: Tensor<B, 1>) -> Result<CgSolution<B>>
    where
        B: Backend,
        A: LinearOperator<B> + ?Sized,
    {
        let mut x = b.zeros_like();
        let mut r = b.clone();
        let mut v = b;
        let mut rr = dot(&r, &r);
        let mut iterations = 0;

        for _ in 0..self.iterations {
            if let Some(tol) = self.residual_tolerance {
                if rr.sqrt() <= tol {
                    break;
                }
            }

            let av = operator.apply(v.clone())?;
            let alpha = rr / (dot(&v, &av) + CURVATURE_EPS);

            x = x + v.clone().mul_scalar(alpha);
            r = r - av.mul_scalar(alpha);

            let rr_new = dot(&r, &r);
            let beta = rr_new / (rr + RESIDUAL_EPS);
            v = r.clone() + v.mul_scalar(beta);

            rr = rr_new;
            iterations += 1;
        }

        let residual_norm = rr.sqrt();
        debug!(iterations, residual_norm, "conjugate gradient finished");

        Ok(CgSolution {
            x,
            iterations,
            residual_norm,
        })
    }
}
