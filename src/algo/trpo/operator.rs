//! Matrix-free linear operators
//!
//! The curvature of the KL divergence is only ever touched through its product
//! with a vector. The full matrix is never formed.

use burn::{prelude::*, tensor::ElementConversion};

use crate::error::Result;

/// A symmetric linear map `v -> A·v` on flat vectors
pub trait LinearOperator<B: Backend> {
    fn apply(&self, v: Tensor<B, 1>) -> Result<Tensor<B, 1>>;
}

/// Inner product of two flat vectors, read back to the host
pub fn dot<B: Backend>(a: &Tensor<B, 1>, b: &Tensor<B, 1>) -> f64 {
    (a.clone() * b.clone()).sum().into_scalar().elem::<f64>()
}

/// Euclidean norm of a flat vector
pub fn norm<B: Backend>(v: &Tensor<B, 1>) -> f64 {
    dot(v, v).sqrt()
}

/// Damped Hessian-vector product of a divergence, `v -> (H + damping·I)·v`
///
/// `gradient` maps a point to the divergence gradient at that point. The
/// directional derivative of the gradient along `v` is taken as a symmetric
/// difference of two gradient evaluations a distance `step` apart, which is
/// exact when the divergence is quadratic around `point`.
pub struct HessianVectorProduct<B, F>
where
    B: Backend,
    F: Fn(Tensor<B, 1>) -> Result<Tensor<B, 1>>,
{
    gradient: F,
    point: Tensor<B, 1>,
    damping: f64,
    step: f64,
}

impl<B, F> HessianVectorProduct<B, F>
where
    B: Backend,
    F: Fn(Tensor<B, 1>) -> Result<Tensor<B, 1>>,
{
    pub fn new(gradient: F, point: Tensor<B, 1>, damping: f64, step: f64) -> Self {
        Self {
            gradient,
            point,
            damping,
            step,
        }
    }
}

impl<B, F> LinearOperator<B> for HessianVectorProduct<B, F>
where
    B: Backend,
    F: Fn(Tensor<B, 1>) -> Result<Tensor<B, 1>>,
{
    fn apply(&self, v: Tensor<B, 1>) -> Result<Tensor<B, 1>> {
        let length = norm(&v);
        if length == 0.0 || !length.is_finite() {
            return Ok(v.mul_scalar(self.damping));
        }

        // Probe a fixed distance along v regardless of its magnitude.
        let h = self.step / length;
        let forward = (self.gradient)(self.point.clone() + v.clone().mul_scalar(h))?;
        let backward = (self.gradient)(self.point.clone() - v.clone().mul_scalar(h))?;

        Ok((forward - backward).mul_scalar(1.0 / (2.0 * h)) + v.mul_scalar(self.damping))
    }
}
