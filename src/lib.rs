//! Trust Region Policy Optimization on burn
//!
//! The update machinery lives in [`algo::trpo`]: a matrix-free Hessian-vector
//! product of the KL divergence, a conjugate gradient solver, the trust-region
//! scaled natural gradient and a backtracking line search, driven by
//! [`algo::trpo::TRPOAgent`].

pub mod algo;
pub mod env;
pub mod error;
pub mod nn;
pub mod traits;

pub use error::{Result, TrpoError};
