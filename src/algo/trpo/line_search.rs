//! Backtracking line search along the natural gradient

use burn::prelude::*;
use tracing::debug;

use crate::{
    error::Result,
    nn::{ParameterSet, UpdateVector},
};

/// Outcome of one line search
#[derive(Debug, Clone)]
pub struct LineSearchOutcome<B: Backend> {
    pub accepted: bool,
    /// Objective of the accepted candidate, or the baseline objective
    pub objective: f64,
    /// KL of the accepted candidate, or the baseline KL
    pub kl: f64,
    /// Candidates evaluated
    pub trials: usize,
    /// `shrink^i` of the accepted trial
    pub step_fraction: Option<f64>,
    /// The accepted parameters, ready to be promoted whole
    pub candidate: Option<ParameterSet<B>>,
}

/// Tries `live + shrink^i · update` for `i = 0, 1, ...`
///
/// A trial is accepted when it strictly improves the objective while staying
/// strictly inside the KL radius. The live parameters are never modified.
#[derive(Debug, Clone, Copy)]
pub struct LineSearch {
    pub shrink: f64,
    pub max_trials: usize,
    pub max_kl: f64,
}

impl LineSearch {
    /// `evaluate` returns `(objective, kl)` for a candidate parameter set;
    /// `baseline` is the same pair for the live parameters.
    pub fn search<B, F>(
        &self,
        live: &ParameterSet<B>,
        update: &UpdateVector<B>,
        baseline: (f64, f64),
        mut evaluate: F,
    ) -> Result<LineSearchOutcome<B>>
    where
        B: Backend,
        F: FnMut(&ParameterSet<B>) -> Result<(f64, f64)>,
    {
        let (old_objective, old_kl) = baseline;
        let mut fraction = 1.0;

        for trial in 0..self.max_trials {
            let candidate = live.perturbed(update, fraction)?;
            let (objective, kl) = evaluate(&candidate)?;

            debug!(trial, fraction, objective, kl, "line search trial");

            if objective > old_objective && kl < self.max_kl {
                return Ok(LineSearchOutcome {
                    accepted: true,
                    objective,
                    kl,
                    trials: trial + 1,
                    step_fraction: Some(fraction),
                    candidate: Some(candidate),
                });
            }

            fraction *= self.shrink;
        }

        Ok(LineSearchOutcome {
            accepted: false,
            objective: old_objective,
            kl: old_kl,
            trials: self.max_trials,
            step_fraction: None,
            candidate: None,
        })
    }
}
