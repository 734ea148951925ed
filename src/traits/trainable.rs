//! Trainable agent trait for fine-grained training control
//!
//! This trait provides a unified API for driving an agent step by step while
//! keeping an eye on what each update did:
//! - Monitoring training progress (surrogate objective, KL divergence, value loss, entropy)
//! - Seeing whether the trust-region update was accepted, and after how many trials
//! - Switching between training and evaluation mode
//! - Custom training loops with full control

use std::collections::HashMap;

use crate::{env::Environment, error::Result};

/// Training metrics returned after each training update
///
/// These metrics allow monitoring the training progress and detecting issues
/// like a collapsing policy or a trust region that is too small to move in.
#[derive(Clone, Debug, Default)]
pub struct TrainingMetrics {
    /// Surrogate objective of the promoted policy, or of the old one if the update was rejected
    pub surrogate: f32,

    /// Mean KL divergence between the old and the promoted policy, or the baseline KL if rejected
    pub kl: f32,

    /// Value network regression loss (lower is better)
    pub value_loss: f32,

    /// Entropy of the policy before the update (higher means more exploration)
    pub entropy: f32,

    /// Whether the line search found an acceptable step
    pub accepted: bool,

    /// Number of line-search candidates evaluated
    pub line_search_trials: usize,

    /// Fraction of the full natural-gradient step that was taken
    pub step_fraction: Option<f32>,

    /// Number of transitions in the training batch
    pub batch_size: usize,

    /// Additional algorithm-specific metrics
    pub extra: HashMap<String, f32>,
}

/// Trait for trainable RL agents with fine-grained control
///
/// # Example
///
/// ```ignore
/// // Collect experience
/// let (reward, done, metrics) = agent.step(&mut env)?;
///
/// // Train when ready
/// if agent.should_learn() {
///     if let Some(metrics) = agent.learn()? {
///         println!("accepted: {} kl: {}", metrics.accepted, metrics.kl);
///     }
/// }
/// ```
pub trait TrainableAgent<E: Environment> {
    /// Information returned after each environment step
    type StepInfo;

    /// Take one step in the environment
    ///
    /// Records the experience and trains if the agent decides it is time to.
    fn step(&mut self, env: &mut E) -> Result<Self::StepInfo>;

    /// Check if the agent is ready to train
    ///
    /// Returns true when enough experience has been collected.
    /// If the agent is in evaluation mode this returns false.
    fn should_learn(&self) -> bool;

    /// Train the agent on collected experience
    ///
    /// Returns `None` if there was nothing to train on.
    fn learn(&mut self) -> Result<Option<TrainingMetrics>>;

    /// Reset the agent's episode state
    ///
    /// Clears trajectory buffers, but keeps learned weights.
    fn reset_episode(&mut self);

    /// Get total number of environment steps taken
    fn total_steps(&self) -> usize;

    /// Make agent in evaluation mode
    fn eval(&mut self);

    /// Make agent in training mode
    fn train(&mut self);
}
