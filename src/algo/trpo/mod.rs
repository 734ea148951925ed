//! Trust Region Policy Optimization (TRPO) implementation
//!
//! TRPO is an on-policy actor-critic algorithm that bounds every policy update
//! by a KL divergence constraint instead of a learning rate.
//!
//! # Key Features
//!
//! - **Natural gradient**: the search direction solves `H·s = g` by conjugate
//!   gradient, where `H` is the KL curvature and is never formed explicitly
//! - **Trust region**: the step is scaled so its quadratic KL model equals `max_kl`
//! - **Line search**: the step is shrunk until it improves the surrogate
//!   objective *and* stays within the KL radius, or is rejected outright
//! - **All-or-nothing promotion**: candidates are evaluated on copies, the live
//!   policy only changes when a candidate is accepted
//!
//! # Algorithm Overview
//!
//! 1. Collect transitions `(s, a, q = r + γ·V(s'))` with the current policy
//! 2. Compute advantages `q − V(s)` and the old action probabilities
//! 3. Regress the value network towards `q`
//! 4. Compute the natural gradient of the surrogate objective
//! 5. Backtracking line search along it; promote the accepted candidate
//!
//! # Usage Example
//!
//! ```ignore
//! use trpo::algo::trpo::{TRPOAgent, TRPOAgentConfig};
//!
//! let config = TRPOAgentConfig {
//!     max_kl: 0.01,
//!     train_freq: 256,
//!     ..Default::default()
//! };
//!
//! let policy = SoftmaxPolicy::new(&MLPConfig::new(4, vec![64], 2), &*DEVICE)?;
//! let critic = MLPConfig::new(4, vec![64], 1).init(&*DEVICE);
//! let mut agent: TRPOAgent<Backend, _, _, CartPole> = TRPOAgent::new(policy, critic, config, &*DEVICE)?;
//! agent.go(&mut env)?;
//! ```
//!
//! # Hyperparameters
//!
//! - `max_kl`: Trust-region radius (typically 0.005-0.05)
//! - `cg_iters`: Conjugate gradient iterations (5-20)
//! - `shrink`, `search_iter`: Line search schedule `shrink^i`, `i < search_iter`
//! - `damping`: Added to the curvature for conditioning (0-0.1)
//!
//! Reference: "Trust Region Policy Optimization" (Schulman et al., 2015)

pub mod conjugate_gradient;
pub mod line_search;
pub mod memory;
pub mod natural_gradient;
pub mod operator;
pub mod surrogate;

use std::collections::HashMap;

use burn::{
    module::AutodiffModule,
    optim::{AdamWConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use rand::{distributions::Distribution, distributions::WeightedIndex, thread_rng};
use strum::Display;
use tracing::info;

use crate::{
    env::{Environment, Report},
    error::{Result, TrpoError},
    nn::{PolicyNetwork, MLP},
    traits::{ToTensor, TrainableAgent, TrainingMetrics},
};

pub use conjugate_gradient::{CgSolution, ConjugateGradient};
pub use line_search::{LineSearch, LineSearchOutcome};
pub use memory::{BatchMemory, TrajectoryFeed, Transition};
pub use natural_gradient::{NaturalGradient, SolveStrategy, SurrogateModel};
pub use operator::{HessianVectorProduct, LinearOperator};
pub use surrogate::{PolicyBatch, PolicyObjective};

/// TRPO value network trait
/// Outputs state values V(s)
pub trait TRPOCriticModel<B: AutodiffBackend>: AutodiffModule<B> {
    /// Forward pass: `[batch, features]` → `[batch, 1]`
    fn forward(&self, states: Tensor<B, 2>) -> Tensor<B, 2>;
}

/// What happens to the batch when the line search rejects every candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum RetentionPolicy {
    /// Keep the transitions and train on them again, together with new ones
    #[default]
    RetainUntilAccepted,
    /// Drop the transitions as after an accepted update
    DiscardOnRejection,
}

/// Configuration for TRPO agent
#[derive(Debug, Clone)]
pub struct TRPOAgentConfig {
    /// Discount factor γ (default: 0.99)
    pub gamma: f32,
    /// KL trust-region radius δ (default: 0.01)
    pub max_kl: f64,
    /// Line search shrink factor α, trial `i` takes `α^i` of the step (default: 0.9)
    pub shrink: f64,
    /// Maximum line search trials (default: 50)
    pub search_iter: usize,
    /// Conjugate gradient iterations (default: 10)
    pub cg_iters: usize,
    /// Stop conjugate gradient once the residual norm is this small (default: None)
    pub cg_tolerance: Option<f64>,
    /// Damping added to the KL curvature (default: 0.0)
    pub damping: f64,
    /// Probe length of the Hessian-vector product (default: 1e-3)
    pub hvp_step: f64,
    /// Train every `train_freq` recorded transitions (default: 128)
    ///
    /// Only steps that produce a transition count. The first state of an
    /// episode yields none and does not advance the schedule.
    pub train_freq: usize,
    /// Critic learning rate (default: 1e-3)
    pub lr_critic: f64,
    /// Critic regression passes per training step (default: 1)
    pub value_epochs: usize,
    /// Per-tensor or global conjugate gradient solve (default: PerTensor)
    pub solve_strategy: SolveStrategy,
    /// Batch handling after a rejected update (default: RetainUntilAccepted)
    pub retention: RetentionPolicy,
}

impl Default for TRPOAgentConfig {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            max_kl: 0.01,
            shrink: 0.9,
            search_iter: 50,
            cg_iters: 10,
            cg_tolerance: None,
            damping: 0.0,
            hvp_step: 1e-3,
            train_freq: 128,
            lr_critic: 1e-3,
            value_epochs: 1,
            solve_strategy: SolveStrategy::PerTensor,
            retention: RetentionPolicy::RetainUntilAccepted,
        }
    }
}

impl TRPOAgentConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(TrpoError::InvalidConfig(msg));

        if !(self.max_kl > 0.0) {
            return invalid(format!("max_kl must be positive, got {}", self.max_kl));
        }
        if !(self.shrink > 0.0 && self.shrink < 1.0) {
            return invalid(format!("shrink must lie in (0, 1), got {}", self.shrink));
        }
        if self.search_iter == 0 {
            return invalid("search_iter must be at least 1".to_string());
        }
        if self.cg_iters == 0 {
            return invalid("cg_iters must be at least 1".to_string());
        }
        if !(self.damping >= 0.0) {
            return invalid(format!("damping must be non-negative, got {}", self.damping));
        }
        if !(self.hvp_step > 0.0) {
            return invalid(format!("hvp_step must be positive, got {}", self.hvp_step));
        }
        if self.train_freq == 0 {
            return invalid("train_freq must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return invalid(format!("gamma must lie in [0, 1], got {}", self.gamma));
        }
        Ok(())
    }

    fn natural_gradient(&self) -> NaturalGradient {
        NaturalGradient {
            cg: ConjugateGradient::new(self.cg_iters).with_residual_tolerance(self.cg_tolerance),
            damping: self.damping,
            max_kl: self.max_kl,
            hvp_step: self.hvp_step,
            strategy: self.solve_strategy,
        }
    }

    fn line_search(&self) -> LineSearch {
        LineSearch {
            shrink: self.shrink,
            max_trials: self.search_iter,
            max_kl: self.max_kl,
        }
    }
}

/// TRPO Agent for discrete action spaces
///
/// This agent is generic over:
/// - `B`: Autodiff backend (e.g., `Autodiff<NdArray>`)
/// - `P`: Policy network implementing [`PolicyNetwork`], stored on the inner backend
/// - `V`: Value network implementing [`TRPOCriticModel`]
/// - `E`: Environment with discrete actions
pub struct TRPOAgent<B, P, V, E>
where
    B: AutodiffBackend,
    E: Environment,
    V: AutodiffModule<B>,
{
    policy: P,
    // Option for ownership during optimization
    critic: Option<V>,
    optimizer_critic: burn::optim::adaptor::OptimizerAdaptor<burn::optim::AdamW, V, B>,

    feed: TrajectoryFeed<E::State>,
    memory: BatchMemory<E::State>,

    device: &'static B::Device,
    config: TRPOAgentConfig,

    // Transitions recorded, drives `should_learn`
    steps: usize,
    total_steps: usize,
    learn_mode: bool,
}

impl<B, P, V, E> TRPOAgent<B, P, V, E>
where
    B: AutodiffBackend,
    P: PolicyNetwork<B::InnerBackend>,
    V: TRPOCriticModel<B>,
    E: Environment,
    Vec<E::State>: ToTensor<B, 2, Float>,
{
    /// Create a new TRPO agent
    ///
    /// Fails with [`TrpoError::InvalidConfig`] if the hyperparameters are out of range.
    pub fn new(policy: P, critic: V, config: TRPOAgentConfig, device: &'static B::Device) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            policy,
            critic: Some(critic),
            optimizer_critic: AdamWConfig::new().init(),
            feed: TrajectoryFeed::new(),
            memory: BatchMemory::new(),
            device,
            config,
            steps: 0,
            total_steps: 0,
            learn_mode: true,
        })
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn critic(&self) -> Option<&V> {
        self.critic.as_ref()
    }

    pub fn config(&self) -> &TRPOAgentConfig {
        &self.config
    }

    /// Transitions waiting for the next training step
    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    /// Sample an action from the policy's categorical distribution
    pub fn select_action(&self, state: &E::State) -> Result<usize> {
        let states: Tensor<B, 2> = vec![state.clone()].to_tensor(self.device);
        let probs = to_host(self.policy.predict(states.inner())?)?;

        let dist = WeightedIndex::new(&probs).map_err(|e| TrpoError::Sampling(format!("{e} ({probs:?})")))?;
        Ok(dist.sample(&mut thread_rng()))
    }

    /// Turn the latest step of the trajectory feed into a transition
    ///
    /// Returns whether a transition was added to the batch.
    pub fn record_transition(&mut self) -> Result<bool> {
        let critic = self
            .critic
            .as_ref()
            .ok_or(TrpoError::MissingCollaborator("critic"))?;
        let device = self.device;

        let transition = self.feed.synthesize(self.config.gamma, |next| {
            let values = state_values::<B, _, _>(critic, vec![next.clone()], device)?;
            values
                .first()
                .copied()
                .ok_or_else(|| TrpoError::TensorData("empty value estimate".to_string()))
        })?;

        match transition {
            Some(transition) => {
                self.push_transition(transition);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Add a transition computed elsewhere to the batch
    pub fn push_transition(&mut self, transition: Transition<E::State>) {
        self.memory.push(transition);
        self.steps += 1;
    }

    /// Whether a training step is due
    pub fn should_learn(&self) -> bool {
        self.learn_mode && self.steps > 0 && self.steps % self.config.train_freq == 0
    }

    /// Regress the value network towards `targets`, returns the last loss
    pub fn fit_values(&mut self, states: Tensor<B, 2>, targets: Tensor<B, 1>) -> Result<f32> {
        let mut loss_value = 0.0;

        for _ in 0..self.config.value_epochs {
            let critic = self
                .critic
                .take()
                .ok_or(TrpoError::MissingCollaborator("critic"))?;

            let values: Tensor<B, 1> = critic.forward(states.clone()).squeeze_dims(&[1]);
            let loss = (targets.clone() - values).powf_scalar(2.0).mean();
            loss_value = loss.clone().into_scalar().elem::<f32>();

            let grads = GradientsParams::from_grads(loss.backward(), &critic);
            self.critic = Some(self.optimizer_critic.step(self.config.lr_critic, critic, grads));
        }

        Ok(loss_value)
    }

    /// One TRPO update on the collected batch
    ///
    /// Returns `None` when the batch is empty. A rejected update is not an
    /// error: the metrics report `accepted = false` and the policy is unchanged.
    pub fn train(&mut self) -> Result<Option<TrainingMetrics>> {
        if self.memory.is_empty() {
            return Ok(None);
        }

        let batch_size = self.memory.len();
        let states: Tensor<B, 2> = self.memory.states().to_tensor(self.device);
        let q_values = self.memory.q_values();

        // Advantages against the value estimates from before the critic update
        let critic = self
            .critic
            .as_ref()
            .ok_or(TrpoError::MissingCollaborator("critic"))?;
        let values = to_host(critic.forward(states.clone()))?;
        let advantages: Vec<f32> = q_values.iter().zip(&values).map(|(q, v)| q - v).collect();

        let inner_states = states.clone().inner();
        let old_probs = self.policy.predict(inner_states.clone())?;
        let entropy = surrogate::mean_entropy(old_probs.clone())
            .into_scalar()
            .elem::<f32>();

        let targets = Tensor::<B, 1>::from_data(
            TensorData::from(q_values.as_slice()).convert::<B::FloatElem>(),
            self.device,
        );
        let value_loss = self.fit_values(states, targets)?;

        let advantages = Tensor::<B, 1>::from_data(
            TensorData::from(advantages.as_slice()).convert::<B::FloatElem>(),
            self.device,
        )
        .inner();
        let batch = PolicyBatch {
            states: inner_states,
            actions: self.memory.actions(),
            advantages,
            old_probs,
        };

        let live = self.policy.parameters();
        let baseline = surrogate::evaluate(&self.policy, live, &batch)?;

        let objective = PolicyObjective::<B, P>::new(&self.policy, live, &batch);
        let update = self.config.natural_gradient().compute(&objective)?;

        let outcome = self
            .config
            .line_search()
            .search(live, &update, baseline, |candidate| {
                surrogate::evaluate(&self.policy, candidate, &batch)
            })?;

        if let Some(candidate) = outcome.candidate {
            self.policy.load_parameters(candidate)?;
        }

        if outcome.accepted {
            self.memory.clear();
            info!(
                surrogate = outcome.objective,
                kl = outcome.kl,
                trials = outcome.trials,
                batch_size,
                "policy update accepted"
            );
        } else {
            if self.config.retention == RetentionPolicy::DiscardOnRejection {
                self.memory.clear();
            }
            info!(
                trials = outcome.trials,
                batch_size,
                retention = %self.config.retention,
                "policy update rejected"
            );
        }

        let mut extra = HashMap::new();
        extra.insert("surrogate_before".to_string(), baseline.0 as f32);

        Ok(Some(TrainingMetrics {
            surrogate: outcome.objective as f32,
            kl: outcome.kl as f32,
            value_loss,
            entropy,
            accepted: outcome.accepted,
            line_search_trials: outcome.trials,
            step_fraction: outcome.step_fraction.map(|f| f as f32),
            batch_size,
            extra,
        }))
    }

    /// Run one episode
    pub fn go(&mut self, env: &mut E) -> Result<Report>
    where
        E::Action: From<usize>,
    {
        let state = env.reset();
        if self.learn_mode {
            self.feed.begin_episode(state);
        }

        let mut episode_reward = 0.0;
        let mut steps = 0;

        while env.is_active() {
            let (reward, done, _) = self.step(env)?;
            episode_reward += reward;
            steps += 1;

            if done {
                break;
            }
        }

        let mut report = Report::new(vec!["reward", "steps"]);
        report.entry("reward").and_modify(|x| *x = episode_reward as f64);
        report.entry("steps").and_modify(|x| *x = steps as f64);
        Ok(report)
    }
}

/// Implementation of TrainableAgent trait for TRPO
impl<B, P, V, E> TrainableAgent<E> for TRPOAgent<B, P, V, E>
where
    B: AutodiffBackend,
    P: PolicyNetwork<B::InnerBackend>,
    V: TRPOCriticModel<B>,
    E: Environment,
    Vec<E::State>: ToTensor<B, 2, Float>,
    E::Action: From<usize>,
{
    type StepInfo = (f32, bool, Option<TrainingMetrics>); // (reward, done, metrics)

    /// Take one step in the environment
    ///
    /// In training mode the step is recorded, and a TRPO update runs whenever
    /// `train_freq` new transitions have been collected.
    fn step(&mut self, env: &mut E) -> Result<Self::StepInfo> {
        let state = env.current_state();
        if self.learn_mode && !self.feed.in_episode() {
            self.feed.begin_episode(state.clone());
        }

        let action = self.select_action(&state)?;
        let (next_state, reward) = env.step(action.into());
        let done = next_state.is_none();
        self.total_steps += 1;

        if !self.learn_mode {
            return Ok((reward, done, None));
        }

        self.feed.record(action, reward, next_state);
        let metrics = if self.record_transition()? && self.should_learn() {
            TRPOAgent::train(self)?
        } else {
            None
        };

        Ok((reward, done, metrics))
    }

    fn should_learn(&self) -> bool {
        TRPOAgent::should_learn(self)
    }

    fn learn(&mut self) -> Result<Option<TrainingMetrics>> {
        TRPOAgent::train(self)
    }

    /// Reset episode state (clear trajectory, keep weights and collected batch)
    fn reset_episode(&mut self) {
        self.feed.reset();
    }

    fn total_steps(&self) -> usize {
        self.total_steps
    }

    fn eval(&mut self) {
        self.learn_mode = false;
        self.feed.reset();
    }

    fn train(&mut self) {
        self.learn_mode = true;
        self.feed.reset();
    }
}

/// Critic estimates for `states`, read back to the host
fn state_values<B, V, S>(critic: &V, states: Vec<S>, device: &B::Device) -> Result<Vec<f32>>
where
    B: AutodiffBackend,
    V: TRPOCriticModel<B>,
    Vec<S>: ToTensor<B, 2, Float>,
{
    to_host(critic.forward(states.to_tensor(device)))
}

fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| TrpoError::TensorData(format!("{e:?}")))
}

// ============================================================================
// MLP Implementation for TRPO
// ============================================================================

/// `[batch, features]` → `[batch, 1]`
impl<B: AutodiffBackend> TRPOCriticModel<B> for MLP<B> {
    fn forward(&self, states: Tensor<B, 2>) -> Tensor<B, 2> {
        MLP::forward(self, states)
    }
}
