//! End-to-end TRPO on a contextual two-armed bandit
//!
//! The state is `x = ±1`, the policy has a single parameter `θ` with logits
//! `(θx, −θx)`. Pulling `Left` is optimal for `x = +1` and `Right` for `x = −1`,
//! so both are chosen with probability `σ(2θ)` and learning means `θ` grows.

use burn::{
    backend::{
        ndarray::{NdArray, NdArrayDevice},
        Autodiff,
    },
    module::Param,
    prelude::*,
    tensor::{activation::softmax, backend::AutodiffBackend},
};
use once_cell::sync::Lazy;
use rand::{thread_rng, Rng};
use strum::FromRepr;

use trpo::{
    algo::trpo::{RetentionPolicy, SolveStrategy, TRPOAgent, TRPOAgentConfig, TRPOCriticModel},
    env::Environment,
    nn::{ParameterSet, PolicyNetwork},
    traits::TrainableAgent,
    Result,
};

type TrpoBackend = Autodiff<NdArray>;

static DEVICE: Lazy<NdArrayDevice> = Lazy::new(NdArrayDevice::default);

#[derive(FromRepr, Clone, Copy, Debug, PartialEq, Eq)]
enum Arm {
    Left = 0,
    Right = 1,
}

impl From<usize> for Arm {
    fn from(value: usize) -> Self {
        Self::from_repr(value).expect("Arm::from is only called with valid values [0, 1]")
    }
}

/// One pull per episode, `payout` for the optimal arm and nothing otherwise
struct Bandit {
    state: [f32; 1],
    active: bool,
    payout: f32,
}

impl Bandit {
    fn new(payout: f32) -> Self {
        Self {
            state: [1.0],
            active: false,
            payout,
        }
    }
}

impl Environment for Bandit {
    type State = [f32; 1];
    type Action = Arm;

    fn step(&mut self, action: Arm) -> (Option<[f32; 1]>, f32) {
        let optimal = if self.state[0] > 0.0 { Arm::Left } else { Arm::Right };
        self.active = false;
        let reward = if action == optimal { self.payout } else { 0.0 };
        (None, reward)
    }

    fn reset(&mut self) -> [f32; 1] {
        self.state = if thread_rng().gen_bool(0.5) { [1.0] } else { [-1.0] };
        self.active = true;
        self.state
    }

    fn random_action(&self) -> Arm {
        Arm::from(thread_rng().gen_range(0..2))
    }

    fn current_state(&self) -> [f32; 1] {
        self.state
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

/// Logits `(θx, −θx)`
struct SignPolicy<B: Backend> {
    params: ParameterSet<B>,
}

impl<B: Backend> SignPolicy<B> {
    fn new(theta: f32, device: &B::Device) -> Self {
        let mut params = ParameterSet::new();
        params
            .insert("theta", Tensor::<B, 1>::from_floats([theta], device))
            .unwrap();
        Self { params }
    }
}

impl<B: Backend> PolicyNetwork<B> for SignPolicy<B> {
    fn forward_with<K: Backend>(&self, params: &ParameterSet<K>, states: Tensor<K, 2>) -> Result<Tensor<K, 2>> {
        let theta: Tensor<K, 1> = params.tensor("theta")?;
        let z = states * theta.unsqueeze_dim::<2>(0);
        Ok(softmax(Tensor::cat(vec![z.clone(), z.neg()], 1), 1))
    }

    fn parameters(&self) -> &ParameterSet<B> {
        &self.params
    }

    fn load_parameters(&mut self, params: ParameterSet<B>) -> Result<()> {
        self.params.assign(params)
    }
}

/// Constant value estimate, starts at zero
#[derive(Module, Debug)]
struct ConstantCritic<B: Backend> {
    offset: Param<Tensor<B, 1>>,
}

impl<B: Backend> ConstantCritic<B> {
    fn new(device: &B::Device) -> Self {
        Self {
            offset: Param::from_tensor(Tensor::zeros([1], device)),
        }
    }
}

impl<B: AutodiffBackend> TRPOCriticModel<B> for ConstantCritic<B> {
    fn forward(&self, states: Tensor<B, 2>) -> Tensor<B, 2> {
        let [n, _] = states.dims();
        Tensor::zeros([n, 1], &states.device()) + self.offset.val().unsqueeze_dim::<2>(0)
    }
}

type Agent = TRPOAgent<TrpoBackend, SignPolicy<NdArray>, ConstantCritic<TrpoBackend>, Bandit>;

fn agent(config: TRPOAgentConfig) -> Agent {
    let policy = SignPolicy::new(0.0, &*DEVICE);
    let critic = ConstantCritic::new(&*DEVICE);
    TRPOAgent::new(policy, critic, config, &*DEVICE).unwrap()
}

fn manual_config() -> TRPOAgentConfig {
    TRPOAgentConfig {
        train_freq: 100_000,
        ..Default::default()
    }
}

fn theta(agent: &Agent) -> f32 {
    agent
        .policy()
        .parameters()
        .require("theta")
        .unwrap()
        .value()
        .to_data()
        .to_vec::<f32>()
        .unwrap()[0]
}

fn p_optimal(agent: &Agent) -> f32 {
    let states = Tensor::<NdArray, 2>::from_floats([[1.0], [-1.0]], &*DEVICE);
    let probs = agent.policy().predict(states).unwrap().to_data().to_vec::<f32>().unwrap();
    // [p(Left | +1), p(Right | +1), p(Left | −1), p(Right | −1)]
    assert!((probs[0] - probs[3]).abs() < 1e-6);
    probs[0]
}

fn collect(agent: &mut Agent, env: &mut Bandit, episodes: usize) {
    for _ in 0..episodes {
        agent.go(env).unwrap();
    }
}

#[test]
fn optimal_action_probability_increases() {
    let mut agent = agent(manual_config());
    let mut env = Bandit::new(1.0);

    let initial = p_optimal(&agent);
    assert!((initial - 0.5).abs() < 1e-6);

    let mut previous = initial;
    let mut accepted = 0;
    for _ in 0..5 {
        collect(&mut agent, &mut env, 64);
        let metrics = agent.train().unwrap().unwrap();

        let current = p_optimal(&agent);
        if metrics.accepted {
            accepted += 1;
            assert!(current > previous, "{current} <= {previous}");
        } else {
            assert_eq!(current, previous);
        }
        previous = current;
    }

    assert!(accepted > 0);
    assert!(p_optimal(&agent) > initial);
}

#[test]
fn accepted_update_stays_inside_trust_region() {
    let config = manual_config();
    let max_kl = config.max_kl as f32;
    let mut agent = agent(config);
    let mut env = Bandit::new(1.0);

    collect(&mut agent, &mut env, 64);
    let before = theta(&agent);
    let metrics = agent.train().unwrap().unwrap();

    assert!(metrics.accepted);
    assert!(metrics.kl > 0.0 && metrics.kl < max_kl, "kl = {}", metrics.kl);
    assert!(metrics.surrogate > metrics.extra["surrogate_before"]);
    assert!(metrics.step_fraction.is_some());
    assert_ne!(theta(&agent), before);
    assert_eq!(agent.memory_len(), 0);
}

#[test]
fn rejected_update_leaves_policy_bit_identical() {
    let mut agent = agent(manual_config());
    // No payout: every advantage is zero, so no candidate can improve the objective.
    let mut env = Bandit::new(0.0);

    collect(&mut agent, &mut env, 32);
    let before = agent.policy().parameters().flatten().unwrap().to_data();
    let metrics = agent.train().unwrap().unwrap();
    let after = agent.policy().parameters().flatten().unwrap().to_data();

    assert!(!metrics.accepted);
    assert_eq!(metrics.line_search_trials, agent.config().search_iter);
    assert!(metrics.step_fraction.is_none());
    assert_eq!(before.to_vec::<f32>().unwrap(), after.to_vec::<f32>().unwrap());
    // Retained for the next attempt
    assert_eq!(agent.memory_len(), 32);
}

#[test]
fn discard_on_rejection_drops_batch() {
    let mut agent = agent(TRPOAgentConfig {
        retention: RetentionPolicy::DiscardOnRejection,
        ..manual_config()
    });
    let mut env = Bandit::new(0.0);

    collect(&mut agent, &mut env, 16);
    let metrics = agent.train().unwrap().unwrap();

    assert!(!metrics.accepted);
    assert_eq!(agent.memory_len(), 0);
}

#[test]
fn global_solve_strategy_learns() {
    let mut agent = agent(TRPOAgentConfig {
        solve_strategy: SolveStrategy::GlobalFlattened,
        ..manual_config()
    });
    let mut env = Bandit::new(1.0);

    collect(&mut agent, &mut env, 64);
    let metrics = agent.train().unwrap().unwrap();

    assert!(metrics.accepted);
    assert!(p_optimal(&agent) > 0.5);
}

#[test]
fn step_trains_every_train_freq_transitions() {
    let mut agent = agent(TRPOAgentConfig {
        train_freq: 16,
        ..Default::default()
    });
    let mut env = Bandit::new(1.0);

    let mut updates = 0;
    for _ in 0..40 {
        env.reset();
        loop {
            let (_, done, metrics) = agent.step(&mut env).unwrap();
            if metrics.is_some() {
                updates += 1;
            }
            if done {
                break;
            }
        }
    }

    assert_eq!(updates, 2);
    assert_eq!(agent.total_steps(), 40);
}
