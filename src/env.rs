//! Environment abstraction the agents interact with

use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// A reinforcement learning environment
///
/// `step` returns `None` as the next state when the episode has ended.
pub trait Environment {
    /// The observation handed to the agent
    type State: Clone;
    /// The action the agent takes
    type Action;

    /// Apply an action, returning the next state (or `None` if terminal) and the reward
    fn step(&mut self, action: Self::Action) -> (Option<Self::State>, f32);

    /// Start a new episode and return its initial state
    fn reset(&mut self) -> Self::State;

    /// A uniformly random action
    fn random_action(&self) -> Self::Action;

    /// The state the environment is currently in
    fn current_state(&self) -> Self::State;

    /// Whether the current episode is still running
    fn is_active(&self) -> bool {
        true
    }
}

/// Named scalar statistics collected over an episode
#[derive(Debug, Clone, Default)]
pub struct Report {
    values: HashMap<String, f64>,
}

impl Report {
    /// Create a report with every key initialised to zero
    pub fn new(keys: Vec<&str>) -> Self {
        Self {
            values: keys.into_iter().map(|k| (k.to_string(), 0.0)).collect(),
        }
    }

    pub fn entry(&mut self, key: &str) -> Entry<'_, String, f64> {
        self.values.entry(key.to_string())
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Zero every key
    pub fn reset(&mut self) {
        self.values.values_mut().for_each(|v| *v = 0.0);
    }
}
