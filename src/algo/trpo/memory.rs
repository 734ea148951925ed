//! On-policy experience for TRPO
//!
//! [`TrajectoryFeed`] receives raw `(state, action, reward)` steps from the
//! environment loop and turns the two most recent entries into a bootstrapped
//! [`Transition`]. [`BatchMemory`] holds those transitions until a training
//! step consumes them.

use crate::error::Result;

/// One bootstrapped training example
#[derive(Debug, Clone)]
pub struct Transition<S> {
    pub state: S,
    pub action: usize,
    /// `r + γ·V(s')`, or `r` when `s'` is terminal
    pub q_value: f32,
    /// `None` when the episode ended
    pub next_state: Option<S>,
}

/// Ordered transitions for the next training step
#[derive(Debug, Clone)]
pub struct BatchMemory<S> {
    transitions: Vec<Transition<S>>,
}

impl<S: Clone> Default for BatchMemory<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Clone> BatchMemory<S> {
    pub fn new() -> Self {
        Self {
            transitions: Vec::new(),
        }
    }

    pub fn push(&mut self, transition: Transition<S>) {
        self.transitions.push(transition);
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn clear(&mut self) {
        self.transitions.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transition<S>> {
        self.transitions.iter()
    }

    pub fn states(&self) -> Vec<S> {
        self.transitions.iter().map(|t| t.state.clone()).collect()
    }

    pub fn actions(&self) -> Vec<usize> {
        self.transitions.iter().map(|t| t.action).collect()
    }

    pub fn q_values(&self) -> Vec<f32> {
        self.transitions.iter().map(|t| t.q_value).collect()
    }
}

#[derive(Debug, Clone)]
struct FeedEntry<S> {
    /// `None` marks the end of an episode
    state: Option<S>,
    /// Action that led to `state`, absent for the first state of an episode
    action: Option<usize>,
    /// Reward received on arriving in `state`
    reward: f32,
}

/// Step-by-step trajectory record
#[derive(Debug, Clone)]
pub struct TrajectoryFeed<S> {
    entries: Vec<FeedEntry<S>>,
}

impl<S: Clone> Default for TrajectoryFeed<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Clone> TrajectoryFeed<S> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Record the initial state of a new episode
    pub fn begin_episode(&mut self, state: S) {
        self.entries.push(FeedEntry {
            state: Some(state),
            action: None,
            reward: 0.0,
        });
    }

    /// Record the outcome of taking `action`: the reward and the next state (`None` if terminal)
    pub fn record(&mut self, action: usize, reward: f32, next_state: Option<S>) {
        self.entries.push(FeedEntry {
            state: next_state,
            action: Some(action),
            reward,
        });
    }

    /// Whether the latest entry is a live state, i.e. an episode is in progress
    pub fn in_episode(&self) -> bool {
        matches!(self.entries.last(), Some(FeedEntry { state: Some(_), .. }))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Turn the two most recent entries into a transition
    ///
    /// Yields nothing with fewer than two entries, or when the older entry is
    /// an end-of-episode marker. `value` is only called for a non-terminal
    /// newest state. Older entries are dropped, so each step is consumed once.
    pub fn synthesize<F>(&mut self, gamma: f32, value: F) -> Result<Option<Transition<S>>>
    where
        F: FnOnce(&S) -> Result<f32>,
    {
        let n = self.entries.len();
        if n < 2 {
            return Ok(None);
        }

        let (prev, newest) = (&self.entries[n - 2], &self.entries[n - 1]);
        let transition = match (&prev.state, newest.action) {
            (Some(state), Some(action)) => {
                let bootstrap = match &newest.state {
                    Some(next) => value(next)?,
                    None => 0.0,
                };
                Some(Transition {
                    state: state.clone(),
                    action,
                    q_value: newest.reward + gamma * bootstrap,
                    next_state: newest.state.clone(),
                })
            }
            _ => None,
        };

        self.entries.drain(..n - 1);
        Ok(transition)
    }
}
