//! Prioritized replay memory
//!
//! New transitions enter with the current maximum priority so they are
//! sampled at least once. Sampling is stratified: the total priority mass
//! is split into `batch` equal segments with one uniform draw per segment.
//! After a learning step the sampled slots' priorities are updated from
//! their absolute TD errors.
//!
//! With `alpha = 0` every priority collapses to 1 and the memory behaves
//! like uniform replay.

use anyhow::{anyhow, Result};
use rand::Rng;

use crate::memory::sum_tree::SumTree;
use crate::utils::LinearAnneal;

/// One environment transition.
///
/// States are stacked preprocessed frames, stored as bytes (0-255) so a
/// 100k-transition memory fits in ordinary RAM; they are rescaled to
/// `[0, 1]` floats at batch time.
#[derive(Debug, Clone)]
pub struct Transition {
    /// Stacked frames before the action
    pub state: Vec<u8>,
    /// Action taken
    pub action: i64,
    /// Reward received
    pub reward: f32,
    /// Stacked frames after the action
    pub next_state: Vec<u8>,
    /// Whether the episode ended at this transition
    pub done: bool,
}

/// Configuration for prioritized replay.
#[derive(Debug, Clone, Copy)]
pub struct PerConfig {
    /// Maximum number of stored transitions
    pub capacity: usize,
    /// Priority exponent; 0 recovers uniform replay
    pub alpha: f64,
    /// Initial importance-sampling exponent
    pub beta_start: f64,
    /// Steps over which beta anneals linearly to 1
    pub beta_frames: u64,
    /// Additive constant keeping priorities strictly positive
    pub epsilon: f64,
    /// Priority assigned before any TD update has happened
    pub default_priority: f64,
}

impl Default for PerConfig {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            alpha: 0.6,
            beta_start: 0.4,
            beta_frames: 1_000_000,
            epsilon: 1e-6,
            default_priority: 1.0,
        }
    }
}

impl PerConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(anyhow!("capacity must be positive"));
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(anyhow!("alpha must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.beta_start) {
            return Err(anyhow!("beta_start must be in [0, 1]"));
        }
        if self.beta_frames == 0 {
            return Err(anyhow!("beta_frames must be positive"));
        }
        if self.epsilon <= 0.0 {
            return Err(anyhow!("epsilon must be positive"));
        }
        if self.default_priority <= 0.0 {
            return Err(anyhow!("default_priority must be positive"));
        }
        Ok(())
    }
}

/// A sampled minibatch, flattened for tensor construction.
#[derive(Debug)]
pub struct PerBatch {
    /// Concatenated states `[batch * state_len]`
    pub states: Vec<u8>,
    /// Actions `[batch]`
    pub actions: Vec<i64>,
    /// Rewards `[batch]`
    pub rewards: Vec<f32>,
    /// Concatenated next states `[batch * state_len]`
    pub next_states: Vec<u8>,
    /// Episode-end flags as 0/1 floats `[batch]`
    pub dones: Vec<f32>,
    /// Importance-sampling weights `[batch]`, max-normalized
    pub weights: Vec<f32>,
    /// Memory slots of the sampled transitions, for priority updates
    pub slots: Vec<usize>,
    /// Beta used for the weights
    pub beta: f64,
}

impl PerBatch {
    /// Number of transitions in the batch.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Mean importance-sampling weight of the batch.
    pub fn mean_weight(&self) -> f64 {
        if self.weights.is_empty() {
            return 0.0;
        }
        self.weights.iter().map(|&w| w as f64).sum::<f64>() / self.weights.len() as f64
    }
}

/// Priority statistics for metrics logging.
#[derive(Debug, Clone, Copy)]
pub struct ReplayStats {
    /// Current importance-sampling exponent
    pub beta: f64,
    /// Mean leaf priority
    pub mean_priority: f64,
    /// Maximum leaf priority
    pub max_priority: f64,
}

/// Fixed-capacity prioritized replay memory.
#[derive(Debug)]
pub struct PrioritizedReplay {
    config: PerConfig,
    tree: SumTree,
    storage: Vec<Transition>,
    next_slot: usize,
    beta: LinearAnneal,
    /// Running maximum of assigned priorities, used for new transitions
    max_assigned: f64,
}

impl PrioritizedReplay {
    /// Create an empty memory.
    pub fn new(config: PerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tree: SumTree::new(config.capacity),
            storage: Vec::with_capacity(config.capacity.min(4096)),
            next_slot: 0,
            beta: LinearAnneal::new(config.beta_start, 1.0, config.beta_frames),
            max_assigned: config.default_priority,
            config,
        })
    }

    /// Number of stored transitions.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Whether the memory is empty.
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Maximum number of transitions the memory can hold.
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Beta at step `frame`.
    pub fn beta_at(&self, frame: u64) -> f64 {
        self.beta.value(frame)
    }

    /// Store a transition with the current maximum priority, evicting the
    /// oldest transition once the memory is full.
    pub fn push(&mut self, transition: Transition) {
        let slot = self.next_slot;
        if self.storage.len() < self.config.capacity {
            self.storage.push(transition);
        } else {
            self.storage[slot] = transition;
        }
        self.tree.update(slot, self.max_assigned);
        self.next_slot = (self.next_slot + 1) % self.config.capacity;
    }

    /// Sample a stratified minibatch, or `None` while fewer than `batch`
    /// transitions are stored.
    ///
    /// `frame` drives beta annealing; pass the global step count.
    pub fn sample(&self, batch: usize, frame: u64) -> Option<PerBatch> {
        if batch == 0 || self.storage.len() < batch {
            return None;
        }

        let beta = self.beta.value(frame);
        let total = self.tree.total();
        let n = self.storage.len() as f64;
        let segment = total / batch as f64;
        let mut rng = rand::thread_rng();

        // Weight normalizer from the smallest sampling probability
        let min_prob = self.tree.min_priority() / total;
        let max_weight = (n * min_prob).powf(-beta);

        let state_len = self.storage[0].state.len();
        let mut states = Vec::with_capacity(batch * state_len);
        let mut actions = Vec::with_capacity(batch);
        let mut rewards = Vec::with_capacity(batch);
        let mut next_states = Vec::with_capacity(batch * state_len);
        let mut dones = Vec::with_capacity(batch);
        let mut weights = Vec::with_capacity(batch);
        let mut slots = Vec::with_capacity(batch);

        for i in 0..batch {
            let low = segment * i as f64;
            let mass = rng.gen_range(low..low + segment);
            let slot = self.tree.retrieve(mass);

            let prob = self.tree.priority(slot) / total;
            let weight = ((n * prob).powf(-beta) / max_weight) as f32;

            let t = &self.storage[slot];
            states.extend_from_slice(&t.state);
            actions.push(t.action);
            rewards.push(t.reward);
            next_states.extend_from_slice(&t.next_state);
            dones.push(if t.done { 1.0 } else { 0.0 });
            weights.push(weight);
            slots.push(slot);
        }

        Some(PerBatch { states, actions, rewards, next_states, dones, weights, slots, beta })
    }

    /// Update sampled slots' priorities from their absolute TD errors:
    /// `p = (|delta| + epsilon)^alpha`.
    pub fn update_priorities(&mut self, slots: &[usize], td_errors: &[f32]) {
        debug_assert_eq!(slots.len(), td_errors.len(), "slots/td_errors length mismatch");

        for (&slot, &delta) in slots.iter().zip(td_errors) {
            let priority = (delta.abs() as f64 + self.config.epsilon).powf(self.config.alpha);
            self.tree.update(slot, priority);
            if priority > self.max_assigned {
                self.max_assigned = priority;
            }
        }
    }

    /// Priority statistics at step `frame`, for metrics logging.
    pub fn stats(&self, frame: u64) -> ReplayStats {
        ReplayStats {
            beta: self.beta.value(frame),
            mean_priority: self.tree.mean_priority(),
            max_priority: self.tree.max_priority(),
        }
    }
}
