//! Training configuration and hyperparameters
//!
//! One struct holds every knob of a run. Defaults are the values that
//! work for Ice Hockey on a single GPU; the builder methods exist for the
//! handful of knobs that are commonly swept.

use std::path::PathBuf;

use anyhow::{anyhow, Result};

use crate::agent::{AgentConfig, QNetworkConfig};
use crate::env::wrappers::PreprocessConfig;
use crate::memory::PerConfig;

/// Configuration for a training run.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// Gymnasium environment id
    pub game: String,

    /// Episodes to train for
    pub training_episodes: usize,

    /// Adam learning rate
    pub learning_rate: f64,

    /// Discount factor (gamma)
    pub gamma: f64,

    /// Minibatch size per optimization step
    pub batch_size: usize,

    /// Replay memory capacity in transitions
    pub memory_capacity: usize,

    /// Stored transitions required before optimization begins
    pub learning_starts: usize,

    /// Environment steps between optimization steps
    pub update_frequency: u64,

    /// Environment steps between target-network syncs
    pub target_update_frequency: u64,

    /// Initial exploration rate
    pub epsilon_start: f64,

    /// Final exploration rate
    pub epsilon_end: f64,

    /// Exploration decay time constant, in steps
    pub epsilon_decay: f64,

    /// Gradient-norm clip threshold
    pub grad_clip_norm: f64,

    /// Replay priority exponent; 0 recovers uniform replay
    pub per_alpha: f64,

    /// Initial importance-sampling exponent
    pub per_beta_start: f64,

    /// Steps over which beta anneals to 1
    pub per_beta_frames: u64,

    /// Additive constant keeping priorities positive
    pub per_epsilon: f64,

    /// Optimization steps between replay-metric log records
    pub per_log_frequency: u64,

    /// Width of processed frames
    pub frame_width: usize,

    /// Height of processed frames
    pub frame_height: usize,

    /// Frames stacked into one state
    pub frame_stack: usize,

    /// Emulator steps per agent action
    pub frame_skip: usize,

    /// Upper bound on random no-ops after reset
    pub noop_max: usize,

    /// Convolutional layers in the Q-network (1 to 3)
    pub conv_layers: usize,

    /// Width of the fully-connected layer
    pub fc_size: i64,

    /// Episodes between greedy evaluations
    pub eval_frequency: usize,

    /// Episodes per greedy evaluation
    pub eval_episodes: usize,

    /// Episodes between checkpoints
    pub checkpoint_interval: usize,

    /// Warn when system memory usage exceeds this percentage
    pub memory_threshold_percent: f64,

    /// Root directory for run output (checkpoints, data, tensorboard)
    pub output_dir: PathBuf,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            game: "ALE/IceHockey-v5".to_string(),
            training_episodes: 5_000,
            learning_rate: 1e-4,
            gamma: 0.99,
            batch_size: 32,
            memory_capacity: 100_000,
            learning_starts: 20_000,
            update_frequency: 4,
            target_update_frequency: 10_000,
            epsilon_start: 1.0,
            epsilon_end: 0.1,
            epsilon_decay: 100_000.0,
            grad_clip_norm: 10.0,
            per_alpha: 0.6,
            per_beta_start: 0.4,
            per_beta_frames: 1_000_000,
            per_epsilon: 1e-6,
            per_log_frequency: 1_000,
            frame_width: 84,
            frame_height: 84,
            frame_stack: 4,
            frame_skip: 4,
            noop_max: 30,
            conv_layers: 3,
            fc_size: 512,
            eval_frequency: 100,
            eval_episodes: 5,
            checkpoint_interval: 500,
            memory_threshold_percent: 90.0,
            output_dir: PathBuf::from("runs"),
        }
    }
}

impl TrainConfig {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<()> {
        if self.game.is_empty() {
            return Err(anyhow!("game must not be empty"));
        }
        if self.training_episodes == 0 {
            return Err(anyhow!("training_episodes must be positive"));
        }
        if self.learning_rate <= 0.0 {
            return Err(anyhow!("learning_rate must be positive"));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(anyhow!("gamma must be in [0, 1]"));
        }
        if self.batch_size == 0 {
            return Err(anyhow!("batch_size must be positive"));
        }
        if self.memory_capacity < self.batch_size {
            return Err(anyhow!("memory_capacity must be at least batch_size"));
        }
        if self.learning_starts < self.batch_size {
            return Err(anyhow!("learning_starts must be at least batch_size"));
        }
        if self.learning_starts > self.memory_capacity {
            return Err(anyhow!("learning_starts must not exceed memory_capacity"));
        }
        if self.update_frequency == 0 {
            return Err(anyhow!("update_frequency must be positive"));
        }
        if self.target_update_frequency == 0 {
            return Err(anyhow!("target_update_frequency must be positive"));
        }
        if !(0.0..=1.0).contains(&self.epsilon_start)
            || !(0.0..=1.0).contains(&self.epsilon_end)
        {
            return Err(anyhow!("epsilon bounds must be in [0, 1]"));
        }
        if self.epsilon_end > self.epsilon_start {
            return Err(anyhow!("epsilon_end must not exceed epsilon_start"));
        }
        if self.epsilon_decay <= 0.0 {
            return Err(anyhow!("epsilon_decay must be positive"));
        }
        if self.grad_clip_norm <= 0.0 {
            return Err(anyhow!("grad_clip_norm must be positive"));
        }
        if self.eval_frequency == 0 || self.eval_episodes == 0 {
            return Err(anyhow!("eval_frequency and eval_episodes must be positive"));
        }
        if self.checkpoint_interval == 0 {
            return Err(anyhow!("checkpoint_interval must be positive"));
        }
        if !(0.0..=100.0).contains(&self.memory_threshold_percent) {
            return Err(anyhow!("memory_threshold_percent must be in [0, 100]"));
        }
        self.per_config().validate()?;
        self.preprocess_config().validate()?;
        self.network_config().validate()?;
        Ok(())
    }

    /// Set the gymnasium environment id.
    pub fn game(mut self, game: &str) -> Self {
        self.game = game.to_string();
        self
    }

    /// Set the number of training episodes.
    pub fn training_episodes(mut self, episodes: usize) -> Self {
        self.training_episodes = episodes;
        self
    }

    /// Set the learning rate.
    pub fn learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    /// Set the discount factor.
    pub fn gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }

    /// Set the minibatch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the replay memory capacity.
    pub fn memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = capacity;
        self
    }

    /// Set the replay warm-up size.
    pub fn learning_starts(mut self, transitions: usize) -> Self {
        self.learning_starts = transitions;
        self
    }

    /// Set the replay priority exponent.
    pub fn per_alpha(mut self, alpha: f64) -> Self {
        self.per_alpha = alpha;
        self
    }

    /// Set the exploration decay time constant.
    pub fn epsilon_decay(mut self, decay: f64) -> Self {
        self.epsilon_decay = decay;
        self
    }

    /// Set the target-network sync cadence.
    pub fn target_update_frequency(mut self, steps: u64) -> Self {
        self.target_update_frequency = steps;
        self
    }

    /// Set the run output directory.
    pub fn output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Agent hyperparameters for an environment with `n_actions` actions.
    pub fn agent_config(&self, n_actions: usize) -> AgentConfig {
        AgentConfig {
            learning_rate: self.learning_rate,
            gamma: self.gamma,
            epsilon_start: self.epsilon_start,
            epsilon_end: self.epsilon_end,
            epsilon_decay: self.epsilon_decay,
            target_update_frequency: self.target_update_frequency,
            grad_clip_norm: self.grad_clip_norm,
            frame_stack: self.frame_stack,
            frame_height: self.frame_height,
            frame_width: self.frame_width,
            n_actions,
            network: self.network_config(),
        }
    }

    /// Replay memory parameters.
    pub fn per_config(&self) -> PerConfig {
        PerConfig {
            capacity: self.memory_capacity,
            alpha: self.per_alpha,
            beta_start: self.per_beta_start,
            beta_frames: self.per_beta_frames,
            epsilon: self.per_epsilon,
            default_priority: 1.0,
        }
    }

    /// Frame preprocessing parameters.
    pub fn preprocess_config(&self) -> PreprocessConfig {
        PreprocessConfig {
            frame_width: self.frame_width,
            frame_height: self.frame_height,
            frame_stack: self.frame_stack,
            frame_skip: self.frame_skip,
            noop_max: self.noop_max,
        }
    }

    /// Q-network architecture parameters.
    pub fn network_config(&self) -> QNetworkConfig {
        QNetworkConfig { conv_layers: self.conv_layers, fc_size: self.fc_size }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TrainConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.game, "ALE/IceHockey-v5");
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.frame_stack, 4);
    }

    #[test]
    fn test_config_validation() {
        assert!(TrainConfig::new().learning_rate(-1.0).validate().is_err());
        assert!(TrainConfig::new().gamma(1.5).validate().is_err());
        assert!(TrainConfig::new().batch_size(0).validate().is_err());
        assert!(TrainConfig::new().training_episodes(0).validate().is_err());

        // Warm-up must fit the memory
        let config = TrainConfig::new().memory_capacity(1_000).learning_starts(2_000);
        assert!(config.validate().is_err());

        // alpha = 0 (uniform replay) is valid
        assert!(TrainConfig::new().per_alpha(0.0).validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = TrainConfig::new()
            .game("ALE/Pong-v5")
            .training_episodes(100)
            .learning_rate(1e-3)
            .batch_size(64);

        assert_eq!(config.game, "ALE/Pong-v5");
        assert_eq!(config.training_episodes, 100);
        assert_eq!(config.learning_rate, 1e-3);
        assert_eq!(config.batch_size, 64);

        // Other values stay at defaults
        assert_eq!(config.gamma, 0.99);
        assert_eq!(config.memory_capacity, 100_000);
    }

    #[test]
    fn test_derived_configs_are_consistent() {
        let config = TrainConfig::new();
        let agent = config.agent_config(18);

        assert_eq!(agent.n_actions, 18);
        assert_eq!(agent.frame_stack, config.frame_stack);
        assert_eq!(config.per_config().capacity, config.memory_capacity);
        assert_eq!(
            config.preprocess_config().state_len(),
            config.frame_stack * config.frame_height * config.frame_width
        );
    }
}
