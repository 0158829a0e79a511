//! DQN agent
//!
//! Pairs a policy Q-network with a target Q-network, selects actions
//! epsilon-greedily with an exponentially decaying epsilon, and optimizes
//! the policy network on importance-weighted TD errors sampled from
//! prioritized replay. The target network is synced from the policy
//! network on a fixed step cadence.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tch::nn::{self, Module, OptimizerConfig};
use tch::{Device, Reduction, Tensor};

use crate::agent::network::{QNetwork, QNetworkConfig};
use crate::env::wrappers::{state_to_tensor, states_to_tensor};
use crate::memory::PrioritizedReplay;
use crate::utils::ExponentialDecay;

/// Agent hyperparameters.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Adam learning rate
    pub learning_rate: f64,
    /// Discount factor
    pub gamma: f64,
    /// Initial exploration rate
    pub epsilon_start: f64,
    /// Final exploration rate
    pub epsilon_end: f64,
    /// Exploration decay time constant, in steps
    pub epsilon_decay: f64,
    /// Steps between target-network syncs
    pub target_update_frequency: u64,
    /// Gradient-norm clip threshold
    pub grad_clip_norm: f64,
    /// Number of stacked frames per state
    pub frame_stack: usize,
    /// Processed frame height
    pub frame_height: usize,
    /// Processed frame width
    pub frame_width: usize,
    /// Number of discrete actions
    pub n_actions: usize,
    /// Network architecture
    pub network: QNetworkConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-4,
            gamma: 0.99,
            epsilon_start: 1.0,
            epsilon_end: 0.1,
            epsilon_decay: 100_000.0,
            target_update_frequency: 10_000,
            grad_clip_norm: 10.0,
            frame_stack: 4,
            frame_height: 84,
            frame_width: 84,
            n_actions: 18,
            network: QNetworkConfig::default(),
        }
    }
}

/// Diagnostics from one optimization step.
#[derive(Debug, Clone, Copy)]
pub struct OptimizeStats {
    /// Importance-weighted smooth-L1 loss
    pub loss: f64,
    /// Mean absolute TD error of the batch
    pub mean_td_error: f64,
    /// Mean importance-sampling weight of the batch
    pub mean_is_weight: f64,
    /// Beta used for the batch weights
    pub beta: f64,
}

/// Checkpoint sidecar data.
///
/// The variable stores hold the network weights; everything else needed to
/// resume training lands here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Global environment steps taken when the checkpoint was written
    pub steps_done: u64,
    /// Episodes completed when the checkpoint was written
    pub episode: usize,
    /// Best episode reward observed so far
    pub best_reward: f32,
    /// Local timestamp of the save
    pub saved_at: String,
}

/// DQN agent with policy and target networks.
pub struct DqnAgent {
    config: AgentConfig,
    vs_policy: nn::VarStore,
    vs_target: nn::VarStore,
    policy_net: QNetwork,
    target_net: QNetwork,
    optimizer: nn::Optimizer,
    epsilon: ExponentialDecay,
    device: Device,
    steps_done: u64,
}

impl DqnAgent {
    /// Create a new agent on the best available device.
    pub fn new(config: AgentConfig) -> Result<Self> {
        Self::with_device(config, Device::cuda_if_available())
    }

    /// Create a new agent on an explicit device.
    pub fn with_device(config: AgentConfig, device: Device) -> Result<Self> {
        tracing::info!(?device, "DqnAgent using device");

        let vs_policy = nn::VarStore::new(device);
        let policy_net = QNetwork::new(
            &vs_policy.root(),
            config.frame_stack as i64,
            config.frame_height as i64,
            config.frame_width as i64,
            config.n_actions as i64,
            config.network,
        )?;

        let mut vs_target = nn::VarStore::new(device);
        let target_net = QNetwork::new(
            &vs_target.root(),
            config.frame_stack as i64,
            config.frame_height as i64,
            config.frame_width as i64,
            config.n_actions as i64,
            config.network,
        )?;
        vs_target.copy(&vs_policy)?;
        vs_target.freeze();

        let optimizer = nn::Adam::default()
            .build(&vs_policy, config.learning_rate)
            .context("building Adam optimizer")?;

        let epsilon =
            ExponentialDecay::new(config.epsilon_start, config.epsilon_end, config.epsilon_decay);

        Ok(Self {
            config,
            vs_policy,
            vs_target,
            policy_net,
            target_net,
            optimizer,
            epsilon,
            device,
            steps_done: 0,
        })
    }

    /// Agent hyperparameters.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Device the networks live on.
    pub fn device(&self) -> Device {
        self.device
    }

    /// Global environment steps taken while training.
    pub fn steps_done(&self) -> u64 {
        self.steps_done
    }

    /// Current exploration rate.
    pub fn epsilon(&self) -> f64 {
        self.epsilon.value(self.steps_done)
    }

    /// Pick an action for `state`.
    ///
    /// During training the choice is epsilon-greedy and the step counter
    /// advances; with `evaluate` set the policy is purely greedy and the
    /// counter is left alone.
    pub fn select_action(&mut self, state: &[u8], evaluate: bool) -> i64 {
        let epsilon = if evaluate {
            0.0
        } else {
            let eps = self.epsilon();
            self.steps_done += 1;
            eps
        };

        let mut rng = rand::thread_rng();
        if rng.gen::<f64>() < epsilon {
            return rng.gen_range(0..self.config.n_actions as i64);
        }

        tch::no_grad(|| {
            let input = state_to_tensor(
                state,
                self.config.frame_stack,
                self.config.frame_height,
                self.config.frame_width,
                self.device,
            )
            .unsqueeze(0);
            let q_values = self.policy_net.forward(&input);
            q_values.argmax(1, false).int64_value(&[])
        })
    }

    /// Whether the target network is due for a sync.
    ///
    /// True exactly when `steps_done` is a positive multiple of the update
    /// frequency, so the cadence is stable across checkpoint resumes.
    pub fn should_sync_target(&self) -> bool {
        self.steps_done > 0 && self.steps_done % self.config.target_update_frequency == 0
    }

    /// Copy policy-network weights into the target network.
    pub fn sync_target(&mut self) -> Result<()> {
        self.vs_target.copy(&self.vs_policy)?;
        tracing::debug!(steps = self.steps_done, "target network synced");
        Ok(())
    }

    /// Run one optimization step over a prioritized batch.
    ///
    /// Returns `None` when the memory does not yet hold `batch_size`
    /// transitions. Sampled slots' priorities are updated from the batch's
    /// absolute TD errors before the gradient step.
    pub fn optimize(
        &mut self,
        memory: &mut PrioritizedReplay,
        batch_size: usize,
    ) -> Result<Option<OptimizeStats>> {
        let batch = match memory.sample(batch_size, self.steps_done) {
            Some(batch) => batch,
            None => return Ok(None),
        };

        let n = batch.len();
        let (stack, h, w) =
            (self.config.frame_stack, self.config.frame_height, self.config.frame_width);

        let states = states_to_tensor(&batch.states, n, stack, h, w, self.device);
        let next_states = states_to_tensor(&batch.next_states, n, stack, h, w, self.device);
        let actions = Tensor::from_slice(&batch.actions).to_device(self.device).view([-1, 1]);
        let rewards = Tensor::from_slice(&batch.rewards).to_device(self.device);
        let dones = Tensor::from_slice(&batch.dones).to_device(self.device);
        let weights = Tensor::from_slice(&batch.weights).to_device(self.device);

        // Q(s, a) for the actions actually taken
        let q_values = self.policy_net.forward(&states).gather(1, &actions, false);

        // max_a Q'(s', a) from the frozen target network
        let next_q = tch::no_grad(|| self.target_net.forward(&next_states).max_dim(1, false).0);

        // Target: r + gamma * max_a Q'(s', a), truncated at episode ends
        let expected = (rewards + self.config.gamma * next_q * (1.0 - dones)).unsqueeze(1);

        // Absolute TD errors drive the replay priorities
        let td_errors: Vec<f32> = Vec::try_from((&expected - &q_values).detach().view([-1]))
            .context("extracting TD errors")?;
        memory.update_priorities(&batch.slots, &td_errors);

        let loss = (weights.unsqueeze(1)
            * q_values.smooth_l1_loss(&expected, Reduction::None, 1.0))
        .mean(tch::Kind::Float);
        let loss_val: f64 = f64::try_from(&loss).unwrap_or(0.0);

        self.optimizer.zero_grad();
        loss.backward();
        self.optimizer.clip_grad_norm(self.config.grad_clip_norm);
        self.optimizer.step();

        let mean_td_error =
            td_errors.iter().map(|&e| e.abs() as f64).sum::<f64>() / td_errors.len() as f64;

        Ok(Some(OptimizeStats {
            loss: loss_val,
            mean_td_error,
            mean_is_weight: batch.mean_weight(),
            beta: batch.beta,
        }))
    }

    /// Save a checkpoint to `dir`: both variable stores plus a JSON
    /// sidecar with the training counters. Creates `dir` if needed.
    pub fn save(&self, dir: &Path, episode: usize, best_reward: f32) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating checkpoint dir {}", dir.display()))?;

        self.vs_policy.save(dir.join("policy.safetensors"))?;
        self.vs_target.save(dir.join("target.safetensors"))?;

        let meta = CheckpointMeta {
            steps_done: self.steps_done,
            episode,
            best_reward,
            saved_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        let file = std::fs::File::create(dir.join("meta.json"))?;
        serde_json::to_writer_pretty(file, &meta)?;

        tracing::info!(dir = %dir.display(), steps = self.steps_done, "checkpoint saved");
        Ok(())
    }

    /// Load a checkpoint from `dir`, restoring weights and the step
    /// counter so epsilon decay and the target-sync cadence resume
    /// where they left off.
    pub fn load(&mut self, dir: &Path) -> Result<CheckpointMeta> {
        self.vs_policy
            .load(dir.join("policy.safetensors"))
            .with_context(|| format!("loading policy weights from {}", dir.display()))?;
        self.vs_target.load(dir.join("target.safetensors"))?;

        let file = std::fs::File::open(dir.join("meta.json"))
            .with_context(|| format!("opening {}/meta.json", dir.display()))?;
        let meta: CheckpointMeta = serde_json::from_reader(file)?;
        self.steps_done = meta.steps_done;

        tracing::info!(dir = %dir.display(), steps = self.steps_done, "checkpoint loaded");
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{PerConfig, Transition};

    fn small_config() -> AgentConfig {
        AgentConfig {
            learning_rate: 1e-3,
            frame_stack: 2,
            frame_height: 16,
            frame_width: 16,
            n_actions: 4,
            network: QNetworkConfig { conv_layers: 1, fc_size: 32 },
            target_update_frequency: 10,
            ..Default::default()
        }
    }

    fn small_agent() -> DqnAgent {
        DqnAgent::with_device(small_config(), Device::Cpu).unwrap()
    }

    fn random_transition(rng: &mut impl Rng, state_len: usize) -> Transition {
        Transition {
            state: (0..state_len).map(|_| rng.gen()).collect(),
            action: rng.gen_range(0..4),
            reward: rng.gen_range(-1.0..1.0),
            next_state: (0..state_len).map(|_| rng.gen()).collect(),
            done: rng.gen_bool(0.1),
        }
    }

    #[test]
    fn test_select_action_in_range() {
        let mut agent = small_agent();
        let state = vec![0u8; 2 * 16 * 16];

        for _ in 0..20 {
            let action = agent.select_action(&state, false);
            assert!((0..4).contains(&action));
        }
        assert_eq!(agent.steps_done(), 20);
    }

    #[test]
    fn test_evaluation_is_greedy_and_counter_free() {
        let mut agent = small_agent();
        let state = vec![7u8; 2 * 16 * 16];

        let first = agent.select_action(&state, true);
        for _ in 0..5 {
            assert_eq!(agent.select_action(&state, true), first);
        }
        assert_eq!(agent.steps_done(), 0);
    }

    #[test]
    fn test_epsilon_decays_with_steps() {
        let mut agent = small_agent();
        let state = vec![0u8; 2 * 16 * 16];

        let initial = agent.epsilon();
        for _ in 0..1000 {
            agent.select_action(&state, false);
        }
        assert!(agent.epsilon() < initial);
        assert!(agent.epsilon() >= agent.config().epsilon_end);
    }

    #[test]
    fn test_target_sync_cadence() {
        let mut agent = small_agent();
        let state = vec![0u8; 2 * 16 * 16];

        assert!(!agent.should_sync_target());
        for _ in 0..10 {
            agent.select_action(&state, false);
        }
        assert!(agent.should_sync_target());
        agent.select_action(&state, false);
        assert!(!agent.should_sync_target());
    }

    #[test]
    fn test_optimize_waits_for_batch() {
        let mut agent = small_agent();
        let mut memory =
            PrioritizedReplay::new(PerConfig { capacity: 64, ..Default::default() }).unwrap();

        assert!(agent.optimize(&mut memory, 8).unwrap().is_none());

        let mut rng = rand::thread_rng();
        for _ in 0..16 {
            memory.push(random_transition(&mut rng, 2 * 16 * 16));
        }
        let stats = agent.optimize(&mut memory, 8).unwrap().unwrap();
        assert!(stats.loss.is_finite());
        assert!(stats.mean_td_error >= 0.0);
        assert!(stats.mean_is_weight > 0.0);
    }

    #[test]
    fn test_optimize_reduces_loss_on_fixed_batch() {
        let mut agent = small_agent();
        let mut memory =
            PrioritizedReplay::new(PerConfig { capacity: 64, alpha: 0.0, ..Default::default() })
                .unwrap();

        let mut rng = rand::thread_rng();
        for _ in 0..32 {
            memory.push(random_transition(&mut rng, 2 * 16 * 16));
        }

        let first = agent.optimize(&mut memory, 32).unwrap().unwrap();
        let mut last = first;
        for _ in 0..30 {
            last = agent.optimize(&mut memory, 32).unwrap().unwrap();
        }
        assert!(
            last.loss < first.loss,
            "loss did not decrease: {} -> {}",
            first.loss,
            last.loss
        );
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt");

        let mut agent = small_agent();
        let state = vec![3u8; 2 * 16 * 16];
        for _ in 0..42 {
            agent.select_action(&state, false);
        }
        agent.save(&path, 7, 12.5).unwrap();

        let mut restored = DqnAgent::with_device(small_config(), Device::Cpu).unwrap();
        let meta = restored.load(&path).unwrap();

        assert_eq!(meta.steps_done, 42);
        assert_eq!(meta.episode, 7);
        assert_eq!(restored.steps_done(), 42);

        // Greedy decisions agree after weight restore
        assert_eq!(agent.select_action(&state, true), restored.select_action(&state, true));
    }
}
