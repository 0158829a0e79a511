//! Training loop
//!
//! The trainer owns the agent, replay memory, and metrics sinks, and
//! drives episodes against any environment producing stacked byte states.
//! Each run gets a timestamped directory under the configured output root:
//!
//! ```text
//! runs/exp_20250807_153000/
//!   data/episode_data.jsonl
//!   data/per_data.jsonl
//!   tensorboard/
//!   models/episode_000500/
//!   models/final/
//! ```

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};

use crate::agent::DqnAgent;
use crate::env::{Environment, SpaceType};
use crate::logger::{PerRecord, RunLogger};
use crate::memory::{PrioritizedReplay, Transition};
use crate::monitor::MemoryMonitor;
use crate::train::config::TrainConfig;
use crate::train::stats::{EpisodeStats, TrainingSummary};
use crate::utils::mean;

/// DQN training loop over a preprocessed environment.
pub struct Trainer<E> {
    config: TrainConfig,
    env: E,
    agent: DqnAgent,
    memory: PrioritizedReplay,
    logger: RunLogger,
    monitor: MemoryMonitor,
    summary: TrainingSummary,
    run_dir: PathBuf,
    start_episode: usize,
    opt_steps: u64,
}

impl<E> Trainer<E>
where
    E: Environment<Observation = Vec<u8>, Action = i64>,
{
    /// Create a trainer and its run directory.
    ///
    /// The environment must produce states matching the configured frame
    /// stack and dimensions (i.e. be wrapped in
    /// [`crate::env::wrappers::PreprocessedEnv`]).
    pub fn new(config: TrainConfig, env: E) -> Result<Self> {
        config.validate()?;

        let n_actions = match env.action_space().dtype {
            SpaceType::Discrete(n) => n,
            other => return Err(anyhow!("expected a discrete action space, got {other:?}")),
        };

        let expected_shape =
            vec![config.frame_stack, config.frame_height, config.frame_width];
        let obs_shape = env.observation_space().shape;
        if obs_shape != expected_shape {
            return Err(anyhow!(
                "environment produces {obs_shape:?} states but the config expects {expected_shape:?}; \
                 wrap the env in PreprocessedEnv with matching parameters"
            ));
        }

        let run_dir = config
            .output_dir
            .join(format!("exp_{}", Local::now().format("%Y%m%d_%H%M%S")));
        let logger = RunLogger::create(&run_dir)
            .with_context(|| format!("creating run directory {}", run_dir.display()))?;

        let agent = DqnAgent::new(config.agent_config(n_actions))?;
        let memory = PrioritizedReplay::new(config.per_config())?;
        let monitor = MemoryMonitor::new(config.memory_threshold_percent);

        tracing::info!(run_dir = %run_dir.display(), game = %config.game, "trainer ready");

        Ok(Self {
            config,
            env,
            agent,
            memory,
            logger,
            monitor,
            summary: TrainingSummary::new(),
            run_dir,
            start_episode: 0,
            opt_steps: 0,
        })
    }

    /// Directory holding this run's output.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// The agent being trained.
    pub fn agent(&self) -> &DqnAgent {
        &self.agent
    }

    /// Aggregates over the episodes run so far.
    pub fn summary(&self) -> &TrainingSummary {
        &self.summary
    }

    /// Resume from a checkpoint written by a previous run.
    ///
    /// Restores network weights and the step counter; training continues
    /// from the checkpoint's episode index.
    pub fn resume_from(&mut self, checkpoint: &Path) -> Result<()> {
        let meta = self.agent.load(checkpoint)?;
        self.start_episode = meta.episode;
        tracing::info!(
            episode = meta.episode,
            steps = meta.steps_done,
            "resuming from checkpoint"
        );
        Ok(())
    }

    /// Train until the configured episode count, returning the final
    /// aggregates. A final checkpoint lands in `models/final/`.
    pub fn run(&mut self) -> Result<TrainingSummary> {
        let total = self.config.training_episodes;
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{bar:40.cyan/blue} {pos}/{len} episodes {msg}",
            )?
            .progress_chars("=>-"),
        );
        bar.set_position(self.start_episode as u64);

        for episode in (self.start_episode + 1)..=total {
            let stats = self.run_episode(episode)?;

            self.logger.log_episode(&stats.record())?;
            self.summary.update(&stats);
            self.monitor.check();

            bar.set_message(format!(
                "reward {:.1} (avg {:.1}) eps {:.3}",
                stats.reward,
                self.summary.recent_avg_reward(),
                stats.epsilon
            ));
            bar.inc(1);

            if episode % self.config.eval_frequency == 0 {
                let mean_reward = self.evaluate(self.config.eval_episodes)?;
                self.logger.log_eval(episode, mean_reward);
                tracing::info!(episode, mean_reward, "greedy evaluation");
            }

            if episode % self.config.checkpoint_interval == 0 {
                let dir = self.run_dir.join("models").join(format!("episode_{episode:06}"));
                self.agent.save(&dir, episode, self.summary.best_reward())?;
            }
        }

        let final_dir = self.run_dir.join("models").join("final");
        self.agent.save(&final_dir, total, self.summary.best_reward())?;
        self.logger.flush()?;
        bar.finish_with_message("done");

        tracing::info!(
            episodes = self.summary.episodes(),
            steps = self.summary.total_steps(),
            best_reward = self.summary.best_reward(),
            "training finished"
        );
        Ok(self.summary.clone())
    }

    fn run_episode(&mut self, episode: usize) -> Result<EpisodeStats> {
        let mut state = self.env.reset()?;
        let mut reward = 0.0_f32;
        let mut steps = 0_u64;
        let mut losses = Vec::new();

        loop {
            let action = self.agent.select_action(&state, false);
            let step = self.env.step(action)?;
            let done = step.done();

            self.memory.push(Transition {
                state: state.clone(),
                action,
                reward: step.reward,
                next_state: step.observation.clone(),
                done,
            });
            state = step.observation;
            reward += step.reward;
            steps += 1;

            let global = self.agent.steps_done();
            if self.memory.len() >= self.config.learning_starts
                && global % self.config.update_frequency == 0
            {
                if let Some(stats) = self.agent.optimize(&mut self.memory, self.config.batch_size)? {
                    losses.push(stats.loss as f32);
                    self.opt_steps += 1;

                    if self.opt_steps % self.config.per_log_frequency == 0 {
                        let replay = self.memory.stats(global);
                        self.logger.log_per(&PerRecord {
                            step: global,
                            beta: stats.beta,
                            mean_priority: replay.mean_priority,
                            max_priority: replay.max_priority,
                            mean_td_error: stats.mean_td_error,
                            mean_is_weight: stats.mean_is_weight,
                        })?;
                    }
                }
            }

            if self.agent.should_sync_target() {
                self.agent.sync_target()?;
            }

            if done {
                break;
            }
        }

        let loss = if losses.is_empty() { None } else { Some(mean(&losses) as f64) };
        Ok(EpisodeStats { episode, reward, steps, loss, epsilon: self.agent.epsilon() })
    }

    /// Run `episodes` greedy episodes and return the mean reward.
    ///
    /// Leaves the step counter and replay memory untouched.
    pub fn evaluate(&mut self, episodes: usize) -> Result<f32> {
        let mut total = 0.0_f32;
        for _ in 0..episodes {
            let mut state = self.env.reset()?;
            loop {
                let action = self.agent.select_action(&state, true);
                let step = self.env.step(action)?;
                total += step.reward;
                state = step.observation;
                if step.done() {
                    break;
                }
            }
        }
        Ok(total / episodes.max(1) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{SpaceInfo, StepResult};
    use rand::Rng;

    /// Byte-state environment with fixed-length episodes; the reward for
    /// action 1 is higher, so a learning agent drifts toward it.
    struct ByteStates {
        state_len: usize,
        episode_len: usize,
        steps: usize,
        n_actions: usize,
    }

    impl ByteStates {
        fn new(state_len: usize, episode_len: usize) -> Self {
            Self { state_len, episode_len, steps: 0, n_actions: 3 }
        }

        fn observation(&self) -> Vec<u8> {
            let mut rng = rand::thread_rng();
            (0..self.state_len).map(|_| rng.gen()).collect()
        }
    }

    impl Environment for ByteStates {
        type Observation = Vec<u8>;
        type Action = i64;

        fn reset(&mut self) -> Result<Vec<u8>> {
            self.steps = 0;
            Ok(self.observation())
        }

        fn step(&mut self, action: i64) -> Result<StepResult<Vec<u8>>> {
            self.steps += 1;
            Ok(StepResult {
                observation: self.observation(),
                reward: if action == 1 { 1.0 } else { 0.0 },
                terminated: self.steps >= self.episode_len,
                truncated: false,
            })
        }

        fn observation_space(&self) -> SpaceInfo {
            SpaceInfo { shape: vec![2, 16, 16], dtype: SpaceType::Continuous }
        }

        fn action_space(&self) -> SpaceInfo {
            SpaceInfo { shape: vec![1], dtype: SpaceType::Discrete(self.n_actions) }
        }
    }

    fn tiny_config(output_dir: &Path) -> TrainConfig {
        TrainConfig::new()
            .training_episodes(3)
            .batch_size(8)
            .memory_capacity(256)
            .learning_starts(8)
            .output_dir(output_dir)
            .epsilon_decay(100.0)
            .with_frames(2, 16, 16)
    }

    impl TrainConfig {
        fn with_frames(mut self, stack: usize, height: usize, width: usize) -> Self {
            self.frame_stack = stack;
            self.frame_height = height;
            self.frame_width = width;
            self.conv_layers = 1;
            self.fc_size = 32;
            self.checkpoint_interval = 2;
            self.eval_frequency = 2;
            self.eval_episodes = 1;
            self
        }
    }

    #[test]
    fn test_rejects_mismatched_observation_shape() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = tiny_config(dir.path());
        config.frame_stack = 4; // env produces 2-frame states

        let err = Trainer::new(config, ByteStates::new(2 * 16 * 16, 10)).unwrap_err();
        assert!(err.to_string().contains("PreprocessedEnv"));
    }

    #[test]
    fn test_short_run_produces_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_config(dir.path());

        let mut trainer = Trainer::new(config, ByteStates::new(2 * 16 * 16, 12)).unwrap();
        let summary = trainer.run().unwrap();

        assert_eq!(summary.episodes(), 3);
        assert_eq!(summary.total_steps(), 3 * 12);

        let run_dir = trainer.run_dir().to_path_buf();
        assert!(run_dir.join("data/episode_data.jsonl").exists());
        assert!(run_dir.join("models/final/policy.safetensors").exists());
        assert!(run_dir.join("models/final/meta.json").exists());
        assert!(run_dir.join("models/episode_000002").exists());

        let records =
            crate::logger::load_episode_records(&run_dir.join("data/episode_data.jsonl")).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].episode, 1);
        assert_eq!(records[0].steps, 12);
        // Warm-up passed after the first episode, so later episodes have a loss
        assert!(records[2].loss.is_some());
    }

    #[test]
    fn test_evaluate_leaves_counters_alone() {
        let dir = tempfile::tempdir().unwrap();
        let config = tiny_config(dir.path());

        let mut trainer = Trainer::new(config, ByteStates::new(2 * 16 * 16, 5)).unwrap();
        let before = trainer.agent().steps_done();
        let mean_reward = trainer.evaluate(2).unwrap();

        assert!(mean_reward >= 0.0);
        assert_eq!(trainer.agent().steps_done(), before);
        assert_eq!(trainer.summary().episodes(), 0);
    }
}
