//! End-to-end training over a synthetic frame source
//!
//! Runs the full pipeline - preprocessing, replay, optimization, logging,
//! checkpointing - against a deterministic in-process "game", then resumes
//! from the final checkpoint and confirms the counters survive.

use anyhow::Result;
use puck_rl::env::atari::Frame;
use puck_rl::env::wrappers::PreprocessedEnv;
use puck_rl::env::{Environment, SpaceInfo, SpaceType, StepResult};
use puck_rl::train::{TrainConfig, Trainer};

const HEIGHT: usize = 24;
const WIDTH: usize = 24;

/// Minimal frame-producing game: a brightness gradient that advances with
/// the step count, four actions, fixed-length episodes.
struct MiniGame {
    steps: usize,
    episode_len: usize,
}

impl MiniGame {
    fn new(episode_len: usize) -> Self {
        Self { steps: 0, episode_len }
    }

    fn frame(&self) -> Frame {
        let shade = ((self.steps * 13) % 256) as u8;
        Frame { data: vec![shade; HEIGHT * WIDTH * 3], height: HEIGHT, width: WIDTH }
    }
}

impl Environment for MiniGame {
    type Observation = Frame;
    type Action = i64;

    fn reset(&mut self) -> Result<Frame> {
        self.steps = 0;
        Ok(self.frame())
    }

    fn step(&mut self, action: i64) -> Result<StepResult<Frame>> {
        self.steps += 1;
        Ok(StepResult {
            observation: self.frame(),
            reward: if action == 2 { 1.0 } else { 0.0 },
            terminated: self.steps >= self.episode_len,
            truncated: false,
        })
    }

    fn observation_space(&self) -> SpaceInfo {
        SpaceInfo { shape: vec![HEIGHT, WIDTH, 3], dtype: SpaceType::Continuous }
    }

    fn action_space(&self) -> SpaceInfo {
        SpaceInfo { shape: vec![1], dtype: SpaceType::Discrete(4) }
    }
}

fn tiny_config(output_dir: &std::path::Path) -> TrainConfig {
    let mut config = TrainConfig::new()
        .training_episodes(2)
        .batch_size(4)
        .memory_capacity(256)
        .learning_starts(4)
        .epsilon_decay(50.0)
        .output_dir(output_dir);
    config.frame_width = 12;
    config.frame_height = 12;
    config.frame_stack = 2;
    config.frame_skip = 2;
    config.noop_max = 3;
    config.conv_layers = 1;
    config.fc_size = 32;
    config.update_frequency = 2;
    config.eval_frequency = 2;
    config.eval_episodes = 1;
    config.checkpoint_interval = 1;
    config
}

fn preprocessed(config: &TrainConfig, episode_len: usize) -> PreprocessedEnv<MiniGame> {
    PreprocessedEnv::new(MiniGame::new(episode_len), config.preprocess_config())
}

#[test]
fn test_train_checkpoint_and_resume() {
    let dir = tempfile::tempdir().unwrap();
    let config = tiny_config(dir.path());

    let mut trainer = Trainer::new(config.clone(), preprocessed(&config, 10)).unwrap();
    let summary = trainer.run().unwrap();

    assert_eq!(summary.episodes(), 2);
    assert!(summary.total_steps() > 0);
    assert!(summary.best_reward().is_finite());

    let run_dir = trainer.run_dir().to_path_buf();
    assert!(run_dir.join("data/episode_data.jsonl").exists());
    assert!(run_dir.join("tensorboard").exists());
    let final_ckpt = run_dir.join("models/final");
    assert!(final_ckpt.join("policy.safetensors").exists());
    assert!(final_ckpt.join("target.safetensors").exists());

    // Resume into a fresh trainer: the step counter must carry over and
    // training must continue past the checkpointed episode.
    let config2 = tiny_config(dir.path()).training_episodes(4);
    let mut resumed = Trainer::new(config2.clone(), preprocessed(&config2, 10)).unwrap();
    resumed.resume_from(&final_ckpt).unwrap();
    assert!(resumed.agent().steps_done() > 0);

    let summary2 = resumed.run().unwrap();
    // Episodes 3 and 4 remain after resuming from episode 2
    assert_eq!(summary2.episodes(), 2);
}

#[test]
fn test_preprocessing_feeds_expected_state_shape() {
    let dir = tempfile::tempdir().unwrap();
    let config = tiny_config(dir.path());
    let mut env = preprocessed(&config, 10);

    let state = env.reset().unwrap();
    assert_eq!(state.len(), config.preprocess_config().state_len());

    let step = env.step(0).unwrap();
    assert_eq!(step.observation.len(), state.len());
}

#[test]
fn test_episode_records_are_replayable() {
    let dir = tempfile::tempdir().unwrap();
    let config = tiny_config(dir.path());

    let mut trainer = Trainer::new(config.clone(), preprocessed(&config, 8)).unwrap();
    trainer.run().unwrap();

    let report = puck_rl::report::RunReport::load(trainer.run_dir()).unwrap();
    assert_eq!(report.episodes().len(), 2);
    assert!(report.summary().max_reward.is_finite());
}
