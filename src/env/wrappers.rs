//! Frame preprocessing pipeline
//!
//! Standard DQN Atari preprocessing, applied on the Rust side:
//!
//! 1. no-op reset: a random number of no-op actions after `reset`, so
//!    episodes do not all start from the same emulator state;
//! 2. action repeat over `frame_skip` emulator steps, max-pooling the last
//!    two raw screens to undo sprite flicker;
//! 3. grayscale conversion and bilinear resize to 84x84;
//! 4. a stack of the most recent processed frames as the agent state.
//!
//! Processed frames stay as bytes until batch time; see
//! [`crate::memory::Transition`].

use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use rand::Rng;
use tch::{Device, Kind, Tensor};

use crate::env::atari::Frame;
use crate::env::{Environment, SpaceInfo, SpaceType, StepResult};

/// Preprocessing parameters.
#[derive(Debug, Clone, Copy)]
pub struct PreprocessConfig {
    /// Width of processed frames
    pub frame_width: usize,
    /// Height of processed frames
    pub frame_height: usize,
    /// Number of processed frames stacked into one state
    pub frame_stack: usize,
    /// Emulator steps per agent action
    pub frame_skip: usize,
    /// Upper bound on random no-op actions after reset
    pub noop_max: usize,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self { frame_width: 84, frame_height: 84, frame_stack: 4, frame_skip: 4, noop_max: 30 }
    }
}

impl PreprocessConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<()> {
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(anyhow!("frame dimensions must be positive"));
        }
        if self.frame_stack == 0 {
            return Err(anyhow!("frame_stack must be positive"));
        }
        if self.frame_skip == 0 {
            return Err(anyhow!("frame_skip must be positive"));
        }
        Ok(())
    }

    /// Length in bytes of one stacked state.
    pub fn state_len(&self) -> usize {
        self.frame_stack * self.frame_height * self.frame_width
    }
}

/// Environment wrapper producing stacked preprocessed states.
///
/// Wraps any environment that yields raw [`Frame`]s and discrete actions;
/// action 0 is assumed to be the no-op, as in ALE.
pub struct PreprocessedEnv<E> {
    env: E,
    config: PreprocessConfig,
    stack: VecDeque<Vec<u8>>,
}

impl<E> PreprocessedEnv<E>
where
    E: Environment<Observation = Frame, Action = i64>,
{
    /// Wrap `env` with the given preprocessing parameters.
    pub fn new(env: E, config: PreprocessConfig) -> Self {
        Self { env, config, stack: VecDeque::with_capacity(config.frame_stack) }
    }

    /// The wrapped environment.
    pub fn inner(&self) -> &E {
        &self.env
    }

    /// Preprocessing parameters in use.
    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Grayscale and resize one raw frame.
    fn process(&self, frame: &Frame) -> Vec<u8> {
        grayscale_resize(frame, self.config.frame_height, self.config.frame_width)
    }

    fn push_frame(&mut self, processed: Vec<u8>) {
        if self.stack.len() == self.config.frame_stack {
            self.stack.pop_front();
        }
        self.stack.push_back(processed);
    }

    fn state(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.config.state_len());
        for frame in &self.stack {
            out.extend_from_slice(frame);
        }
        out
    }
}

impl<E> Environment for PreprocessedEnv<E>
where
    E: Environment<Observation = Frame, Action = i64>,
{
    type Observation = Vec<u8>;
    type Action = i64;

    fn reset(&mut self) -> Result<Vec<u8>> {
        let mut frame = self.env.reset()?;

        // Random no-op prefix; restart if the emulator somehow ends the
        // episode during it
        let noops = if self.config.noop_max > 0 {
            rand::thread_rng().gen_range(0..=self.config.noop_max)
        } else {
            0
        };
        for _ in 0..noops {
            let step = self.env.step(0)?;
            frame = step.observation;
            if step.terminated || step.truncated {
                frame = self.env.reset()?;
            }
        }

        // Seed the whole stack with the first processed frame
        let processed = self.process(&frame);
        self.stack.clear();
        for _ in 0..self.config.frame_stack {
            self.stack.push_back(processed.clone());
        }

        Ok(self.state())
    }

    fn step(&mut self, action: i64) -> Result<StepResult<Vec<u8>>> {
        let mut total_reward = 0.0;
        let mut terminated = false;
        let mut truncated = false;
        let mut last: Option<Frame> = None;
        let mut prev: Option<Frame> = None;

        for _ in 0..self.config.frame_skip {
            let step = self.env.step(action)?;
            total_reward += step.reward;
            prev = last.take();
            last = Some(step.observation);
            terminated = step.terminated;
            truncated = step.truncated;
            if terminated || truncated {
                break;
            }
        }

        let last = last.expect("frame_skip is positive");
        let pooled = match &prev {
            Some(prev) => last.max(prev),
            None => last,
        };

        let processed = self.process(&pooled);
        self.push_frame(processed);

        Ok(StepResult { observation: self.state(), reward: total_reward, terminated, truncated })
    }

    fn observation_space(&self) -> SpaceInfo {
        SpaceInfo {
            shape: vec![self.config.frame_stack, self.config.frame_height, self.config.frame_width],
            dtype: SpaceType::Continuous,
        }
    }

    fn action_space(&self) -> SpaceInfo {
        self.env.action_space()
    }
}

/// Convert an RGB frame to a grayscale byte image of `height x width`.
pub fn grayscale_resize(frame: &Frame, height: usize, width: usize) -> Vec<u8> {
    let rgb = Tensor::from_slice(&frame.data)
        .view([frame.height as i64, frame.width as i64, 3])
        .to_kind(Kind::Float);

    // ITU-R 601 luma weights
    let weights = Tensor::from_slice(&[0.299_f32, 0.587, 0.114]);
    let gray = (rgb * weights).sum_dim_intlist(-1, false, Kind::Float);

    let resized = gray
        .view([1, 1, frame.height as i64, frame.width as i64])
        .upsample_bilinear2d(vec![height as i64, width as i64], false, None::<f64>, None::<f64>)
        .view([-1])
        .clamp(0.0, 255.0)
        .round();

    let values: Vec<f32> = Vec::try_from(resized).expect("contiguous grayscale tensor");
    values.into_iter().map(|v| v as u8).collect()
}

/// Build a `[stack, height, width]` float tensor in `[0, 1]` from one
/// stored state.
pub fn state_to_tensor(
    state: &[u8],
    stack: usize,
    height: usize,
    width: usize,
    device: Device,
) -> Tensor {
    debug_assert_eq!(state.len(), stack * height * width, "state length mismatch");
    Tensor::from_slice(state)
        .view([stack as i64, height as i64, width as i64])
        .to_kind(Kind::Float)
        .to_device(device)
        / 255.0
}

/// Build a `[batch, stack, height, width]` float tensor in `[0, 1]` from
/// concatenated stored states.
pub fn states_to_tensor(
    states: &[u8],
    batch: usize,
    stack: usize,
    height: usize,
    width: usize,
    device: Device,
) -> Tensor {
    debug_assert_eq!(states.len(), batch * stack * height * width, "batch length mismatch");
    Tensor::from_slice(states)
        .view([batch as i64, stack as i64, height as i64, width as i64])
        .to_kind(Kind::Float)
        .to_device(device)
        / 255.0
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic frame source for wrapper tests; emits solid frames
    /// whose brightness encodes the step count, ends episodes after
    /// `episode_len` steps.
    struct SolidFrames {
        steps: usize,
        episode_len: usize,
        height: usize,
        width: usize,
    }

    impl SolidFrames {
        fn new(episode_len: usize) -> Self {
            Self { steps: 0, episode_len, height: 8, width: 8 }
        }

        fn frame(&self, value: u8) -> Frame {
            Frame {
                data: vec![value; self.height * self.width * 3],
                height: self.height,
                width: self.width,
            }
        }
    }

    impl Environment for SolidFrames {
        type Observation = Frame;
        type Action = i64;

        fn reset(&mut self) -> Result<Frame> {
            self.steps = 0;
            Ok(self.frame(0))
        }

        fn step(&mut self, _action: i64) -> Result<StepResult<Frame>> {
            self.steps += 1;
            let value = (self.steps * 10).min(255) as u8;
            Ok(StepResult {
                observation: self.frame(value),
                reward: 1.0,
                terminated: self.steps >= self.episode_len,
                truncated: false,
            })
        }

        fn observation_space(&self) -> SpaceInfo {
            SpaceInfo { shape: vec![self.height, self.width, 3], dtype: SpaceType::Continuous }
        }

        fn action_space(&self) -> SpaceInfo {
            SpaceInfo { shape: vec![1], dtype: SpaceType::Discrete(4) }
        }
    }

    fn test_config() -> PreprocessConfig {
        PreprocessConfig {
            frame_width: 4,
            frame_height: 4,
            frame_stack: 2,
            frame_skip: 2,
            noop_max: 0,
        }
    }

    #[test]
    fn test_grayscale_of_solid_frames() {
        let black = Frame { data: vec![0; 8 * 8 * 3], height: 8, width: 8 };
        let white = Frame { data: vec![255; 8 * 8 * 3], height: 8, width: 8 };

        let g0 = grayscale_resize(&black, 4, 4);
        let g1 = grayscale_resize(&white, 4, 4);

        assert_eq!(g0.len(), 16);
        assert!(g0.iter().all(|&v| v == 0));
        assert!(g1.iter().all(|&v| v == 255));
    }

    #[test]
    fn test_reset_seeds_full_stack() {
        let mut env = PreprocessedEnv::new(SolidFrames::new(100), test_config());
        let state = env.reset().unwrap();

        assert_eq!(state.len(), 2 * 4 * 4);
        // Both stacked frames are the initial (black) frame
        assert!(state.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_step_accumulates_skipped_rewards() {
        let mut env = PreprocessedEnv::new(SolidFrames::new(100), test_config());
        env.reset().unwrap();

        let step = env.step(1).unwrap();
        // frame_skip = 2, one reward unit per emulator step
        assert!((step.reward - 2.0).abs() < 1e-6);
        assert!(!step.done());

        // Newest half of the stack is brighter than the oldest
        let state = step.observation;
        let (old, new) = state.split_at(16);
        assert!(new.iter().sum::<u8>() as u32 > old.iter().sum::<u8>() as u32);
    }

    #[test]
    fn test_episode_end_stops_skip_early() {
        let mut env = PreprocessedEnv::new(SolidFrames::new(3), test_config());
        env.reset().unwrap();

        let first = env.step(0).unwrap();
        assert!(!first.done());

        // Third emulator step terminates; only one of the two skips runs
        let second = env.step(0).unwrap();
        assert!(second.done());
        assert!((second.reward - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_state_tensor_shape_and_range() {
        let state: Vec<u8> = (0..32).map(|i| (i * 8) as u8).collect();
        let t = state_to_tensor(&state, 2, 4, 4, Device::Cpu);

        assert_eq!(t.size(), vec![2, 4, 4]);
        let max: f64 = t.max().try_into().unwrap();
        assert!(max <= 1.0);

        let batch = states_to_tensor(&state, 2, 1, 4, 4, Device::Cpu);
        assert_eq!(batch.size(), vec![2, 1, 4, 4]);
    }
}
