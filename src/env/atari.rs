//! Gymnasium Atari bridge
//!
//! Drives an ALE environment (`ALE/IceHockey-v5` by default) through the
//! embedded Python interpreter. The bridge returns raw RGB screens; all
//! preprocessing happens on the Rust side in [`crate::env::wrappers`], so
//! the env is created with `frameskip=1` and repeat-action probability 0
//! to keep the emulator deterministic under our own action repeat.

use anyhow::{Context, Result};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::env::{Environment, SpaceInfo, SpaceType, StepResult};

/// A raw RGB screen from the emulator, row-major `height x width x 3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Pixel bytes, `height * width * 3` long
    pub data: Vec<u8>,
    /// Screen height in pixels
    pub height: usize,
    /// Screen width in pixels
    pub width: usize,
}

impl Frame {
    /// Element-wise maximum of two frames of identical shape.
    ///
    /// Atari sprites flicker on alternating frames; max-pooling consecutive
    /// screens recovers them.
    pub fn max(&self, other: &Frame) -> Frame {
        debug_assert_eq!(self.data.len(), other.data.len(), "frame shape mismatch");
        Frame {
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| a.max(b))
                .collect(),
            height: self.height,
            width: self.width,
        }
    }
}

/// Gymnasium environment handle.
pub struct AtariEnv {
    env: PyObject,
    game: String,
    render_mode: Option<String>,
    n_actions: usize,
    obs_height: usize,
    obs_width: usize,
}

impl AtariEnv {
    /// Create an environment for `game` (e.g. `"ALE/IceHockey-v5"`).
    ///
    /// `render_mode` is passed through to gymnasium (`"human"` opens a
    /// window, `None` runs headless).
    pub fn new(game: &str, render_mode: Option<&str>) -> Result<Self> {
        Python::with_gil(|py| {
            let gymnasium = py
                .import_bound("gymnasium")
                .context("importing gymnasium; run `puck doctor` to check the Python environment")?;

            let kwargs = PyDict::new_bound(py);
            // Emulator-level frame skip off; the wrapper applies its own
            kwargs.set_item("frameskip", 1)?;
            kwargs.set_item("repeat_action_probability", 0.0)?;
            if let Some(mode) = render_mode {
                kwargs.set_item("render_mode", mode)?;
            }

            let env = gymnasium
                .call_method("make", (game,), Some(&kwargs))
                .with_context(|| format!("creating environment {game}"))?;

            let n_actions: usize = env.getattr("action_space")?.getattr("n")?.extract()?;
            let shape: Vec<usize> = env.getattr("observation_space")?.getattr("shape")?.extract()?;
            anyhow::ensure!(
                shape.len() == 3 && shape[2] == 3,
                "expected an RGB observation space, got shape {shape:?}"
            );

            tracing::info!(game, n_actions, height = shape[0], width = shape[1], "environment ready");

            Ok(Self {
                env: env.unbind(),
                game: game.to_string(),
                render_mode: render_mode.map(str::to_string),
                n_actions,
                obs_height: shape[0],
                obs_width: shape[1],
            })
        })
    }

    /// Name of the underlying game.
    pub fn game(&self) -> &str {
        &self.game
    }

    /// Render mode the environment was created with.
    pub fn render_mode(&self) -> Option<&str> {
        self.render_mode.as_deref()
    }

    /// Number of discrete actions (18 for Ice Hockey).
    pub fn n_actions(&self) -> usize {
        self.n_actions
    }

    /// Render the current screen (no-op unless a render mode was set).
    pub fn render(&self) -> Result<()> {
        Python::with_gil(|py| {
            self.env.bind(py).call_method0("render")?;
            Ok(())
        })
    }

    /// Close the environment and release emulator resources.
    pub fn close(&self) -> Result<()> {
        Python::with_gil(|py| {
            self.env.bind(py).call_method0("close")?;
            Ok(())
        })
    }

    fn extract_frame(&self, obs: &Bound<'_, PyAny>) -> Result<Frame> {
        let data: Vec<u8> = obs.call_method0("tobytes")?.extract()?;
        anyhow::ensure!(
            data.len() == self.obs_height * self.obs_width * 3,
            "unexpected observation size {}",
            data.len()
        );
        Ok(Frame { data, height: self.obs_height, width: self.obs_width })
    }
}

impl Environment for AtariEnv {
    type Observation = Frame;
    type Action = i64;

    fn reset(&mut self) -> Result<Frame> {
        Python::with_gil(|py| {
            let result = self.env.bind(py).call_method0("reset")?;
            self.extract_frame(&result.get_item(0)?)
        })
    }

    fn step(&mut self, action: i64) -> Result<StepResult<Frame>> {
        Python::with_gil(|py| {
            let result = self.env.bind(py).call_method1("step", (action,))?;

            let observation = self.extract_frame(&result.get_item(0)?)?;
            let reward: f32 = result.get_item(1)?.extract()?;
            let terminated: bool = result.get_item(2)?.extract()?;
            let truncated: bool = result.get_item(3)?.extract()?;

            Ok(StepResult { observation, reward, terminated, truncated })
        })
    }

    fn observation_space(&self) -> SpaceInfo {
        SpaceInfo {
            shape: vec![self.obs_height, self.obs_width, 3],
            dtype: SpaceType::Continuous,
        }
    }

    fn action_space(&self) -> SpaceInfo {
        SpaceInfo { shape: vec![1], dtype: SpaceType::Discrete(self.n_actions) }
    }
}
