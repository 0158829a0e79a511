//! # Puck
//!
//! Deep Q-Network training for Atari Ice Hockey in Rust.
//!
//! Puck drives the `gymnasium` Atari environment through an embedded Python
//! interpreter and trains a convolutional Q-network with prioritized
//! experience replay on top of libtorch (via tch-rs).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use puck_rl::env::atari::AtariEnv;
//! use puck_rl::env::wrappers::PreprocessedEnv;
//! use puck_rl::train::{TrainConfig, Trainer};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = TrainConfig::new().training_episodes(1000);
//! let env = AtariEnv::new(&config.game, None)?;
//! let env = PreprocessedEnv::new(env, config.preprocess_config());
//! let mut trainer = Trainer::new(config, env)?;
//! let summary = trainer.run()?;
//! println!("best reward: {:.1}", summary.best_reward());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Q-network and DQN agent
pub mod agent;

/// Environment traits, the gymnasium Atari bridge, and frame preprocessing
pub mod env;

/// JSONL and TensorBoard metrics logging
pub mod logger;

/// Python dependency manifest parsing and environment verification
pub mod manifest;

/// Prioritized experience replay
pub mod memory;

/// System resource monitoring
pub mod monitor;

/// Post-run analysis and Markdown reports
pub mod report;

/// Training orchestration
pub mod train;

/// Utility functions and helpers
pub mod utils;

/// Current version of puck-rl
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "0.1.0");
    }
}
