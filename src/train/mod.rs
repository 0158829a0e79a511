//! Training orchestration
//!
//! [`TrainConfig`] collects every hyperparameter of a run; [`Trainer`]
//! owns the agent, replay memory, and metrics sinks and drives the
//! episode loop.

pub mod config;
pub mod stats;
pub mod trainer;

pub use config::TrainConfig;
pub use stats::{EpisodeStats, TrainingSummary};
pub use trainer::Trainer;
