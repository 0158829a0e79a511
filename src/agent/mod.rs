//! Q-network and DQN agent
//!
//! The convolutional Q-network maps stacked frames to one Q-value per
//! action; the agent pairs a policy network with a periodically-synced
//! target network and optimizes TD error over prioritized replay batches.

pub mod dqn;
pub mod network;

pub use dqn::{AgentConfig, CheckpointMeta, DqnAgent, OptimizeStats};
pub use network::{QNetwork, QNetworkConfig};
