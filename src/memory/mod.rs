//! Prioritized experience replay
//!
//! Transitions are stored in a fixed-capacity ring with a sum tree over
//! their priorities, giving O(log n) priority updates and stratified
//! sampling proportional to priority mass.

pub mod per;
pub mod sum_tree;

pub use per::{PerBatch, PerConfig, PrioritizedReplay, ReplayStats, Transition};
pub use sum_tree::SumTree;
