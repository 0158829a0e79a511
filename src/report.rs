//! Post-run analysis and Markdown reports
//!
//! Reads a run's JSONL streams back and produces summary statistics plus a
//! Markdown document: configuration tables by category, reward/loss
//! aggregates, and host information. Curve plots live in the run's
//! TensorBoard stream; the report sticks to text.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;

use crate::logger::{load_episode_records, load_per_records, EpisodeRecord, PerRecord};
use crate::monitor;
use crate::train::TrainConfig;
use crate::utils::{moving_average, recent_mean};

/// Parsed metrics of one training run.
#[derive(Debug, Clone)]
pub struct RunReport {
    episodes: Vec<EpisodeRecord>,
    per: Vec<PerRecord>,
}

/// Aggregates computed from a run's episode and replay streams.
#[derive(Debug, Clone)]
pub struct ReportSummary {
    /// Episodes in the stream
    pub episodes: usize,
    /// Best single-episode reward
    pub max_reward: f32,
    /// Mean reward over the last 100 episodes
    pub recent_avg_reward: f32,
    /// Smallest recorded loss, if any episode had one
    pub min_loss: Option<f64>,
    /// Mean loss over the last 100 recorded losses
    pub recent_avg_loss: Option<f64>,
    /// Exploration rate at the first and last episode carrying one
    pub epsilon_range: Option<(f64, f64)>,
    /// Beta at the first and last replay record
    pub beta_range: Option<(f64, f64)>,
}

impl RunReport {
    /// Load `episode_data.jsonl` (required) and `per_data.jsonl`
    /// (optional) from a run's `data/` directory.
    pub fn load(run_dir: &Path) -> Result<Self> {
        let data_dir = run_dir.join("data");
        let episodes = load_episode_records(&data_dir.join("episode_data.jsonl"))
            .with_context(|| format!("loading episode data from {}", data_dir.display()))?;

        let per_path = data_dir.join("per_data.jsonl");
        let per = if per_path.exists() { load_per_records(&per_path)? } else { Vec::new() };

        Ok(Self { episodes, per })
    }

    /// Build a report from already-loaded records.
    pub fn from_records(episodes: Vec<EpisodeRecord>, per: Vec<PerRecord>) -> Self {
        Self { episodes, per }
    }

    /// Episode records in stream order.
    pub fn episodes(&self) -> &[EpisodeRecord] {
        &self.episodes
    }

    /// Replay records in stream order.
    pub fn per_records(&self) -> &[PerRecord] {
        &self.per
    }

    /// Moving average of episode rewards over `window` episodes.
    pub fn reward_moving_average(&self, window: usize) -> Vec<f32> {
        let rewards: Vec<f32> = self.episodes.iter().map(|e| e.reward).collect();
        moving_average(&rewards, window)
    }

    /// Summary statistics over both streams.
    pub fn summary(&self) -> ReportSummary {
        let rewards: Vec<f32> = self.episodes.iter().map(|e| e.reward).collect();
        let losses: Vec<f32> =
            self.episodes.iter().filter_map(|e| e.loss.map(|l| l as f32)).collect();
        let epsilons: Vec<f64> = self.episodes.iter().filter_map(|e| e.epsilon).collect();

        ReportSummary {
            episodes: self.episodes.len(),
            max_reward: rewards.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            recent_avg_reward: recent_mean(&rewards, 100),
            min_loss: if losses.is_empty() {
                None
            } else {
                Some(losses.iter().copied().fold(f32::INFINITY, f32::min) as f64)
            },
            recent_avg_loss: if losses.is_empty() {
                None
            } else {
                Some(recent_mean(&losses, 100) as f64)
            },
            epsilon_range: epsilons.first().zip(epsilons.last()).map(|(&a, &b)| (a, b)),
            beta_range: self
                .per
                .first()
                .zip(self.per.last())
                .map(|(first, last)| (first.beta, last.beta)),
        }
    }

    /// Render the Markdown report for this run.
    pub fn to_markdown(&self, config: &TrainConfig, run_name: &str) -> String {
        let mut md = String::new();
        let summary = self.summary();

        let _ = writeln!(md, "# Training Report - {run_name}\n");
        let _ = writeln!(md, "Generated on: {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"));

        md.push_str("## Results\n\n| Metric | Value |\n| --- | --- |\n");
        let _ = writeln!(md, "| Episodes | {} |", summary.episodes);
        let _ = writeln!(md, "| Max reward | {:.2} |", summary.max_reward);
        let _ = writeln!(md, "| Recent avg reward (100 ep) | {:.2} |", summary.recent_avg_reward);
        if let Some(min_loss) = summary.min_loss {
            let _ = writeln!(md, "| Min loss | {min_loss:.6} |");
        }
        if let Some(avg_loss) = summary.recent_avg_loss {
            let _ = writeln!(md, "| Recent avg loss (100 ep) | {avg_loss:.6} |");
        }
        if let Some((first, last)) = summary.epsilon_range {
            let _ = writeln!(md, "| Epsilon (first / last) | {first:.4} / {last:.4} |");
        }
        if let Some((first, last)) = summary.beta_range {
            let _ = writeln!(md, "| Beta (first / last) | {first:.4} / {last:.4} |");
        }
        md.push('\n');

        md.push_str("## Environment\n\n| Parameter | Value |\n| --- | --- |\n");
        let _ = writeln!(md, "| Game | {} |", config.game);
        let _ = writeln!(md, "| Frame size | {}x{} |", config.frame_width, config.frame_height);
        let _ = writeln!(md, "| Frame stack | {} |", config.frame_stack);
        let _ = writeln!(md, "| Frame skip | {} |", config.frame_skip);
        let _ = writeln!(md, "| No-op max | {} |", config.noop_max);
        md.push('\n');

        md.push_str("## Q-Learning\n\n| Parameter | Value |\n| --- | --- |\n");
        let _ = writeln!(md, "| Learning rate | {} |", config.learning_rate);
        let _ = writeln!(md, "| Gamma | {} |", config.gamma);
        let _ = writeln!(md, "| Batch size | {} |", config.batch_size);
        let _ = writeln!(md, "| Memory capacity | {} |", config.memory_capacity);
        let _ = writeln!(md, "| Learning starts | {} |", config.learning_starts);
        let _ = writeln!(md, "| Update frequency | {} |", config.update_frequency);
        let _ = writeln!(md, "| Target update frequency | {} |", config.target_update_frequency);
        let _ = writeln!(
            md,
            "| Epsilon | {} -> {} over {} steps |",
            config.epsilon_start, config.epsilon_end, config.epsilon_decay
        );
        let _ = writeln!(md, "| Gradient clip norm | {} |", config.grad_clip_norm);
        md.push('\n');

        md.push_str("## Prioritized Replay\n\n| Parameter | Value |\n| --- | --- |\n");
        let _ = writeln!(md, "| Alpha | {} |", config.per_alpha);
        let _ = writeln!(md, "| Beta start | {} |", config.per_beta_start);
        let _ = writeln!(md, "| Beta frames | {} |", config.per_beta_frames);
        let _ = writeln!(md, "| Priority epsilon | {} |", config.per_epsilon);
        md.push('\n');

        md.push_str("## Network\n\n| Parameter | Value |\n| --- | --- |\n");
        let _ = writeln!(md, "| Conv layers | {} |", config.conv_layers);
        let _ = writeln!(md, "| FC size | {} |", config.fc_size);
        md.push('\n');

        let info = monitor::system_info();
        md.push_str("## System\n\n| Component | Details |\n| --- | --- |\n");
        let _ = writeln!(md, "| Host | {} |", info.host.as_deref().unwrap_or("unknown"));
        let _ = writeln!(md, "| OS | {} |", info.os.as_deref().unwrap_or("unknown"));
        let _ = writeln!(md, "| CPUs | {} |", info.cpus);
        let _ = writeln!(md, "| Memory | {:.1} GiB |", info.total_memory_gib);
        let _ = writeln!(md, "| puck-rl | {} |", crate::VERSION);

        md
    }

    /// Write the Markdown report into the run directory and return its
    /// path.
    pub fn write_markdown(&self, run_dir: &Path, config: &TrainConfig) -> Result<PathBuf> {
        let run_name = run_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "run".to_string());
        let path = run_dir.join("report.md");
        std::fs::write(&path, self.to_markdown(config, &run_name))
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: usize) -> Vec<EpisodeRecord> {
        (1..=n)
            .map(|i| EpisodeRecord {
                episode: i,
                reward: i as f32,
                steps: 10,
                loss: if i > 2 { Some(1.0 / i as f64) } else { None },
                epsilon: Some(1.0 - i as f64 * 0.01),
            })
            .collect()
    }

    #[test]
    fn test_summary_statistics() {
        let report = RunReport::from_records(records(10), Vec::new());
        let summary = report.summary();

        assert_eq!(summary.episodes, 10);
        assert_eq!(summary.max_reward, 10.0);
        assert_eq!(summary.min_loss, Some(0.1));
        let (first, last) = summary.epsilon_range.unwrap();
        assert!(first > last);
        assert!(summary.beta_range.is_none());
    }

    #[test]
    fn test_reward_moving_average() {
        let report = RunReport::from_records(records(5), Vec::new());
        let avg = report.reward_moving_average(3);

        assert_eq!(avg.len(), 3);
        assert!((avg[0] - 2.0).abs() < 1e-6);
        assert!((avg[2] - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_markdown_contains_sections() {
        let report = RunReport::from_records(records(4), Vec::new());
        let md = report.to_markdown(&TrainConfig::default(), "exp_test");

        assert!(md.contains("# Training Report - exp_test"));
        assert!(md.contains("## Results"));
        assert!(md.contains("## Prioritized Replay"));
        assert!(md.contains("ALE/IceHockey-v5"));
    }

    #[test]
    fn test_load_tolerates_missing_per_stream() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::write(
            data_dir.join("episode_data.jsonl"),
            "{\"episode\":1,\"reward\":2.0,\"steps\":30}\n",
        )
        .unwrap();

        let report = RunReport::load(dir.path()).unwrap();
        assert_eq!(report.episodes().len(), 1);
        assert!(report.per_records().is_empty());
    }
}
