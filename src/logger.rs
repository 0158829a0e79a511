//! Training metrics logging
//!
//! Each run owns a directory with two JSONL streams plus TensorBoard event
//! files:
//!
//! * `data/episode_data.jsonl` - one record per episode (reward, length,
//!   mean loss, epsilon);
//! * `data/per_data.jsonl` - replay metrics on a step cadence (beta,
//!   priorities, TD error, importance weights);
//! * `tensorboard/` - the same scalars for live dashboards.
//!
//! The JSONL streams are the source of truth for post-run analysis; the
//! report module reads them back with [`load_episode_records`] and
//! [`load_per_records`].

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tensorboard_rs::summary_writer::SummaryWriter;

/// One episode's worth of training metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    /// Episode index, 1-based
    pub episode: usize,
    /// Total (unclipped) episode reward
    pub reward: f32,
    /// Environment steps in the episode
    pub steps: u64,
    /// Mean optimization loss over the episode; absent before learning starts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,
    /// Exploration rate at episode end; absent in evaluation-only records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epsilon: Option<f64>,
}

/// Replay-memory metrics sampled on a step cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerRecord {
    /// Global environment step
    pub step: u64,
    /// Importance-sampling exponent at this step
    pub beta: f64,
    /// Mean leaf priority
    pub mean_priority: f64,
    /// Maximum leaf priority
    pub max_priority: f64,
    /// Mean absolute TD error of the last batch
    pub mean_td_error: f64,
    /// Mean importance-sampling weight of the last batch
    pub mean_is_weight: f64,
}

/// Metrics sink for one training run.
pub struct RunLogger {
    data_dir: PathBuf,
    episode_file: BufWriter<File>,
    per_file: BufWriter<File>,
    tensorboard: SummaryWriter,
}

impl RunLogger {
    /// Create the run's `data/` and `tensorboard/` directories under
    /// `run_dir` and open the JSONL streams.
    pub fn create(run_dir: &Path) -> Result<Self> {
        let data_dir = run_dir.join("data");
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating {}", data_dir.display()))?;
        let tb_dir = run_dir.join("tensorboard");
        std::fs::create_dir_all(&tb_dir)?;

        let episode_file = BufWriter::new(File::create(data_dir.join("episode_data.jsonl"))?);
        let per_file = BufWriter::new(File::create(data_dir.join("per_data.jsonl"))?);

        Ok(Self {
            data_dir,
            episode_file,
            per_file,
            tensorboard: SummaryWriter::new(tb_dir.to_string_lossy().as_ref()),
        })
    }

    /// Directory holding the JSONL streams.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Append an episode record to both sinks.
    pub fn log_episode(&mut self, record: &EpisodeRecord) -> Result<()> {
        serde_json::to_writer(&mut self.episode_file, record)?;
        self.episode_file.write_all(b"\n")?;

        self.tensorboard.add_scalar("episode/reward", record.reward, record.episode);
        self.tensorboard.add_scalar("episode/steps", record.steps as f32, record.episode);
        if let Some(loss) = record.loss {
            self.tensorboard.add_scalar("episode/loss", loss as f32, record.episode);
        }
        if let Some(epsilon) = record.epsilon {
            self.tensorboard.add_scalar("episode/epsilon", epsilon as f32, record.episode);
        }
        Ok(())
    }

    /// Append a replay-memory record to both sinks.
    pub fn log_per(&mut self, record: &PerRecord) -> Result<()> {
        serde_json::to_writer(&mut self.per_file, record)?;
        self.per_file.write_all(b"\n")?;

        let step = record.step as usize;
        self.tensorboard.add_scalar("replay/beta", record.beta as f32, step);
        self.tensorboard.add_scalar("replay/mean_priority", record.mean_priority as f32, step);
        self.tensorboard.add_scalar("replay/max_priority", record.max_priority as f32, step);
        self.tensorboard.add_scalar("replay/mean_td_error", record.mean_td_error as f32, step);
        self.tensorboard.add_scalar("replay/mean_is_weight", record.mean_is_weight as f32, step);
        Ok(())
    }

    /// Record a greedy-evaluation result.
    pub fn log_eval(&mut self, episode: usize, mean_reward: f32) {
        self.tensorboard.add_scalar("eval/mean_reward", mean_reward, episode);
    }

    /// Flush all sinks to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.episode_file.flush()?;
        self.per_file.flush()?;
        self.tensorboard.flush();
        Ok(())
    }
}

fn load_jsonl<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let file =
        File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(
            serde_json::from_str(&line)
                .with_context(|| format!("parsing record in {}", path.display()))?,
        );
    }
    Ok(records)
}

/// Load an `episode_data.jsonl` stream, skipping blank lines.
pub fn load_episode_records(path: &Path) -> Result<Vec<EpisodeRecord>> {
    load_jsonl(path)
}

/// Load a `per_data.jsonl` stream, skipping blank lines.
pub fn load_per_records(path: &Path) -> Result<Vec<PerRecord>> {
    load_jsonl(path)
}
