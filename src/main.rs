//! Command-line interface for puck-rl
//!
//! Subcommands: `train`, `evaluate`, `report`, and `doctor` (Python
//! environment checks). Logging is controlled through `RUST_LOG`.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use puck_rl::agent::DqnAgent;
use puck_rl::env::atari::AtariEnv;
use puck_rl::env::wrappers::PreprocessedEnv;
use puck_rl::env::Environment;
use puck_rl::manifest::{self, Manifest};
use puck_rl::report::RunReport;
use puck_rl::train::{TrainConfig, Trainer};

#[derive(Parser)]
#[command(name = "puck", version, about = "DQN with prioritized replay for Atari Ice Hockey")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train an agent
    Train {
        /// Gymnasium environment id
        #[arg(long, default_value = "ALE/IceHockey-v5")]
        game: String,

        /// Episodes to train for
        #[arg(long)]
        episodes: Option<usize>,

        /// Root directory for run output
        #[arg(long, default_value = "runs")]
        output_dir: PathBuf,

        /// Checkpoint directory to resume from
        #[arg(long)]
        resume: Option<PathBuf>,

        /// Disable prioritization (alpha = 0, uniform replay)
        #[arg(long)]
        uniform_replay: bool,
    },

    /// Run greedy episodes from a checkpoint
    Evaluate {
        /// Checkpoint directory (e.g. runs/exp_.../models/final)
        checkpoint: PathBuf,

        /// Gymnasium environment id
        #[arg(long, default_value = "ALE/IceHockey-v5")]
        game: String,

        /// Episodes to play
        #[arg(long, default_value_t = 5)]
        episodes: usize,

        /// Open the emulator window
        #[arg(long)]
        render: bool,
    },

    /// Generate a Markdown report from a run directory
    Report {
        /// Run directory (e.g. runs/exp_20250807_153000)
        run_dir: PathBuf,
    },

    /// Check the embedded Python environment against the bundled manifest
    Doctor,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match Cli::parse().command {
        Command::Train { game, episodes, output_dir, resume, uniform_replay } => {
            train(game, episodes, output_dir, resume, uniform_replay)
        }
        Command::Evaluate { checkpoint, game, episodes, render } => {
            evaluate(checkpoint, game, episodes, render)
        }
        Command::Report { run_dir } => report(run_dir),
        Command::Doctor => doctor(),
    }
}

fn train(
    game: String,
    episodes: Option<usize>,
    output_dir: PathBuf,
    resume: Option<PathBuf>,
    uniform_replay: bool,
) -> Result<()> {
    let mut config = TrainConfig::new().game(&game).output_dir(output_dir);
    if let Some(episodes) = episodes {
        config = config.training_episodes(episodes);
    }
    if uniform_replay {
        config = config.per_alpha(0.0);
    }

    let env = AtariEnv::new(&config.game, None)?;
    let env = PreprocessedEnv::new(env, config.preprocess_config());

    let mut trainer = Trainer::new(config.clone(), env)?;
    if let Some(checkpoint) = resume {
        trainer.resume_from(&checkpoint)?;
    }

    let run_dir = trainer.run_dir().to_path_buf();
    let summary = trainer.run()?;

    println!(
        "Trained {} episodes ({} steps); best reward {:.2}, recent average {:.2}",
        summary.episodes(),
        summary.total_steps(),
        summary.best_reward(),
        summary.recent_avg_reward()
    );

    let path = RunReport::load(&run_dir)?.write_markdown(&run_dir, &config)?;
    println!("Report written to {}", path.display());
    Ok(())
}

fn evaluate(checkpoint: PathBuf, game: String, episodes: usize, render: bool) -> Result<()> {
    let config = TrainConfig::new().game(&game);
    let render_mode = if render { Some("human") } else { None };

    let env = AtariEnv::new(&config.game, render_mode)?;
    let n_actions = env.n_actions();
    let mut env = PreprocessedEnv::new(env, config.preprocess_config());

    let mut agent = DqnAgent::new(config.agent_config(n_actions))?;
    let meta = agent.load(&checkpoint)?;
    println!(
        "Loaded checkpoint from episode {} ({} steps, saved {})",
        meta.episode, meta.steps_done, meta.saved_at
    );

    let mut total = 0.0_f32;
    for game_idx in 1..=episodes {
        let mut state = env.reset()?;
        let mut reward = 0.0_f32;
        loop {
            if render {
                env.inner().render()?;
            }
            let action = agent.select_action(&state, true);
            let step = env.step(action)?;
            reward += step.reward;
            state = step.observation;
            if step.done() {
                break;
            }
        }
        println!("Game {game_idx}: reward {reward:.2}");
        total += reward;
    }

    println!("Mean reward over {episodes} games: {:.2}", total / episodes.max(1) as f32);
    env.inner().close()?;
    Ok(())
}

fn report(run_dir: PathBuf) -> Result<()> {
    let report = RunReport::load(&run_dir)?;
    let summary = report.summary();
    // Reports describe the default configuration; runs that swept
    // hyperparameters keep the authoritative values in their logs
    let path = report.write_markdown(&run_dir, &TrainConfig::default())?;

    println!(
        "{} episodes; max reward {:.2}, recent average {:.2}",
        summary.episodes, summary.max_reward, summary.recent_avg_reward
    );
    println!("Report written to {}", path.display());
    Ok(())
}

fn doctor() -> Result<()> {
    let manifest = Manifest::parse(manifest::BUNDLED_MANIFEST)
        .context("parsing the bundled requirements manifest")?;
    println!("Manifest declares {} packages:", manifest.len());
    for req in manifest.requirements() {
        println!("  {req}");
    }

    let statuses = manifest::verify_python_env(&manifest)?;
    let mut missing = 0;
    for status in &statuses {
        match &status.installed {
            Some(version) if status.satisfied => println!("  ok       {} {version}", status.name),
            Some(version) => {
                println!("  MISMATCH {} {version}", status.name);
                missing += 1;
            }
            None => {
                println!("  MISSING  {}", status.name);
                missing += 1;
            }
        }
    }

    if missing > 0 {
        return Err(anyhow!(
            "{missing} package(s) missing or mismatched; install with \
             `pip install -r python/requirements.txt`"
        ));
    }
    println!("Python environment looks good.");
    Ok(())
}
