use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use clap::{Parser, Subcommand};
use rand::{SeedableRng, rngs::SmallRng};
use tracing::{info, warn};

use aviary_app::EvaluationReport;
use aviary_app::renderer::{HeadlessRenderer, Renderer};
use aviary_core::{BatchSummary, CourseConfig, CourseState, CourseStatus, FitnessEntry};
use aviary_policy::{FeedForwardPolicy, into_runner};

#[derive(Parser)]
#[command(
    name = "aviary",
    about = "Obstacle-course evaluation harness for evolved flight policies"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drive a population of random candidate policies through one shared course.
    Evaluate {
        /// Number of agents in the batch.
        #[arg(long, default_value_t = 50)]
        population: usize,
        /// RNG seed for a reproducible course and candidate set.
        #[arg(long)]
        seed: Option<u64>,
        /// Score ceiling ending the batch; 0 disables it.
        #[arg(long, default_value_t = 80)]
        score_limit: u32,
        /// Tick safety valve; 0 disables it.
        #[arg(long, default_value_t = 100_000)]
        max_ticks: u64,
        /// Write the evaluation report as JSON.
        #[arg(long)]
        report: Option<PathBuf>,
        /// Persist the best-scoring candidate as JSON.
        #[arg(long)]
        save_best: Option<PathBuf>,
    },
    /// Re-run one persisted policy on a fresh course.
    Replay {
        /// Path to a policy JSON file produced by `evaluate --save-best`.
        policy: PathBuf,
        /// RNG seed for a reproducible course.
        #[arg(long)]
        seed: Option<u64>,
        /// Score ceiling; defaults to unlimited for replays.
        #[arg(long, default_value_t = 0)]
        score_limit: u32,
        /// Tick safety valve; 0 disables it.
        #[arg(long, default_value_t = 100_000)]
        max_ticks: u64,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Evaluate {
            population,
            seed,
            score_limit,
            max_ticks,
            report,
            save_best,
        } => evaluate(population, seed, score_limit, max_ticks, report, save_best),
        Command::Replay {
            policy,
            seed,
            score_limit,
            max_ticks,
        } => replay(&policy, seed, score_limit, max_ticks),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn course_config(seed: Option<u64>, score_limit: u32, max_ticks: u64) -> CourseConfig {
    CourseConfig {
        score_limit,
        max_ticks,
        rng_seed: seed,
        ..CourseConfig::default()
    }
}

/// Step the course to completion, handing each frame to the renderer.
/// Renderer failures are logged and never abort the batch.
fn drive(course: &mut CourseState, renderer: &mut dyn Renderer) -> Result<BatchSummary> {
    while course.status() == CourseStatus::Running {
        let max_ticks = course.config().max_ticks;
        if max_ticks > 0 && course.tick().0 >= max_ticks {
            warn!(max_ticks, "tick safety valve tripped; cutting the batch");
            break;
        }
        course.step()?;
        let frame = course.snapshot();
        if let Err(error) = renderer.frame(&frame) {
            warn!(
                renderer = renderer.name(),
                %error,
                "renderer frame failed; simulation continues"
            );
        }
    }
    Ok(course.summary())
}

fn evaluate(
    population: usize,
    seed: Option<u64>,
    score_limit: u32,
    max_ticks: u64,
    report_path: Option<PathBuf>,
    save_best: Option<PathBuf>,
) -> Result<()> {
    ensure!(population > 0, "population must be at least 1");
    let mut course = CourseState::new(course_config(seed, score_limit, max_ticks))?;
    let mut rng = SmallRng::seed_from_u64(seed.unwrap_or(0xA71A_2026));

    let mut candidates = Vec::with_capacity(population);
    for _ in 0..population {
        let policy = FeedForwardPolicy::random(&mut rng, FeedForwardPolicy::DEFAULT_HIDDEN);
        let id = course.spawn_agent();
        ensure!(
            course.bind_runner(id, into_runner(policy.clone())),
            "failed to bind candidate policy"
        );
        candidates.push((id, policy));
    }
    info!(population, ?seed, "starting evaluation batch");

    let mut renderer = HeadlessRenderer::new(60);
    let summary = drive(&mut course, &mut renderer)?;
    info!(
        ticks = summary.ticks.0,
        score = summary.score,
        survivors = summary.survivors,
        status = ?summary.status,
        "batch finished"
    );

    let fitness = course.fitness_report();
    let mut ranked: Vec<&FitnessEntry> = fitness.entries.iter().collect();
    ranked.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));
    for entry in ranked.iter().take(5) {
        info!(
            agent = ?entry.id,
            fitness = entry.fitness,
            death = ?entry.death.map(|record| record.cause),
            "leaderboard entry"
        );
    }

    if let Some(path) = report_path {
        EvaluationReport {
            seed,
            summary,
            fitness: fitness.clone(),
        }
        .write_json(&path)?;
        info!(path = %path.display(), "wrote evaluation report");
    }

    if let Some(path) = save_best {
        let best = fitness.best().context("no agents were evaluated")?;
        let (_, policy) = candidates
            .iter()
            .find(|(id, _)| *id == best.id)
            .context("best entry is missing from the candidate set")?;
        policy
            .save(&path)
            .with_context(|| format!("failed to save policy to {}", path.display()))?;
        info!(path = %path.display(), fitness = best.fitness, "saved best policy");
    }
    Ok(())
}

fn replay(policy_path: &Path, seed: Option<u64>, score_limit: u32, max_ticks: u64) -> Result<()> {
    let policy = FeedForwardPolicy::load(policy_path)
        .with_context(|| format!("failed to load policy from {}", policy_path.display()))?;
    let mut course = CourseState::new(course_config(seed, score_limit, max_ticks))?;
    let id = course.spawn_agent();
    ensure!(
        course.bind_runner(id, into_runner(policy)),
        "failed to bind the replayed policy"
    );
    info!(path = %policy_path.display(), ?seed, "starting replay");

    let mut renderer = HeadlessRenderer::new(30);
    let summary = drive(&mut course, &mut renderer)?;
    match course.retired().first() {
        Some(record) => info!(
            tick = record.tick.0,
            cause = ?record.cause,
            fitness = record.fitness,
            score = summary.score,
            "replay ended"
        ),
        None => info!(
            ticks = summary.ticks.0,
            score = summary.score,
            "replay stopped while the agent was still alive"
        ),
    }
    Ok(())
}
