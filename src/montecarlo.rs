//! Parallel Monte-Carlo repetitions.
//!
//! Worker `i` owns a random stream seeded with `seed + i`, from which it draws
//! one seed per repetition and builds a fresh world with it. Workers share no
//! mutable state; reports flow back over a channel and are averaged into
//! per-agent mean curves with standard errors.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::unbounded;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::Variant;
use crate::error::{BanditError, BanditResult, ExecutionError, ValidationError};
use crate::selection::RuleKind;
use crate::world::{World, WorldReport};

/// Runner settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Worker threads.
    pub workers: usize,
    /// Worlds per worker.
    pub repetitions: usize,
    /// Master seed; worker `i` uses `seed + i`.
    pub seed: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            repetitions: 25,
            seed: 0,
        }
    }
}

/// Mean curves of one agent across repetitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveSummary {
    /// Agent variant.
    pub variant: Variant,
    /// Selection rule kind.
    pub rule: RuleKind,
    /// Mean cumulative pseudo-regret per round.
    pub regret_mean: Vec<f64>,
    /// Standard error of `regret_mean`.
    pub regret_sem: Vec<f64>,
    /// Fraction of repetitions choosing an optimal action, per round.
    pub optimal_mean: Vec<f64>,
    /// Standard error of `optimal_mean`.
    pub optimal_sem: Vec<f64>,
}

/// Aggregated results of a Monte-Carlo experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSummary {
    /// Master seed.
    pub seed: u64,
    /// Rounds per world.
    pub horizon: usize,
    /// Number of worlds averaged.
    pub samples: usize,
    /// Curves keyed by agent name.
    pub agents: BTreeMap<String, CurveSummary>,
}

impl ExperimentSummary {
    /// Averages `reports`, which must all share one horizon and agent set.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` when `reports` is empty or
    /// inconsistent.
    pub fn from_reports(seed: u64, reports: &[WorldReport]) -> Result<Self, ValidationError> {
        let first = reports.first().ok_or_else(|| ValidationError::InvalidConfig {
            reason: "no world reports to summarize".to_string(),
        })?;
        let horizon = first.horizon;
        if let Some(odd) = reports
            .iter()
            .find(|r| r.horizon != horizon || r.agents.len() != first.agents.len())
        {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "world reports disagree: {} agents over {} rounds, expected {} over {horizon}",
                    odd.agents.len(),
                    odd.horizon,
                    first.agents.len()
                ),
            });
        }

        let mut agents = BTreeMap::new();
        for (idx, template) in first.agents.iter().enumerate() {
            let mut regret = Vec::with_capacity(reports.len());
            let mut optimal = Vec::with_capacity(reports.len());
            for report in reports {
                let entry = report
                    .agents
                    .get(idx)
                    .filter(|a| a.agent == template.agent)
                    .ok_or_else(|| ValidationError::InvalidConfig {
                        reason: format!("world reports disagree on agent '{}'", template.agent),
                    })?;
                regret.push(entry.cumulative_regret.as_slice());
                optimal.push(entry.optimal_action.iter().map(|v| f64::from(*v)).collect::<Vec<_>>());
            }
            let optimal_refs: Vec<&[f64]> = optimal.iter().map(Vec::as_slice).collect();
            let (regret_mean, regret_sem) = mean_and_sem(&regret, horizon);
            let (optimal_mean, optimal_sem) = mean_and_sem(&optimal_refs, horizon);

            agents.insert(
                template.agent.to_string(),
                CurveSummary {
                    variant: template.variant,
                    rule: template.rule,
                    regret_mean,
                    regret_sem,
                    optimal_mean,
                    optimal_sem,
                },
            );
        }

        Ok(Self {
            seed,
            horizon,
            samples: reports.len(),
            agents,
        })
    }

    /// Pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns `BanditError::Internal` if serialization fails.
    pub fn to_json(&self) -> BanditResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| BanditError::internal(format!("serialize summary: {e}")))
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean_and_sem(curves: &[&[f64]], horizon: usize) -> (Vec<f64>, Vec<f64>) {
    let n = curves.len() as f64;
    let mut mean = Vec::with_capacity(horizon);
    let mut sem = Vec::with_capacity(horizon);
    for t in 0..horizon {
        let column: Vec<f64> = curves.iter().filter_map(|c| c.get(t).copied()).collect();
        let m = column.iter().sum::<f64>() / n;
        let s = if column.len() > 1 {
            let var = column.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (n - 1.0);
            (var / n).sqrt()
        } else {
            0.0
        };
        mean.push(m);
        sem.push(s);
    }
    (mean, sem)
}

/// Runs independent worlds on worker threads.
#[derive(Debug, Clone, Copy)]
pub struct MonteCarloRunner {
    config: RunnerConfig,
}

impl MonteCarloRunner {
    /// Creates a runner.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` if `workers` or
    /// `repetitions` is zero.
    pub fn new(config: RunnerConfig) -> Result<Self, ValidationError> {
        if config.workers == 0 || config.repetitions == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "workers and repetitions must be at least 1".to_string(),
            });
        }
        Ok(Self { config })
    }

    /// Runner settings.
    #[must_use]
    pub const fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Runs `workers × repetitions` worlds built by `factory` and returns
    /// every report, ordered by worker then repetition.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by `factory` or a world, or
    /// `ExecutionError::WorkerFailed` if a worker cannot start or panics.
    pub fn run_reports<F>(&self, factory: F) -> BanditResult<Vec<WorldReport>>
    where
        F: Fn(u64) -> BanditResult<World> + Send + Sync + 'static,
    {
        let factory = Arc::new(factory);
        let (tx, rx) = unbounded::<(usize, usize, BanditResult<WorldReport>)>();

        let mut handles = Vec::with_capacity(self.config.workers);
        for idx in 0..self.config.workers {
            let tx = tx.clone();
            let factory = Arc::clone(&factory);
            let repetitions = self.config.repetitions;
            let worker_seed = self.config.seed.wrapping_add(idx as u64);
            let handle = thread::Builder::new()
                .name(format!("transbandit-mc-{idx}"))
                .spawn(move || {
                    let mut rng = ChaCha8Rng::seed_from_u64(worker_seed);
                    for rep in 0..repetitions {
                        let result = factory(rng.next_u64()).and_then(World::run);
                        if tx.send((idx, rep, result)).is_err() {
                            break;
                        }
                    }
                })
                .map_err(|e| ExecutionError::WorkerFailed {
                    reason: format!("spawn worker {idx}: {e}"),
                })?;
            handles.push(handle);
        }
        drop(tx);

        let mut collected: Vec<(usize, usize, WorldReport)> = Vec::new();
        let mut first_error: Option<BanditError> = None;
        for (idx, rep, result) in rx {
            match result {
                Ok(report) => collected.push((idx, rep, report)),
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        for (idx, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() && first_error.is_none() {
                first_error = Some(BanditError::from(ExecutionError::WorkerFailed {
                    reason: format!("worker {idx} panicked"),
                }));
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        collected.sort_by_key(|(idx, rep, _)| (*idx, *rep));
        debug!(worlds = collected.len(), workers = self.config.workers, "monte-carlo run finished");
        Ok(collected.into_iter().map(|(_, _, report)| report).collect())
    }

    /// Runs every world and averages the reports.
    ///
    /// # Errors
    ///
    /// Same as [`MonteCarloRunner::run_reports`], plus
    /// `ValidationError::InvalidConfig` if the reports disagree.
    pub fn run<F>(&self, factory: F) -> BanditResult<ExperimentSummary>
    where
        F: Fn(u64) -> BanditResult<World> + Send + Sync + 'static,
    {
        let reports = self.run_reports(factory)?;
        Ok(ExperimentSummary::from_reports(self.config.seed, &reports)?)
    }
}
