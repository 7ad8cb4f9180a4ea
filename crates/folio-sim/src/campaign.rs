//! Campaign runner for deterministic simulation campaigns.
//!
//! Executes many seeds with the same workload and fault mix, collecting
//! pass/fail results and identifying the first failing seed for replay.

use std::ops::Range;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::fault::FaultConfig;
use crate::oracle::{ConvergenceOracle, InvariantViolation, OracleResult};
use crate::{SimulationConfig, SimulationResult, Simulator};

/// Campaign-level configuration controlling how many seeds to run and
/// what simulation parameters to use for each seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Range of seeds to execute, e.g., `0..100`.
    pub seed_range: Range<u64>,
    /// Number of simulation rounds per seed.
    pub rounds: u64,
    /// Workload operations per round.
    pub ops_per_round: usize,
    /// Transient stream failure probability per round (percent, 0-100).
    pub fault_transient_percent: u8,
    /// Terminal stream failure probability per round (percent, 0-100).
    pub fault_terminal_percent: u8,
    /// Share of operations that remove an identity (percent).
    pub remove_percent: u8,
    /// Share of operations that revise an identity (percent).
    pub revise_percent: u8,
    /// Share of operations that rename through the engine (percent).
    pub rename_percent: u8,
    /// Rejected rename publishes (percent, 0-100).
    pub publish_failure_percent: u8,
    pub min_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            seed_range: 0..100,
            rounds: 16,
            ops_per_round: 4,
            fault_transient_percent: 15,
            fault_terminal_percent: 2,
            remove_percent: 10,
            revise_percent: 25,
            rename_percent: 10,
            publish_failure_percent: 10,
            min_retry_delay_ms: 50,
            max_retry_delay_ms: 2_000,
        }
    }
}

impl CampaignConfig {
    /// Build a [`SimulationConfig`] for a specific seed.
    #[must_use]
    pub const fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            rounds: self.rounds,
            ops_per_round: self.ops_per_round,
            fault: FaultConfig {
                transient_rate_percent: self.fault_transient_percent,
                terminal_rate_percent: self.fault_terminal_percent,
                remove_rate_percent: self.remove_percent,
                revise_rate_percent: self.revise_percent,
                rename_rate_percent: self.rename_percent,
                publish_failure_percent: self.publish_failure_percent,
                min_retry_delay_ms: self.min_retry_delay_ms,
                max_retry_delay_ms: self.max_retry_delay_ms,
            },
        }
    }

    /// Validate configuration before running.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        let workload = u16::from(self.remove_percent)
            + u16::from(self.revise_percent)
            + u16::from(self.rename_percent);
        if workload > 100 {
            bail!("remove, revise and rename percentages must sum to at most 100 (got {workload})");
        }
        if self.min_retry_delay_ms > self.max_retry_delay_ms {
            bail!("min_retry_delay_ms must not exceed max_retry_delay_ms");
        }
        Ok(())
    }
}

/// Failure details for a single seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    /// Invariant violations found.
    pub violations: Vec<String>,
}

/// Aggregate report produced by a campaign run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// First seed that failed (for prioritized replay).
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds that hit a retry, a terminal failure or a rejected publish.
    pub interesting_states_reached: usize,
}

impl CampaignReport {
    /// True if every seed passed.
    #[must_use]
    pub const fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of one seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedOutcome {
    pub interesting: bool,
    pub violations: Vec<InvariantViolation>,
}

/// Detailed trace produced by replaying a single seed.
#[derive(Debug, Clone)]
pub struct DetailedTrace {
    /// The simulation result including the full trace.
    pub result: SimulationResult,
    /// Oracle check result with violation details.
    pub oracle: OracleResult,
}

/// Run a full campaign across all seeds in the config.
///
/// # Errors
///
/// Returns an error if config validation fails or a simulation encounters
/// an internal error.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;
    info!(seeds = ?config.seed_range, rounds = config.rounds, "campaign start");

    let mut seeds_run = 0_usize;
    let mut seeds_passed = 0_usize;
    let mut first_failure: Option<u64> = None;
    let mut failures = Vec::new();
    let mut interesting_states_reached = 0_usize;

    for seed in config.seed_range.clone() {
        seeds_run += 1;

        let outcome = run_single_seed(seed, config)?;
        if outcome.interesting {
            interesting_states_reached += 1;
        }
        if outcome.violations.is_empty() {
            seeds_passed += 1;
            debug!(seed, "seed passed");
        } else {
            warn!(seed, violations = outcome.violations.len(), "seed failed");
            if first_failure.is_none() {
                first_failure = Some(seed);
            }
            failures.push(SeedFailure {
                seed,
                violations: outcome.violations.iter().map(format_violation).collect(),
            });
        }
    }

    info!(seeds_run, seeds_passed, interesting_states_reached, "campaign complete");
    Ok(CampaignReport {
        seeds_run,
        seeds_passed,
        first_failure,
        failures,
        interesting_states_reached,
    })
}

/// Run a single seed through the simulator and the oracle.
///
/// # Errors
///
/// Returns an error if the simulation itself cannot run (invalid config,
/// runtime construction). Invariant violations are reported in the outcome.
pub fn run_single_seed(seed: u64, config: &CampaignConfig) -> Result<SeedOutcome> {
    let mut simulator = Simulator::new(config.sim_config_for_seed(seed))?;
    let result = simulator.run()?;
    let oracle = ConvergenceOracle::check_all(&result);

    Ok(SeedOutcome {
        interesting: result.interesting_state_reached,
        violations: oracle.violations,
    })
}

/// Replay a single seed with full trace details for debugging.
///
/// # Errors
///
/// Returns an error when config validation or simulation fails.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    config.validate()?;

    let mut simulator = Simulator::new(config.sim_config_for_seed(seed))?;
    let result = simulator.run()?;
    let oracle = ConvergenceOracle::check_all(&result);

    Ok(DetailedTrace { result, oracle })
}

/// Format an invariant violation into a human-readable string.
#[must_use]
pub fn format_violation(v: &InvariantViolation) -> String {
    match v {
        InvariantViolation::Convergence { missing, extra } => {
            format!(
                "Convergence: collector diverged from log heads \
                 (missing={}, extra={})",
                join(missing),
                join(extra)
            )
        }
        InvariantViolation::OrderMismatch { expected, actual } => {
            format!(
                "OrderMismatch: expected [{}] but collected [{}]",
                join(expected),
                join(actual)
            )
        }
        InvariantViolation::DuplicateIdentity { identity } => {
            format!("DuplicateIdentity: {identity} collected more than once")
        }
        InvariantViolation::ViewMismatch { views, collected } => {
            format!(
                "ViewMismatch: views [{}] vs collected [{}]",
                join(views),
                join(collected)
            )
        }
        InvariantViolation::RetryAfterTerminal { restarts } => {
            format!("RetryAfterTerminal: {restarts} restart(s) after a terminal failure")
        }
        InvariantViolation::FrozenStateChanged { frozen, actual } => {
            format!(
                "FrozenStateChanged: frozen [{}] became [{}]",
                join(frozen),
                join(actual)
            )
        }
        InvariantViolation::IntentRejected { identity, reason } => {
            format!("IntentRejected: {identity} ({reason})")
        }
    }
}

fn join(keys: &[folio_core::RecordKey]) -> String {
    keys.iter()
        .map(folio_core::RecordKey::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
