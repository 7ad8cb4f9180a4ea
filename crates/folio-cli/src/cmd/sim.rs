//! `folio sim`: deterministic simulation campaigns.
//!
//! Runs many seeds through the simulator and the convergence oracle, or
//! replays one seed with its full trace.

use std::io::{self, Write};
use std::process;

use anyhow::Result;
use clap::Args;
use folio_sim::campaign::{CampaignConfig, CampaignReport, format_violation, replay_seed, run_campaign};
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, pretty_section};

/// Arguments for `folio sim`.
#[derive(Args, Debug)]
pub struct SimArgs {
    /// Number of seeds to run.
    #[arg(long, default_value = "100")]
    pub seeds: u64,

    /// Starting seed value.
    #[arg(long, default_value = "0")]
    pub start: u64,

    /// Number of simulation rounds per seed.
    #[arg(long, default_value = "16")]
    pub rounds: u64,

    /// Transient stream failure probability per round (percent).
    #[arg(long, default_value = "15")]
    pub transient: u8,

    /// Terminal stream failure probability per round (percent).
    #[arg(long, default_value = "2")]
    pub terminal: u8,

    /// Replay this seed with its full trace instead of running a campaign.
    #[arg(long)]
    pub replay: Option<u64>,
}

/// JSON output for a campaign.
#[derive(Debug, Serialize)]
struct RunOutput<'a> {
    seeds_run: usize,
    seeds_passed: usize,
    seeds_failed: usize,
    first_failure: Option<u64>,
    interesting_states_reached: usize,
    all_passed: bool,
    failures: &'a [folio_sim::campaign::SeedFailure],
}

/// JSON output for a replay.
#[derive(Debug, Serialize)]
struct ReplayOutput<'a> {
    seed: u64,
    oracle_passed: bool,
    violations: Vec<String>,
    result: &'a folio_sim::SimulationResult,
}

fn campaign_config(args: &SimArgs, start: u64, seeds: u64) -> CampaignConfig {
    CampaignConfig {
        seed_range: start..start.saturating_add(seeds),
        rounds: args.rounds,
        fault_transient_percent: args.transient.min(100),
        fault_terminal_percent: args.terminal.min(100),
        ..CampaignConfig::default()
    }
}

/// Execute `folio sim`.
pub fn run_sim(args: &SimArgs, output: OutputMode) -> Result<()> {
    if let Some(seed) = args.replay {
        return run_replay(args, seed, output);
    }

    let config = campaign_config(args, args.start, args.seeds);
    let report = run_campaign(&config)?;

    let stdout = io::stdout();
    let mut w = stdout.lock();
    write_report(&mut w, &report, args, output)?;

    // Exit code 1 on any failure for CI integration
    if !report.all_passed() {
        process::exit(1);
    }
    Ok(())
}

fn write_report(w: &mut dyn Write, report: &CampaignReport, args: &SimArgs, output: OutputMode) -> Result<()> {
    match output {
        OutputMode::Json => {
            let out = RunOutput {
                seeds_run: report.seeds_run,
                seeds_passed: report.seeds_passed,
                seeds_failed: report.failures.len(),
                first_failure: report.first_failure,
                interesting_states_reached: report.interesting_states_reached,
                all_passed: report.all_passed(),
                failures: &report.failures,
            };
            serde_json::to_writer_pretty(&mut *w, &out)?;
            writeln!(w)?;
        }
        OutputMode::Text => {
            writeln!(
                w,
                "campaign seeds_run={} rounds={} transient_pct={} terminal_pct={}",
                report.seeds_run, args.rounds, args.transient, args.terminal
            )?;
            writeln!(
                w,
                "results passed={} failed={} interesting_states={} all_passed={}",
                report.seeds_passed,
                report.failures.len(),
                report.interesting_states_reached,
                report.all_passed()
            )?;
            for failure in report.failures.iter().take(5) {
                writeln!(w, "failure seed={} violations={}", failure.seed, failure.violations.len())?;
            }
            if let Some(seed) = report.first_failure {
                writeln!(w, "hint replay_seed={seed} rounds={}", args.rounds)?;
            }
        }
        OutputMode::Pretty => {
            pretty_section(w, "Simulation Campaign")?;
            pretty_kv(w, "Seeds", report.seeds_run.to_string())?;
            pretty_kv(w, "Rounds", args.rounds.to_string())?;
            pretty_kv(
                w,
                "Faults",
                format!("{}% transient / {}% terminal", args.transient, args.terminal),
            )?;
            pretty_kv(
                w,
                "Results",
                format!(
                    "{} passed / {} failed ({} interesting states)",
                    report.seeds_passed,
                    report.failures.len(),
                    report.interesting_states_reached
                ),
            )?;
            match report.first_failure {
                None => pretty_kv(w, "Status", "all seeds passed")?,
                Some(seed) => {
                    pretty_kv(w, "Status", format!("first failure at seed {seed}"))?;
                    writeln!(w)?;
                    pretty_section(w, "Failure Samples")?;
                    for failure in report.failures.iter().take(5) {
                        writeln!(w, "seed {:<8} violations={}", failure.seed, failure.violations.len())?;
                        for violation in &failure.violations {
                            writeln!(w, "  - {violation}")?;
                        }
                    }
                    writeln!(w)?;
                    pretty_kv(
                        w,
                        "Replay",
                        format!("folio sim --replay {seed} --rounds {}", args.rounds),
                    )?;
                }
            }
        }
    }
    Ok(())
}

fn run_replay(args: &SimArgs, seed: u64, output: OutputMode) -> Result<()> {
    let config = campaign_config(args, seed, 1);
    let trace = replay_seed(seed, &config)?;
    let violations: Vec<String> = trace.oracle.violations.iter().map(format_violation).collect();

    let stdout = io::stdout();
    let mut w = stdout.lock();
    match output {
        OutputMode::Json => {
            let out = ReplayOutput {
                seed,
                oracle_passed: trace.oracle.passed,
                violations,
                result: &trace.result,
            };
            serde_json::to_writer_pretty(&mut w, &out)?;
            writeln!(w)?;
        }
        OutputMode::Text | OutputMode::Pretty => {
            pretty_section(&mut w, &format!("Replay seed {seed}"))?;
            for event in &trace.result.trace {
                writeln!(w, "round {:<4} {}", event.round, serde_json::to_string(&event.kind)?)?;
            }
            writeln!(w)?;
            pretty_kv(&mut w, "Heads", trace.result.heads.len().to_string())?;
            pretty_kv(&mut w, "Collected", trace.result.collected.len().to_string())?;
            pretty_kv(&mut w, "Restarts", trace.result.restarts.to_string())?;
            pretty_kv(&mut w, "Terminal", trace.result.terminal_failure.to_string())?;
            pretty_kv(&mut w, "Oracle", if trace.oracle.passed { "passed" } else { "failed" })?;
            for violation in &violations {
                writeln!(w, "  - {violation}")?;
            }
        }
    }

    if !trace.oracle.passed {
        process::exit(1);
    }
    Ok(())
}
