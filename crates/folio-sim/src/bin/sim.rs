#![forbid(unsafe_code)]

use anyhow::Result;
use folio_sim::oracle::ConvergenceOracle;
use folio_sim::{SimulationConfig, Simulator};

fn main() -> Result<()> {
    let mut simulator = Simulator::new(SimulationConfig::default())?;
    let result = simulator.run()?;
    let oracle = ConvergenceOracle::check_all(&result);

    println!(
        "simulation complete: trace_events={} heads={} restarts={} passed={} interesting={}",
        result.trace.len(),
        result.heads.len(),
        result.restarts,
        oracle.passed,
        result.interesting_state_reached
    );

    Ok(())
}
