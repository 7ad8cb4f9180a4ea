use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rng::DeterministicRng;

/// Fault and workload mix for one simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Percentage chance per round that live subscriptions fail transiently.
    pub transient_rate_percent: u8,
    /// Percentage chance per round that live subscriptions fail terminally.
    pub terminal_rate_percent: u8,
    /// Percentage of operations that remove an existing identity.
    pub remove_rate_percent: u8,
    /// Percentage of operations that append a revision of an existing identity.
    pub revise_rate_percent: u8,
    /// Percentage of operations that rename an item through the engine.
    pub rename_rate_percent: u8,
    /// Percentage of renames whose publish is rejected by the log.
    pub publish_failure_percent: u8,
    /// Lower bound of the server-suggested retry delay.
    pub min_retry_delay_ms: u64,
    /// Upper bound of the server-suggested retry delay.
    pub max_retry_delay_ms: u64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            transient_rate_percent: 10,
            terminal_rate_percent: 0,
            remove_rate_percent: 10,
            revise_rate_percent: 25,
            rename_rate_percent: 10,
            publish_failure_percent: 10,
            min_retry_delay_ms: 50,
            max_retry_delay_ms: 2_000,
        }
    }
}

/// Stream fault drawn for one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFault {
    None,
    Transient(Duration),
    Terminal,
}

/// Workload operation drawn for one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Publish,
    Revise,
    Remove,
    Rename,
}

impl FaultConfig {
    /// Longest delay a transient failure can ask for.
    #[must_use]
    pub const fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    /// Draw the stream fault for a round. Terminal faults take precedence.
    #[must_use]
    pub fn draw_stream_fault(&self, rng: &mut DeterministicRng) -> StreamFault {
        if rng.hit_rate_percent(self.terminal_rate_percent) {
            return StreamFault::Terminal;
        }
        if rng.hit_rate_percent(self.transient_rate_percent) {
            let delay = rng.next_between(self.min_retry_delay_ms, self.max_retry_delay_ms);
            return StreamFault::Transient(Duration::from_millis(delay));
        }
        StreamFault::None
    }

    /// Draw the next workload operation.
    #[must_use]
    pub fn draw_operation(&self, rng: &mut DeterministicRng) -> Operation {
        let roll = rng.next_bounded(100);
        let remove = u64::from(self.remove_rate_percent);
        let revise = remove + u64::from(self.revise_rate_percent);
        let rename = revise + u64::from(self.rename_rate_percent);
        if roll < remove {
            Operation::Remove
        } else if roll < revise {
            Operation::Revise
        } else if roll < rename {
            Operation::Rename
        } else {
            Operation::Publish
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_faults_when_rates_are_zero() {
        let fault = FaultConfig {
            transient_rate_percent: 0,
            terminal_rate_percent: 0,
            ..FaultConfig::default()
        };
        let mut rng = DeterministicRng::new(9);
        for _ in 0..100 {
            assert_eq!(fault.draw_stream_fault(&mut rng), StreamFault::None);
        }
    }

    #[test]
    fn transient_delay_is_within_bounds() {
        let fault = FaultConfig {
            transient_rate_percent: 100,
            min_retry_delay_ms: 10,
            max_retry_delay_ms: 20,
            ..FaultConfig::default()
        };
        let mut rng = DeterministicRng::new(4);
        for _ in 0..50 {
            match fault.draw_stream_fault(&mut rng) {
                StreamFault::Transient(delay) => {
                    assert!(delay >= Duration::from_millis(10));
                    assert!(delay <= fault.max_retry_delay());
                }
                other => panic!("expected transient fault, got {other:?}"),
            }
        }
    }

    #[test]
    fn terminal_wins_over_transient() {
        let fault = FaultConfig {
            transient_rate_percent: 100,
            terminal_rate_percent: 100,
            ..FaultConfig::default()
        };
        let mut rng = DeterministicRng::new(0);
        assert_eq!(fault.draw_stream_fault(&mut rng), StreamFault::Terminal);
    }

    #[test]
    fn publish_only_workload() {
        let fault = FaultConfig {
            remove_rate_percent: 0,
            revise_rate_percent: 0,
            rename_rate_percent: 0,
            ..FaultConfig::default()
        };
        let mut rng = DeterministicRng::new(5);
        for _ in 0..50 {
            assert_eq!(fault.draw_operation(&mut rng), Operation::Publish);
        }
    }
}
