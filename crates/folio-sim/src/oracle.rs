use std::collections::{BTreeSet, HashSet};

use folio_core::RecordKey;

use crate::{SimulationResult, TraceEventKind};

// ── Core result types ─────────────────────────────────────────────────────────

/// Oracle result for an invariant check.
///
/// Returned by each checker and by [`ConvergenceOracle::check_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResult {
    /// `true` iff no violations were found.
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    #[must_use]
    const fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    #[must_use]
    const fn fail(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: false,
            violations,
        }
    }

    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        if violations.is_empty() {
            Self::pass()
        } else {
            Self::fail(violations)
        }
    }

    /// Merge another result into this one (failures accumulate).
    #[must_use]
    fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

// ── Invariant violation diagnostics ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// The collector does not hold exactly the log heads after quiescence.
    Convergence {
        /// Heads the collector is missing.
        missing: Vec<RecordKey>,
        /// Keys the collector holds that are not heads.
        extra: Vec<RecordKey>,
    },

    /// Same keys, different order.
    OrderMismatch {
        expected: Vec<RecordKey>,
        actual: Vec<RecordKey>,
    },

    /// Two collected records share a chain identity.
    DuplicateIdentity { identity: RecordKey },

    /// Rendered views disagree with the collected records.
    ViewMismatch {
        views: Vec<RecordKey>,
        collected: Vec<RecordKey>,
    },

    /// The collector restarted after a terminal failure.
    RetryAfterTerminal { restarts: u64 },

    /// The collection changed after a terminal failure.
    FrozenStateChanged {
        frozen: Vec<RecordKey>,
        actual: Vec<RecordKey>,
    },

    /// A rename intent on a visible item was refused.
    IntentRejected { identity: RecordKey, reason: String },
}

// ── Oracle ───────────────────────────────────────────────────────────────────

/// Checks the final state of a simulation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvergenceOracle;

impl ConvergenceOracle {
    /// Run every check and merge the results.
    #[must_use]
    pub fn check_all(result: &SimulationResult) -> OracleResult {
        Self::check_convergence(result)
            .merge(Self::check_unique_identities(result))
            .merge(Self::check_views(result))
            .merge(Self::check_terminal(result))
            .merge(Self::check_intents(result))
    }

    /// Without a terminal failure the collector must mirror the log heads,
    /// in order.
    #[must_use]
    pub fn check_convergence(result: &SimulationResult) -> OracleResult {
        if result.terminal_failure {
            return OracleResult::pass();
        }

        let expected: BTreeSet<&RecordKey> = result.heads.iter().collect();
        let actual: BTreeSet<&RecordKey> = result.collected.iter().collect();
        if expected != actual {
            return OracleResult::fail(vec![InvariantViolation::Convergence {
                missing: expected.difference(&actual).map(|k| (*k).clone()).collect(),
                extra: actual.difference(&expected).map(|k| (*k).clone()).collect(),
            }]);
        }
        if result.heads != result.collected {
            return OracleResult::fail(vec![InvariantViolation::OrderMismatch {
                expected: result.heads.clone(),
                actual: result.collected.clone(),
            }]);
        }
        OracleResult::pass()
    }

    #[must_use]
    pub fn check_unique_identities(result: &SimulationResult) -> OracleResult {
        let mut seen = HashSet::new();
        let violations = result
            .collected_identities
            .iter()
            .filter(|identity| !seen.insert(*identity))
            .map(|identity| InvariantViolation::DuplicateIdentity {
                identity: identity.clone(),
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    /// With nothing filtered, every collected record renders exactly one
    /// view in collection order.
    #[must_use]
    pub fn check_views(result: &SimulationResult) -> OracleResult {
        if result.view_identities == result.collected_identities {
            OracleResult::pass()
        } else {
            OracleResult::fail(vec![InvariantViolation::ViewMismatch {
                views: result.view_identities.clone(),
                collected: result.collected_identities.clone(),
            }])
        }
    }

    #[must_use]
    pub fn check_terminal(result: &SimulationResult) -> OracleResult {
        let mut violations = Vec::new();
        if result.restarts_after_terminal > 0 {
            violations.push(InvariantViolation::RetryAfterTerminal {
                restarts: result.restarts_after_terminal,
            });
        }
        if let Some(frozen) = &result.frozen {
            if frozen != &result.collected {
                violations.push(InvariantViolation::FrozenStateChanged {
                    frozen: frozen.clone(),
                    actual: result.collected.clone(),
                });
            }
        }
        OracleResult::from_violations(violations)
    }

    #[must_use]
    pub fn check_intents(result: &SimulationResult) -> OracleResult {
        let violations = result
            .trace
            .iter()
            .filter_map(|event| match &event.kind {
                TraceEventKind::IntentRejected { identity, reason } => {
                    Some(InvariantViolation::IntentRejected {
                        identity: identity.clone(),
                        reason: reason.clone(),
                    })
                }
                _ => None,
            })
            .collect();
        OracleResult::from_violations(violations)
    }
}
