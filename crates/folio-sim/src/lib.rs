//! folio-sim library.
//!
//! Deterministic simulation of a live list against a faulty log. Each seed
//! drives a random workload (publishes, revisions, removals, renames) into a
//! [`MemoryLog`] while an [`Accordion`] is subscribed, injecting transient
//! and terminal stream failures between rounds. Time runs on a paused Tokio
//! clock, so retry delays cost nothing and every run replays exactly.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod campaign;
pub mod fault;
pub mod oracle;
pub mod rng;

use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use folio_core::config::FolioConfig;
use folio_core::record::TYPE_FIELD;
use folio_core::{
    Accordion, Content, ItemPhase, MemoryLog, PrototypeResolver, RecordKey, StreamError,
    make_revision,
};
use serde::{Deserialize, Serialize};
use tokio::task::LocalSet;
use tracing::{debug, trace};

use crate::fault::{FaultConfig, Operation, StreamFault};
use crate::rng::DeterministicRng;

/// Parameters of a single simulated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub rounds: u64,
    /// Workload operations per round.
    pub ops_per_round: usize,
    pub fault: FaultConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            rounds: 24,
            ops_per_round: 4,
            fault: FaultConfig::default(),
        }
    }
}

/// One step of the simulation trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEventKind {
    Publish { key: RecordKey },
    Revise { identity: RecordKey, key: RecordKey },
    Remove { identity: RecordKey },
    Rename { identity: RecordKey, name: String, rejected: bool },
    /// A user intent the engine refused even though it should have applied.
    IntentRejected { identity: RecordKey, reason: String },
    StreamFailure { transient: bool, delay_ms: u64, subscribers: usize },
    Restarted { restarts: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEvent {
    pub round: u64,
    #[serde(flatten)]
    pub kind: TraceEventKind,
}

/// Final state of a run, as inspected by the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimulationResult {
    pub seed: u64,
    pub trace: Vec<TraceEvent>,
    /// Log heads in order of first appearance.
    pub heads: Vec<RecordKey>,
    /// Keys held by the collector, in collection order.
    pub collected: Vec<RecordKey>,
    /// Identities of the collected records, in collection order.
    pub collected_identities: Vec<RecordKey>,
    /// Identities of the rendered views, in order.
    pub view_identities: Vec<RecordKey>,
    /// Collected keys right after a terminal failure.
    pub frozen: Option<Vec<RecordKey>>,
    pub restarts: u64,
    /// Restarts counted after a terminal failure (must stay zero).
    pub restarts_after_terminal: u64,
    pub terminal_failure: bool,
    /// A retry, a terminal failure, or a rejected publish happened.
    pub interesting_state_reached: bool,
}

/// Deterministic driver for one seed.
#[derive(Debug)]
pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    trace: Vec<TraceEvent>,
}

async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

fn keys(records: &[Rc<folio_core::Record>]) -> Vec<RecordKey> {
    records.iter().map(|record| record.key.clone()).collect()
}

impl Simulator {
    /// Create a simulator.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is out of range.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        if config.rounds == 0 {
            bail!("rounds must be > 0");
        }
        if config.fault.min_retry_delay_ms > config.fault.max_retry_delay_ms {
            bail!("min_retry_delay_ms must not exceed max_retry_delay_ms");
        }
        Ok(Self {
            config,
            rng: DeterministicRng::new(config.seed),
            trace: Vec::new(),
        })
    }

    /// Run the simulation on a fresh paused-clock runtime.
    ///
    /// Must not be called from inside another Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be built.
    pub fn run(&mut self) -> Result<SimulationResult> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .context("failed to build simulation runtime")?;
        let local = LocalSet::new();
        Ok(runtime.block_on(local.run_until(self.drive())))
    }

    async fn drive(&mut self) -> SimulationResult {
        let log = MemoryLog::new();
        let resolver = PrototypeResolver::new(Rc::new(log.clone()));
        let accordion = Accordion::new(
            FolioConfig::default().accordion_config(),
            Rc::new(resolver),
            Rc::new(log.clone()),
        );
        accordion.start(log.clone());
        settle().await;

        let wait = self.config.fault.max_retry_delay() + Duration::from_millis(1);
        let mut terminal_restarts: Option<u64> = None;
        let mut frozen = None;
        let mut rejected_publishes = false;
        let mut last_restarts = 0;

        for round in 0..self.config.rounds {
            for step in 0..self.config.ops_per_round {
                rejected_publishes |= self.step(round, step, &log, &accordion);
                settle().await;
            }

            if terminal_restarts.is_none() {
                match self.config.fault.draw_stream_fault(&mut self.rng) {
                    StreamFault::None => {}
                    StreamFault::Transient(delay) => {
                        let subscribers =
                            log.fail_subscribers(&StreamError::transient("simulated interruption", delay));
                        self.record(round, TraceEventKind::StreamFailure {
                            transient: true,
                            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            subscribers,
                        });
                    }
                    StreamFault::Terminal => {
                        let subscribers =
                            log.fail_subscribers(&StreamError::terminal("simulated shutdown"));
                        self.record(round, TraceEventKind::StreamFailure {
                            transient: false,
                            delay_ms: 0,
                            subscribers,
                        });
                        settle().await;
                        terminal_restarts = Some(accordion.restarts());
                        frozen = Some(keys(&accordion.records()));
                    }
                }
            }

            settle().await;
            tokio::time::sleep(wait).await;
            settle().await;

            let restarts = accordion.restarts();
            if restarts != last_restarts {
                last_restarts = restarts;
                self.record(round, TraceEventKind::Restarted { restarts });
            }
        }

        settle().await;
        tokio::time::sleep(wait).await;
        settle().await;

        let records = accordion.records();
        let restarts = accordion.restarts();
        let terminal_failure = terminal_restarts.is_some();
        SimulationResult {
            seed: self.config.seed,
            trace: std::mem::take(&mut self.trace),
            heads: keys(&log.heads()),
            collected: keys(&records),
            collected_identities: records.iter().map(|r| r.identity().clone()).collect(),
            view_identities: accordion.views().into_iter().map(|v| v.identity).collect(),
            frozen,
            restarts,
            restarts_after_terminal: terminal_restarts.map_or(0, |at| restarts.saturating_sub(at)),
            terminal_failure,
            interesting_state_reached: restarts > 0 || terminal_failure || rejected_publishes,
        }
    }

    /// Apply one workload operation. Returns whether a publish was rejected.
    fn step(&mut self, round: u64, step: usize, log: &MemoryLog, accordion: &Accordion) -> bool {
        let operation = self.config.fault.draw_operation(&mut self.rng);
        trace!(round, step, ?operation, "sim step");

        match operation {
            Operation::Revise => {
                let heads = log.heads();
                if let Some(head) = self.rng.next_index(heads.len()).map(|i| &heads[i]) {
                    let record = log.append(make_revision(head).with("revision", round));
                    self.record(round, TraceEventKind::Revise {
                        identity: record.identity().clone(),
                        key: record.key.clone(),
                    });
                    return false;
                }
            }
            Operation::Remove => {
                let heads = log.heads();
                if let Some(head) = self.rng.next_index(heads.len()).map(|i| &heads[i]) {
                    let identity = head.identity().clone();
                    log.remove(&identity);
                    self.record(round, TraceEventKind::Remove { identity });
                    return false;
                }
            }
            Operation::Rename => {
                let views = accordion.views();
                if let Some(view) = self.rng.next_index(views.len()).map(|i| &views[i]) {
                    return self.rename(round, step, log, accordion, view.identity.clone(), view.phase);
                }
            }
            Operation::Publish => {}
        }

        let content = Content::new()
            .with_name(&format!("item {round}.{step}"))
            .with(TYPE_FIELD, "page");
        let record = log.append(content);
        self.record(round, TraceEventKind::Publish {
            key: record.key.clone(),
        });
        false
    }

    fn rename(
        &mut self,
        round: u64,
        step: usize,
        log: &MemoryLog,
        accordion: &Accordion,
        identity: RecordKey,
        phase: ItemPhase,
    ) -> bool {
        let name = format!("renamed {round}.{step}");
        let rejected = self.rng.hit_rate_percent(self.config.fault.publish_failure_percent);

        let mut outcome = Ok(());
        if phase == ItemPhase::Closed {
            outcome = accordion.toggle(&identity).map(|_| ());
        }
        if outcome.is_ok() {
            outcome = accordion.begin_rename(&identity);
        }
        if outcome.is_ok() {
            if rejected {
                log.fail_next_publish("simulated rejection");
            }
            outcome = accordion.submit_rename(&identity, &name).map(|_| ());
        }

        match outcome {
            Ok(()) => {
                debug!(%identity, rejected, "sim rename");
                self.record(round, TraceEventKind::Rename {
                    identity,
                    name,
                    rejected,
                });
                rejected
            }
            Err(err) => {
                self.record(round, TraceEventKind::IntentRejected {
                    identity,
                    reason: format!("{}: {err}", err.code()),
                });
                false
            }
        }
    }

    fn record(&mut self, round: u64, kind: TraceEventKind) {
        self.trace.push(TraceEvent { round, kind });
    }
}
