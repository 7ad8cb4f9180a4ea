//! `folio session`: drive a live list from a TOML script.
//!
//! A script is a list of `[[step]]` tables executed in order against an
//! in-memory log with one accordion subscribed to it. Records are referred to
//! by script labels; a label names the chain identity created by its
//! `publish` step. After every step the engine is allowed to settle and the
//! current rows are printed.
//!
//! ```toml
//! [[step]]
//! action = "publish"
//! label = "home"
//! name = "Home"
//!
//! [[step]]
//! action = "toggle"
//! target = "home"
//!
//! [[step]]
//! action = "fail"
//! delay_ms = 500
//!
//! [[step]]
//! action = "wait"
//! ms = 500
//! ```
//!
//! Time runs on a paused clock, so `wait` steps return immediately while
//! still firing every retry that falls due.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;
use folio_core::config::{FolioConfig, load_config_file, load_project_config};
use folio_core::record::{NAME_FIELD, PROTOTYPE_FIELD, TYPE_FIELD};
use folio_core::{
    Accordion, CollectorStatus, Content, ItemError, ItemView, MemoryLog, PrototypeResolver,
    RecordKey, StreamError, make_revision,
};
use serde::{Deserialize, Serialize};
use tokio::task::LocalSet;
use tracing::{debug, info};

use crate::output::{OutputMode, pretty_kv, pretty_section, render_views};

/// Arguments for `folio session`.
#[derive(Args, Debug)]
pub struct SessionArgs {
    /// Script of steps to execute.
    pub script: PathBuf,

    /// Engine config file (defaults to `.folio/config.toml` in the current
    /// directory, or built-in defaults when that is missing).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// A parsed session script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Script {
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

const fn default_fail_delay_ms() -> u64 {
    1_000
}

/// One scripted step.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Append a new chain origin and bind it to `label`.
    Publish {
        label: String,
        name: Option<String>,
        #[serde(rename = "type")]
        content_type: Option<String>,
        /// Label whose current head becomes this record's prototype.
        prototype: Option<String>,
    },
    /// Append a revision of the target's current head.
    Revise { target: String, name: Option<String> },
    /// Remove the target's chain from the log heads.
    Remove { target: String },
    Toggle { target: String },
    BeginRename { target: String },
    /// Submit a rename; `reject = true` makes the log refuse the publish.
    Rename {
        target: String,
        name: String,
        #[serde(default)]
        reject: bool,
    },
    /// Fail every live subscription.
    Fail {
        #[serde(default)]
        terminal: bool,
        #[serde(default = "default_fail_delay_ms")]
        delay_ms: u64,
        message: Option<String>,
    },
    /// Let simulated time pass.
    Wait { ms: u64 },
}

impl Step {
    fn describe(&self) -> String {
        match self {
            Self::Publish { label, .. } => format!("publish {label}"),
            Self::Revise { target, .. } => format!("revise {target}"),
            Self::Remove { target } => format!("remove {target}"),
            Self::Toggle { target } => format!("toggle {target}"),
            Self::BeginRename { target } => format!("begin_rename {target}"),
            Self::Rename { target, name, reject } => {
                let suffix = if *reject { " (rejected)" } else { "" };
                format!("rename {target} -> {name}{suffix}")
            }
            Self::Fail { terminal: true, .. } => "fail terminal".to_string(),
            Self::Fail { delay_ms, .. } => format!("fail transient {delay_ms}ms"),
            Self::Wait { ms } => format!("wait {ms}ms"),
        }
    }
}

/// Parse a script from TOML text.
///
/// # Errors
///
/// Returns an error if the text is not a valid script.
pub fn parse_script(text: &str) -> Result<Script> {
    toml::from_str(text).context("invalid session script")
}

/// JSON line printed after each step.
#[derive(Debug, Serialize)]
struct StepReport<'a> {
    step: usize,
    action: &'a str,
    status: String,
    error: Option<String>,
    views: Vec<ItemView>,
}

fn status_label(status: &CollectorStatus) -> String {
    match status {
        CollectorStatus::Idle => "idle".to_string(),
        CollectorStatus::Streaming => "streaming".to_string(),
        CollectorStatus::RetryPending { delay } => format!("retry in {}ms", delay.as_millis()),
        CollectorStatus::Ended => "ended".to_string(),
        CollectorStatus::Failed(err) => format!("failed: {err}"),
        CollectorStatus::Aborted => "aborted".to_string(),
    }
}

fn intent_error(err: &ItemError) -> String {
    format!("{}: {err}", err.code())
}

async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

struct Session {
    log: MemoryLog,
    accordion: Accordion,
    labels: HashMap<String, RecordKey>,
}

impl Session {
    fn new(config: &FolioConfig) -> Self {
        let log = MemoryLog::new();
        let resolver =
            PrototypeResolver::new(Rc::new(log.clone())).with_max_depth(config.resolve.max_depth);
        let accordion = Accordion::new(
            config.accordion_config(),
            Rc::new(resolver),
            Rc::new(log.clone()),
        );
        Self {
            log,
            accordion,
            labels: HashMap::new(),
        }
    }

    fn identity(&self, label: &str) -> Result<RecordKey> {
        self.labels
            .get(label)
            .cloned()
            .with_context(|| format!("unknown label `{label}`"))
    }

    fn head_key(&self, label: &str) -> Result<RecordKey> {
        let identity = self.identity(label)?;
        self.log
            .head(&identity)
            .map(|head| head.key.clone())
            .with_context(|| format!("`{label}` has been removed"))
    }

    /// Apply one step. Script mistakes are errors; refused user intents are
    /// returned as a message and the session continues.
    async fn apply(&mut self, step: &Step) -> Result<Option<String>> {
        match step {
            Step::Publish {
                label,
                name,
                content_type,
                prototype,
            } => {
                if self.labels.contains_key(label) {
                    bail!("label `{label}` is already bound");
                }
                let mut content = Content::new();
                if let Some(name) = name {
                    content.set(NAME_FIELD, name.as_str());
                }
                if let Some(content_type) = content_type {
                    content.set(TYPE_FIELD, content_type.as_str());
                }
                if let Some(prototype) = prototype {
                    content.set(PROTOTYPE_FIELD, self.head_key(prototype)?.as_str());
                }
                let record = self.log.append(content);
                self.labels.insert(label.clone(), record.identity().clone());
            }
            Step::Revise { target, name } => {
                let identity = self.identity(target)?;
                let head = self
                    .log
                    .head(&identity)
                    .with_context(|| format!("`{target}` has been removed"))?;
                let mut content = make_revision(&head);
                if let Some(name) = name {
                    content.set(NAME_FIELD, name.as_str());
                }
                self.log.append(content);
            }
            Step::Remove { target } => {
                let identity = self.identity(target)?;
                if self.log.remove(&identity).is_none() {
                    bail!("`{target}` has already been removed");
                }
            }
            Step::Toggle { target } => {
                let identity = self.identity(target)?;
                if let Err(err) = self.accordion.toggle(&identity) {
                    return Ok(Some(intent_error(&err)));
                }
            }
            Step::BeginRename { target } => {
                let identity = self.identity(target)?;
                if let Err(err) = self.accordion.begin_rename(&identity) {
                    return Ok(Some(intent_error(&err)));
                }
            }
            Step::Rename {
                target,
                name,
                reject,
            } => {
                let identity = self.identity(target)?;
                if *reject {
                    self.log.fail_next_publish("rejected by script");
                }
                if let Err(err) = self.accordion.submit_rename(&identity, name) {
                    return Ok(Some(intent_error(&err)));
                }
            }
            Step::Fail {
                terminal,
                delay_ms,
                message,
            } => {
                let error = if *terminal {
                    StreamError::terminal(message.clone().unwrap_or_else(|| "terminated by script".to_string()))
                } else {
                    StreamError::transient(
                        message.clone().unwrap_or_else(|| "interrupted by script".to_string()),
                        Duration::from_millis(*delay_ms),
                    )
                };
                let failed = self.log.fail_subscribers(&error);
                debug!(failed, "script failed subscribers");
            }
            Step::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
        }
        Ok(None)
    }

    fn report(&self, w: &mut dyn Write, mode: OutputMode, step: usize, action: &str, error: Option<String>) -> Result<()> {
        let views = self.accordion.views();
        let status = status_label(&self.accordion.collector_status());
        match mode {
            OutputMode::Json => {
                let report = StepReport {
                    step,
                    action,
                    status,
                    error,
                    views,
                };
                serde_json::to_writer(&mut *w, &report)?;
                writeln!(w)?;
            }
            OutputMode::Text => {
                writeln!(w, "step {step}: {action} ({status})")?;
                if let Some(error) = error {
                    writeln!(w, "  error: {error}")?;
                }
                render_views(w, &views)?;
            }
            OutputMode::Pretty => {
                pretty_section(w, &format!("Step {step}: {action}"))?;
                pretty_kv(w, "Stream", status)?;
                if let Some(error) = error {
                    pretty_kv(w, "Error", error)?;
                }
                render_views(w, &views)?;
                writeln!(w)?;
            }
        }
        Ok(())
    }
}

/// Execute `script` and write a rendering after every step.
///
/// # Errors
///
/// Returns an error for script mistakes (unknown labels, removing twice),
/// runtime construction failures, and write failures.
pub fn run_session(script: &Script, config: &FolioConfig, mode: OutputMode, w: &mut dyn Write) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .context("failed to build session runtime")?;
    let local = LocalSet::new();

    runtime.block_on(local.run_until(async {
        let mut session = Session::new(config);
        session.accordion.start(session.log.clone());
        settle().await;
        session.report(w, mode, 0, "start", None)?;

        for (index, step) in script.steps.iter().enumerate() {
            let number = index + 1;
            let error = session
                .apply(step)
                .await
                .with_context(|| format!("step {number} ({})", step.describe()))?;
            settle().await;
            session.report(w, mode, number, &step.describe(), error)?;
        }

        session.accordion.abort();
        Ok(())
    }))
}

/// Execute `folio session`.
pub fn run_session_cmd(args: &SessionArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let text = fs::read_to_string(&args.script)
        .with_context(|| format!("failed to read script {}", args.script.display()))?;
    let script = parse_script(&text)
        .with_context(|| format!("in {}", args.script.display()))?;
    let config = match &args.config {
        Some(path) => load_config_file(path)?,
        None => load_project_config(project_root)?,
    };
    info!(steps = script.steps.len(), "session start");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    run_session(&script, &config, output, &mut out)
}
