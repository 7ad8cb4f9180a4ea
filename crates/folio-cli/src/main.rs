#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use output::OutputMode;
use std::env;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "folio: live, editable revision lists",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Output format (overrides `--json`, `FORMAT` and the user config).
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Run a scripted session against an in-memory log",
        long_about = "Execute a TOML script of steps (publish, revise, remove, rename, toggle,\n\
                      begin_rename, fail, wait) against an in-memory log with a live list\n\
                      subscribed to it, printing the list after every step.",
        after_help = "EXAMPLES:\n    # Run a script\n    folio session demo.toml\n\n\
                      # Use a specific engine config\n    folio session demo.toml --config folio.toml\n\n\
                      # One JSON object per step\n    folio session demo.toml --json"
    )]
    Session(cmd::session::SessionArgs),

    #[command(
        about = "Run a deterministic simulation campaign",
        long_about = "Run many seeds of randomized workload and stream faults through the\n\
                      engine and check convergence. Exits non-zero when any seed fails.",
        after_help = "EXAMPLES:\n    # Run 100 seeds\n    folio sim --seeds 100\n\n\
                      # Replay a failing seed\n    folio sim --replay 42"
    )]
    Sim(cmd::sim::SimArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("FOLIO_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "folio=debug,info"
        } else {
            "folio=info,warn"
        })
    });

    let format = env::var("FOLIO_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let output = output::resolve_output_mode(cli.format, cli.json)?;
    let project_root = env::current_dir()?;

    match cli.command {
        Commands::Session(ref args) => cmd::session::run_session_cmd(args, output, &project_root),
        Commands::Sim(ref args) => cmd::sim::run_sim(args, output),
    }
}
