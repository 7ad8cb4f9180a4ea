//! Shared output layer for pretty/text/JSON parity across CLI commands.
//!
//! # Output mode resolution
//!
//! Precedence (highest wins):
//! 1. `--format` / `--json` flag
//! 2. `FORMAT` env var → `"pretty"` | `"text"` | `"json"`
//! 3. `output` in the user config (`~/.config/folio/config.toml`)
//! 4. Default: [`OutputMode::Pretty`] if stdout is a TTY; [`OutputMode::Text`] if piped.

use std::io::{self, Write};

use anyhow::Result;
use clap::ValueEnum;
use folio_core::{ItemPhase, ItemView, ViewResolution};

/// Shared width for human pretty separators.
pub const PRETTY_RULE_WIDTH: usize = 72;

/// Write a horizontal separator used by pretty human output.
pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = PRETTY_RULE_WIDTH)
}

/// Write a section heading followed by a separator.
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    pretty_rule(w)
}

/// Render a left-aligned key/value line in human output.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<12} {}", format!("{key}:"), value.as_ref())
}

/// The three output modes supported by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Human-optimized output (sections, visual framing).
    Pretty,
    /// Plain text, one line per row.
    Text,
    /// Machine-readable JSON, one object per line.
    Json,
}

impl OutputMode {
    fn from_name(name: &str) -> Self {
        match name {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            _ => Self::Text,
        }
    }
}

/// Resolve the output mode from flags, environment, user config and TTY.
///
/// # Errors
///
/// Returns an error if the user config exists but cannot be parsed.
pub fn resolve_output_mode(format_flag: Option<OutputMode>, json_flag: bool) -> Result<OutputMode> {
    if let Some(mode) = format_flag {
        return Ok(mode);
    }
    let name = folio_core::config::resolve_output_mode(json_flag)?;
    Ok(OutputMode::from_name(&name))
}

const fn phase_marker(phase: ItemPhase) -> char {
    match phase {
        ItemPhase::Closed => '+',
        ItemPhase::Open => '-',
        ItemPhase::Renaming => '*',
    }
}

/// One line per view: `<marker> <name>` plus a resolution note when the row
/// is not ready.
pub fn render_views(w: &mut dyn Write, views: &[ItemView]) -> io::Result<()> {
    if views.is_empty() {
        return writeln!(w, "  (empty)");
    }
    for view in views {
        let name = view.name.as_deref().unwrap_or("(unnamed)");
        let note = match &view.resolution {
            ViewResolution::Ready => String::new(),
            ViewResolution::Pending => " (pending)".to_string(),
            ViewResolution::Failed(reason) => format!(" (failed: {reason})"),
        };
        writeln!(w, "  {} {name}{note}", phase_marker(view.phase))?;
    }
    Ok(())
}
