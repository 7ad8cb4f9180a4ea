use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::accordion::AccordionConfig;
use crate::error::ErrorCode;
use crate::event::StreamOptions;
use crate::record::{Content, NAME_FIELD, Record};
use crate::resolve::DEFAULT_MAX_DEPTH;

/// Project settings, read from `.folio/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolioConfig {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub rename: RenameConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub resolve: ResolveConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_true")]
    pub sync: bool,
    #[serde(default = "default_true")]
    pub live: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sync: default_true(),
            live: default_true(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Content field the new name is written to.
    #[serde(default = "default_rename_field")]
    pub field: String,
}

impl Default for RenameConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            field: default_rename_field(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Records whose `type` is listed here are hidden.
    #[serde(default)]
    pub ignore_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

impl FolioConfig {
    /// Engine settings with the rename handler and ignore predicate built
    /// from this config.
    #[must_use]
    pub fn accordion_config(&self) -> AccordionConfig {
        let rename = self.rename.enabled.then(|| {
            let field = self.rename.field.clone();
            let rename: crate::accordion::RenameFn =
                Rc::new(move |_record: &Record, content: Content, name: &str| content.with(&field, name));
            rename
        });

        let is_ignored = (!self.filter.ignore_types.is_empty()).then(|| {
            let types = self.filter.ignore_types.clone();
            let is_ignored: crate::accordion::IgnoreFn = Rc::new(move |record: &Record| {
                record
                    .content()
                    .content_type()
                    .is_some_and(|kind| types.iter().any(|ignored| ignored == kind))
            });
            is_ignored
        });

        AccordionConfig {
            stream: StreamOptions {
                sync: self.stream.sync,
                live: self.stream.live,
            },
            rename,
            is_ignored,
        }
    }
}

/// Errors loading a config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Read { .. } => ErrorCode::ConfigReadFailed,
            Self::Parse { .. } => ErrorCode::ConfigParseError,
        }
    }
}

/// Per-user settings, read from the platform config directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
}

/// Parse one config file.
///
/// # Errors
///
/// The file cannot be read or is not valid TOML for [`FolioConfig`].
pub fn load_config_file(path: &Path) -> Result<FolioConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<FolioConfig>(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load `.folio/config.toml` under `project_root`; defaults when missing.
///
/// # Errors
///
/// The file exists but cannot be read or parsed.
pub fn load_project_config(project_root: &Path) -> Result<FolioConfig> {
    let path = project_root.join(".folio/config.toml");
    if !path.exists() {
        return Ok(FolioConfig::default());
    }

    load_config_file(&path).with_context(|| {
        format!("Failed to load project config from {}", project_root.display())
    })
}

/// Load `<config dir>/folio/config.toml`; defaults when missing.
///
/// # Errors
///
/// The file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("folio/config.toml");
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Pick the output mode: `--json`, then `FORMAT`, then the user config, then
/// `pretty` on a terminal and `text` otherwise.
///
/// # Errors
///
/// The user config cannot be loaded.
pub fn resolve_output_mode(cli_json: bool) -> Result<String> {
    let user = load_user_config()?;
    Ok(resolve_output(cli_json, user.output, env::var("FORMAT").ok()))
}

fn resolve_output(cli_json: bool, user_output: Option<String>, env_format: Option<String>) -> String {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some("pretty"),
            "text" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return "json".to_string();
    }

    if let Some(mode) = env_format.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if let Some(mode) = user_output.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if std::io::stdout().is_terminal() {
        "pretty".to_string()
    } else {
        "text".to_string()
    }
}

const fn default_true() -> bool {
    true
}

fn default_rename_field() -> String {
    NAME_FIELD.to_string()
}

const fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}
