//! Per-item interaction state.
//!
//! Each rendered record owns one [`ItemMachine`]:
//!
//! ```text
//! Closed --toggle--> Open --begin_rename--> Renaming --submit_rename--> Open
//!        <--toggle--
//! ```
//!
//! Toggling while renaming is rejected. Submitting a rename builds a new
//! revision, hands it to the rename handler and publishes the result in the
//! background. The machine returns to `Open` whatever the publish outcome;
//! failures are logged and never retried.

use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use tracing::{debug, error};

use crate::error::ErrorCode;
use crate::publish::Publish;
use crate::record::{Content, Record};
use crate::revision::make_revision;

/// Merge a rename into freshly made revision content.
///
/// Receives the edited record, the revision content from
/// [`make_revision`], and the submitted name. Must be pure.
pub type RenameFn = Rc<dyn Fn(&Record, Content, &str) -> Content>;

/// Lifecycle phase of one rendered record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemPhase {
    #[default]
    Closed,
    Open,
    Renaming,
}

impl ItemPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::Renaming => "renaming",
        }
    }
}

impl fmt::Display for ItemPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User intent applied to an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemAction {
    Toggle,
    BeginRename,
    SubmitRename,
}

impl ItemAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Toggle => "toggle",
            Self::BeginRename => "begin rename",
            Self::SubmitRename => "submit rename",
        }
    }
}

impl fmt::Display for ItemAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action was not allowed in the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action} while {phase}")]
pub struct TransitionError {
    pub phase: ItemPhase,
    pub action: ItemAction,
}

impl TransitionError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::InvalidTransition
    }
}

/// State machine for one rendered record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemMachine {
    phase: ItemPhase,
}

impl ItemMachine {
    /// A closed item.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn phase(&self) -> ItemPhase {
        self.phase
    }

    /// Flip between `Closed` and `Open`.
    ///
    /// # Errors
    ///
    /// Rejected while renaming; the phase is left unchanged.
    pub fn toggle(&mut self) -> Result<ItemPhase, TransitionError> {
        self.phase = match self.phase {
            ItemPhase::Closed => ItemPhase::Open,
            ItemPhase::Open => ItemPhase::Closed,
            ItemPhase::Renaming => return Err(self.rejected(ItemAction::Toggle)),
        };
        Ok(self.phase)
    }

    /// Enter the rename editor.
    ///
    /// # Errors
    ///
    /// Only allowed from `Open`.
    pub fn begin_rename(&mut self) -> Result<(), TransitionError> {
        if self.phase != ItemPhase::Open {
            return Err(self.rejected(ItemAction::BeginRename));
        }
        self.phase = ItemPhase::Renaming;
        Ok(())
    }

    /// Leave the editor, publishing a renamed revision of `record`.
    ///
    /// The publish runs as a local task; the machine is back in `Open` before
    /// it starts. Returns the content handed to the publisher.
    ///
    /// # Errors
    ///
    /// Only allowed from `Renaming`.
    pub fn submit_rename(
        &mut self,
        record: &Record,
        new_name: &str,
        rename: &RenameFn,
        publisher: &Rc<dyn Publish>,
    ) -> Result<Content, TransitionError> {
        if self.phase != ItemPhase::Renaming {
            return Err(self.rejected(ItemAction::SubmitRename));
        }
        self.phase = ItemPhase::Open;

        let content = rename(record, make_revision(record), new_name);
        let identity = record.identity().clone();
        let branch = record.key.clone();
        let publish = publisher.publish(content.clone());
        tokio::task::spawn_local(async move {
            match publish.await {
                Ok(key) => debug!(%identity, %branch, %key, "rename published"),
                Err(err) => error!(
                    code = %err.code(),
                    %identity,
                    %branch,
                    error = %err,
                    "rename publish failed"
                ),
            }
        });

        Ok(content)
    }

    const fn rejected(&self, action: ItemAction) -> TransitionError {
        TransitionError {
            phase: self.phase,
            action,
        }
    }
}
