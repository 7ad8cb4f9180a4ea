//! Revision appender.
//!
//! Builds the content of a new revision from an existing record, linking it
//! into the record's revision chain:
//!
//! - `revisionRoot` is inherited, or set to the record's own key when the
//!   record is the chain origin;
//! - `revisionBranch` points at the revision being edited (the record's key).
//!
//! The result is handed to a caller-supplied merge function (for example the
//! rename handler) that overlays the edit before publishing.

use crate::record::{Content, Record};

/// Copy `record`'s content and link the copy into the revision chain.
///
/// Pure: no side effects, no I/O.
#[must_use]
pub fn make_revision(record: &Record) -> Content {
    let mut content = record.value.content.clone();
    let root = content
        .revision_root
        .clone()
        .unwrap_or_else(|| record.key.clone());
    content.revision_root = Some(root);
    content.revision_branch = Some(record.key.clone());
    content
}
