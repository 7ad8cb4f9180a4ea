//! Prototype resolution.
//!
//! A record may name another record as its `prototype`. Its effective value
//! is computed by overlaying the chain: the farthest prototype's fields first,
//! each nearer prototype on top, and the record's own fields last. Revision
//! links (`revisionRoot`, `revisionBranch`) are never inherited and the
//! resolved record keeps its own key.
//!
//! The engine only sees the [`Resolve`] trait and treats resolution as an
//! opaque asynchronous transform. [`PrototypeResolver`] walks the chain
//! through a [`Lookup`]; [`IdentityResolver`] resolves every record to itself.

use std::collections::HashSet;
use std::rc::Rc;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use serde_json::Map;

use crate::error::ErrorCode;
use crate::record::{Content, Record, RecordKey};

/// Default bound on prototype chain length.
pub const DEFAULT_MAX_DEPTH: usize = 16;

/// Errors from a [`Lookup`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("lookup of {key} failed: {reason}")]
pub struct LookupError {
    pub key: RecordKey,
    pub reason: String,
}

/// Errors from prototype resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// A prototype key does not name a known record.
    #[error("prototype {key} not found")]
    MissingPrototype { key: RecordKey },

    /// The chain loops back onto a record already visited.
    #[error("prototype chain cycles back to {key}")]
    Cycle { key: RecordKey },

    /// The chain is longer than the configured bound.
    #[error("prototype chain exceeds {max_depth} links")]
    TooDeep { max_depth: usize },

    #[error(transparent)]
    Lookup(#[from] LookupError),
}

impl ResolveError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::MissingPrototype { .. } => ErrorCode::PrototypeMissing,
            Self::Cycle { .. } => ErrorCode::PrototypeCycle,
            Self::TooDeep { .. } => ErrorCode::PrototypeTooDeep,
            Self::Lookup(_) => ErrorCode::LookupFailed,
        }
    }
}

/// Resolved value of a record. Must not panic; failures are values.
pub trait Resolve {
    fn resolve(&self, record: Rc<Record>) -> LocalBoxFuture<'static, Result<Rc<Record>, ResolveError>>;
}

impl<F> Resolve for F
where
    F: Fn(Rc<Record>) -> LocalBoxFuture<'static, Result<Rc<Record>, ResolveError>>,
{
    fn resolve(&self, record: Rc<Record>) -> LocalBoxFuture<'static, Result<Rc<Record>, ResolveError>> {
        self(record)
    }
}

/// Fetch a record by key.
pub trait Lookup {
    fn get(&self, key: &RecordKey) -> LocalBoxFuture<'static, Result<Option<Rc<Record>>, LookupError>>;
}

/// Resolves every record to itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver;

impl Resolve for IdentityResolver {
    fn resolve(&self, record: Rc<Record>) -> LocalBoxFuture<'static, Result<Rc<Record>, ResolveError>> {
        futures::future::ready(Ok(record)).boxed_local()
    }
}

/// Walks `prototype` links through a [`Lookup`] and overlays the chain.
#[derive(Debug)]
pub struct PrototypeResolver<L> {
    lookup: Rc<L>,
    max_depth: usize,
}

impl<L> PrototypeResolver<L> {
    /// Resolver with the default depth bound.
    pub fn new(lookup: Rc<L>) -> Self {
        Self {
            lookup,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Builder: bound the number of prototype links followed.
    #[must_use]
    pub const fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

impl<L: Lookup + 'static> Resolve for PrototypeResolver<L> {
    fn resolve(&self, record: Rc<Record>) -> LocalBoxFuture<'static, Result<Rc<Record>, ResolveError>> {
        let lookup = Rc::clone(&self.lookup);
        let max_depth = self.max_depth;
        async move {
            let chain = collect_chain(lookup.as_ref(), &record, max_depth).await?;
            if chain.is_empty() {
                return Ok(record);
            }
            Ok(Rc::new(overlay(&record, &chain)))
        }
        .boxed_local()
    }
}

/// Prototypes of `record`, nearest first.
async fn collect_chain<L: Lookup>(
    lookup: &L,
    record: &Record,
    max_depth: usize,
) -> Result<Vec<Rc<Record>>, ResolveError> {
    let mut chain = Vec::new();
    let mut seen = HashSet::from([record.key.clone()]);
    let mut next = record.content().prototype();

    while let Some(key) = next {
        if chain.len() >= max_depth {
            return Err(ResolveError::TooDeep { max_depth });
        }
        if !seen.insert(key.clone()) {
            return Err(ResolveError::Cycle { key });
        }
        let prototype = lookup
            .get(&key)
            .await?
            .ok_or(ResolveError::MissingPrototype { key })?;
        next = prototype.content().prototype();
        chain.push(prototype);
    }

    Ok(chain)
}

fn overlay(record: &Record, chain: &[Rc<Record>]) -> Record {
    let mut fields = Map::new();
    for prototype in chain.iter().rev() {
        for (field, value) in &prototype.content().fields {
            fields.insert(field.clone(), value.clone());
        }
    }
    for (field, value) in &record.content().fields {
        fields.insert(field.clone(), value.clone());
    }

    Record::new(
        record.key.clone(),
        Content {
            revision_root: record.content().revision_root.clone(),
            revision_branch: record.content().revision_branch.clone(),
            fields,
        },
    )
}
