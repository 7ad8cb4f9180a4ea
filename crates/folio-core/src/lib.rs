//! folio-core library.
//!
//! The live revision-list engine: records and revision chains, the mutation
//! collector that folds a live event stream into an ordered collection, the
//! retry scheduler, the memoizing projection with prototype resolution, and
//! the per-item state machine that turns rename intents into new revisions.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums per concern, each mapped to an
//!   [`error::ErrorCode`]. Binaries use `anyhow::Result`.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).
//! - **Scheduling**: everything runs on a single thread. Background work is
//!   spawned with `tokio::task::spawn_local`, so callers must drive the engine
//!   inside a `tokio::task::LocalSet`.

pub mod accordion;
pub mod collection;
pub mod collector;
pub mod config;
pub mod error;
pub mod event;
pub mod item;
pub mod log;
pub mod projection;
pub mod publish;
pub mod record;
pub mod resolve;
pub mod retry;
pub mod revision;

pub use accordion::{
    Accordion, AccordionConfig, IgnoreFn, ItemError, ItemView, ListenerId, RenameFn, ViewResolution,
};
pub use collection::{Collection, CollectionDiff, CollectionView, SubscriberId};
pub use collector::{CollectorStatus, MutationCollector};
pub use config::{ConfigError, FolioConfig, load_project_config};
pub use event::{EventSource, EventStream, Mutation, MutationKind, StreamError, StreamItem, StreamOptions};
pub use item::{ItemAction, ItemMachine, ItemPhase, TransitionError};
pub use log::MemoryLog;
pub use projection::{Projection, ProjectionOptions, Resolution, ResolvedItem};
pub use publish::{Publish, PublishError};
pub use record::{Content, Record, RecordKey, RecordValue};
pub use resolve::{IdentityResolver, Lookup, LookupError, PrototypeResolver, Resolve, ResolveError};
pub use retry::RetryScheduler;
pub use revision::make_revision;
