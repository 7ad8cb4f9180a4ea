//! End-to-end tests: an `Accordion` fed by a `MemoryLog`.
//!
//! Covers the lifecycle paths a live list goes through:
//! - snapshot, live updates and renames round-tripping through the log
//! - transient stream failures restarting after the server delay
//! - terminal failures freezing the list
//! - superseded subscriptions and abort
//! - prototype resolution and filtering

use std::rc::Rc;
use std::time::Duration;

use folio_core::config::FolioConfig;
use folio_core::record::{NAME_FIELD, PROTOTYPE_FIELD, TYPE_FIELD};
use folio_core::{
    Accordion, CollectorStatus, Content, ItemPhase, MemoryLog, PrototypeResolver,
    StreamError, ViewResolution, make_revision,
};
use tokio::task::LocalSet;

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

fn engine(log: &MemoryLog, config: &FolioConfig) -> Accordion {
    let resolver = PrototypeResolver::new(Rc::new(log.clone())).with_max_depth(config.resolve.max_depth);
    Accordion::new(config.accordion_config(), Rc::new(resolver), Rc::new(log.clone()))
}

fn names(accordion: &Accordion) -> Vec<String> {
    accordion
        .views()
        .into_iter()
        .map(|view| view.name.unwrap_or_default())
        .collect()
}

fn head_names(log: &MemoryLog) -> Vec<String> {
    log.heads()
        .iter()
        .map(|head| head.name().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn snapshot_then_live_updates() {
    LocalSet::new()
        .run_until(async {
            let log = MemoryLog::new();
            let a = log.append(Content::new().with_name("Alpha"));
            log.append(Content::new().with_name("Beta"));

            let accordion = engine(&log, &FolioConfig::default());
            accordion.start(log.clone());
            settle().await;
            assert!(accordion.is_synced());
            assert_eq!(names(&accordion), vec!["Alpha", "Beta"]);

            log.append(make_revision(&a).with(NAME_FIELD, "Alpha 2"));
            log.append(Content::new().with_name("Gamma"));
            let beta = log.heads()[1].identity().clone();
            assert!(log.remove(&beta).is_some());
            settle().await;

            assert_eq!(names(&accordion), vec!["Alpha 2", "Gamma"]);
            assert_eq!(names(&accordion), head_names(&log));
            assert_eq!(accordion.views()[0].identity, a.key);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn rename_round_trips_through_the_log() {
    LocalSet::new()
        .run_until(async {
            let log = MemoryLog::new();
            let origin = log.append(Content::new().with_name("Draft").with(TYPE_FIELD, "page"));
            let accordion = engine(&log, &FolioConfig::default());
            accordion.start(log.clone());
            settle().await;

            let identity = origin.key.clone();
            accordion.toggle(&identity).expect("open");
            accordion.begin_rename(&identity).expect("begin");
            accordion.submit_rename(&identity, "Final").expect("submit");
            settle().await;

            let head = log.head(&identity).expect("head");
            assert_ne!(head.key, origin.key);
            assert_eq!(head.content().revision_root, Some(origin.key.clone()));
            assert_eq!(head.content().revision_branch, Some(origin.key.clone()));
            assert_eq!(head.content().content_type(), Some("page"));

            let view = accordion.view(&identity).expect("view");
            assert_eq!(view.name.as_deref(), Some("Final"));
            assert_eq!(view.key, head.key);
            assert_eq!(view.phase, ItemPhase::Open);
            assert!(view.can_rename);

            // A second rename branches off the first revision.
            accordion.begin_rename(&identity).expect("begin again");
            accordion.submit_rename(&identity, "Final 2").expect("submit again");
            settle().await;

            let second = log.head(&identity).expect("head");
            assert_eq!(second.content().revision_root, Some(origin.key.clone()));
            assert_eq!(second.content().revision_branch, Some(head.key.clone()));
            assert_eq!(names(&accordion), vec!["Final 2"]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn failed_publish_leaves_item_open_and_is_not_retried() {
    LocalSet::new()
        .run_until(async {
            let log = MemoryLog::new();
            let origin = log.append(Content::new().with_name("Draft"));
            let accordion = engine(&log, &FolioConfig::default());
            accordion.start(log.clone());
            settle().await;

            let identity = origin.key.clone();
            accordion.toggle(&identity).expect("open");
            accordion.begin_rename(&identity).expect("begin");
            log.fail_next_publish("read only");
            accordion.submit_rename(&identity, "Final").expect("submit");

            tokio::time::sleep(Duration::from_secs(30)).await;
            settle().await;

            assert_eq!(log.records().len(), 1);
            let view = accordion.view(&identity).expect("view");
            assert_eq!(view.phase, ItemPhase::Open);
            assert_eq!(view.name.as_deref(), Some("Draft"));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn transient_failure_restarts_from_a_fresh_snapshot() {
    LocalSet::new()
        .run_until(async {
            let log = MemoryLog::new();
            log.append(Content::new().with_name("Alpha"));
            let accordion = engine(&log, &FolioConfig::default());
            accordion.start(log.clone());
            settle().await;

            let delay = Duration::from_millis(500);
            assert_eq!(log.fail_subscribers(&StreamError::transient("rebalancing", delay)), 1);
            settle().await;
            assert_eq!(accordion.collector_status(), CollectorStatus::RetryPending { delay });

            // Missed while disconnected; must show up after the restart.
            log.append(Content::new().with_name("Beta"));

            tokio::time::sleep(Duration::from_millis(499)).await;
            settle().await;
            assert_eq!(accordion.restarts(), 0);
            assert_eq!(names(&accordion), vec!["Alpha"]);

            tokio::time::sleep(Duration::from_millis(1)).await;
            settle().await;
            assert_eq!(accordion.restarts(), 1);
            assert_eq!(accordion.collector_status(), CollectorStatus::Streaming);
            assert_eq!(names(&accordion), vec!["Alpha", "Beta"]);
            assert_eq!(log.subscriber_count(), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn terminal_failure_freezes_the_list() {
    LocalSet::new()
        .run_until(async {
            let log = MemoryLog::new();
            log.append(Content::new().with_name("Alpha"));
            let accordion = engine(&log, &FolioConfig::default());
            accordion.start(log.clone());
            settle().await;

            let error = StreamError::terminal("revoked");
            log.fail_subscribers(&error);
            settle().await;
            log.append(Content::new().with_name("Beta"));

            tokio::time::sleep(Duration::from_secs(60)).await;
            settle().await;

            assert_eq!(accordion.collector_status(), CollectorStatus::Failed(error));
            assert_eq!(accordion.restarts(), 0);
            assert_eq!(names(&accordion), vec!["Alpha"]);
            assert_eq!(log.subscriber_count(), 0);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn restarting_supersedes_the_previous_subscription() {
    LocalSet::new()
        .run_until(async {
            let log = MemoryLog::new();
            log.append(Content::new().with_name("Alpha"));
            let accordion = engine(&log, &FolioConfig::default());

            accordion.start(log.clone());
            accordion.start(log.clone());
            settle().await;
            assert_eq!(log.subscriber_count(), 1);

            log.append(Content::new().with_name("Beta"));
            settle().await;
            assert_eq!(names(&accordion), vec!["Alpha", "Beta"]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn abort_stops_all_mutation() {
    LocalSet::new()
        .run_until(async {
            let log = MemoryLog::new();
            log.append(Content::new().with_name("Alpha"));
            let accordion = engine(&log, &FolioConfig::default());
            accordion.start(log.clone());
            settle().await;

            log.fail_subscribers(&StreamError::transient("blip", Duration::from_millis(100)));
            settle().await;
            accordion.abort();
            accordion.abort();
            log.append(Content::new().with_name("Beta"));

            tokio::time::sleep(Duration::from_secs(1)).await;
            settle().await;
            assert_eq!(accordion.collector_status(), CollectorStatus::Aborted);
            assert_eq!(accordion.restarts(), 0);
            assert_eq!(names(&accordion), vec!["Alpha"]);
            assert_eq!(log.subscriber_count(), 0);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn prototypes_are_resolved_and_failures_stay_local() {
    LocalSet::new()
        .run_until(async {
            let log = MemoryLog::new();
            let base = log.append(Content::new().with_name("Template").with("color", "red"));
            log.append(Content::new().with(PROTOTYPE_FIELD, base.key.as_str()));
            log.append(Content::new().with_name("Orphan").with(PROTOTYPE_FIELD, "blake3:missing"));

            let accordion = engine(&log, &FolioConfig::default());
            accordion.start(log.clone());
            settle().await;

            let views = accordion.views();
            assert_eq!(views.len(), 3);
            assert_eq!(views[1].name.as_deref(), Some("Template"));
            assert_eq!(views[1].resolution, ViewResolution::Ready);
            assert_eq!(views[2].name.as_deref(), Some("Orphan"));
            assert!(matches!(views[2].resolution, ViewResolution::Failed(_)));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn ignored_types_contribute_no_views() {
    LocalSet::new()
        .run_until(async {
            let log = MemoryLog::new();
            log.append(Content::new().with_name("Visible").with(TYPE_FIELD, "page"));
            let hidden = log.append(Content::new().with_name("Secret").with(TYPE_FIELD, "about"));

            let config: FolioConfig =
                toml::from_str("[filter]\nignore_types = [\"about\"]\n").expect("config");
            let accordion = engine(&log, &config);
            accordion.start(log.clone());
            settle().await;

            assert_eq!(names(&accordion), vec!["Visible"]);
            assert!(accordion.toggle(&hidden.key).is_err());
            assert_eq!(accordion.records().len(), 2);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn unchanged_records_are_not_resolved_again() {
    LocalSet::new()
        .run_until(async {
            let log = MemoryLog::new();
            let a = log.append(Content::new().with_name("Alpha"));
            log.append(Content::new().with_name("Beta"));
            let accordion = engine(&log, &FolioConfig::default());
            accordion.start(log.clone());
            settle().await;
            assert_eq!(accordion.resolve_calls(), 2);

            log.append(make_revision(&a).with(NAME_FIELD, "Alpha 2"));
            settle().await;
            assert_eq!(accordion.resolve_calls(), 3);
        })
        .await;
}
