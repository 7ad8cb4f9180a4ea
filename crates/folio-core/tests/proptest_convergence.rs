//! Property tests: the collector's collection equals the in-order fold of
//! whatever mutation sequence the stream delivered.

use std::cell::RefCell;
use std::rc::Rc;

use folio_core::event::{EventStream, Mutation, MutationKind, StreamError, StreamItem, StreamOptions};
use folio_core::{Content, MemoryLog, MutationCollector, Record, make_revision};
use futures::StreamExt;
use futures::channel::mpsc;
use proptest::prelude::*;
use tokio::task::LocalSet;

type Sender = mpsc::UnboundedSender<Result<StreamItem, StreamError>>;

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

fn run_local<F: std::future::Future<Output = ()>>(future: F) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");
    runtime.block_on(LocalSet::new().run_until(future));
}

fn arb_kind() -> impl Strategy<Value = MutationKind> {
    prop_oneof![
        Just(MutationKind::Add),
        Just(MutationKind::Update),
        Just(MutationKind::Remove),
    ]
}

/// `(kind, identity index)` pairs over a small identity space so that
/// updates and removes hit existing entries often.
fn arb_ops() -> impl Strategy<Value = Vec<(MutationKind, u8)>> {
    prop::collection::vec((arb_kind(), 0u8..6), 0..40)
}

fn to_mutations(ops: &[(MutationKind, u8)]) -> Vec<Mutation> {
    ops.iter()
        .enumerate()
        .map(|(seq, (kind, id))| {
            let mut content = Content::new().with_name(&format!("item {id} rev {seq}"));
            content.revision_root = Some(format!("root-{id}").into());
            let record = Rc::new(Record::new(format!("key-{seq}"), content));
            Mutation { kind: *kind, record }
        })
        .collect()
}

/// Reference fold: upsert by identity, remove by identity.
fn fold(mutations: &[Mutation]) -> Vec<String> {
    let mut folded: Vec<Rc<Record>> = Vec::new();
    for mutation in mutations {
        let identity = mutation.record.identity();
        let position = folded.iter().position(|r| r.identity() == identity);
        match (mutation.kind, position) {
            (MutationKind::Add | MutationKind::Update, Some(i)) => {
                folded[i] = Rc::clone(&mutation.record);
            }
            (MutationKind::Add | MutationKind::Update, None) => {
                folded.push(Rc::clone(&mutation.record));
            }
            (MutationKind::Remove, Some(i)) => {
                folded.remove(i);
            }
            (MutationKind::Remove, None) => {}
        }
    }
    folded.iter().map(|r| r.key.to_string()).collect()
}

fn keys(collector: &MutationCollector) -> Vec<String> {
    collector
        .collection()
        .items()
        .iter()
        .map(|r| r.key.to_string())
        .collect()
}

proptest! {
    #[test]
    fn stream_fold_matches_in_order_fold(ops in arb_ops(), split in 0usize..40) {
        let mutations = to_mutations(&ops);
        let expected = fold(&mutations);

        let mut actual = Vec::new();
        run_local(async {
            let senders: Rc<RefCell<Vec<Sender>>> = Rc::new(RefCell::new(Vec::new()));
            let sink = Rc::clone(&senders);
            let source = move |_options: StreamOptions| -> EventStream {
                let (tx, rx) = mpsc::unbounded();
                sink.borrow_mut().push(tx);
                rx.boxed_local()
            };

            let collector = MutationCollector::new();
            collector.start(source, StreamOptions::default());

            let split = split.min(mutations.len());
            for (i, mutation) in mutations.iter().enumerate() {
                if i == split {
                    settle().await;
                }
                if let Some(tx) = senders.borrow().last() {
                    tx.unbounded_send(Ok(StreamItem::Mutation(mutation.clone())))
                        .expect("stream open");
                }
            }
            settle().await;
            actual = keys(&collector);
        });

        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn collector_converges_to_log_heads(ops in arb_ops()) {
        let mut outcome = (Vec::new(), Vec::new());
        run_local(async {
            let log = MemoryLog::new();
            let collector = MutationCollector::new();
            collector.start(log.clone(), StreamOptions::default());

            for (seq, (kind, id)) in ops.iter().enumerate() {
                let target = log.heads().get(usize::from(*id)).cloned();
                match (kind, target) {
                    (MutationKind::Update, Some(head)) => {
                        log.append(make_revision(&head).with("seq", seq));
                    }
                    (MutationKind::Remove, Some(head)) => {
                        log.remove(head.identity());
                    }
                    _ => {
                        log.append(Content::new().with_name(&format!("item {seq}")));
                    }
                }
                if seq % 7 == 0 {
                    settle().await;
                }
            }
            settle().await;

            outcome = (
                keys(&collector),
                log.heads().iter().map(|r| r.key.to_string()).collect(),
            );
        });

        prop_assert_eq!(outcome.0, outcome.1);
    }
}
