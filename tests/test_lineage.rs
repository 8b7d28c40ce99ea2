//! Correlation id inheritance across spawned tasks

use pretty_assertions::assert_eq;
use skein::{Lineage, TaskId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn counting_lineage() -> (Lineage, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let lineage = Lineage::with_id_generator(Arc::new(move || {
        format!("trace-{}", counter.fetch_add(1, Ordering::SeqCst))
    }));
    (lineage, calls)
}

#[tokio::test]
async fn test_child_inherits_parent_id() {
    let (lineage, calls) = counting_lineage();
    let outer = lineage.clone();

    let (parent_id, child_id) = lineage
        .scope(async move {
            let inner = outer.clone();
            outer
                .spawn(async move {
                    let from_a = inner.current_correlation_id();
                    let observer = inner.clone();
                    let from_b = inner
                        .spawn(async move { observer.current_correlation_id() })
                        .await
                        .unwrap();
                    (from_a, from_b)
                })
                .await
                .unwrap()
        })
        .await;

    assert_eq!(parent_id, child_id);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_child_lookup_first_still_shares_root_id() {
    let (lineage, calls) = counting_lineage();
    let inner = lineage.clone();

    // the grandchild asks before anyone else in the chain has
    let from_grandchild = lineage
        .spawn(async move {
            let observer = inner.clone();
            inner
                .spawn(async move { observer.current_correlation_id() })
                .await
                .unwrap()
        })
        .await
        .unwrap();

    assert_eq!(lineage.current_correlation_id(), from_grandchild);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_siblings_synthesize_once() {
    let (lineage, calls) = counting_lineage();
    let outer = lineage.clone();

    let ids = lineage
        .scope(async move {
            let handles: Vec<_> = (0..32)
                .map(|_| {
                    let observer = outer.clone();
                    outer.spawn(async move {
                        tokio::task::yield_now().await;
                        observer.current_correlation_id()
                    })
                })
                .collect();
            let mut ids = Vec::new();
            for handle in handles {
                ids.push(handle.await.unwrap());
            }
            ids
        })
        .await;

    assert!(ids.iter().all(|id| id == &ids[0]));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_set_id_applies_to_later_descendants() {
    let (lineage, calls) = counting_lineage();
    let inner = lineage.clone();

    let (own, child, sibling_override) = lineage
        .spawn(async move {
            inner.set_current_correlation_id("checkout-7");
            let observer = inner.clone();
            let child = inner
                .spawn(async move { observer.current_correlation_id() })
                .await
                .unwrap();
            let observer = inner.clone();
            let sibling_override = inner
                .spawn(async move {
                    observer.set_current_correlation_id("payment-1");
                    observer.current_correlation_id()
                })
                .await
                .unwrap();
            (inner.current_correlation_id(), child, sibling_override)
        })
        .await
        .unwrap();

    assert_eq!(own, "checkout-7");
    assert_eq!(child, "checkout-7");
    assert_eq!(sibling_override, "payment-1");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_separate_scopes_get_separate_ids() {
    let (lineage, calls) = counting_lineage();

    let first_view = lineage.clone();
    let first = lineage
        .scope(async move { first_view.current_correlation_id() })
        .await;
    let second_view = lineage.clone();
    let second = lineage
        .scope(async move { second_view.current_correlation_id() })
        .await;

    assert_ne!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_parent_outlives_itself_while_child_runs() {
    let lineage = Lineage::new();
    let inner = lineage.clone();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    // parent sets an id, spawns a child that outlives it, then returns
    let child = lineage
        .spawn(async move {
            inner.set_current_correlation_id("long-request");
            let observer = inner.clone();
            inner.spawn(async move {
                let _ = release_rx.await;
                observer.current_correlation_id()
            })
        })
        .await
        .unwrap();

    let parent = lineage.parent_of(child.id()).expect("parent kept alive by child");
    assert_ne!(parent, TaskId::ROOT);
    assert_eq!(lineage.live_tasks(), 2);

    release_tx.send(()).unwrap();
    assert_eq!(child.await.unwrap(), "long-request");

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(lineage.live_tasks(), 0);
    assert_eq!(lineage.parent_of(parent), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unrelated_tokio_tasks_keep_separate_ids() {
    let (lineage, _calls) = counting_lineage();
    let (a_set_tx, a_set_rx) = tokio::sync::oneshot::channel::<()>();
    let (b_done_tx, b_done_rx) = tokio::sync::oneshot::channel::<()>();

    let handler_a = {
        let lineage = lineage.clone();
        tokio::spawn(async move {
            lineage.set_current_correlation_id("request-A");
            a_set_tx.send(()).unwrap();
            b_done_rx.await.unwrap();

            let observer = lineage.clone();
            let child = lineage
                .spawn(async move { observer.current_correlation_id() })
                .await
                .unwrap();
            (lineage.current_correlation_id(), child)
        })
    };
    let handler_b = {
        let lineage = lineage.clone();
        tokio::spawn(async move {
            a_set_rx.await.unwrap();
            let before = lineage.current_correlation_id();
            lineage.set_current_correlation_id("request-B");
            b_done_tx.send(()).unwrap();
            (before, lineage.current_correlation_id())
        })
    };

    let (a_after, a_child) = handler_a.await.unwrap();
    let (b_before, b_after) = handler_b.await.unwrap();

    assert_ne!(b_before, "request-A");
    assert_eq!(b_after, "request-B");
    assert_eq!(a_after, "request-A");
    assert_eq!(a_child, "request-A");
    // nothing leaked into the shared root
    assert_eq!(lineage.correlation_id_of(TaskId::ROOT), None);
}

#[tokio::test]
async fn test_released_handler_drops_its_id() {
    let lineage = Lineage::new();
    let inner = lineage.clone();

    let (task, after) = tokio::spawn(async move {
        inner.set_current_correlation_id("conn-1");
        let task = inner.current_task_id();
        inner.release_current_task();
        (task, inner.correlation_id_of(task))
    })
    .await
    .unwrap();

    assert!(!task.is_root());
    assert_eq!(after, None);
    assert_eq!(lineage.adopted_tasks(), 0);
}

#[tokio::test]
async fn test_global_context_free_functions() {
    let id = skein::spawn(async {
        skein::set_current_correlation_id("global-chain");
        skein::spawn(async { skein::current_correlation_id() })
            .await
            .unwrap()
    })
    .await
    .unwrap();

    assert_eq!(id, "global-chain");

    let released = tokio::spawn(async {
        skein::set_current_correlation_id("handler");
        skein::release_current_task()
    })
    .await
    .unwrap();
    assert!(released);
}
