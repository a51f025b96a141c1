//! Integration Tests for the Reactive Engine
//!
//! These tests verify that observed containers, watchers, the flush queue,
//! and the deferred-execution primitive work together correctly. Deferred
//! paths settle through `next_tick_future`; the queue and tick batch are
//! process-global, so the tests serialize on one lock.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use filament_core::{
    next_tick, next_tick_future, observe, on_flushed, untracked, ObservedList, ObservedMap,
    Value, Watcher, WatcherOptions,
};

static SERIAL: Mutex<()> = Mutex::new(());

fn observed_map(entries: &[(&str, i64)]) -> ObservedMap {
    let map = ObservedMap::from_entries(
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::Int(*v))),
    );
    let _ = observe(&Value::Map(map.clone()));
    map
}

fn int(map: &ObservedMap, key: &str) -> i64 {
    map.get(key).and_then(|v| v.as_i64()).unwrap_or(0)
}

/// The canonical scenario: `{a: 1, b: 2}` observed, a watcher computes
/// `a + b`. Setting `a = 5` schedules the watcher; once the tick drains,
/// the cached value is 7 and the tracked set is still `{a, b}`.
#[tokio::test]
async fn sum_recomputes_by_next_tick() {
    let _serial = SERIAL.lock();
    let map = observed_map(&[("a", 1), ("b", 2)]);

    let reader = map.clone();
    let sum = Watcher::new(
        "sum",
        move || Ok(Value::Int(int(&reader, "a") + int(&reader, "b"))),
        WatcherOptions::default(),
    );
    assert_eq!(sum.value().as_i64(), Some(3));

    map.insert("a", Value::Int(5));
    next_tick_future().await;

    assert_eq!(sum.value().as_i64(), Some(7));
    assert_eq!(sum.dep_count(), 2);
}

/// Triggering the same dependency repeatedly within one flush window runs
/// the reaction exactly once.
#[tokio::test]
async fn repeated_triggers_coalesce_into_one_run() {
    let _serial = SERIAL.lock();
    let map = observed_map(&[("n", 0)]);

    let runs = Arc::new(AtomicI64::new(0));
    let runs_clone = runs.clone();
    let reader = map.clone();
    let _watcher = Watcher::new(
        "coalesced",
        move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Int(int(&reader, "n")))
        },
        WatcherOptions::default(),
    );
    runs.store(0, Ordering::SeqCst);

    map.insert("n", Value::Int(1));
    map.insert("n", Value::Int(2));
    map.insert("n", Value::Int(3));
    next_tick_future().await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(int(&map, "n"), 3);
}

/// Watchers scheduled in one burst execute in ascending id order.
#[tokio::test]
async fn flush_order_is_ascending_by_creation() {
    let _serial = SERIAL.lock();
    let map = observed_map(&[("n", 0)]);
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let mut watchers = Vec::new();
    for label in ["first", "second", "third"] {
        let reader = map.clone();
        let log = log.clone();
        watchers.push(Watcher::new(
            label,
            move || {
                log.lock().push(label);
                Ok(Value::Int(int(&reader, "n")))
            },
            WatcherOptions::default(),
        ));
    }
    log.lock().clear();

    map.insert("n", Value::Int(1));
    next_tick_future().await;

    assert_eq!(log.lock().clone(), vec!["first", "second", "third"]);
}

/// Writing a loosely-equal value does not schedule anything.
#[tokio::test]
async fn idempotent_write_schedules_nothing() {
    let _serial = SERIAL.lock();
    let map = observed_map(&[("n", 3)]);

    let runs = Arc::new(AtomicI64::new(0));
    let runs_clone = runs.clone();
    let reader = map.clone();
    let _watcher = Watcher::new(
        "quiet",
        move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Int(int(&reader, "n")))
        },
        WatcherOptions::default(),
    );
    runs.store(0, Ordering::SeqCst);

    map.insert("n", Value::Int(3));
    map.insert("n", Value::Float(3.0));
    next_tick_future().await;

    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

/// A watcher torn down while queued has its reaction invoked as a no-op.
#[tokio::test]
async fn teardown_before_flush_is_a_no_op() {
    let _serial = SERIAL.lock();
    let map = observed_map(&[("n", 0)]);

    let runs = Arc::new(AtomicI64::new(0));
    let runs_clone = runs.clone();
    let reader = map.clone();
    let watcher = Watcher::new(
        "doomed",
        move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Int(int(&reader, "n")))
        },
        WatcherOptions::default(),
    );
    runs.store(0, Ordering::SeqCst);

    map.insert("n", Value::Int(1));
    watcher.teardown();
    next_tick_future().await;

    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

/// A reaction that unconditionally re-triggers its own dependency is
/// aborted by the circuit breaker instead of hanging the flush.
#[tokio::test]
async fn circuit_breaker_stops_a_self_triggering_watcher() {
    let _serial = SERIAL.lock();
    let map = observed_map(&[("n", 0)]);

    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = errors.clone();
    let runs = Arc::new(AtomicI64::new(0));
    let runs_clone = runs.clone();
    let reader = map.clone();
    let writer = map.clone();
    let next = Arc::new(AtomicI64::new(1));

    let _runaway = Watcher::watch(
        "runaway",
        move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            let _ = reader.get("n");
            Ok(Value::Map(reader.clone()))
        },
        move |_, _| {
            writer.insert("n", Value::Int(next.fetch_add(1, Ordering::SeqCst)));
            Ok(())
        },
        WatcherOptions {
            on_error: Some(Box::new(move |err, _| {
                seen.lock().push(err.to_string());
            })),
            ..Default::default()
        },
    );
    runs.store(0, Ordering::SeqCst);

    map.insert("n", Value::Int(-1));
    next_tick_future().await;

    let reruns = runs.load(Ordering::SeqCst);
    assert!(reruns > 100, "breaker should allow the configured reruns, got {reruns}");
    assert!(reruns < 110, "breaker should abort the loop, got {reruns}");

    let errors = errors.lock().clone();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("infinite update loop"));
}

/// Deferred callbacks registered during a flush run after that flush's
/// watcher pass, and flushed-hooks run between the two.
#[tokio::test]
async fn work_registered_during_flush_runs_after_the_pass() {
    let _serial = SERIAL.lock();
    let map = observed_map(&[("n", 0)]);
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let reader = map.clone();
    let cb_log = log.clone();
    let _watcher = Watcher::watch(
        "nested-registration",
        move || Ok(Value::Int(int(&reader, "n"))),
        move |_, _| {
            cb_log.lock().push("reaction");
            let tick_log = cb_log.clone();
            next_tick(move || {
                tick_log.lock().push("tick");
                Ok(())
            });
            let hook_log = cb_log.clone();
            on_flushed(move || {
                hook_log.lock().push("flushed");
                Ok(())
            });
            Ok(())
        },
        WatcherOptions::default(),
    );
    log.lock().clear();

    map.insert("n", Value::Int(1));
    next_tick_future().await;
    next_tick_future().await;

    assert_eq!(log.lock().clone(), vec!["reaction", "flushed", "tick"]);
}

/// Untracked reads do not subscribe.
#[test]
fn untracked_reads_do_not_subscribe() {
    let map = observed_map(&[("hot", 1), ("cold", 2)]);

    let runs = Arc::new(AtomicI64::new(0));
    let runs_clone = runs.clone();
    let reader = map.clone();
    let watcher = Watcher::new(
        "partial",
        move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            let hot = int(&reader, "hot");
            let cold = untracked(|| int(&reader, "cold"));
            Ok(Value::Int(hot + cold))
        },
        WatcherOptions {
            sync: true,
            ..Default::default()
        },
    );
    assert_eq!(watcher.value().as_i64(), Some(3));
    assert_eq!(watcher.dep_count(), 1);

    map.insert("cold", Value::Int(100));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    map.insert("hot", Value::Int(10));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(watcher.value().as_i64(), Some(110));
}

/// Sequence mutations notify the owning dependency exactly once per call,
/// no matter how many elements change.
#[test]
fn list_methods_notify_once_per_call() {
    let list = ObservedList::from_values(vec![Value::Int(1), Value::Int(2)]);
    let _ = observe(&Value::List(list.clone()));

    let runs = Arc::new(AtomicI64::new(0));
    let runs_clone = runs.clone();
    let reader = list.clone();
    let _watcher = Watcher::new(
        "length",
        move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Int(reader.len() as i64))
        },
        WatcherOptions {
            sync: true,
            ..Default::default()
        },
    );
    runs.store(0, Ordering::SeqCst);

    list.push(Value::Int(3));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    list.splice(0, 2, vec![Value::Int(7), Value::Int(8), Value::Int(9)]);
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    list.reverse();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

/// Keys added through the explicit entry point become visible to watchers
/// of the key set.
#[test]
fn added_keys_retrigger_key_set_watchers() {
    let map = observed_map(&[("present", 1)]);

    let keys_seen = Arc::new(Mutex::new(Vec::new()));
    let log = keys_seen.clone();
    let reader = map.clone();
    let _watcher = Watcher::new(
        "key-set",
        move || {
            log.lock().push(reader.keys());
            Ok(Value::Int(reader.len() as i64))
        },
        WatcherOptions {
            sync: true,
            ..Default::default()
        },
    );

    map.insert("added", Value::Int(2));
    map.remove("present");

    let snapshots = keys_seen.lock().clone();
    assert_eq!(snapshots.len(), 3);
    assert_eq!(snapshots[1], vec!["present".to_string(), "added".to_string()]);
    assert_eq!(snapshots[2], vec!["added".to_string()]);
}

/// A reactive tree built from JSON stays observable end to end.
#[tokio::test]
async fn json_state_tree_is_reactive() {
    let _serial = SERIAL.lock();
    let state = Value::from(serde_json::json!({
        "user": {"name": "ada", "visits": 1},
        "tags": ["alpha"]
    }));
    let _ = observe(&state);
    let root = state.as_map().expect("object root").clone();

    let reader = root.clone();
    let summary = Watcher::new(
        "summary",
        move || {
            let user = reader.get("user").and_then(|v| v.as_map().cloned());
            let name = user
                .as_ref()
                .and_then(|u| u.get("name"))
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            let visits = user
                .as_ref()
                .and_then(|u| u.get("visits"))
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            let tags = reader
                .get("tags")
                .and_then(|v| v.as_list().cloned())
                .map(|l| l.len())
                .unwrap_or(0);
            Ok(Value::str(format!("{name}:{visits}:{tags}")))
        },
        WatcherOptions::default(),
    );
    assert_eq!(summary.value().as_str(), Some("ada:1:1"));

    let user = root
        .get("user")
        .and_then(|v| v.as_map().cloned())
        .expect("user map");
    user.insert("visits", Value::Int(2));
    root.get("tags")
        .and_then(|v| v.as_list().cloned())
        .expect("tags list")
        .push(Value::str("beta"));
    next_tick_future().await;

    assert_eq!(summary.value().as_str(), Some("ada:2:2"));
}
