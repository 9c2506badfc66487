//! Round-trip tests for the persistent store: state written through to the
//! log must reconstruct an identical store, and a geometry mismatch must
//! reinitialise instead of loading.

use serde_json::json;
use streamwatch_program::{Program, ProgramKind};
use streamwatch_store::{SharedLog, Store};

fn sum_lambda() -> Program {
    Program::compile("($state // 0) + $metric", ProgramKind::Lambda).unwrap()
}

#[test]
fn snapshot_survives_reconstruction() {
    let dir = tempfile::tempdir().unwrap();
    let shared = SharedLog::new(dir.path());
    let lambda = sum_lambda();

    let store = Store::cached_persistent("acme/latency", 10, 3, false, &shared).unwrap();
    store.push("a", 0, json!(1), &lambda);
    store.push("a", 10, json!(1), &lambda);
    store.push("a", 20, json!(1), &lambda);
    store.tick(40);
    let (rep, time) = store.get_representation();
    drop(store);

    let reloaded = Store::cached_persistent("acme/latency", 10, 3, false, &shared).unwrap();
    let (rep2, time2) = reloaded.get_representation();

    assert_eq!(time2, time);
    assert_eq!(
        serde_json::to_string(&rep2).unwrap(),
        serde_json::to_string(&rep).unwrap()
    );
}

#[test]
fn structured_states_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let shared = SharedLog::new(dir.path());
    let lambda = Program::compile(
        "($state // {count: 0, sum: 0}) | {count: (.count + 1), sum: (.sum + $metric)}",
        ProgramKind::Lambda,
    )
    .unwrap();

    let store = Store::cached_persistent("acme/shape", 10, 2, true, &shared).unwrap();
    store.push("gw", 5, json!(3), &lambda);
    store.push("gw", 7, json!(4), &lambda);
    drop(store);

    let reloaded = Store::cached_persistent("acme/shape", 10, 2, true, &shared).unwrap();
    let (rep, _) = reloaded.get_representation();
    assert_eq!(rep["gw"], json!([{"count": 2, "sum": 7}]));
}

#[test]
fn geometry_mismatch_reinitialises() {
    let dir = tempfile::tempdir().unwrap();
    let shared = SharedLog::new(dir.path());
    let lambda = sum_lambda();

    let store = Store::cached_persistent("acme/latency", 10, 3, false, &shared).unwrap();
    store.push("a", 0, json!(1), &lambda);
    store.tick(40);
    drop(store);

    // Different granularity: must not load the old windows.
    let mismatched = Store::cached_persistent("acme/latency", 5, 3, false, &shared).unwrap();
    let (rep, time) = mismatched.get_representation();
    assert!(rep.is_empty());
    assert_eq!(time, 0);
    drop(mismatched);

    // The fresh config was persisted: a third store with the new geometry
    // loads cleanly (and still has no windows).
    let third = Store::cached_persistent("acme/latency", 5, 3, false, &shared).unwrap();
    let (rep, time) = third.get_representation();
    assert!(rep.is_empty());
    assert_eq!(time, 0);

    let log = shared.open().unwrap();
    assert_eq!(
        log.get_json::<i64>(b"acme/latency/granularity").unwrap(),
        Some(5)
    );
}

#[test]
fn namespaces_do_not_interfere() {
    let dir = tempfile::tempdir().unwrap();
    let shared = SharedLog::new(dir.path());
    let lambda = sum_lambda();

    let one = Store::cached_persistent("one", 10, 2, false, &shared).unwrap();
    let two = Store::cached_persistent("two", 10, 2, false, &shared).unwrap();
    one.push("a", 0, json!(1), &lambda);
    two.push("a", 0, json!(2), &lambda);
    one.tick(10);
    two.tick(20);
    drop(one);
    drop(two);

    let one = Store::cached_persistent("one", 10, 2, false, &shared).unwrap();
    let two = Store::cached_persistent("two", 10, 2, false, &shared).unwrap();
    let (rep_one, t_one) = one.get_representation();
    let (rep_two, t_two) = two.get_representation();
    assert_eq!(rep_one["a"], json!([1]));
    assert_eq!(rep_two["a"], json!([2, null]));
    assert_eq!(t_one, 10);
    assert_eq!(t_two, 20);
}

#[test]
fn evicted_windows_stay_gone_after_reload() {
    let dir = tempfile::tempdir().unwrap();
    let shared = SharedLog::new(dir.path());
    let lambda = sum_lambda();

    let store = Store::cached_persistent("acme/evict", 10, 2, false, &shared).unwrap();
    store.push("old", 0, json!(1), &lambda);
    store.push("new", 500, json!(2), &lambda);
    store.tick(510);
    let (rep, _) = store.get_representation();
    assert!(!rep.contains_key("old"));
    drop(store);

    let reloaded = Store::cached_persistent("acme/evict", 10, 2, false, &shared).unwrap();
    let (rep, _) = reloaded.get_representation();
    assert!(!rep.contains_key("old"));
    assert!(rep.contains_key("new"));
}
