//! Behaviour every `StoreClient` backend must share.
//!
//! Each check takes a key prefix so several checks can share one store.

#![allow(dead_code)]

use redis_stats::stats::Slot;
use redis_stats::{BatchMode, Reply, StoreClient, StoreError, StoreOp};

fn key(prefix: &str, name: &str) -> String {
    format!("{}:{}", prefix, name)
}

pub fn check_get_set<S: StoreClient>(store: &S, prefix: &str) {
    let k = key(prefix, "plain");
    assert_eq!(store.get(&k).unwrap(), None);
    store.set(&k, b"hello").unwrap();
    assert_eq!(store.get(&k).unwrap(), Some(b"hello".to_vec()));
    store.set(&k, b"").unwrap();
    assert_eq!(store.get(&k).unwrap(), Some(Vec::new()));
}

pub fn check_set_if_absent<S: StoreClient>(store: &S, prefix: &str) {
    let k = key(prefix, "once");
    assert!(store.set_if_absent(&k, b"first").unwrap());
    assert!(!store.set_if_absent(&k, b"second").unwrap());
    assert_eq!(store.get(&k).unwrap(), Some(b"first".to_vec()));
}

pub fn check_increment<S: StoreClient>(store: &S, prefix: &str) {
    let k = key(prefix, "counter");
    assert_eq!(store.increment(&k, 5).unwrap(), 5);
    assert_eq!(store.increment(&k, -7).unwrap(), -2);
    assert_eq!(store.get(&k).unwrap(), Some(b"-2".to_vec()));

    let f = key(prefix, "float");
    assert_eq!(store.increment_float(&f, 1.5).unwrap(), 1.5);
    assert_eq!(store.increment_float(&f, 0.25).unwrap(), 1.75);

    // An integer increment of a float value is refused, not truncated
    match store.increment(&f, 1) {
        Err(StoreError::Response(message)) => assert!(message.contains("not an integer")),
        other => panic!("expected not-an-integer error, got {:?}", other),
    }

    let t = key(prefix, "text");
    store.set(&t, b"abc").unwrap();
    assert!(matches!(
        store.increment_float(&t, 1.0),
        Err(StoreError::Response(_))
    ));
}

pub fn check_hash<S: StoreClient>(store: &S, prefix: &str) {
    let h = key(prefix, "hash");
    assert_eq!(store.hash_get(&h, "a").unwrap(), None);
    assert_eq!(store.hash_get_all(&h).unwrap(), Vec::new());

    store.hash_set(&h, "b", b"2").unwrap();
    assert!(store.hash_set_if_absent(&h, "a", b"1").unwrap());
    assert!(!store.hash_set_if_absent(&h, "a", b"9").unwrap());
    assert_eq!(store.hash_increment(&h, "a", 10).unwrap(), 11);
    assert_eq!(store.hash_increment_float(&h, "c", 0.5).unwrap(), 0.5);

    let mut all = store.hash_get_all(&h).unwrap();
    all.sort();
    assert_eq!(
        all,
        vec![
            ("a".to_string(), b"11".to_vec()),
            ("b".to_string(), b"2".to_vec()),
            ("c".to_string(), b"0.5".to_vec()),
        ]
    );
}

pub fn check_wrong_type<S: StoreClient>(store: &S, prefix: &str) {
    let k = key(prefix, "string");
    store.set(&k, b"1").unwrap();
    match store.hash_get(&k, "f") {
        Err(StoreError::Response(message)) => assert!(message.starts_with("WRONGTYPE")),
        other => panic!("expected WRONGTYPE, got {:?}", other),
    }

    let h = key(prefix, "container");
    store.hash_set(&h, "f", b"1").unwrap();
    assert!(matches!(store.get(&h), Err(StoreError::Response(_))));
}

pub fn check_delete_and_keys<S: StoreClient>(store: &S, prefix: &str) {
    for name in ["x1", "x2", "y1"] {
        store.set(&key(prefix, name), b"v").unwrap();
    }
    let mut found = store.keys_matching(&format!("{}:x*", prefix)).unwrap();
    found.sort();
    assert_eq!(found, vec![key(prefix, "x1"), key(prefix, "x2")]);

    assert_eq!(store.delete(&[]).unwrap(), 0);
    assert_eq!(store.delete(&found).unwrap(), 2);
    assert_eq!(store.delete(&found).unwrap(), 0);
    assert_eq!(
        store.keys_matching(&format!("{}:*", prefix)).unwrap(),
        vec![key(prefix, "y1")]
    );
}

pub fn check_glob_escaping<S: StoreClient>(store: &S, prefix: &str) {
    store.set(&key(prefix, "a*b"), b"1").unwrap();
    store.set(&key(prefix, "axb"), b"1").unwrap();
    let pattern = format!("{}:a\\*b", prefix);
    assert_eq!(store.keys_matching(&pattern).unwrap(), vec![key(prefix, "a*b")]);
}

pub fn check_transaction<S: StoreClient>(store: &S, prefix: &str) {
    let k = key(prefix, "seeded");
    let ops = [
        StoreOp::SetIfAbsent {
            key: k.clone(),
            value: b"100".to_vec(),
        },
        StoreOp::Increment {
            key: k.clone(),
            delta: 5,
        },
    ];
    let replies = store.execute_batch(&ops, BatchMode::Transaction).unwrap();
    assert_eq!(replies, vec![Reply::Int(1), Reply::Int(105)]);

    let replies = store.execute_batch(&ops, BatchMode::Transaction).unwrap();
    assert_eq!(replies, vec![Reply::Int(0), Reply::Int(110)]);
}

pub fn check_pipeline_errors_are_per_op<S: StoreClient>(store: &S, prefix: &str) {
    let k = key(prefix, "mixed");
    store.set(&k, b"text").unwrap();
    let ops = [
        StoreOp::Increment {
            key: k.clone(),
            delta: 1,
        },
        StoreOp::Get { key: k.clone() },
    ];
    let replies = store.execute_batch(&ops, BatchMode::Pipeline).unwrap();
    assert!(matches!(replies[0], Reply::Error(_)));
    assert_eq!(replies[1], Reply::Bulk(b"text".to_vec()));
    assert_eq!(store.execute_batch(&[], BatchMode::Pipeline).unwrap(), Vec::new());
}

pub fn check_compare_and_set<S: StoreClient>(store: &S, prefix: &str) {
    let slot = Slot::Key(key(prefix, "cas"));
    assert!(store.compare_and_set(&slot, None, b"1").unwrap());
    assert!(!store.compare_and_set(&slot, None, b"2").unwrap());
    assert!(!store.compare_and_set(&slot, Some(b"9"), b"2").unwrap());
    assert!(store.compare_and_set(&slot, Some(b"1"), b"2").unwrap());
    assert_eq!(store.get(&key(prefix, "cas")).unwrap(), Some(b"2".to_vec()));

    let field = Slot::Field {
        container: key(prefix, "cas-hash"),
        field: "peak".to_string(),
    };
    assert!(store.compare_and_set(&field, None, b"7").unwrap());
    assert!(store.compare_and_set(&field, Some(b"7"), b"8").unwrap());
    assert_eq!(
        store.hash_get(&key(prefix, "cas-hash"), "peak").unwrap(),
        Some(b"8".to_vec())
    );
}

/// Run every check, each under its own prefix.
pub fn run_all<S: StoreClient>(store: &S) {
    check_get_set(store, "conf-getset");
    check_set_if_absent(store, "conf-setnx");
    check_increment(store, "conf-incr");
    check_hash(store, "conf-hash");
    check_wrong_type(store, "conf-type");
    check_delete_and_keys(store, "conf-keys");
    check_glob_escaping(store, "conf-glob");
    check_transaction(store, "conf-multi");
    check_pipeline_errors_are_per_op(store, "conf-pipe");
    check_compare_and_set(store, "conf-cas");
}
