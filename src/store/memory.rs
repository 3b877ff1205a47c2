//! In-process backing store
//!
//! `MemoryStore` keeps string and hash keys behind one lock, so every batch
//! and every compare-and-set is applied without interleaving. Share it
//! between threads with `Arc`, or put it on the network with
//! [`StatsServer`](crate::server::StatsServer).
//!
//! Replies and error texts follow Redis so callers cannot tell the
//! difference. [`MemoryStore::compare_and_set_watched`] also replays the
//! WATCH window a RESP client has between its read and its EXEC.

use ahash::AHashMap;
use parking_lot::Mutex;

use super::glob::glob_match;
use super::{BatchMode, Reply, StoreClient, StoreOp};
use crate::error::StoreResult;
use crate::stats::keys::Slot;

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
const NOT_AN_INTEGER: &str = "ERR value is not an integer or out of range";
const NOT_A_FLOAT: &str = "ERR value is not a valid float";
const OVERFLOW: &str = "ERR increment or decrement would overflow";
const NAN_OR_INF: &str = "ERR increment would produce NaN or Infinity";

/// Value stored under one key.
#[derive(Clone, Debug, PartialEq)]
pub enum Data {
    Bytes(Vec<u8>),
    Hash(AHashMap<String, Vec<u8>>),
}

#[derive(Default)]
struct MemoryState {
    data: AHashMap<String, Data>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current value of `key`, used as a WATCH snapshot.
    pub fn snapshot(&self, key: &str) -> Option<Data> {
        self.state.lock().data.get(key).cloned()
    }

    /// Apply `ops` atomically if every watched key still holds its snapshot.
    /// `None` means a watched key changed and nothing was applied.
    pub fn execute_watched(
        &self,
        watched: &[(String, Option<Data>)],
        ops: &[StoreOp],
    ) -> Option<Vec<Reply>> {
        let mut state = self.state.lock();
        let violated = watched
            .iter()
            .any(|(key, snapshot)| state.data.get(key) != snapshot.as_ref());
        if violated {
            return None;
        }
        Some(ops.iter().map(|op| state.apply(op)).collect())
    }

    /// Compare-and-set in the steps a RESP client takes: WATCH the slot's
    /// key, read, then MULTI/EXEC the write. `between` runs after the read
    /// with the lock released; any change it makes to the watched key, even
    /// to another field of the same hash, aborts the write.
    pub fn compare_and_set_watched<F>(
        &self,
        slot: &Slot,
        expected: Option<&[u8]>,
        new: &[u8],
        between: F,
    ) -> StoreResult<bool>
    where
        F: FnOnce() -> StoreResult<()>,
    {
        let watched = slot.watch_key().to_string();
        let snapshot = self.snapshot(&watched);
        let current = self.execute(StoreOp::read(slot))?.into_optional_bytes()?;
        if current.as_deref() != expected {
            return Ok(false);
        }

        between()?;

        let write = [StoreOp::write(slot, new.to_vec())];
        match self.execute_watched(&[(watched, snapshot)], &write) {
            Some(replies) => {
                for reply in replies {
                    reply.into_ok()?;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl StoreClient for MemoryStore {
    fn execute_batch(&self, ops: &[StoreOp], _mode: BatchMode) -> StoreResult<Vec<Reply>> {
        // One lock for the whole batch: pipelines and transactions alike
        // run without interleaving here.
        let mut state = self.state.lock();
        Ok(ops.iter().map(|op| state.apply(op)).collect())
    }

    fn compare_and_set(
        &self,
        slot: &Slot,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> StoreResult<bool> {
        let mut state = self.state.lock();
        let current = match state.apply(&StoreOp::read(slot)) {
            Reply::Bulk(b) => Some(b),
            Reply::Nil => None,
            // Wrong type never equals an expected byte string
            _ => return Ok(false),
        };
        if current.as_deref() != expected {
            return Ok(false);
        }
        let reply = state.apply(&StoreOp::write(slot, new.to_vec()));
        reply.into_ok()?;
        Ok(true)
    }
}

impl MemoryState {
    fn apply(&mut self, op: &StoreOp) -> Reply {
        match op {
            StoreOp::Get { key } => match self.data.get(key) {
                Some(Data::Bytes(b)) => Reply::Bulk(b.clone()),
                Some(Data::Hash(_)) => Reply::Error(WRONGTYPE.to_string()),
                None => Reply::Nil,
            },
            StoreOp::Set { key, value } => {
                self.data.insert(key.clone(), Data::Bytes(value.clone()));
                debug_assert!(
                    self.data.contains_key(key),
                    "Postcondition: SET must store key"
                );
                Reply::Ok
            }
            StoreOp::SetIfAbsent { key, value } => {
                if self.data.contains_key(key) {
                    return Reply::Int(0);
                }
                self.data.insert(key.clone(), Data::Bytes(value.clone()));
                Reply::Int(1)
            }
            StoreOp::Increment { key, delta } => self.increment(key, None, *delta),
            StoreOp::IncrementFloat { key, delta } => self.increment_float(key, None, *delta),
            StoreOp::HashGet { container, field } => match self.data.get(container) {
                Some(Data::Hash(h)) => h.get(field).cloned().map_or(Reply::Nil, Reply::Bulk),
                Some(Data::Bytes(_)) => Reply::Error(WRONGTYPE.to_string()),
                None => Reply::Nil,
            },
            StoreOp::HashSet {
                container,
                field,
                value,
            } => match self.hash_mut(container) {
                Ok(h) => {
                    let added = h.insert(field.clone(), value.clone()).is_none();
                    Reply::Int(added as i64)
                }
                Err(e) => e,
            },
            StoreOp::HashSetIfAbsent {
                container,
                field,
                value,
            } => match self.hash_mut(container) {
                Ok(h) => {
                    if h.contains_key(field) {
                        Reply::Int(0)
                    } else {
                        h.insert(field.clone(), value.clone());
                        Reply::Int(1)
                    }
                }
                Err(e) => e,
            },
            StoreOp::HashIncrement {
                container,
                field,
                delta,
            } => self.increment(container, Some(field), *delta),
            StoreOp::HashIncrementFloat {
                container,
                field,
                delta,
            } => self.increment_float(container, Some(field), *delta),
            StoreOp::HashGetAll { container } => match self.data.get(container) {
                Some(Data::Hash(h)) => {
                    let mut fields: Vec<_> = h.iter().collect();
                    fields.sort_by(|a, b| a.0.cmp(b.0));
                    let mut items = Vec::with_capacity(fields.len() * 2);
                    for (field, value) in fields {
                        items.push(Reply::Bulk(field.as_bytes().to_vec()));
                        items.push(Reply::Bulk(value.clone()));
                    }
                    Reply::Array(items)
                }
                Some(Data::Bytes(_)) => Reply::Error(WRONGTYPE.to_string()),
                None => Reply::Array(Vec::new()),
            },
            StoreOp::Delete { keys } => {
                let removed = keys
                    .iter()
                    .filter(|k| self.data.remove(k.as_str()).is_some())
                    .count();
                Reply::Int(removed as i64)
            }
            StoreOp::KeysMatching { pattern } => {
                let mut keys: Vec<&String> = self
                    .data
                    .keys()
                    .filter(|k| glob_match(pattern, k))
                    .collect();
                keys.sort();
                Reply::Array(
                    keys.into_iter()
                        .map(|k| Reply::Bulk(k.as_bytes().to_vec()))
                        .collect(),
                )
            }
        }
    }

    /// Hash at `container`, created empty when absent.
    fn hash_mut(&mut self, container: &str) -> Result<&mut AHashMap<String, Vec<u8>>, Reply> {
        let entry = self
            .data
            .entry(container.to_string())
            .or_insert_with(|| Data::Hash(AHashMap::new()));
        match entry {
            Data::Hash(h) => Ok(h),
            Data::Bytes(_) => Err(Reply::Error(WRONGTYPE.to_string())),
        }
    }

    /// Raw bytes at a key or hash field, or the type error.
    fn current(&self, key: &str, field: Option<&String>) -> Result<Option<&Vec<u8>>, Reply> {
        match (self.data.get(key), field) {
            (None, _) => Ok(None),
            (Some(Data::Bytes(b)), None) => Ok(Some(b)),
            (Some(Data::Hash(h)), Some(f)) => Ok(h.get(f)),
            _ => Err(Reply::Error(WRONGTYPE.to_string())),
        }
    }

    fn store(&mut self, key: &str, field: Option<&String>, value: Vec<u8>) {
        match field {
            None => {
                self.data.insert(key.to_string(), Data::Bytes(value));
            }
            Some(f) => {
                if let Ok(h) = self.hash_mut(key) {
                    h.insert(f.clone(), value);
                }
            }
        }
    }

    fn increment(&mut self, key: &str, field: Option<&String>, delta: i64) -> Reply {
        let current = match self.current(key, field) {
            Ok(None) => 0,
            Ok(Some(raw)) => match std::str::from_utf8(raw).ok().and_then(|s| s.parse::<i64>().ok())
            {
                Some(v) => v,
                None => return Reply::Error(NOT_AN_INTEGER.to_string()),
            },
            Err(e) => return e,
        };
        let Some(next) = current.checked_add(delta) else {
            return Reply::Error(OVERFLOW.to_string());
        };
        self.store(key, field, next.to_string().into_bytes());
        Reply::Int(next)
    }

    fn increment_float(&mut self, key: &str, field: Option<&String>, delta: f64) -> Reply {
        let current = match self.current(key, field) {
            Ok(None) => 0.0,
            Ok(Some(raw)) => match std::str::from_utf8(raw).ok().and_then(|s| s.parse::<f64>().ok())
            {
                Some(v) => v,
                None => return Reply::Error(NOT_A_FLOAT.to_string()),
            },
            Err(e) => return e,
        };
        let next = current + delta;
        if !next.is_finite() {
            return Reply::Error(NAN_OR_INF.to_string());
        }
        let formatted = next.to_string().into_bytes();
        self.store(key, field, formatted.clone());
        Reply::Bulk(formatted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_creates_at_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.increment("hits", 5).unwrap(), 5);
        assert_eq!(store.increment("hits", -2).unwrap(), 3);
        assert_eq!(store.get("hits").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn test_increment_rejects_non_integer() {
        let store = MemoryStore::new();
        store.set("k", b"abc").unwrap();
        assert!(store.increment("k", 1).is_err());
        store.set("f", b"1.5").unwrap();
        assert!(store.increment("f", 1).is_err());
        assert_eq!(store.increment_float("f", 1.0).unwrap(), 2.5);
    }

    #[test]
    fn test_increment_overflow() {
        let store = MemoryStore::new();
        store.set("k", i64::MAX.to_string().as_bytes()).unwrap();
        assert!(store.increment("k", 1).is_err());
        assert_eq!(store.get("k").unwrap(), Some(i64::MAX.to_string().into_bytes()));
    }

    #[test]
    fn test_wrong_type() {
        let store = MemoryStore::new();
        store.hash_set("h", "f", b"1").unwrap();
        assert!(store.get("h").is_err());
        store.set("s", b"1").unwrap();
        assert!(store.hash_get("s", "f").is_err());
        assert!(store.hash_increment("s", "f", 1).is_err());
    }

    #[test]
    fn test_hash_ops() {
        let store = MemoryStore::new();
        assert_eq!(store.hash_increment("h", "a", 2).unwrap(), 2);
        assert!(store.hash_set_if_absent("h", "b", b"x").unwrap());
        assert!(!store.hash_set_if_absent("h", "b", b"y").unwrap());
        assert_eq!(
            store.hash_get_all("h").unwrap(),
            vec![("a".to_string(), b"2".to_vec()), ("b".to_string(), b"x".to_vec())]
        );
        assert_eq!(store.hash_get_all("missing").unwrap(), vec![]);
    }

    #[test]
    fn test_keys_and_delete() {
        let store = MemoryStore::new();
        store.set("j:stats:a", b"1").unwrap();
        store.set("j:stats:b", b"2").unwrap();
        store.set("k:stats:a", b"3").unwrap();
        let keys = store.keys_matching("j:stats:*").unwrap();
        assert_eq!(keys, vec!["j:stats:a".to_string(), "j:stats:b".to_string()]);
        assert_eq!(store.delete(&keys).unwrap(), 2);
        assert_eq!(store.delete(&[]).unwrap(), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_compare_and_set() {
        let store = MemoryStore::new();
        let slot = Slot::Key("peak".to_string());
        assert!(store.compare_and_set(&slot, None, b"3").unwrap());
        assert!(!store.compare_and_set(&slot, None, b"4").unwrap());
        assert!(!store.compare_and_set(&slot, Some(b"2"), b"4").unwrap());
        assert!(store.compare_and_set(&slot, Some(b"3"), b"7").unwrap());
        assert_eq!(store.get("peak").unwrap(), Some(b"7".to_vec()));

        let field = Slot::Field {
            container: "h".to_string(),
            field: "peak".to_string(),
        };
        assert!(store.compare_and_set(&field, None, b"1").unwrap());
        assert_eq!(store.hash_get("h", "peak").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_execute_watched_detects_change() {
        let store = MemoryStore::new();
        store.set("k", b"1").unwrap();
        let watched = vec![("k".to_string(), store.snapshot("k"))];
        store.set("k", b"2").unwrap();
        let ops = [StoreOp::Set {
            key: "k".to_string(),
            value: b"3".to_vec(),
        }];
        assert_eq!(store.execute_watched(&watched, &ops), None);

        let watched = vec![("k".to_string(), store.snapshot("k"))];
        assert_eq!(store.execute_watched(&watched, &ops), Some(vec![Reply::Ok]));
        assert_eq!(store.get("k").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn test_watched_cas_aborts_on_sibling_field() {
        let store = MemoryStore::new();
        let peak = Slot::Field {
            container: "job:stats".to_string(),
            field: "peak".to_string(),
        };
        let written = store
            .compare_and_set_watched(&peak, None, b"5", || {
                store.hash_increment("job:stats", "pages", 1).map(|_| ())
            })
            .unwrap();
        assert!(!written);
        assert_eq!(store.hash_get("job:stats", "peak").unwrap(), None);

        // A key of its own is untouched by traffic on the hash
        let own = Slot::Key("job:stats:peak".to_string());
        let written = store
            .compare_and_set_watched(&own, None, b"5", || {
                store.hash_increment("job:stats", "pages", 1).map(|_| ())
            })
            .unwrap();
        assert!(written);
        assert_eq!(store.get("job:stats:peak").unwrap(), Some(b"5".to_vec()));
        assert_eq!(store.hash_get("job:stats", "pages").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_watched_cas_compares_before_writing() {
        let store = MemoryStore::new();
        let slot = Slot::Key("peak".to_string());
        store.set("peak", b"3").unwrap();
        let mut ran = false;
        assert!(!store
            .compare_and_set_watched(&slot, Some(b"2"), b"9", || {
                ran = true;
                Ok(())
            })
            .unwrap());
        assert!(!ran);
        assert!(store
            .compare_and_set_watched(&slot, Some(b"3"), b"9", || Ok(()))
            .unwrap());
        assert_eq!(store.get("peak").unwrap(), Some(b"9".to_vec()));
    }
}
