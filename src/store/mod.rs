//! Backing store capability
//!
//! The collector talks to its store only through [`StoreClient`]. A backend
//! implements two primitives:
//!
//! - [`StoreClient::execute_batch`]: run a list of [`StoreOp`]s in order on one
//!   connection, either pipelined or as one transaction
//! - [`StoreClient::compare_and_set`]: conditional write of one slot
//!
//! Every single-operation helper (`get`, `increment`, `hash_get_all`, ...) is a
//! one-element batch.
//!
//! # Atomicity
//!
//! | Call | Guarantee |
//! |------|-----------|
//! | `increment`, `hash_increment` and float forms | atomic; absent counts as 0 |
//! | `set_if_absent`, `hash_set_if_absent` | atomic |
//! | `compare_and_set` | atomic with respect to every other writer of the slot |
//! | `execute_batch(.., Pipeline)` | in order, NOT atomic as a whole |
//! | `execute_batch(.., Transaction)` | all-or-nothing, no interleaving |

pub mod client;
pub mod command;
pub mod glob;
pub mod memory;
pub mod resp;

pub use client::RespStore;
pub use memory::MemoryStore;

use std::sync::Arc;

use crate::error::{StoreError, StoreResult};
use crate::stats::keys::Slot;

/// One store command.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Get { key: String },
    Set { key: String, value: Vec<u8> },
    SetIfAbsent { key: String, value: Vec<u8> },
    Increment { key: String, delta: i64 },
    IncrementFloat { key: String, delta: f64 },
    HashGet { container: String, field: String },
    HashSet { container: String, field: String, value: Vec<u8> },
    HashSetIfAbsent { container: String, field: String, value: Vec<u8> },
    HashIncrement { container: String, field: String, delta: i64 },
    HashIncrementFloat { container: String, field: String, delta: f64 },
    HashGetAll { container: String },
    Delete { keys: Vec<String> },
    KeysMatching { pattern: String },
}

impl StoreOp {
    /// Safe to replay after an ambiguous failure.
    pub fn is_idempotent(&self) -> bool {
        !matches!(
            self,
            StoreOp::Increment { .. }
                | StoreOp::IncrementFloat { .. }
                | StoreOp::HashIncrement { .. }
                | StoreOp::HashIncrementFloat { .. }
        )
    }

    /// Plain read of a slot.
    pub fn read(slot: &Slot) -> Self {
        match slot {
            Slot::Key(key) => StoreOp::Get { key: key.clone() },
            Slot::Field { container, field } => StoreOp::HashGet {
                container: container.clone(),
                field: field.clone(),
            },
        }
    }

    /// Plain write of a slot.
    pub fn write(slot: &Slot, value: Vec<u8>) -> Self {
        match slot {
            Slot::Key(key) => StoreOp::Set {
                key: key.clone(),
                value,
            },
            Slot::Field { container, field } => StoreOp::HashSet {
                container: container.clone(),
                field: field.clone(),
                value,
            },
        }
    }
}

/// Reply to one [`StoreOp`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Ok,
    Int(i64),
    Bulk(Vec<u8>),
    Array(Vec<Reply>),
    Error(String),
}

impl Reply {
    pub fn into_result(self) -> StoreResult<Reply> {
        match self {
            Reply::Error(e) => Err(StoreError::Response(e)),
            other => Ok(other),
        }
    }

    fn unexpected(&self, wanted: &str) -> StoreError {
        StoreError::Protocol(format!("expected {}, got {:?}", wanted, self))
    }

    pub fn into_optional_bytes(self) -> StoreResult<Option<Vec<u8>>> {
        match self.into_result()? {
            Reply::Nil => Ok(None),
            Reply::Bulk(b) => Ok(Some(b)),
            other => Err(other.unexpected("bulk or nil")),
        }
    }

    pub fn into_int(self) -> StoreResult<i64> {
        match self.into_result()? {
            Reply::Int(i) => Ok(i),
            other => Err(other.unexpected("integer")),
        }
    }

    pub fn into_bool(self) -> StoreResult<bool> {
        Ok(self.into_int()? != 0)
    }

    /// Float replies arrive as bulk strings.
    pub fn into_float(self) -> StoreResult<f64> {
        match self.into_result()? {
            Reply::Bulk(b) => std::str::from_utf8(&b)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| StoreError::Protocol("float reply is not a number".to_string())),
            other => Err(other.unexpected("float bulk")),
        }
    }

    pub fn into_ok(self) -> StoreResult<()> {
        match self.into_result()? {
            Reply::Ok => Ok(()),
            // HSET answers with the number of new fields
            Reply::Int(_) => Ok(()),
            other => Err(other.unexpected("OK")),
        }
    }

    pub fn into_strings(self) -> StoreResult<Vec<String>> {
        match self.into_result()? {
            Reply::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Reply::Bulk(b) => String::from_utf8(b)
                        .map_err(|_| StoreError::Protocol("key is not utf-8".to_string())),
                    other => Err(other.unexpected("bulk")),
                })
                .collect(),
            other => Err(other.unexpected("array")),
        }
    }

    /// Flat `[field, value, field, value, ...]` array into pairs.
    pub fn into_pairs(self) -> StoreResult<Vec<(String, Vec<u8>)>> {
        match self.into_result()? {
            Reply::Array(items) => {
                if items.len() % 2 != 0 {
                    return Err(StoreError::Protocol(
                        "hash reply has odd element count".to_string(),
                    ));
                }
                let mut pairs = Vec::with_capacity(items.len() / 2);
                let mut iter = items.into_iter();
                while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
                    let field = match field {
                        Reply::Bulk(b) => String::from_utf8(b).map_err(|_| {
                            StoreError::Protocol("field is not utf-8".to_string())
                        })?,
                        other => return Err(other.unexpected("bulk field")),
                    };
                    let value = match value {
                        Reply::Bulk(b) => b,
                        other => return Err(other.unexpected("bulk value")),
                    };
                    pairs.push((field, value));
                }
                Ok(pairs)
            }
            other => Err(other.unexpected("array")),
        }
    }
}

/// How a batch is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Sent together, applied in order, other clients may interleave.
    Pipeline,
    /// Applied as one unit (MULTI/EXEC).
    Transaction,
}

/// The atomic primitives the collector needs from a backing store.
pub trait StoreClient: Send + Sync {
    /// Run `ops` in order on one connection; one reply per op.
    fn execute_batch(&self, ops: &[StoreOp], mode: BatchMode) -> StoreResult<Vec<Reply>>;

    /// Write `new` to `slot` only if it currently holds `expected`
    /// (`None` = absent). Returns false when another writer got there first.
    fn compare_and_set(&self, slot: &Slot, expected: Option<&[u8]>, new: &[u8])
        -> StoreResult<bool>;

    fn execute(&self, op: StoreOp) -> StoreResult<Reply> {
        self.execute_batch(std::slice::from_ref(&op), BatchMode::Pipeline)?
            .pop()
            .ok_or_else(|| StoreError::Protocol("empty batch reply".to_string()))
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.execute(StoreOp::Get { key: key.to_string() })?
            .into_optional_bytes()
    }

    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.execute(StoreOp::Set {
            key: key.to_string(),
            value: value.to_vec(),
        })?
        .into_ok()
    }

    fn set_if_absent(&self, key: &str, value: &[u8]) -> StoreResult<bool> {
        self.execute(StoreOp::SetIfAbsent {
            key: key.to_string(),
            value: value.to_vec(),
        })?
        .into_bool()
    }

    fn increment(&self, key: &str, delta: i64) -> StoreResult<i64> {
        self.execute(StoreOp::Increment {
            key: key.to_string(),
            delta,
        })?
        .into_int()
    }

    fn increment_float(&self, key: &str, delta: f64) -> StoreResult<f64> {
        self.execute(StoreOp::IncrementFloat {
            key: key.to_string(),
            delta,
        })?
        .into_float()
    }

    fn hash_get(&self, container: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        self.execute(StoreOp::HashGet {
            container: container.to_string(),
            field: field.to_string(),
        })?
        .into_optional_bytes()
    }

    fn hash_set(&self, container: &str, field: &str, value: &[u8]) -> StoreResult<()> {
        self.execute(StoreOp::HashSet {
            container: container.to_string(),
            field: field.to_string(),
            value: value.to_vec(),
        })?
        .into_ok()
    }

    fn hash_set_if_absent(&self, container: &str, field: &str, value: &[u8]) -> StoreResult<bool> {
        self.execute(StoreOp::HashSetIfAbsent {
            container: container.to_string(),
            field: field.to_string(),
            value: value.to_vec(),
        })?
        .into_bool()
    }

    fn hash_increment(&self, container: &str, field: &str, delta: i64) -> StoreResult<i64> {
        self.execute(StoreOp::HashIncrement {
            container: container.to_string(),
            field: field.to_string(),
            delta,
        })?
        .into_int()
    }

    fn hash_increment_float(&self, container: &str, field: &str, delta: f64) -> StoreResult<f64> {
        self.execute(StoreOp::HashIncrementFloat {
            container: container.to_string(),
            field: field.to_string(),
            delta,
        })?
        .into_float()
    }

    fn hash_get_all(&self, container: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        self.execute(StoreOp::HashGetAll {
            container: container.to_string(),
        })?
        .into_pairs()
    }

    /// Number of keys removed.
    fn delete(&self, keys: &[String]) -> StoreResult<i64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.execute(StoreOp::Delete {
            keys: keys.to_vec(),
        })?
        .into_int()
    }

    fn keys_matching(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.execute(StoreOp::KeysMatching {
            pattern: pattern.to_string(),
        })?
        .into_strings()
    }
}

impl<S: StoreClient + ?Sized> StoreClient for Arc<S> {
    fn execute_batch(&self, ops: &[StoreOp], mode: BatchMode) -> StoreResult<Vec<Reply>> {
        (**self).execute_batch(ops, mode)
    }

    fn compare_and_set(
        &self,
        slot: &Slot,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> StoreResult<bool> {
        (**self).compare_and_set(slot, expected, new)
    }
}
