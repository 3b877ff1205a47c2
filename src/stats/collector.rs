//! Stats collector
//!
//! A [`StatsCollector`] owns one store client and at most one bound job.
//! Every metric operation runs against a job chosen by one rule:
//! explicit job (via [`StatsCollector::job`]) > bound job > default job.
//!
//! ## Atomicity per operation
//!
//! | Operation | Store calls | Concurrency guarantee |
//! |-----------|-------------|-----------------------|
//! | `set_value` | SET / HSET | last write wins |
//! | `inc_value` | INCRBY / HINCRBY (float forms for float counts) | atomic |
//! | `inc_value_from` (start != 0) | SETNX + INCRBY as one transaction | atomic |
//! | `max_value`, `min_value` | read + compare-and-set on the extremum key, retried | no lost updates |
//! | `set_stats` | DEL + writes as one transaction | atomic per job |
//! | `get_stats` | HGETALL (hash layout), KEYS + pipelined GETs | snapshot per key |
//! | `clear_stats` | KEYS + DEL, plus the job hash | keys created after KEYS survive |
//!
//! In the hash layout an extremum key shadows a hash field of the same name,
//! and `set_value` drops the shadowing key in the same transaction.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use super::codec::ValueCodec;
use super::keys::{JobId, KeyNamespace, Slot};
use super::value::{MetricValue, Number};
use crate::config::{StatsConfig, DEFAULT_MAX_CAS_ATTEMPTS};
use crate::error::{CodecError, ConfigError, StatsError, StatsResult, StoreError};
use crate::store::{BatchMode, RespStore, StoreClient, StoreOp};

/// Lifecycle of a collector's job binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorState {
    Created,
    Opened(JobId),
    Closed,
}

pub struct StatsCollector<S> {
    store: S,
    namespace: KeyNamespace,
    default_job: JobId,
    persist: bool,
    max_cas_attempts: u32,
    state: CollectorState,
}

impl StatsCollector<RespStore> {
    /// Collector talking RESP to the store named in `config`.
    pub fn connect(config: &StatsConfig) -> Result<Self, ConfigError> {
        let store = RespStore::from_config(&config.connection)?;
        Self::from_config(store, config)
    }
}

impl<S: StoreClient> StatsCollector<S> {
    pub fn new(store: S, namespace: KeyNamespace) -> Self {
        StatsCollector {
            store,
            namespace,
            default_job: JobId::default_job(),
            persist: false,
            max_cas_attempts: DEFAULT_MAX_CAS_ATTEMPTS,
            state: CollectorState::Created,
        }
    }

    /// Validates the whole configuration before building anything.
    pub fn from_config(store: S, config: &StatsConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(store, config.namespace()?)
            .with_default_job(config.default_job()?)
            .with_persist(config.persist)
            .with_max_cas_attempts(config.max_cas_attempts))
    }

    pub fn with_default_job(mut self, job: JobId) -> Self {
        self.default_job = job;
        self
    }

    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn with_max_cas_attempts(mut self, attempts: u32) -> Self {
        self.max_cas_attempts = attempts.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    pub fn state(&self) -> &CollectorState {
        &self.state
    }

    pub fn bound_job(&self) -> Option<&JobId> {
        match &self.state {
            CollectorState::Opened(job) => Some(job),
            _ => None,
        }
    }

    /// Job used by the collector's own metric methods.
    pub fn current_job(&self) -> &JobId {
        self.bound_job().unwrap_or(&self.default_job)
    }

    /// Bind `job`. Reopening after close is allowed.
    pub fn open(&mut self, job: JobId) {
        if let CollectorState::Opened(previous) = &self.state {
            if *previous != job {
                warn!(previous = %previous, job = %job, "rebinding open collector");
            }
        }
        info!(job = %job, "stats opened");
        self.state = CollectorState::Opened(job);
    }

    /// Unbind and, unless persisting, clear the job's metrics.
    /// `persist = None` uses the configured policy.
    pub fn close(&mut self, job: &JobId, persist: Option<bool>) -> StatsResult<()> {
        let persist = persist.unwrap_or(self.persist);
        match &self.state {
            CollectorState::Opened(bound) if bound != job => {
                warn!(bound = %bound, job = %job, "closing a job that is not the bound one");
            }
            CollectorState::Opened(_) => {}
            _ => debug!(job = %job, "closing without an open binding"),
        }
        self.state = CollectorState::Closed;
        info!(job = %job, persist, "stats closed");

        if !persist {
            self.job(job).clear_stats()?;
        }
        Ok(())
    }

    /// Operations scoped to an explicit job, ignoring the binding.
    pub fn job(&self, job: &JobId) -> JobStats<'_, S> {
        JobStats {
            collector: self,
            job: job.clone(),
        }
    }

    fn current(&self) -> JobStats<'_, S> {
        self.job(self.current_job())
    }

    pub fn get_value(&self, name: &str) -> StatsResult<Option<MetricValue>> {
        self.current().get_value(name)
    }

    pub fn get_value_or(
        &self,
        name: &str,
        default: impl Into<MetricValue>,
    ) -> StatsResult<MetricValue> {
        self.current().get_value_or(name, default)
    }

    pub fn set_value(&self, name: &str, value: impl Into<MetricValue>) -> StatsResult<()> {
        self.current().set_value(name, value)
    }

    pub fn get_stats(&self) -> StatsResult<BTreeMap<String, MetricValue>> {
        self.current().get_stats()
    }

    pub fn set_stats<I, K, V>(&self, stats: I) -> StatsResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<MetricValue>,
    {
        self.current().set_stats(stats)
    }

    pub fn inc_value(&self, name: &str, count: impl Into<Number>) -> StatsResult<Number> {
        self.current().inc_value(name, count)
    }

    pub fn inc_value_from(
        &self,
        name: &str,
        count: impl Into<Number>,
        start: impl Into<Number>,
    ) -> StatsResult<Number> {
        self.current().inc_value_from(name, count, start)
    }

    pub fn max_value(&self, name: &str, value: impl Into<Number>) -> StatsResult<Number> {
        self.current().max_value(name, value)
    }

    pub fn min_value(&self, name: &str, value: impl Into<Number>) -> StatsResult<Number> {
        self.current().min_value(name, value)
    }

    pub fn clear_stats(&self) -> StatsResult<()> {
        self.current().clear_stats()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extremum {
    Max,
    Min,
}

impl Extremum {
    /// Whether `candidate` should replace `current`.
    fn improves(self, candidate: Number, current: Number) -> bool {
        match self {
            Extremum::Max => candidate > current,
            Extremum::Min => candidate < current,
        }
    }
}

/// Metric operations for one job.
pub struct JobStats<'a, S> {
    collector: &'a StatsCollector<S>,
    job: JobId,
}

impl<'a, S: StoreClient> JobStats<'a, S> {
    pub fn job(&self) -> &JobId {
        &self.job
    }

    fn store(&self) -> &'a S {
        &self.collector.store
    }

    fn slot(&self, name: &str) -> Slot {
        self.collector.namespace.resolve(&self.job, name)
    }

    fn extremum_slot(&self, name: &str) -> Slot {
        self.collector.namespace.extremum_slot(&self.job, name)
    }

    /// Raw bytes at the extremum slot, and at the plain slot when that is a
    /// different one.
    fn read_raw(&self, name: &str) -> StatsResult<(Option<Vec<u8>>, Option<Vec<u8>>)> {
        let slot = self.slot(name);
        let extremum = self.extremum_slot(name);
        if slot == extremum {
            let raw = self
                .store()
                .execute(StoreOp::read(&slot))?
                .into_optional_bytes()?;
            return Ok((raw, None));
        }

        let reads = [StoreOp::read(&extremum), StoreOp::read(&slot)];
        let mut replies = self
            .store()
            .execute_batch(&reads, BatchMode::Pipeline)?
            .into_iter();
        let mut next = || {
            replies
                .next()
                .ok_or_else(|| StoreError::Protocol("missing read reply".to_string()))?
                .into_optional_bytes()
        };
        let tracked = next()?;
        let plain = next()?;
        Ok((tracked, plain))
    }

    /// Decoded value, `None` when absent.
    pub fn get_value(&self, name: &str) -> StatsResult<Option<MetricValue>> {
        let (tracked, plain) = self.read_raw(name)?;
        let raw = tracked.or(plain);
        debug!(job = %self.job, metric = name, found = raw.is_some(), "get_value");
        Ok(ValueCodec::decode(raw.as_deref()))
    }

    pub fn get_value_or(
        &self,
        name: &str,
        default: impl Into<MetricValue>,
    ) -> StatsResult<MetricValue> {
        Ok(self.get_value(name)?.unwrap_or_else(|| default.into()))
    }

    pub fn set_value(&self, name: &str, value: impl Into<MetricValue>) -> StatsResult<()> {
        let encoded = ValueCodec::encode(&value.into())?;
        let slot = self.slot(name);
        debug!(job = %self.job, metric = name, "set_value");

        let extremum = self.extremum_slot(name);
        if slot == extremum {
            self.store()
                .execute(StoreOp::write(&slot, encoded))?
                .into_ok()?;
            return Ok(());
        }

        let ops = [
            StoreOp::Delete {
                keys: vec![extremum.watch_key().to_string()],
            },
            StoreOp::write(&slot, encoded),
        ];
        for reply in self.store().execute_batch(&ops, BatchMode::Transaction)? {
            reply.into_result()?;
        }
        Ok(())
    }

    /// Every metric of the job keyed by bare metric name.
    pub fn get_stats(&self) -> StatsResult<BTreeMap<String, MetricValue>> {
        let namespace = &self.collector.namespace;
        let mut stats = BTreeMap::new();

        if let Some(container) = namespace.container(&self.job) {
            for (field, raw) in self.store().hash_get_all(&container)? {
                if let Some(value) = ValueCodec::decode(Some(raw.as_slice())) {
                    stats.insert(field, value);
                }
            }
        }

        // Per-metric keys come second so extremum keys shadow hash fields
        let keys = self.store().keys_matching(&namespace.pattern(&self.job))?;
        if !keys.is_empty() {
            let reads: Vec<StoreOp> = keys
                .iter()
                .map(|key| StoreOp::Get { key: key.clone() })
                .collect();
            let replies = self.store().execute_batch(&reads, BatchMode::Pipeline)?;
            debug_assert_eq!(replies.len(), keys.len(), "one reply per key");

            for (key, reply) in keys.iter().zip(replies) {
                // Deleted between KEYS and GET
                let Some(raw) = reply.into_optional_bytes()? else {
                    continue;
                };
                let Some(name) = namespace.metric_name(&self.job, key) else {
                    continue;
                };
                if let Some(value) = ValueCodec::decode(Some(raw.as_slice())) {
                    stats.insert(name.to_string(), value);
                }
            }
        }

        debug!(job = %self.job, metrics = stats.len(), "get_stats");
        Ok(stats)
    }

    /// Replace every metric of the job with `stats`.
    pub fn set_stats<I, K, V>(&self, stats: I) -> StatsResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<MetricValue>,
    {
        let mut writes = Vec::new();
        for (name, value) in stats {
            let name = name.into();
            let encoded = ValueCodec::encode(&value.into())?;
            writes.push(StoreOp::write(&self.slot(&name), encoded));
        }

        let stale = self.job_keys()?;
        let mut ops = Vec::with_capacity(writes.len() + 1);
        if !stale.is_empty() {
            ops.push(StoreOp::Delete { keys: stale });
        }
        ops.extend(writes);
        if ops.is_empty() {
            return Ok(());
        }

        debug!(job = %self.job, ops = ops.len(), "set_stats");
        for reply in self.store().execute_batch(&ops, BatchMode::Transaction)? {
            reply.into_result()?;
        }
        Ok(())
    }

    /// Atomically add `count`, treating an absent metric as 0.
    pub fn inc_value(&self, name: &str, count: impl Into<Number>) -> StatsResult<Number> {
        self.inc_value_from(name, count, 0)
    }

    /// Atomically add `count`, treating an absent metric as `start`.
    ///
    /// Integer counts use the integer increment; a float count or start, or
    /// a metric that already holds a float, uses the float increment.
    pub fn inc_value_from(
        &self,
        name: &str,
        count: impl Into<Number>,
        start: impl Into<Number>,
    ) -> StatsResult<Number> {
        let start = start.into();
        let count = match (count.into(), start) {
            (count, Number::Float(_)) => Number::Float(count.as_f64()),
            (count, Number::Int(_)) => count,
        };
        debug!(job = %self.job, metric = name, %count, %start, "inc_value");

        match self.increment(name, count, start) {
            Err(StatsError::Store(StoreError::Response(message)))
                if count.as_i64().is_some() && message.contains("not an integer") =>
            {
                debug!(job = %self.job, metric = name, "metric holds a float, retrying as float");
                self.increment(name, Number::Float(count.as_f64()), start)
            }
            result => result,
        }
    }

    fn increment(&self, name: &str, count: Number, start: Number) -> StatsResult<Number> {
        let slot = self.slot(name);
        let increment = increment_op(&slot, count)?;

        let reply = if start.is_zero() {
            self.store().execute(increment)?
        } else {
            // Seed and increment must not interleave with another worker's seed
            let seed = set_if_absent_op(&slot, ValueCodec::encode_number(start)?);
            self.store()
                .execute_batch(&[seed, increment], BatchMode::Transaction)?
                .pop()
                .ok_or_else(|| StoreError::Protocol("missing increment reply".to_string()))?
        };
        Ok(match count {
            Number::Int(_) => Number::Int(reply.into_int()?),
            Number::Float(_) => Number::Float(reply.into_float()?),
        })
    }

    /// Keep the largest value ever offered. Returns the stored maximum.
    pub fn max_value(&self, name: &str, value: impl Into<Number>) -> StatsResult<Number> {
        self.update_extremum(name, value.into(), Extremum::Max)
    }

    /// Keep the smallest value ever offered. Returns the stored minimum.
    pub fn min_value(&self, name: &str, value: impl Into<Number>) -> StatsResult<Number> {
        self.update_extremum(name, value.into(), Extremum::Min)
    }

    fn update_extremum(
        &self,
        name: &str,
        candidate: Number,
        kind: Extremum,
    ) -> StatsResult<Number> {
        let encoded = ValueCodec::encode_number(candidate)?;
        let slot = self.extremum_slot(name);
        let attempts = self.collector.max_cas_attempts;

        for attempt in 1..=attempts {
            // An untracked extremum starts from the hash field, if any
            let (raw, plain) = self.read_raw(name)?;
            match ValueCodec::decode(raw.as_deref().or(plain.as_deref())) {
                None => {}
                Some(MetricValue::Number(current)) => {
                    if !kind.improves(candidate, current) {
                        debug!(job = %self.job, metric = name, %current, %candidate, "extremum unchanged");
                        return Ok(current);
                    }
                }
                Some(_) => {
                    return Err(StatsError::NotNumeric {
                        metric: name.to_string(),
                    })
                }
            }

            if self
                .store()
                .compare_and_set(&slot, raw.as_deref(), &encoded)?
            {
                debug!(job = %self.job, metric = name, %candidate, attempt, "extremum updated");
                return Ok(candidate);
            }
            debug!(job = %self.job, metric = name, attempt, "compare-and-set lost, retrying");
        }

        warn!(job = %self.job, metric = name, attempts, "extremum update gave up");
        Err(StatsError::Contention {
            metric: name.to_string(),
            attempts,
        })
    }

    /// Delete every metric of the job.
    pub fn clear_stats(&self) -> StatsResult<()> {
        let keys = self.job_keys()?;
        let removed = self.store().delete(&keys)?;
        debug!(job = %self.job, removed, "clear_stats");
        Ok(())
    }

    /// Every key currently holding a metric of the job.
    fn job_keys(&self) -> StatsResult<Vec<String>> {
        let namespace = &self.collector.namespace;
        let mut keys = self.store().keys_matching(&namespace.pattern(&self.job))?;
        if let Some(container) = namespace.container(&self.job) {
            keys.push(container);
        }
        Ok(keys)
    }
}

fn increment_op(slot: &Slot, count: Number) -> StatsResult<StoreOp> {
    let op = match (slot, count) {
        (Slot::Key(key), Number::Int(delta)) => StoreOp::Increment {
            key: key.clone(),
            delta,
        },
        (Slot::Key(key), Number::Float(delta)) => {
            check_finite(delta)?;
            StoreOp::IncrementFloat {
                key: key.clone(),
                delta,
            }
        }
        (Slot::Field { container, field }, Number::Int(delta)) => StoreOp::HashIncrement {
            container: container.clone(),
            field: field.clone(),
            delta,
        },
        (Slot::Field { container, field }, Number::Float(delta)) => {
            check_finite(delta)?;
            StoreOp::HashIncrementFloat {
                container: container.clone(),
                field: field.clone(),
                delta,
            }
        }
    };
    Ok(op)
}

fn set_if_absent_op(slot: &Slot, value: Vec<u8>) -> StoreOp {
    match slot {
        Slot::Key(key) => StoreOp::SetIfAbsent {
            key: key.clone(),
            value,
        },
        Slot::Field { container, field } => StoreOp::HashSetIfAbsent {
            container: container.clone(),
            field: field.clone(),
            value,
        },
    }
}

fn check_finite(f: f64) -> StatsResult<()> {
    if f.is_finite() {
        Ok(())
    } else {
        Err(CodecError::NonFinite(f).into())
    }
}
