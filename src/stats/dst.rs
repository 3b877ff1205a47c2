//! Deterministic Simulation Testing for the stats collector
//!
//! VOPR-style harness: several workers, each a [`StatsCollector`] with its
//! own store handle, share one [`MemoryStore`]. The handle is an
//! [`InterferingStore`]: on every store call made on behalf of a worker
//! operation, BUGGIFY may let a rival worker update the same metric first,
//! which lands rival writes between a worker's read and its conditional
//! write. Conditional writes run through
//! [`MemoryStore::compare_and_set_watched`], so a neighbour bumping another
//! metric of the same job inside the WATCH window aborts the write exactly
//! when a RESP server would. Every update, worker, rival or neighbour, goes
//! into a ledger, and after each operation the stored value must match it:
//!
//! - counters: `start + sum(counts)`
//! - peaks: `max(values offered)`
//! - lows: `min(values offered)`
//!
//! Same seed, same operations, same faults.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::collector::StatsCollector;
use super::keys::{JobId, KeyNamespace, Slot};
use super::value::Number;
use crate::buggify::{self, faults, FaultConfig, Rng, SimulatedRng};
use crate::error::{StatsResult, StoreResult};
use crate::store::{BatchMode, MemoryStore, Reply, StoreClient, StoreOp};

const HASH_TEMPLATE: &str = "{job}:stats";
/// Counter bumped by neighbour writes.
const NEIGHBOUR_METRIC: &str = "neighbour";

/// Configuration for stats DST
#[derive(Debug, Clone)]
pub struct StatsDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    pub num_workers: usize,
    pub num_jobs: usize,
    /// Metrics per kind (counter, peak, low)
    pub num_metrics: usize,
    /// Extremal candidates are drawn from [-value_range, value_range)
    pub value_range: i64,
    pub inc_prob: f64,
    pub max_prob: f64,
    pub min_prob: f64,
    pub clear_prob: f64,
    /// One hash per job instead of one key per metric
    pub hash_layout: bool,
    pub faults: FaultConfig,
}

impl Default for StatsDSTConfig {
    fn default() -> Self {
        StatsDSTConfig {
            seed: 0,
            num_workers: 4,
            num_jobs: 2,
            num_metrics: 4,
            value_range: 1000,
            inc_prob: 0.35,
            max_prob: 0.25,
            min_prob: 0.2,
            clear_prob: 0.03,
            hash_layout: false,
            faults: FaultConfig::moderate(),
        }
    }
}

impl StatsDSTConfig {
    pub fn new(seed: u64) -> Self {
        StatsDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Few metrics, many workers, aggressive rivals
    pub fn contended(seed: u64) -> Self {
        StatsDSTConfig {
            seed,
            num_workers: 8,
            num_jobs: 1,
            num_metrics: 1,
            value_range: 50,
            faults: FaultConfig::chaos(),
            ..Default::default()
        }
    }

    /// Hash-per-job layout
    pub fn hash_layout(seed: u64) -> Self {
        StatsDSTConfig {
            seed,
            hash_layout: true,
            ..Default::default()
        }
    }

    /// Hash layout where every conditional write races a neighbour write
    /// to the same job hash
    pub fn busy_hash(seed: u64) -> Self {
        let mut fault_config = FaultConfig::moderate();
        fault_config.set(faults::store::NEIGHBOUR_WRITE, 1.0);
        StatsDSTConfig {
            seed,
            hash_layout: true,
            faults: fault_config,
            ..Default::default()
        }
    }

    /// No fault injection at all
    pub fn calm(seed: u64) -> Self {
        StatsDSTConfig {
            seed,
            faults: FaultConfig::disabled(),
            ..Default::default()
        }
    }
}

/// Operation type for logging
#[derive(Debug, Clone)]
pub enum StatsOp {
    Inc {
        worker: usize,
        job: String,
        metric: String,
        count: i64,
        start: i64,
    },
    Max {
        worker: usize,
        job: String,
        metric: String,
        value: i64,
    },
    Min {
        worker: usize,
        job: String,
        metric: String,
        value: i64,
    },
    Read {
        worker: usize,
        job: String,
    },
    Clear {
        worker: usize,
        job: String,
    },
}

/// Result of a stats DST run
#[derive(Debug, Clone)]
pub struct StatsDSTResult {
    pub seed: u64,
    pub total_operations: u64,
    pub increments: u64,
    pub max_updates: u64,
    pub min_updates: u64,
    pub reads: u64,
    pub clears: u64,
    pub rival_writes: u64,
    pub neighbour_writes: u64,
    pub spurious_cas_failures: u64,
    pub vanished_keys: u64,
    pub invariant_violations: Vec<String>,
    pub last_op: Option<StatsOp>,
}

impl StatsDSTResult {
    pub fn new(seed: u64) -> Self {
        StatsDSTResult {
            seed,
            total_operations: 0,
            increments: 0,
            max_updates: 0,
            min_updates: 0,
            reads: 0,
            clears: 0,
            rival_writes: 0,
            neighbour_writes: 0,
            spurious_cas_failures: 0,
            vanished_keys: 0,
            invariant_violations: Vec::new(),
            last_op: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops (inc:{}, max:{}, min:{}, reads:{}, clears:{}), \
             rivals:{}, neighbours:{}, spurious:{}, vanished:{}, {} violations",
            self.seed,
            self.total_operations,
            self.increments,
            self.max_updates,
            self.min_updates,
            self.reads,
            self.clears,
            self.rival_writes,
            self.neighbour_writes,
            self.spurious_cas_failures,
            self.vanished_keys,
            self.invariant_violations.len()
        )
    }
}

/// Expected state of one metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expected {
    Counter(i64),
    Max(i64),
    Min(i64),
}

impl Expected {
    fn value(self) -> i64 {
        match self {
            Expected::Counter(v) | Expected::Max(v) | Expected::Min(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Update {
    Add { start: i64, count: i64 },
    Max(i64),
    Min(i64),
}

impl Update {
    fn apply(self, current: Option<Expected>) -> Expected {
        match (self, current) {
            (Update::Add { count, .. }, Some(Expected::Counter(v))) => Expected::Counter(v + count),
            (Update::Add { start, count }, _) => Expected::Counter(start + count),
            (Update::Max(v), Some(Expected::Max(m))) => Expected::Max(m.max(v)),
            (Update::Max(v), _) => Expected::Max(v),
            (Update::Min(v), Some(Expected::Min(m))) => Expected::Min(m.min(v)),
            (Update::Min(v), _) => Expected::Min(v),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Counter { start: i64 },
    Max,
    Min,
    Snapshot,
}

/// The worker operation currently in flight.
#[derive(Debug, Clone)]
struct Pending {
    job: JobId,
    metric: String,
    kind: Kind,
}

type Ledger = BTreeMap<(JobId, String), Expected>;

/// Simulation state shared by every worker's store handle.
struct SimState {
    rng: SimulatedRng,
    namespace: KeyNamespace,
    value_range: i64,
    ledger: Ledger,
    pending: Option<Pending>,
    rival: StatsCollector<Arc<MemoryStore>>,
    rival_writes: u64,
    neighbour_writes: u64,
    spurious_cas_failures: u64,
    vanished_keys: u64,
    violations: Vec<String>,
}

impl SimState {
    fn record(&mut self, job: &JobId, metric: &str, update: Update) -> Expected {
        let key = (job.clone(), metric.to_string());
        let next = update.apply(self.ledger.get(&key).copied());
        self.ledger.insert(key, next);
        next
    }

    /// Maybe let a rival update the pending metric.
    fn rival_acts(&mut self) {
        let Some(pending) = self.pending.clone() else {
            return;
        };
        if matches!(pending.kind, Kind::Snapshot) {
            return;
        }
        if !buggify::should_buggify(&mut self.rng, faults::store::RIVAL_WRITE) {
            return;
        }
        let burst = if buggify::should_buggify(&mut self.rng, faults::store::RIVAL_BURST) {
            self.rng.gen_range(2, 5)
        } else {
            1
        };

        for _ in 0..burst {
            let range = self.value_range;
            let update = match pending.kind {
                Kind::Counter { start } => Update::Add {
                    start,
                    count: self.rng.gen_signed(-3, 10),
                },
                Kind::Max => Update::Max(self.rng.gen_signed(-range, range)),
                Kind::Min => Update::Min(self.rng.gen_signed(-range, range)),
                Kind::Snapshot => return,
            };

            let rival = self.rival.job(&pending.job);
            let outcome = match update {
                Update::Add { start, count } => rival
                    .inc_value_from(&pending.metric, count, start)
                    .map(|_| ()),
                Update::Max(v) => rival.max_value(&pending.metric, v).map(|_| ()),
                Update::Min(v) => rival.min_value(&pending.metric, v).map(|_| ()),
            };
            match outcome {
                Ok(()) => {
                    self.rival_writes += 1;
                    self.record(&pending.job, &pending.metric, update);
                }
                Err(e) => self
                    .violations
                    .push(format!("rival {:?} on {} failed: {}", update, pending.metric, e)),
            }
        }
    }

    /// Maybe bump the neighbour counter of the pending job. Runs inside a
    /// worker's WATCH window.
    fn neighbour_acts(&mut self) {
        let Some(pending) = self.pending.clone() else {
            return;
        };
        if !buggify::should_buggify(&mut self.rng, faults::store::NEIGHBOUR_WRITE) {
            return;
        }
        let update = Update::Add { start: 0, count: 1 };
        match self.rival.job(&pending.job).inc_value(NEIGHBOUR_METRIC, 1) {
            Ok(_) => {
                self.neighbour_writes += 1;
                self.record(&pending.job, NEIGHBOUR_METRIC, update);
            }
            Err(e) => self
                .violations
                .push(format!("neighbour write on {} failed: {}", pending.job, e)),
        }
    }

    /// Maybe delete one key of a pipelined read between KEYS and GET.
    fn vanish_key(&mut self, store: &MemoryStore, ops: &[StoreOp]) {
        let Some(pending) = self.pending.clone() else {
            return;
        };
        let all_gets = ops.iter().all(|op| matches!(op, StoreOp::Get { .. }));
        if !matches!(pending.kind, Kind::Snapshot) || ops.is_empty() || !all_gets {
            return;
        }
        if !buggify::should_buggify(&mut self.rng, faults::store::KEY_VANISH) {
            return;
        }

        let idx = self.rng.gen_range(0, ops.len() as u64) as usize;
        let StoreOp::Get { key } = &ops[idx] else {
            return;
        };
        if let Err(e) = store.delete(std::slice::from_ref(key)) {
            self.violations.push(format!("vanish of {} failed: {}", key, e));
            return;
        }
        if let Some(metric) = self.namespace.metric_name(&pending.job, key) {
            self.ledger.remove(&(pending.job.clone(), metric.to_string()));
        }
        self.vanished_keys += 1;
    }
}

/// Store handle that lets rivals act inside a worker's operation.
#[derive(Clone)]
pub struct InterferingStore {
    inner: Arc<MemoryStore>,
    sim: Arc<Mutex<SimState>>,
}

impl StoreClient for InterferingStore {
    fn execute_batch(&self, ops: &[StoreOp], mode: BatchMode) -> StoreResult<Vec<Reply>> {
        {
            let mut sim = self.sim.lock();
            sim.rival_acts();
            sim.vanish_key(&self.inner, ops);
        }
        self.inner.execute_batch(ops, mode)
    }

    fn compare_and_set(
        &self,
        slot: &Slot,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> StoreResult<bool> {
        let mut sim = self.sim.lock();
        sim.rival_acts();
        if sim.pending.is_some()
            && buggify::should_buggify(&mut sim.rng, faults::store::CAS_SPURIOUS_FAIL)
        {
            sim.spurious_cas_failures += 1;
            return Ok(false);
        }
        self.inner
            .compare_and_set_watched(slot, expected, new, || {
                sim.neighbour_acts();
                Ok(())
            })
    }
}

/// DST harness for the stats collector
pub struct StatsDSTHarness {
    config: StatsDSTConfig,
    rng: SimulatedRng,
    inner: Arc<MemoryStore>,
    sim: Arc<Mutex<SimState>>,
    workers: Vec<StatsCollector<InterferingStore>>,
    jobs: Vec<JobId>,
    result: StatsDSTResult,
}

impl StatsDSTHarness {
    pub fn new(config: StatsDSTConfig) -> Self {
        debug_assert!(config.num_workers > 0, "Precondition: at least one worker");
        debug_assert!(config.num_jobs > 0, "Precondition: at least one job");
        debug_assert!(config.num_metrics > 0, "Precondition: at least one metric");

        buggify::set_config(config.faults.clone());
        buggify::reset_stats();

        let namespace = if config.hash_layout {
            KeyNamespace::new(HASH_TEMPLATE).unwrap_or_default()
        } else {
            KeyNamespace::default()
        };
        let inner = Arc::new(MemoryStore::new());
        let jobs: Vec<JobId> = (0..config.num_jobs)
            .flat_map(|j| JobId::new(format!("crawl-{}", j)))
            .collect();

        let sim = Arc::new(Mutex::new(SimState {
            // Separate stream from operation generation
            rng: SimulatedRng::new(config.seed ^ 0x9E37_79B9_7F4A_7C15),
            namespace: namespace.clone(),
            value_range: config.value_range,
            ledger: Ledger::new(),
            pending: None,
            rival: StatsCollector::new(Arc::clone(&inner), namespace.clone()),
            rival_writes: 0,
            neighbour_writes: 0,
            spurious_cas_failures: 0,
            vanished_keys: 0,
            violations: Vec::new(),
        }));

        let workers = (0..config.num_workers)
            .map(|i| {
                let store = InterferingStore {
                    inner: Arc::clone(&inner),
                    sim: Arc::clone(&sim),
                };
                let mut worker = StatsCollector::new(store, namespace.clone());
                worker.open(jobs[i % jobs.len()].clone());
                worker
            })
            .collect();

        StatsDSTHarness {
            rng: SimulatedRng::new(config.seed),
            result: StatsDSTResult::new(config.seed),
            config,
            inner,
            sim,
            workers,
            jobs,
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::new(StatsDSTConfig::new(seed))
    }

    fn counter_start(idx: usize) -> i64 {
        if idx % 2 == 0 {
            0
        } else {
            10 * idx as i64
        }
    }

    fn pick<T: Clone>(&mut self, items: &[T]) -> (usize, T) {
        let idx = self.rng.gen_range(0, items.len() as u64) as usize;
        (idx, items[idx].clone())
    }

    fn run_single_op(&mut self) {
        let worker = self.rng.gen_range(0, self.workers.len() as u64) as usize;
        let jobs = self.jobs.clone();
        let (_, job) = self.pick(&jobs);
        let metric_idx = self.rng.gen_range(0, self.config.num_metrics as u64) as usize;
        let roll = self.rng.gen_range(0, 1000) as f64 / 1000.0;

        let inc_cut = self.config.inc_prob;
        let max_cut = inc_cut + self.config.max_prob;
        let min_cut = max_cut + self.config.min_prob;
        let clear_cut = min_cut + self.config.clear_prob;

        if roll < inc_cut {
            let start = Self::counter_start(metric_idx);
            let count = self.rng.gen_signed(-3, 10);
            self.run_update(worker, job, format!("count:{}", metric_idx), Kind::Counter { start }, count);
        } else if roll < max_cut {
            let value = self.rng.gen_signed(-self.config.value_range, self.config.value_range);
            self.run_update(worker, job, format!("peak:{}", metric_idx), Kind::Max, value);
        } else if roll < min_cut {
            let value = self.rng.gen_signed(-self.config.value_range, self.config.value_range);
            self.run_update(worker, job, format!("low:{}", metric_idx), Kind::Min, value);
        } else if roll < clear_cut {
            self.run_clear(worker, job);
        } else {
            self.run_read(worker, job);
        }

        self.result.total_operations += 1;
        let violations = std::mem::take(&mut self.sim.lock().violations);
        for violation in violations {
            self.violation(violation);
        }
    }

    fn violation(&mut self, message: String) {
        self.result.invariant_violations.push(format!(
            "Op #{}: {:?} - {}",
            self.result.total_operations, self.result.last_op, message
        ));
    }

    fn run_update(&mut self, worker: usize, job: JobId, metric: String, kind: Kind, value: i64) {
        let (op, update) = match kind {
            Kind::Counter { start } => {
                self.result.increments += 1;
                (
                    StatsOp::Inc {
                        worker,
                        job: job.to_string(),
                        metric: metric.clone(),
                        count: value,
                        start,
                    },
                    Update::Add {
                        start,
                        count: value,
                    },
                )
            }
            Kind::Max => {
                self.result.max_updates += 1;
                (
                    StatsOp::Max {
                        worker,
                        job: job.to_string(),
                        metric: metric.clone(),
                        value,
                    },
                    Update::Max(value),
                )
            }
            Kind::Min | Kind::Snapshot => {
                self.result.min_updates += 1;
                (
                    StatsOp::Min {
                        worker,
                        job: job.to_string(),
                        metric: metric.clone(),
                        value,
                    },
                    Update::Min(value),
                )
            }
        };
        self.result.last_op = Some(op);

        self.sim.lock().pending = Some(Pending {
            job: job.clone(),
            metric: metric.clone(),
            kind,
        });
        let outcome = self.apply_update(worker, &job, &metric, update);
        self.sim.lock().pending = None;

        let returned = match outcome {
            Ok(n) => n,
            Err(e) => {
                self.violation(format!("operation failed: {}", e));
                return;
            }
        };

        let expected = self.sim.lock().record(&job, &metric, update).value();
        if returned != Number::Int(expected) {
            self.violation(format!(
                "{} returned {}, expected {}",
                metric, returned, expected
            ));
        }
        match self.stored(&job, &metric) {
            Some(stored) if stored == expected => {}
            other => self.violation(format!(
                "{} stored {:?}, expected {}",
                metric, other, expected
            )),
        }
    }

    /// Worker's own methods when the job is its bound one, an explicit
    /// job view otherwise.
    fn apply_update(
        &self,
        worker: usize,
        job: &JobId,
        metric: &str,
        update: Update,
    ) -> StatsResult<Number> {
        let collector = &self.workers[worker];
        if collector.bound_job() == Some(job) {
            match update {
                Update::Add { start, count } => collector.inc_value_from(metric, count, start),
                Update::Max(v) => collector.max_value(metric, v),
                Update::Min(v) => collector.min_value(metric, v),
            }
        } else {
            let stats = collector.job(job);
            match update {
                Update::Add { start, count } => stats.inc_value_from(metric, count, start),
                Update::Max(v) => stats.max_value(metric, v),
                Update::Min(v) => stats.min_value(metric, v),
            }
        }
    }

    fn run_clear(&mut self, worker: usize, job: JobId) {
        self.result.clears += 1;
        self.result.last_op = Some(StatsOp::Clear {
            worker,
            job: job.to_string(),
        });

        if let Err(e) = self.workers[worker].job(&job).clear_stats() {
            self.violation(format!("clear failed: {}", e));
            return;
        }
        self.sim.lock().ledger.retain(|(j, _), _| *j != job);
        self.check_snapshot(worker, &job);
    }

    fn run_read(&mut self, worker: usize, job: JobId) {
        self.result.reads += 1;
        self.result.last_op = Some(StatsOp::Read {
            worker,
            job: job.to_string(),
        });

        self.sim.lock().pending = Some(Pending {
            job: job.clone(),
            metric: String::new(),
            kind: Kind::Snapshot,
        });
        self.check_snapshot(worker, &job);
        self.sim.lock().pending = None;
    }

    /// `get_stats` must list exactly the ledger's metrics for `job`.
    fn check_snapshot(&mut self, worker: usize, job: &JobId) {
        let stats = match self.workers[worker].job(job).get_stats() {
            Ok(stats) => stats,
            Err(e) => {
                self.violation(format!("get_stats failed: {}", e));
                return;
            }
        };
        let actual: BTreeMap<String, Option<i64>> = stats
            .into_iter()
            .map(|(name, value)| (name, value.as_i64()))
            .collect();
        let expected: BTreeMap<String, Option<i64>> = self
            .sim
            .lock()
            .ledger
            .iter()
            .filter(|((j, _), _)| j == job)
            .map(|((_, metric), e)| (metric.clone(), Some(e.value())))
            .collect();
        if actual != expected {
            self.violation(format!(
                "get_stats for {} mismatch: actual={:?}, expected={:?}",
                job, actual, expected
            ));
        }
    }

    /// Integer stored for a metric. No operation is pending, so the read
    /// sees no interference.
    fn stored(&self, job: &JobId, metric: &str) -> Option<i64> {
        self.workers[0]
            .job(job)
            .get_value(metric)
            .ok()
            .flatten()
            .and_then(|v| v.as_i64())
    }

    pub fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            self.run_single_op();
            if !self.result.invariant_violations.is_empty() {
                break;
            }
        }
        if self.result.is_success() {
            for (worker, job) in self.jobs.clone().into_iter().enumerate() {
                self.check_snapshot(worker % self.workers.len(), &job);
            }
        }

        let sim = self.sim.lock();
        self.result.rival_writes = sim.rival_writes;
        self.result.neighbour_writes = sim.neighbour_writes;
        self.result.spurious_cas_failures = sim.spurious_cas_failures;
        self.result.vanished_keys = sim.vanished_keys;
    }

    pub fn result(&self) -> &StatsDSTResult {
        &self.result
    }

    pub fn store(&self) -> &MemoryStore {
        &self.inner
    }
}

/// Run a batch of DST tests
pub fn run_stats_batch(
    start_seed: u64,
    num_seeds: usize,
    ops_per_seed: usize,
    config_fn: fn(u64) -> StatsDSTConfig,
) -> Vec<StatsDSTResult> {
    (0..num_seeds)
        .map(|i| {
            let seed = start_seed + i as u64;
            let mut harness = StatsDSTHarness::new(config_fn(seed));
            harness.run(ops_per_seed);
            harness.result().clone()
        })
        .collect()
}

/// Summarize batch results
pub fn summarize_stats_batch(results: &[StatsDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed = total - passed;
    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();
    let rivals: u64 = results.iter().map(|r| r.rival_writes).sum();

    let mut summary = format!(
        "Stats DST Summary\n\
         =================\n\
         Seeds: {} total, {} passed, {} failed\n\
         Total operations: {}\n\
         Rival writes: {}\n",
        total, passed, failed, total_ops, rivals
    );

    if failed > 0 {
        summary.push_str("\nFailed seeds:\n");
        for result in results.iter().filter(|r| !r.is_success()) {
            summary.push_str(&format!("  Seed {}: {}\n", result.seed, result.summary()));
            for violation in &result.invariant_violations {
                summary.push_str(&format!("    - {}\n", violation));
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_dst_single_seed() {
        let mut harness = StatsDSTHarness::with_seed(12345);
        harness.run(300);
        let result = harness.result();
        println!("{}", result.summary());
        assert!(result.is_success(), "{:?}", result.invariant_violations);
    }

    #[test]
    fn test_stats_dst_contended_injects_rivals() {
        let mut harness = StatsDSTHarness::new(StatsDSTConfig::contended(7));
        harness.run(500);
        let result = harness.result();
        println!("{}", result.summary());
        assert!(result.is_success(), "{:?}", result.invariant_violations);
        assert!(result.rival_writes > 0);
        assert!(result.spurious_cas_failures > 0);
    }

    #[test]
    fn test_stats_dst_hash_layout() {
        let mut harness = StatsDSTHarness::new(StatsDSTConfig::hash_layout(99));
        harness.run(300);
        assert!(harness.result().is_success(), "{:?}", harness.result().invariant_violations);
        let keys = harness.store().keys_matching("*").unwrap();
        assert!(keys.iter().all(|k| k.starts_with("crawl-")), "{:?}", keys);
    }

    #[test]
    fn test_stats_dst_neighbours_never_starve_extremes() {
        let mut harness = StatsDSTHarness::new(StatsDSTConfig::busy_hash(4242));
        harness.run(400);
        let result = harness.result();
        println!("{}", result.summary());
        assert!(result.is_success(), "{:?}", result.invariant_violations);
        assert!(result.neighbour_writes > 0);
        assert!(result.max_updates + result.min_updates > 0);
    }

    #[test]
    fn test_stats_dst_is_deterministic() {
        let run = |seed| {
            let mut harness = StatsDSTHarness::new(StatsDSTConfig::contended(seed));
            harness.run(200);
            harness.result().summary()
        };
        assert_eq!(run(31), run(31));
    }

    #[test]
    fn test_stats_dst_10_seeds() {
        let results = run_stats_batch(0, 10, 200, StatsDSTConfig::new);
        let summary = summarize_stats_batch(&results);
        println!("{}", summary);
        let passed = results.iter().filter(|r| r.is_success()).count();
        assert_eq!(passed, 10, "All 10 seeds should pass");
    }
}
