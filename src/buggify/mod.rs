//! BUGGIFY fault injection for the stats simulation
//!
//! A fault site asks [`should_buggify`] whether to misbehave. The answer
//! depends only on the caller's seeded RNG and the thread's [`FaultConfig`],
//! so a failing seed replays its exact fault sequence.
//!
//! ```ignore
//! if buggify!(&mut rng, faults::store::RIVAL_WRITE) {
//!     rival.max_value(metric, value)?;
//! }
//! ```

pub mod config;
pub mod faults;
pub mod rng;

pub use config::FaultConfig;
pub use faults::ALL_FAULTS;
pub use rng::{Rng, SimulatedRng};

use std::cell::RefCell;
use std::collections::BTreeMap;

/// Check and trigger counts of one fault site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultCounts {
    pub checks: u64,
    pub triggers: u64,
}

impl FaultCounts {
    pub fn rate(&self) -> f64 {
        if self.checks == 0 {
            0.0
        } else {
            self.triggers as f64 / self.checks as f64
        }
    }
}

/// Per-fault counters since the last [`reset_stats`].
#[derive(Debug, Clone, Default)]
pub struct BuggifyStats {
    faults: BTreeMap<String, FaultCounts>,
}

impl BuggifyStats {
    pub fn get(&self, fault_id: &str) -> FaultCounts {
        self.faults.get(fault_id).copied().unwrap_or_default()
    }

    pub fn triggered(&self, fault_id: &str) -> u64 {
        self.get(fault_id).triggers
    }

    fn record(&mut self, fault_id: &str, triggered: bool) {
        let counts = self.faults.entry(fault_id.to_string()).or_default();
        counts.checks += 1;
        if triggered {
            counts.triggers += 1;
        }
    }

    /// One line per fault checked at least once, sorted by id.
    pub fn summary(&self) -> String {
        let mut out = String::from("BUGGIFY:");
        for (fault_id, counts) in &self.faults {
            out.push_str(&format!(
                "\n  {}: {}/{} ({:.1}%)",
                fault_id,
                counts.triggers,
                counts.checks,
                counts.rate() * 100.0
            ));
        }
        out
    }
}

#[derive(Default)]
struct Context {
    config: FaultConfig,
    stats: BuggifyStats,
}

thread_local! {
    static CONTEXT: RefCell<Context> = RefCell::new(Context::default());
}

/// Fault probabilities for the current thread.
pub fn set_config(config: FaultConfig) {
    CONTEXT.with(|ctx| ctx.borrow_mut().config = config);
}

pub fn get_stats() -> BuggifyStats {
    CONTEXT.with(|ctx| ctx.borrow().stats.clone())
}

pub fn reset_stats() {
    CONTEXT.with(|ctx| ctx.borrow_mut().stats = BuggifyStats::default());
}

/// Whether `fault_id` fires now.
///
/// Consumes exactly one draw from `rng` whether or not the fault is enabled.
pub fn should_buggify<R: Rng>(rng: &mut R, fault_id: &str) -> bool {
    let draw = rng.gen_range(0, 1_000_000) as f64 / 1_000_000.0;
    CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        let triggered = draw < ctx.config.get(fault_id);
        ctx.stats.record(fault_id, triggered);
        triggered
    })
}

/// `buggify!(rng, fault_id)`: shorthand for [`should_buggify`].
#[macro_export]
macro_rules! buggify {
    ($rng:expr, $fault_id:expr) => {
        $crate::buggify::should_buggify($rng, $fault_id)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_never_fires() {
        set_config(FaultConfig::disabled());
        let mut rng = SimulatedRng::new(1);
        for _ in 0..1000 {
            assert!(!buggify!(&mut rng, faults::store::RIVAL_WRITE));
        }
    }

    #[test]
    fn test_trigger_rate_follows_config() {
        set_config(FaultConfig::moderate());
        reset_stats();
        let mut rng = SimulatedRng::new(3);
        for _ in 0..1000 {
            let _ = buggify!(&mut rng, faults::store::RIVAL_WRITE);
        }

        let counts = get_stats().get(faults::store::RIVAL_WRITE);
        assert_eq!(counts.checks, 1000);
        // Around 20%
        assert!(
            counts.triggers > 100 && counts.triggers < 300,
            "triggers: {}",
            counts.triggers
        );
    }

    #[test]
    fn test_chaos_fires_more_than_moderate() {
        let fired = |config: FaultConfig| {
            set_config(config);
            let mut rng = SimulatedRng::new(11);
            (0..2000)
                .filter(|_| buggify!(&mut rng, faults::store::CAS_SPURIOUS_FAIL))
                .count()
        };
        assert!(fired(FaultConfig::chaos()) > fired(FaultConfig::moderate()));
    }

    #[test]
    fn test_same_seed_same_faults() {
        set_config(FaultConfig::chaos());
        let run = |seed| {
            let mut rng = SimulatedRng::new(seed);
            (0..200)
                .map(|_| buggify!(&mut rng, faults::store::KEY_VANISH))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(99), run(99));
    }

    #[test]
    fn test_disabled_faults_still_consume_draws() {
        // The rival sequence must not shift when another fault is switched off
        let sequence = |config: FaultConfig| {
            set_config(config);
            let mut rng = SimulatedRng::new(5);
            (0..100)
                .map(|_| {
                    let _ = buggify!(&mut rng, faults::store::KEY_VANISH);
                    buggify!(&mut rng, faults::store::RIVAL_WRITE)
                })
                .collect::<Vec<_>>()
        };
        let mut without_vanish = FaultConfig::moderate();
        without_vanish.set(faults::store::KEY_VANISH, 0.0);
        assert_eq!(sequence(FaultConfig::moderate()), sequence(without_vanish));
    }

    #[test]
    fn test_summary_lists_checked_faults() {
        set_config(FaultConfig::moderate());
        reset_stats();
        let mut rng = SimulatedRng::new(8);
        let _ = buggify!(&mut rng, faults::store::RIVAL_WRITE);
        let _ = buggify!(&mut rng, faults::store::CAS_SPURIOUS_FAIL);

        let summary = get_stats().summary();
        assert!(summary.contains(faults::store::RIVAL_WRITE));
        assert!(summary.contains(faults::store::CAS_SPURIOUS_FAIL));
        assert!(!summary.contains(faults::store::KEY_VANISH));
        assert_eq!(get_stats().triggered("never.checked"), 0);
    }
}
