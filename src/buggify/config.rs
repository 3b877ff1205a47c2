//! BUGGIFY Configuration
//!
//! Fault probabilities with presets for different testing scenarios
//! (disabled, moderate, chaos).

use super::faults;
use std::collections::HashMap;

/// Configuration for fault injection probabilities
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// Whether BUGGIFY is enabled at all
    pub enabled: bool,
    /// Per-fault probabilities (0.0 to 1.0)
    pub probabilities: HashMap<&'static str, f64>,
    /// Global probability multiplier
    pub global_multiplier: f64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::moderate()
    }
}

impl FaultConfig {
    /// Enabled, but every fault at 0%
    pub fn new() -> Self {
        FaultConfig {
            enabled: true,
            probabilities: HashMap::new(),
            global_multiplier: 1.0,
        }
    }

    /// Disabled - no fault injection
    pub fn disabled() -> Self {
        FaultConfig {
            enabled: false,
            probabilities: HashMap::new(),
            global_multiplier: 0.0,
        }
    }

    /// Moderate - balanced fault injection for regular testing
    pub fn moderate() -> Self {
        let mut config = Self::new();
        config.set(faults::store::RIVAL_WRITE, 0.20); // 20%
        config.set(faults::store::RIVAL_BURST, 0.10); // 10%
        config.set(faults::store::CAS_SPURIOUS_FAIL, 0.05); // 5%
        config.set(faults::store::KEY_VANISH, 0.10); // 10%
        config.set(faults::store::NEIGHBOUR_WRITE, 0.30); // 30%
        config
    }

    /// Chaos - aggressive fault injection for stress testing
    pub fn chaos() -> Self {
        let mut config = Self::moderate();
        config.global_multiplier = 2.5;
        config
    }

    /// Set probability for a specific fault
    pub fn set(&mut self, fault_id: &'static str, probability: f64) -> &mut Self {
        self.probabilities
            .insert(fault_id, probability.clamp(0.0, 1.0));
        self
    }

    /// Get probability for a fault (returns 0.0 if not set)
    pub fn get(&self, fault_id: &str) -> f64 {
        if !self.enabled {
            return 0.0;
        }
        let base = self.probabilities.get(fault_id).copied().unwrap_or(0.0);
        (base * self.global_multiplier).clamp(0.0, 1.0)
    }
}
