//! Fault catalog for stats simulation
//!
//! Each fault has a unique identifier for tracking and configuration.

/// Store faults - other writers acting inside our windows
pub mod store {
    /// Another worker updates the same metric just before our write lands
    pub const RIVAL_WRITE: &str = "store.rival_write";
    /// Several rival updates in a row (extends a rival write)
    pub const RIVAL_BURST: &str = "store.rival_burst";
    /// A conditional write reports a lost race without another writer
    pub const CAS_SPURIOUS_FAIL: &str = "store.cas_spurious_fail";
    /// A key disappears between enumeration and read
    pub const KEY_VANISH: &str = "store.key_vanish";
    /// Another worker bumps a different metric of the same job between
    /// our WATCH and our EXEC
    pub const NEIGHBOUR_WRITE: &str = "store.neighbour_write";
}

/// All faults, for iteration and validation
pub const ALL_FAULTS: &[&str] = &[
    store::RIVAL_WRITE,
    store::RIVAL_BURST,
    store::CAS_SPURIOUS_FAIL,
    store::KEY_VANISH,
    store::NEIGHBOUR_WRITE,
];
