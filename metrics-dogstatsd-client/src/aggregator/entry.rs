use std::sync::atomic::{
    AtomicI64, AtomicU64,
    Ordering::{Acquire, Relaxed, Release},
};

use dashmap::DashSet;

/// Running sum of a count context.
pub(crate) struct CountEntry {
    value: AtomicI64,
}

impl CountEntry {
    /// Creates a new `CountEntry` with a zero sum.
    pub fn new() -> Self {
        Self { value: AtomicI64::new(0) }
    }

    /// Adds `value` to the running sum.
    pub fn merge(&self, value: i64) {
        self.value.fetch_add(value, Relaxed);
    }

    /// Returns the running sum.
    pub fn value(&self) -> i64 {
        self.value.load(Acquire)
    }
}

/// Last value of a gauge context.
pub(crate) struct GaugeEntry {
    bits: AtomicU64,
}

impl GaugeEntry {
    /// Creates a new `GaugeEntry`.
    pub fn new() -> Self {
        Self { bits: AtomicU64::new(0.0f64.to_bits()) }
    }

    /// Replaces the current value.
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Release);
    }

    /// Returns the current value.
    pub fn value(&self) -> f64 {
        f64::from_bits(self.bits.load(Acquire))
    }
}

/// Unique values observed for a set context.
pub(crate) struct SetEntry {
    values: DashSet<String, ahash::RandomState>,
}

impl SetEntry {
    /// Creates a new, empty `SetEntry`.
    pub fn new() -> Self {
        Self { values: DashSet::with_hasher(ahash::RandomState::new()) }
    }

    /// Adds a value to the set, if not already present.
    pub fn insert(&self, value: String) {
        self.values.insert(value);
    }

    /// Consumes the entry, returning every unique value observed.
    pub fn into_values(self) -> impl Iterator<Item = String> {
        self.values.into_iter()
    }
}
