//! Metrics sink injected into the orchestrator.
//!
//! Deliberately tiny: the sync engine records counter increments and nothing
//! else. There is no global collector; construct a recorder at the top and
//! pass it down.

use std::{
	collections::BTreeMap,
	sync::{Arc, Mutex},
};

pub trait MetricsRecorder: Send + Sync {
	fn incr(&self, name: &'static str, by: u64);
}

/// Discards everything. The default for CLI runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
	fn incr(&self, _name: &'static str, _by: u64) {}
}

/// Accumulates counters in memory; tests read them back.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
	counters: Mutex<BTreeMap<&'static str, u64>>,
}

impl InMemoryMetrics {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn get(&self, name: &str) -> u64 {
		self.counters.lock().expect("metrics lock poisoned").get(name).copied().unwrap_or(0)
	}
}

impl MetricsRecorder for InMemoryMetrics {
	fn incr(&self, name: &'static str, by: u64) {
		*self.counters.lock().expect("metrics lock poisoned").entry(name).or_insert(0) += by;
	}
}
