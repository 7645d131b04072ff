use autoinst_common::OtelDistribution;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DistributionMetrics {
    /// Processes currently tracked with a loaded instrumentation.
    pub instrumented_processes: i64,
    /// Processes whose instrumentation failed to load, since start.
    pub failed_instrumentations: u64,
}

/// Per-distribution lifecycle counters. Written by the manager's event loop,
/// readable from anywhere through [`crate::Manager::metrics`].
#[derive(Debug, Default)]
pub struct ManagerMetrics {
    by_distribution: DashMap<OtelDistribution, DistributionMetrics>,
}

impl ManagerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_instrumented(&self, distribution: OtelDistribution) {
        self.by_distribution
            .entry(distribution)
            .or_default()
            .instrumented_processes += 1;
    }

    pub(crate) fn record_uninstrumented(&self, distribution: OtelDistribution) {
        self.by_distribution
            .entry(distribution)
            .or_default()
            .instrumented_processes -= 1;
    }

    pub(crate) fn record_failed(&self, distribution: OtelDistribution) {
        self.by_distribution
            .entry(distribution)
            .or_default()
            .failed_instrumentations += 1;
    }

    pub fn get(&self, distribution: &OtelDistribution) -> DistributionMetrics {
        self.by_distribution
            .get(distribution)
            .map(|entry| *entry.value())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> BTreeMap<OtelDistribution, DistributionMetrics> {
        self.by_distribution
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    pub fn total_instrumented(&self) -> i64 {
        self.by_distribution
            .iter()
            .map(|entry| entry.value().instrumented_processes)
            .sum()
    }
}
