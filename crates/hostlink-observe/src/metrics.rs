//! Metrics collection for boundary calls.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use hostlink_core::{Operation, RawStatus, StatusCode};

/// Collects metrics about calls made through the bridge.
#[derive(Default)]
pub struct MetricsCollector {
    /// Per-operation metrics.
    operations: RwLock<BTreeMap<Operation, OperationMetrics>>,
    /// Counts per host status.
    statuses: RwLock<BTreeMap<String, u64>>,
    /// Pending-wait metrics.
    waits: RwLock<WaitMetrics>,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call that crossed the boundary.
    pub fn record_call(&self, operation: Operation, duration: Duration) {
        let mut operations = self.operations.write();
        let entry = operations.entry(operation).or_default();
        entry.calls += 1;
        entry.total_time += duration;
    }

    /// Record a call refused locally without crossing the boundary.
    pub fn record_refused(&self, operation: Operation) {
        self.operations.write().entry(operation).or_default().refused += 1;
    }

    /// Record a failed operation.
    pub fn record_failure(&self, operation: Operation) {
        self.operations.write().entry(operation).or_default().failures += 1;
    }

    /// Record the raw status a call returned or was completed with.
    pub fn record_status(&self, raw: RawStatus) {
        let key = match StatusCode::from_raw(raw) {
            Some(status) => status.as_str().to_string(),
            None => format!("unknown({raw})"),
        };
        *self.statuses.write().entry(key).or_insert(0) += 1;
    }

    /// Record bytes copied out of the host.
    pub fn record_bytes_in(&self, operation: Operation, bytes: usize) {
        self.operations.write().entry(operation).or_default().bytes_in += bytes as u64;
    }

    /// Record bytes handed to the host.
    pub fn record_bytes_out(&self, operation: Operation, bytes: usize) {
        self.operations.write().entry(operation).or_default().bytes_out += bytes as u64;
    }

    /// Record a completed pending wait.
    pub fn record_wait(&self, waited: Duration) {
        let mut waits = self.waits.write();
        waits.pending_waits += 1;
        waits.total_wait += waited;
        if waited > waits.max_wait {
            waits.max_wait = waited;
        }
    }

    /// Record a pending wait that gave up.
    pub fn record_timeout(&self) {
        self.waits.write().timeouts += 1;
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            operations: self.operations.read().clone(),
            statuses: self.statuses.read().clone(),
            waits: self.waits.read().clone(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        self.operations.write().clear();
        self.statuses.write().clear();
        *self.waits.write() = WaitMetrics::default();
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("operations", &self.operations.read().len())
            .field("waits", &*self.waits.read())
            .finish()
    }
}

/// Snapshot of collected metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Per-operation metrics.
    pub operations: BTreeMap<Operation, OperationMetrics>,
    /// Counts per host status name.
    pub statuses: BTreeMap<String, u64>,
    /// Pending-wait metrics.
    pub waits: WaitMetrics,
}

impl MetricsSnapshot {
    /// Metrics of one operation, zero if it was never called.
    pub fn operation(&self, operation: Operation) -> OperationMetrics {
        self.operations.get(&operation).cloned().unwrap_or_default()
    }

    /// Calls that crossed the boundary, across all operations.
    pub fn total_calls(&self) -> u64 {
        self.operations.values().map(|m| m.calls).sum()
    }

    /// Failed operations, across all operations.
    pub fn total_failures(&self) -> u64 {
        self.operations.values().map(|m| m.failures).sum()
    }

    /// How often the host answered with `status`.
    pub fn status_count(&self, status: StatusCode) -> u64 {
        self.statuses.get(status.as_str()).copied().unwrap_or(0)
    }

    /// Render a plain-text table.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<22} {:>7} {:>7} {:>7} {:>10} {:>10} {:>10}",
            "operation", "calls", "failed", "refused", "bytes_in", "bytes_out", "time_us"
        );
        for (operation, m) in &self.operations {
            let _ = writeln!(
                out,
                "{:<22} {:>7} {:>7} {:>7} {:>10} {:>10} {:>10}",
                operation.as_str(),
                m.calls,
                m.failures,
                m.refused,
                m.bytes_in,
                m.bytes_out,
                m.total_time.as_micros()
            );
        }

        if !self.statuses.is_empty() {
            let _ = writeln!(out);
            for (status, count) in &self.statuses {
                let _ = writeln!(out, "status {status}: {count}");
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "pending waits: {} (total {:?}, max {:?}), timeouts: {}",
            self.waits.pending_waits, self.waits.total_wait, self.waits.max_wait, self.waits.timeouts
        );
        out
    }
}

/// Metrics of one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMetrics {
    /// Calls that crossed the boundary.
    pub calls: u64,
    /// Calls that ended in an error.
    pub failures: u64,
    /// Calls refused before crossing.
    pub refused: u64,
    /// Bytes copied out of the host.
    pub bytes_in: u64,
    /// Bytes handed to the host.
    pub bytes_out: u64,
    /// Time spent in the host, including pending waits.
    #[serde(with = "duration_serde")]
    pub total_time: Duration,
}

/// Pending-wait metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitMetrics {
    /// Waits that received their completion.
    pub pending_waits: u64,
    /// Waits that gave up.
    pub timeouts: u64,
    /// Total time parked.
    #[serde(with = "duration_serde")]
    pub total_wait: Duration,
    /// Longest single wait.
    #[serde(with = "duration_serde")]
    pub max_wait: Duration,
}

/// Durations as whole microseconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_micros())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let micros = u64::deserialize(deserializer)?;
        Ok(Duration::from_micros(micros))
    }
}
