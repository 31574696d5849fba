//! Bounded log of recovery attempts.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One recovery attempt, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryAttemptLog {
    /// Entry ID.
    pub id: String,
    /// The error being recovered.
    pub error_id: String,
    /// Strategy that ran.
    pub strategy_name: String,
    /// 1-based attempt number within the strategy.
    pub attempt: u32,
    /// When the attempt finished.
    pub timestamp: DateTime<Utc>,
    /// Whether it succeeded.
    pub success: bool,
    /// How long it took.
    pub duration_ms: u64,
    /// Outcome summary.
    pub message: String,
}

impl RecoveryAttemptLog {
    /// Creates an entry stamped now.
    #[must_use]
    pub fn new(
        error_id: impl Into<String>,
        strategy_name: impl Into<String>,
        attempt: u32,
        success: bool,
        duration_ms: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            error_id: error_id.into(),
            strategy_name: strategy_name.into(),
            attempt,
            timestamp: Utc::now(),
            success,
            duration_ms,
            message: message.into(),
        }
    }
}

/// Success counts for one strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StrategyStats {
    /// Attempts logged.
    pub attempts: usize,
    /// Attempts that succeeded.
    pub successes: usize,
    /// `successes / attempts`, or 0 with no attempts.
    pub success_rate: f64,
}

/// Aggregate recovery statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryStats {
    /// Attempts logged.
    pub total_attempts: usize,
    /// Attempts that succeeded.
    pub successful_attempts: usize,
    /// Overall success rate.
    pub success_rate: f64,
    /// Per-strategy breakdown.
    pub by_strategy: BTreeMap<String, StrategyStats>,
}

/// Ring buffer of the most recent attempts.
#[derive(Debug)]
pub struct AuditLog {
    capacity: usize,
    entries: Mutex<VecDeque<RecoveryAttemptLog>>,
}

impl AuditLog {
    /// Default number of entries kept.
    pub const DEFAULT_CAPACITY: usize = 1000;

    /// Creates a log keeping at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(Self::DEFAULT_CAPACITY))),
        }
    }

    /// Appends an entry, evicting the oldest when full.
    pub fn record(&self, entry: RecoveryAttemptLog) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<RecoveryAttemptLog> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing was logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Success rates over the retained entries.
    #[must_use]
    pub fn stats(&self) -> RecoveryStats {
        let entries = self.entries.lock();
        let mut stats = RecoveryStats::default();

        for entry in entries.iter() {
            stats.total_attempts += 1;
            let per = stats
                .by_strategy
                .entry(entry.strategy_name.clone())
                .or_default();
            per.attempts += 1;
            if entry.success {
                stats.successful_attempts += 1;
                per.successes += 1;
            }
        }

        stats.success_rate = rate(stats.successful_attempts, stats.total_attempts);
        for per in stats.by_strategy.values_mut() {
            per.success_rate = rate(per.successes, per.attempts);
        }
        stats
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

fn rate(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
