//! Per-operation failure counting with a one-shot warning threshold.

use chrono::{DateTime, Utc};

const WARNING_THRESHOLD: u32 = 3;

/// Tracks consecutive failures for one named operation. Emits a warning the
/// first time the count reaches [`WARNING_THRESHOLD`]; a success resets the
/// count and re-arms the warning.
#[derive(Debug, Default)]
pub struct FailureCounter {
    count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    warned_since_reset: bool,
}

impl FailureCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure. Returns `Some(count)` the first time this call
    /// brings the count to the warning threshold since the last success.
    pub fn record_failure(&mut self) -> Option<u32> {
        self.count += 1;
        self.last_failure_at = Some(Utc::now());
        if self.count >= WARNING_THRESHOLD && !self.warned_since_reset {
            self.warned_since_reset = true;
            Some(self.count)
        } else {
            None
        }
    }

    pub fn record_success(&mut self) {
        self.count = 0;
        self.warned_since_reset = false;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn snapshot(&self, name: &str) -> FailureSnapshot {
        FailureSnapshot {
            operation: name.to_string(),
            count: self.count,
            last_failure_at: self.last_failure_at,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FailureSnapshot {
    pub operation: String,
    pub count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}
