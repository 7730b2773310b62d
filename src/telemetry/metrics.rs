//! Policy metrics.
//!
//! Global counters go through the `metrics` facade. Each session also keeps
//! its own [`SessionStats`] so a harness can report per-session numbers
//! without installing a recorder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, describe_counter, describe_histogram, histogram};

use crate::types::Task;

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(
        "simul_actions_total",
        "Policy actions returned, labelled by action"
    );
    describe_counter!(
        "simul_decode_failures_total",
        "Policy turns that failed, labelled by task"
    );
    describe_counter!("simul_resets_total", "Session resets");
    describe_counter!(
        "simul_sink_failures_total",
        "Text sink writes that failed and were ignored"
    );
    describe_histogram!(
        "simul_turn_duration_seconds",
        "Duration of a policy turn in seconds"
    );
}

/// Record a READ.
pub fn record_read() {
    counter!("simul_actions_total", "action" => "read").increment(1);
}

/// Record a WRITE.
pub fn record_write(finished: bool) {
    let action = if finished { "write_final" } else { "write" };
    counter!("simul_actions_total", "action" => action).increment(1);
}

/// Record a failed turn.
pub fn record_decode_failure(task: Option<Task>) {
    let task = task.map(Task::as_str).unwrap_or("encoder");
    counter!("simul_decode_failures_total", "task" => task).increment(1);
}

/// Record a reset.
pub fn record_reset() {
    counter!("simul_resets_total").increment(1);
}

/// Record an ignored sink failure.
pub fn record_sink_failure() {
    counter!("simul_sink_failures_total").increment(1);
}

/// Record how long a turn took.
pub fn record_turn_duration(elapsed: Duration) {
    histogram!("simul_turn_duration_seconds").record(elapsed.as_secs_f64());
}

/// Per-session counters.
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// READ actions returned
    reads: Arc<AtomicU64>,

    /// WRITE actions returned
    writes: Arc<AtomicU64>,

    /// Utterances finalized
    utterances: Arc<AtomicU64>,

    /// Turns that failed
    decode_failures: Arc<AtomicU64>,

    /// Session creation time
    start_time: Instant,
}

impl SessionStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self {
            reads: Arc::new(AtomicU64::new(0)),
            writes: Arc::new(AtomicU64::new(0)),
            utterances: Arc::new(AtomicU64::new(0)),
            decode_failures: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    /// Count a READ.
    pub fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
        record_read();
    }

    /// Count a WRITE.
    pub fn record_write(&self, finished: bool) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if finished {
            self.utterances.fetch_add(1, Ordering::SeqCst);
        }
        record_write(finished);
    }

    /// Count a failed turn.
    pub fn record_decode_failure(&self, task: Option<Task>) {
        self.decode_failures.fetch_add(1, Ordering::SeqCst);
        record_decode_failure(task);
    }

    /// READ actions so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// WRITE actions so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Finalized utterances so far.
    pub fn utterances(&self) -> u64 {
        self.utterances.load(Ordering::SeqCst)
    }

    /// Failed turns so far.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::SeqCst)
    }

    /// Get all counters as a serde_json::Value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "uptime_seconds": self.start_time.elapsed().as_secs(),
            "reads": self.reads(),
            "writes": self.writes(),
            "utterances": self.utterances(),
            "decode_failures": self.decode_failures(),
        })
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_stats_counts() {
        let stats = SessionStats::new();
        stats.record_read();
        stats.record_read();
        stats.record_write(false);
        stats.record_write(true);
        stats.record_decode_failure(Some(Task::Translation));

        assert_eq!(stats.reads(), 2);
        assert_eq!(stats.writes(), 2);
        assert_eq!(stats.utterances(), 1);
        assert_eq!(stats.decode_failures(), 1);

        let json = stats.to_json();
        assert_eq!(json["reads"], 2);
        assert_eq!(json["utterances"], 1);
    }

    #[test]
    fn test_helpers_without_recorder() {
        describe_metrics();
        record_reset();
        record_sink_failure();
        record_turn_duration(Duration::from_millis(3));
    }
}
