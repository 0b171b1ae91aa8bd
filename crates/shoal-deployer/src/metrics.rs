use std::sync::atomic::{AtomicU64, Ordering};

/// Deploy run counters. Each change is also emitted as a `metric` event.
#[derive(Debug, Default)]
pub struct DeployMetrics {
    pub runs_started: AtomicU64,
    pub runs_completed: AtomicU64,
    pub runs_failed: AtomicU64,
    pub registrations: AtomicU64,
}

fn bump(counter: &AtomicU64, name: &str) {
    let val = counter.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::info!(metric = name, value = val, kind = "counter", "metric");
}

impl DeployMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run_started(&self) {
        bump(&self.runs_started, "shoal.deploy.runs_started");
    }

    pub fn record_run_completed(&self) {
        bump(&self.runs_completed, "shoal.deploy.runs_completed");
    }

    pub fn record_run_failed(&self) {
        bump(&self.runs_failed, "shoal.deploy.runs_failed");
    }

    pub fn record_registration(&self) {
        bump(&self.registrations, "shoal.deploy.registrations");
    }

    pub fn snapshot(&self) -> DeploySnapshot {
        DeploySnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            registrations: self.registrations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DeploySnapshot {
    pub runs_started: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub registrations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let metrics = DeployMetrics::new();
        assert_eq!(metrics.snapshot().runs_started, 0);
        metrics.record_run_started();
        metrics.record_registration();
        metrics.record_registration();
        metrics.record_run_failed();
        let snap = metrics.snapshot();
        assert_eq!(snap.runs_started, 1);
        assert_eq!(snap.registrations, 2);
        assert_eq!(snap.runs_failed, 1);
        assert_eq!(snap.runs_completed, 0);
    }
}
