use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Trait for metrics backends. Implementations can forward to Prometheus,
/// StatsD, or simply log metrics.
pub trait MetricsBackend: Send + Sync {
    fn record_counter(&self, name: &str, value: u64);
    fn record_gauge(&self, name: &str, value: f64);
}

/// Registry counters. Safe to share between concurrent requests.
#[derive(Default)]
pub struct RegistryMetrics {
    pub discoveries_resolved: AtomicU64,
    pub discoveries_missed: AtomicU64,
    pub agent_confirmed_removals: AtomicU64,
    pub store_fallbacks: AtomicU64,
    pub heartbeats: AtomicU64,
    backend: Option<Arc<dyn MetricsBackend>>,
}

impl std::fmt::Debug for RegistryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryMetrics")
            .field("discoveries_resolved", &self.discoveries_resolved)
            .field("discoveries_missed", &self.discoveries_missed)
            .field("agent_confirmed_removals", &self.agent_confirmed_removals)
            .field("store_fallbacks", &self.store_fallbacks)
            .field("heartbeats", &self.heartbeats)
            .finish()
    }
}

impl RegistryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(backend: Arc<dyn MetricsBackend>) -> Self {
        Self {
            backend: Some(backend),
            ..Self::new()
        }
    }

    fn bump(&self, counter: &AtomicU64, name: &str) {
        let val = counter.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(backend) = &self.backend {
            backend.record_counter(name, val);
        }
    }

    pub fn record_discovery_resolved(&self) {
        self.bump(&self.discoveries_resolved, "shoal.registry.discoveries_resolved");
    }

    pub fn record_discovery_missed(&self) {
        self.bump(&self.discoveries_missed, "shoal.registry.discoveries_missed");
    }

    pub fn record_agent_confirmed_removal(&self) {
        self.bump(
            &self.agent_confirmed_removals,
            "shoal.registry.agent_confirmed_removals",
        );
    }

    pub fn record_store_fallback(&self) {
        self.bump(&self.store_fallbacks, "shoal.registry.store_fallbacks");
    }

    pub fn record_heartbeat(&self, workload_percentage: u8) {
        self.bump(&self.heartbeats, "shoal.registry.heartbeats");
        if let Some(backend) = &self.backend {
            backend.record_gauge(
                "shoal.registry.host_workload",
                f64::from(workload_percentage),
            );
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            discoveries_resolved: self.discoveries_resolved.load(Ordering::Relaxed),
            discoveries_missed: self.discoveries_missed.load(Ordering::Relaxed),
            agent_confirmed_removals: self.agent_confirmed_removals.load(Ordering::Relaxed),
            store_fallbacks: self.store_fallbacks.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of registry metrics.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub discoveries_resolved: u64,
    pub discoveries_missed: u64,
    pub agent_confirmed_removals: u64,
    pub store_fallbacks: u64,
    pub heartbeats: u64,
}

/// Logging-based metrics backend. Emits metrics as structured log events.
pub struct LoggingMetricsBackend;

impl MetricsBackend for LoggingMetricsBackend {
    fn record_counter(&self, name: &str, value: u64) {
        tracing::info!(metric = name, value = value, kind = "counter", "metric");
    }

    fn record_gauge(&self, name: &str, value: f64) {
        tracing::info!(metric = name, value = value, kind = "gauge", "metric");
    }
}
