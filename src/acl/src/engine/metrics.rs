//! Prometheus-style metrics for access control decisions

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Decision and contention counters
#[derive(Debug, Clone, Default)]
pub struct AclMetrics {
    /// Total number of permission checks
    pub total_checks: u64,

    /// Checks that were allowed
    pub allowed_decisions: u64,

    /// Checks that were denied
    pub denied_decisions: u64,

    /// Ability updates rejected for a stale version
    pub version_conflicts: u64,

    /// Latency percentiles
    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p99_ms: f64,

    /// Average latency
    pub avg_latency_ms: f64,

    /// Checks that failed with a store error
    pub error_count: u64,
}

impl AclMetrics {
    /// Fraction of decided checks that were allowed
    pub fn allow_rate(&self) -> f64 {
        let total = self.allowed_decisions + self.denied_decisions;
        if total == 0 {
            0.0
        } else {
            self.allowed_decisions as f64 / total as f64
        }
    }
}

/// Metrics collector shared by the engine and the ability registry
pub struct MetricsCollector {
    metrics: Arc<RwLock<AclMetrics>>,

    /// Recent latency samples, oldest first
    latency_samples: Arc<RwLock<Vec<f64>>>,

    max_samples: usize,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(AclMetrics::default())),
            latency_samples: Arc::new(RwLock::new(Vec::with_capacity(10_000))),
            max_samples: 10_000,
        }
    }

    /// Record a permission check outcome
    pub async fn record_decision(&self, allowed: bool) {
        let mut metrics = self.metrics.write().await;
        metrics.total_checks += 1;

        if allowed {
            metrics.allowed_decisions += 1;
        } else {
            metrics.denied_decisions += 1;
        }
    }

    /// Record a rejected stale ability update
    pub async fn record_conflict(&self) {
        self.metrics.write().await.version_conflicts += 1;
    }

    /// Record a failed check
    pub async fn record_error(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.total_checks += 1;
        metrics.error_count += 1;
    }

    /// Record check latency
    pub async fn record_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut samples = self.latency_samples.write().await;
        samples.push(latency_ms);
        if samples.len() > self.max_samples {
            samples.drain(0..1_000);
        }

        let mut metrics = self.metrics.write().await;
        let sum: f64 = samples.iter().sum();
        metrics.avg_latency_ms = sum / samples.len() as f64;

        let mut sorted = samples.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        metrics.latency_p50_ms = Self::percentile(&sorted, 0.50);
        metrics.latency_p90_ms = Self::percentile(&sorted, 0.90);
        metrics.latency_p99_ms = Self::percentile(&sorted, 0.99);
    }

    /// Current metrics snapshot
    pub async fn get_metrics(&self) -> AclMetrics {
        self.metrics.read().await.clone()
    }

    /// Reset all metrics
    pub async fn reset(&self) {
        *self.metrics.write().await = AclMetrics::default();
        self.latency_samples.write().await.clear();
    }

    /// Export metrics in Prometheus text format
    pub async fn export_prometheus(&self) -> String {
        let metrics = self.metrics.read().await;

        format!(
            r#"# HELP acl_checks_total Total number of permission checks
# TYPE acl_checks_total counter
acl_checks_total {}

# HELP acl_allowed_total Number of allowed checks
# TYPE acl_allowed_total counter
acl_allowed_total {}

# HELP acl_denied_total Number of denied checks
# TYPE acl_denied_total counter
acl_denied_total {}

# HELP acl_version_conflicts_total Stale ability updates rejected
# TYPE acl_version_conflicts_total counter
acl_version_conflicts_total {}

# HELP acl_check_latency_seconds Check latency percentiles
# TYPE acl_check_latency_seconds summary
acl_check_latency_seconds{{quantile="0.5"}} {}
acl_check_latency_seconds{{quantile="0.9"}} {}
acl_check_latency_seconds{{quantile="0.99"}} {}

# HELP acl_errors_total Checks that failed with a store error
# TYPE acl_errors_total counter
acl_errors_total {}
"#,
            metrics.total_checks,
            metrics.allowed_decisions,
            metrics.denied_decisions,
            metrics.version_conflicts,
            metrics.latency_p50_ms / 1000.0,
            metrics.latency_p90_ms / 1000.0,
            metrics.latency_p99_ms / 1000.0,
            metrics.error_count,
        )
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
