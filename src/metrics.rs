//! Metrics helpers and per-registration telemetry bookkeeping.
//!
//! The atomic counters are always maintained and surface through registration status reports.
//! With the `metrics` feature the same events are also emitted through the `metrics` facade.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::_prelude::*;
#[cfg(feature = "metrics")] pub use emit::*;
#[cfg(feature = "prometheus")] pub use exporter::*;
#[cfg(not(feature = "metrics"))] pub(crate) use noop::*;

/// Thread-safe metrics accumulator for a single registration.
#[derive(Debug, Default)]
pub struct CacheMetrics {
	total_requests: AtomicU64,
	cache_hits: AtomicU64,
	stale_serves: AtomicU64,
	refresh_successes: AtomicU64,
	refresh_errors: AtomicU64,
	last_refresh_micros: AtomicU64,
}
impl CacheMetrics {
	/// Create a new metrics accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a lookup answered from the cache.
	pub fn record_hit(&self, stale: bool) {
		self.total_requests.fetch_add(1, Ordering::Relaxed);
		self.cache_hits.fetch_add(1, Ordering::Relaxed);
		if stale {
			self.stale_serves.fetch_add(1, Ordering::Relaxed);
		}
	}

	/// Record a lookup that had to wait for a fetch.
	pub fn record_miss(&self) {
		self.total_requests.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a successful fetch and its latency.
	pub fn record_refresh_success(&self, duration: Duration) {
		self.refresh_successes.fetch_add(1, Ordering::Relaxed);
		self.last_refresh_micros
			.store(duration.as_micros().min(u64::MAX as u128) as u64, Ordering::Relaxed);
	}

	/// Record a failed fetch.
	pub fn record_refresh_error(&self) {
		self.refresh_errors.fetch_add(1, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> CacheMetricsSnapshot {
		CacheMetricsSnapshot {
			total_requests: self.total_requests.load(Ordering::Relaxed),
			cache_hits: self.cache_hits.load(Ordering::Relaxed),
			stale_serves: self.stale_serves.load(Ordering::Relaxed),
			refresh_successes: self.refresh_successes.load(Ordering::Relaxed),
			refresh_errors: self.refresh_errors.load(Ordering::Relaxed),
			last_refresh_micros: match self.last_refresh_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
		}
	}
}

/// Read-only snapshot of per-registration telemetry counters.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct CacheMetricsSnapshot {
	/// Total number of metadata lookups observed.
	pub total_requests: u64,
	/// Count of lookups served from the cache.
	pub cache_hits: u64,
	/// Count of lookups served from a stale document.
	pub stale_serves: u64,
	/// Count of successful fetches.
	pub refresh_successes: u64,
	/// Count of failed fetches.
	pub refresh_errors: u64,
	/// Microsecond latency of the most recent successful fetch.
	pub last_refresh_micros: Option<u64>,
}
impl CacheMetricsSnapshot {
	/// Ratio of cache hits over total lookups.
	pub fn hit_rate(&self) -> f64 {
		if self.total_requests == 0 {
			0.0
		} else {
			self.cache_hits as f64 / self.total_requests as f64
		}
	}

	/// Ratio of stale serves over total lookups.
	pub fn stale_ratio(&self) -> f64 {
		if self.total_requests == 0 {
			0.0
		} else {
			self.stale_serves as f64 / self.total_requests as f64
		}
	}
}

#[cfg(feature = "metrics")]
mod emit {
	// crates.io
	use metrics::Label;
	use smallvec::SmallVec;
	// self
	use crate::_prelude::*;

	type LabelSet = SmallVec<[Label; 2]>;

	const METRIC_REQUESTS_TOTAL: &str = "client_registry_metadata_requests_total";
	const METRIC_HITS_TOTAL: &str = "client_registry_metadata_hits_total";
	const METRIC_STALE_TOTAL: &str = "client_registry_metadata_stale_total";
	const METRIC_MISSES_TOTAL: &str = "client_registry_metadata_misses_total";
	const METRIC_REFRESH_TOTAL: &str = "client_registry_metadata_refresh_total";
	const METRIC_REFRESH_DURATION: &str = "client_registry_metadata_refresh_duration_seconds";
	const METRIC_REFRESH_ERRORS: &str = "client_registry_metadata_refresh_errors_total";

	/// Record a cache hit, tagging whether it was served stale.
	pub fn record_resolve_hit(registration: &str, stale: bool) {
		let labels = base_labels(registration);

		metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);
		metrics::counter!(METRIC_HITS_TOTAL, labels.iter()).increment(1);

		if stale {
			metrics::counter!(METRIC_STALE_TOTAL, labels.iter()).increment(1);
		}
	}

	/// Record a lookup that waited for an upstream fetch.
	pub fn record_resolve_miss(registration: &str) {
		let labels = base_labels(registration);

		metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);
		metrics::counter!(METRIC_MISSES_TOTAL, labels.iter()).increment(1);
	}

	/// Record a successful fetch along with its latency.
	pub fn record_refresh_success(registration: &str, duration: Duration) {
		metrics::counter!(METRIC_REFRESH_TOTAL, status_labels(registration, "success").iter())
			.increment(1);
		metrics::histogram!(METRIC_REFRESH_DURATION, base_labels(registration).iter())
			.record(duration.as_secs_f64());
	}

	/// Record a failed fetch.
	pub fn record_refresh_error(registration: &str) {
		metrics::counter!(METRIC_REFRESH_TOTAL, status_labels(registration, "error").iter())
			.increment(1);
		metrics::counter!(METRIC_REFRESH_ERRORS, base_labels(registration).iter()).increment(1);
	}

	fn base_labels(registration: &str) -> LabelSet {
		let mut labels = LabelSet::new();

		labels.push(Label::new("registration", registration.to_owned()));

		labels
	}

	fn status_labels(registration: &str, status: &'static str) -> LabelSet {
		let mut labels = base_labels(registration);

		labels.push(Label::new("status", status));

		labels
	}
}

#[cfg(not(feature = "metrics"))]
mod noop {
	use crate::_prelude::*;

	pub fn record_resolve_hit(_: &str, _: bool) {}

	pub fn record_resolve_miss(_: &str) {}

	pub fn record_refresh_success(_: &str, _: Duration) {}

	pub fn record_refresh_error(_: &str) {}
}

#[cfg(feature = "prometheus")]
mod exporter {
	// std
	use std::sync::OnceLock;
	// crates.io
	use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
	// self
	use crate::_prelude::*;

	/// Shared Prometheus handle installed by [`install_default_exporter`].
	static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

	/// Install the default Prometheus recorder backed by `metrics`.
	///
	/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is
	/// installed.
	pub fn install_default_exporter() -> Result<()> {
		if PROMETHEUS_HANDLE.get().is_some() {
			return Ok(());
		}

		let handle = PrometheusBuilder::new()
			.install_recorder()
			.map_err(|err| Error::Metrics(err.to_string()))?;
		let _ = PROMETHEUS_HANDLE.set(handle);

		Ok(())
	}

	/// Access the global Prometheus exporter handle when installed.
	pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
		PROMETHEUS_HANDLE.get()
	}
}
