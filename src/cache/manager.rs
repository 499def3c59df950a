//! Cache manager handling discovery document retrieval and lifecycle.

// std
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
// crates.io
use http::StatusCode;
use serde::Serialize;
use tokio::{
	sync::{Mutex, RwLock, watch},
	task::AbortHandle,
	time,
};
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::{
		entry::CacheEntry,
		state::{CachePayload, MetadataState, deadline_after},
	},
	config::CacheSettings,
	http::retry::{AttemptBudget, RetryExecutor},
	metadata::ServerMetadata,
	metrics::{self, CacheMetrics, CacheMetricsSnapshot},
	retriever::{ConfigurationRetriever, Retrieval, RetrievalRequest},
};

type FetchOutcome = std::result::Result<Arc<ServerMetadata>, String>;

/// Keeps one registration's discovery document fresh.
///
/// Fetches run on spawned tasks and are coalesced: concurrent callers join the fetch already in
/// flight instead of starting their own.
#[derive(Clone, Debug)]
pub struct ConfigurationCache {
	registration_id: Arc<str>,
	endpoint: Arc<Url>,
	expected_issuer: Option<Arc<Url>>,
	settings: Arc<CacheSettings>,
	retriever: Arc<dyn ConfigurationRetriever>,
	entry: Arc<RwLock<CacheEntry>>,
	single_flight: Arc<Mutex<Option<Arc<InFlight>>>>,
	next_fetch_id: Arc<AtomicU64>,
	metrics: Arc<CacheMetrics>,
}
impl ConfigurationCache {
	/// Build a cache for the document published at `endpoint`.
	///
	/// When `expected_issuer` is set, fetched documents advertising another issuer are rejected.
	pub fn new(
		registration_id: impl Into<Arc<str>>,
		endpoint: Url,
		expected_issuer: Option<Url>,
		settings: CacheSettings,
		retriever: Arc<dyn ConfigurationRetriever>,
	) -> Result<Self> {
		settings.validate()?;

		let registration_id = registration_id.into();

		Ok(Self {
			entry: Arc::new(RwLock::new(CacheEntry::new(registration_id.clone()))),
			registration_id,
			endpoint: Arc::new(endpoint),
			expected_issuer: expected_issuer.map(Arc::new),
			settings: Arc::new(settings),
			retriever,
			single_flight: Arc::new(Mutex::new(None)),
			next_fetch_id: Arc::new(AtomicU64::new(0)),
			metrics: CacheMetrics::new(),
		})
	}

	/// Registration this cache serves.
	pub fn registration_id(&self) -> &str {
		&self.registration_id
	}

	/// Absolute configuration endpoint.
	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}

	/// Access the per-registration metrics accumulator.
	pub fn metrics(&self) -> Arc<CacheMetrics> {
		self.metrics.clone()
	}

	/// Return the cached document, fetching it first when nothing is cached.
	///
	/// A cached document is returned immediately even when stale; a due refresh is started in
	/// the background.
	#[tracing::instrument(skip(self), fields(registration = %self.registration_id))]
	pub async fn metadata(&self) -> Result<Arc<ServerMetadata>> {
		let now = Instant::now();
		let snapshot = { self.entry.read().await.snapshot() };

		if let Some(payload) = snapshot {
			let stale = payload.is_expired(now);

			if payload.refresh_due(now) {
				self.schedule_background_refresh().await;
			}
			if stale {
				tracing::debug!(
					error_count = payload.error_count,
					"serving stale configuration document"
				);
			}

			self.observe_hit(stale);

			return Ok(payload.metadata);
		}

		tracing::debug!("cache empty; waiting for configuration fetch");

		self.observe_miss();
		self.await_fetch(false).await.map_err(|reason| self.unavailable(reason))
	}

	/// Start a fetch regardless of the cached state without waiting for it.
	///
	/// Readers keep receiving the previous document until the fetch completes. A fetch already
	/// in flight is reused and will run to completion even if its waiters go away.
	#[tracing::instrument(skip(self), fields(registration = %self.registration_id))]
	pub async fn invalidate(&self) {
		let mut slot = self.single_flight.lock().await;

		self.reap_abandoned(&mut slot).await;

		match slot.as_ref() {
			Some(flight) => flight.detached.store(true, Ordering::Release),
			None => {
				tracing::debug!("forced configuration fetch scheduled");

				*slot = Some(self.start_fetch(true).await);
			},
		}
	}

	/// Fetch the document now and wait for the outcome.
	///
	/// If the fetch fails while a previous document exists, that document is returned.
	#[tracing::instrument(skip(self), fields(registration = %self.registration_id))]
	pub async fn refresh(&self) -> Result<Arc<ServerMetadata>> {
		match self.await_fetch(true).await {
			Ok(metadata) => Ok(metadata),
			Err(reason) => {
				let snapshot = { self.entry.read().await.snapshot() };

				match snapshot {
					Some(payload) => {
						tracing::warn!(error = %reason, "refresh failed, keeping previous document");

						Ok(payload.metadata)
					},
					None => Err(self.unavailable(reason)),
				}
			},
		}
	}

	/// Capture the cache state for status reporting.
	pub async fn status(&self) -> CacheStatus {
		{
			let mut slot = self.single_flight.lock().await;

			self.reap_abandoned(&mut slot).await;
		}

		let captured_at = Instant::now();
		let captured_at_wallclock = Utc::now();
		let state = { self.entry.read().await.state().clone() };
		let to_datetime = |instant| convert_instant(captured_at, captured_at_wallclock, instant);
		let payload = state.payload();

		CacheStatus {
			registration_id: self.registration_id.to_string(),
			endpoint: (*self.endpoint).clone(),
			state: state.metadata_state(captured_at),
			refreshing: state.is_fetching(),
			issuer: payload.map(|payload| payload.metadata.issuer.clone()),
			fetched_at: payload.map(|payload| payload.fetched_at),
			expires_at: payload.and_then(|payload| to_datetime(payload.expires_at)),
			next_refresh_at: payload.and_then(|payload| to_datetime(payload.next_refresh_at)),
			etag: payload.and_then(|payload| payload.etag.clone()),
			last_modified: payload.and_then(|payload| payload.last_modified),
			error_count: payload.map(|payload| payload.error_count).unwrap_or_default(),
			last_error: payload.and_then(|payload| payload.last_error.clone()),
			metrics: self.metrics.snapshot(),
		}
	}

	async fn schedule_background_refresh(&self) {
		let mut slot = self.single_flight.lock().await;

		self.reap_abandoned(&mut slot).await;

		if slot.is_some() {
			return;
		}

		// Another caller may have completed a refresh while this one waited for the slot.
		let due = {
			let entry = self.entry.read().await;

			entry.state().payload().is_some_and(|payload| payload.refresh_due(Instant::now()))
		};

		if due {
			tracing::debug!("background configuration refresh scheduled");

			*slot = Some(self.start_fetch(true).await);
		}
	}

	async fn await_fetch(&self, force: bool) -> std::result::Result<Arc<ServerMetadata>, String> {
		loop {
			let waiter = {
				let mut slot = self.single_flight.lock().await;

				self.reap_abandoned(&mut slot).await;

				let flight = match slot.as_ref() {
					Some(flight) => flight.clone(),
					None => {
						if !force && let Some(payload) = self.entry.read().await.snapshot() {
							return Ok(payload.metadata);
						}

						let flight = self.start_fetch(false).await;

						*slot = Some(flight.clone());

						flight
					},
				};

				Waiter::join(flight)
			};

			match waiter.outcome().await {
				Joined::Ready(metadata) => return Ok(metadata),
				Joined::Failed(reason) => return Err(reason),
				Joined::Aborted => tracing::debug!("joined fetch was abandoned; retrying"),
			}
		}
	}

	// Must be called with the single-flight slot held.
	async fn start_fetch(&self, detached: bool) -> Arc<InFlight> {
		let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
		let (sender, receiver) = watch::channel(None);

		{
			self.entry.write().await.begin_fetch();
		}

		let cache = self.clone();
		let task = tokio::spawn(async move { cache.run_fetch(id, sender).await });

		Arc::new(InFlight {
			id,
			outcome: receiver,
			waiters: AtomicUsize::new(0),
			detached: AtomicBool::new(detached),
			abort: task.abort_handle(),
		})
	}

	// Must be called with the single-flight slot held.
	async fn reap_abandoned(&self, slot: &mut Option<Arc<InFlight>>) {
		if slot.as_ref().is_some_and(|flight| flight.is_abandoned()) {
			*slot = None;

			self.entry.write().await.abandon_fetch();

			tracing::debug!("cleared abandoned configuration fetch");
		}
	}

	async fn run_fetch(self, id: u64, outcome: watch::Sender<Option<FetchOutcome>>) {
		let previous = { self.entry.read().await.snapshot() };
		let started = Instant::now();
		let published = match self.fetch_with_retry(previous.as_ref()).await {
			Ok(payload) => {
				let metadata = payload.metadata.clone();

				{
					self.entry.write().await.fetch_success(payload);
				}

				self.observe_refresh_success(started.elapsed());

				tracing::debug!(
					registration = %self.registration_id,
					elapsed = ?started.elapsed(),
					"configuration document updated"
				);

				Ok(metadata)
			},
			Err(err) => {
				let reason = err.to_string();
				let settings = self.settings.clone();

				{
					self.entry.write().await.fetch_failure(Instant::now(), reason.clone(), |errors| {
						settings.refresh_cooldown(errors)
					});
				}

				self.observe_refresh_error();

				if previous.is_some() {
					tracing::warn!(
						registration = %self.registration_id,
						error = %err,
						"configuration refresh failed, serving previous document"
					);
				} else {
					tracing::warn!(
						registration = %self.registration_id,
						error = %err,
						"configuration fetch failed"
					);
				}

				Err(reason)
			},
		};

		{
			let mut slot = self.single_flight.lock().await;

			if slot.as_ref().is_some_and(|flight| flight.id == id) {
				*slot = None;
			}
		}

		outcome.send_replace(Some(published));
	}

	async fn fetch_with_retry(&self, previous: Option<&CachePayload>) -> Result<CachePayload> {
		let mut executor = RetryExecutor::new(&self.settings.retry_policy);
		let mut last_error = None;

		while let AttemptBudget::Granted { timeout } = executor.attempt_budget() {
			let request = RetrievalRequest {
				endpoint: &self.endpoint,
				etag: previous.and_then(|payload| payload.etag.as_deref()),
				timeout,
			};
			let attempt = match time::timeout(timeout, self.retriever.retrieve(request)).await {
				Ok(retrieval) => retrieval.and_then(|retrieval| self.build_payload(retrieval, previous)),
				Err(_) => Err(Error::Timeout(timeout)),
			};

			match attempt {
				Ok(payload) => return Ok(payload),
				Err(err) => {
					let retryable = is_retryable(&err);

					tracing::debug!(
						registration = %self.registration_id,
						error = %err,
						retryable,
						retries = executor.retries_used(),
						"configuration fetch attempt failed"
					);

					last_error = Some(err);

					if !retryable {
						break;
					}

					match executor.next_backoff() {
						Some(delay) =>
							if !delay.is_zero() {
								time::sleep(delay).await;
							},
						None => break,
					}
				},
			}
		}

		Err(last_error.unwrap_or(Error::Timeout(self.settings.retry_policy.deadline)))
	}

	fn build_payload(
		&self,
		retrieval: Retrieval,
		previous: Option<&CachePayload>,
	) -> Result<CachePayload> {
		let (metadata, max_age, etag, last_modified) = match retrieval {
			Retrieval::Document(document) => {
				self.check_issuer(&document.metadata)?;

				(document.metadata, document.max_age, document.etag, document.last_modified)
			},
			Retrieval::NotModified { max_age } => {
				let previous = previous.ok_or_else(|| {
					Error::Cache("Received a not-modified answer without a cached document.".into())
				})?;

				tracing::debug!(registration = %self.registration_id, "configuration revalidated");

				(previous.metadata.clone(), max_age, previous.etag.clone(), previous.last_modified)
			},
		};
		let now = Instant::now();
		let ttl = self.settings.effective_ttl(max_age);
		let expires_at = deadline_after(now, ttl);
		let lead = (self.settings.refresh_early + self.settings.prefetch_offset()).min(ttl / 2);

		Ok(CachePayload {
			metadata,
			etag,
			last_modified,
			fetched_at: Utc::now(),
			expires_at,
			next_refresh_at: expires_at.checked_sub(lead).unwrap_or(now),
			error_count: 0,
			last_error: None,
		})
	}

	fn check_issuer(&self, metadata: &ServerMetadata) -> Result<()> {
		match &self.expected_issuer {
			Some(expected) if !metadata.issuer_matches(expected) => Err(Error::Security(format!(
				"Discovery document issuer '{}' does not match the expected issuer '{expected}'.",
				metadata.issuer
			))),
			_ => Ok(()),
		}
	}

	fn unavailable(&self, reason: String) -> Error {
		Error::MetadataUnavailable { registration: self.registration_id.to_string(), reason }
	}

	fn observe_hit(&self, stale: bool) {
		metrics::record_resolve_hit(&self.registration_id, stale);

		self.metrics.record_hit(stale);
	}

	fn observe_miss(&self) {
		metrics::record_resolve_miss(&self.registration_id);

		self.metrics.record_miss();
	}

	fn observe_refresh_success(&self, duration: Duration) {
		metrics::record_refresh_success(&self.registration_id, duration);

		self.metrics.record_refresh_success(duration);
	}

	fn observe_refresh_error(&self) {
		metrics::record_refresh_error(&self.registration_id);

		self.metrics.record_refresh_error();
	}
}

/// Point-in-time view of a configuration cache.
#[derive(Clone, Debug, Serialize)]
pub struct CacheStatus {
	/// Registration the cache serves.
	pub registration_id: String,
	/// Absolute configuration endpoint.
	pub endpoint: Url,
	/// Public lifecycle state.
	pub state: MetadataState,
	/// Whether a fetch is running.
	pub refreshing: bool,
	/// Issuer of the cached document.
	pub issuer: Option<String>,
	/// Wall-clock time of the last successful fetch or revalidation.
	pub fetched_at: Option<DateTime<Utc>>,
	/// Estimated wall-clock expiry of the cached document.
	pub expires_at: Option<DateTime<Utc>>,
	/// Estimated wall-clock time of the next background refresh.
	pub next_refresh_at: Option<DateTime<Utc>>,
	/// Validator of the cached document.
	pub etag: Option<String>,
	/// Last-Modified timestamp of the cached document.
	pub last_modified: Option<DateTime<Utc>>,
	/// Consecutive failed refreshes.
	pub error_count: u32,
	/// Message of the most recent failed refresh.
	pub last_error: Option<String>,
	/// Telemetry counters.
	pub metrics: CacheMetricsSnapshot,
}

#[derive(Debug)]
struct InFlight {
	id: u64,
	outcome: watch::Receiver<Option<FetchOutcome>>,
	waiters: AtomicUsize,
	detached: AtomicBool,
	abort: AbortHandle,
}
impl InFlight {
	fn is_abandoned(&self) -> bool {
		self.abort.is_finished()
			|| (self.outcome.has_changed().is_err() && self.outcome.borrow().is_none())
	}
}

// Aborts the fetch when the last waiter of a non-detached fetch goes away.
struct Waiter {
	flight: Arc<InFlight>,
}
impl Waiter {
	fn join(flight: Arc<InFlight>) -> Self {
		flight.waiters.fetch_add(1, Ordering::AcqRel);

		Self { flight }
	}

	async fn outcome(&self) -> Joined {
		let mut outcome = self.flight.outcome.clone();

		match outcome.wait_for(Option::is_some).await {
			Ok(value) => match &*value {
				Some(Ok(metadata)) => Joined::Ready(metadata.clone()),
				Some(Err(reason)) => Joined::Failed(reason.clone()),
				None => Joined::Aborted,
			},
			Err(_) => Joined::Aborted,
		}
	}
}
impl Drop for Waiter {
	fn drop(&mut self) {
		if self.flight.waiters.fetch_sub(1, Ordering::AcqRel) == 1
			&& !self.flight.detached.load(Ordering::Acquire)
			&& self.flight.outcome.borrow().is_none()
		{
			tracing::debug!(fetch = self.flight.id, "last waiter left; aborting fetch");

			self.flight.abort.abort();
		}
	}
}

enum Joined {
	Ready(Arc<ServerMetadata>),
	Failed(String),
	Aborted,
}

fn is_retryable(err: &Error) -> bool {
	match err {
		Error::Reqwest(_) | Error::Timeout(_) => true,
		Error::HttpStatus { status, .. } =>
			status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS,
		_ => false,
	}
}

fn convert_instant(
	captured_at: Instant,
	captured_at_wallclock: DateTime<Utc>,
	instant: Instant,
) -> Option<DateTime<Utc>> {
	if let Some(delta) = instant.checked_duration_since(captured_at) {
		captured_at_wallclock.checked_add_signed(TimeDelta::from_std(delta).ok()?)
	} else {
		let delta = captured_at.checked_duration_since(instant)?;

		captured_at_wallclock.checked_sub_signed(TimeDelta::from_std(delta).ok()?)
	}
}
