//! Cache state machine modelling the discovery document lifecycle.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{_prelude::*, metadata::ServerMetadata};

/// Cached discovery document and its freshness bookkeeping.
#[derive(Clone, Debug)]
pub struct CachePayload {
	/// Last known-good document.
	pub metadata: Arc<ServerMetadata>,
	/// Validator supplied by the origin.
	pub etag: Option<String>,
	/// Last-Modified timestamp advertised by the origin.
	pub last_modified: Option<DateTime<Utc>>,
	/// UTC timestamp of the most recent successful fetch or revalidation.
	pub fetched_at: DateTime<Utc>,
	/// Monotonic deadline after which the document is stale.
	pub expires_at: Instant,
	/// Monotonic instant from which a background refresh may start.
	///
	/// After a failed refresh this carries the cool-down deadline instead.
	pub next_refresh_at: Instant,
	/// Count of consecutive failed refreshes.
	pub error_count: u32,
	/// Message of the most recent failed refresh.
	pub last_error: Option<String>,
}
impl CachePayload {
	/// Whether the document has passed its freshness horizon.
	pub fn is_expired(&self, now: Instant) -> bool {
		now >= self.expires_at
	}

	/// Whether a background refresh is due.
	pub fn refresh_due(&self, now: Instant) -> bool {
		now >= self.next_refresh_at
	}

	/// Record a failed refresh and push the next attempt out by `cooldown`.
	pub fn bump_error(&mut self, now: Instant, cooldown: Duration, reason: String) {
		self.error_count = self.error_count.saturating_add(1);
		self.next_refresh_at = deadline_after(now, cooldown);
		self.last_error = Some(reason);
	}

	/// Reset failure bookkeeping after a successful refresh.
	pub fn reset_failures(&mut self) {
		self.error_count = 0;
		self.last_error = None;
	}
}

/// `now + delay`, capped roughly thirty years out instead of overflowing.
pub(crate) fn deadline_after(now: Instant, delay: Duration) -> Instant {
	const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

	now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Internal cache lifecycle states.
#[derive(Clone, Debug)]
pub enum CacheState {
	/// No document and no fetch in progress.
	Empty,
	/// Initial fetch underway; callers wait for it.
	Fetching,
	/// A document is cached.
	Ready(CachePayload),
	/// A document is cached and served while a refresh runs.
	Refreshing(CachePayload),
}
impl CacheState {
	/// Retrieve the current payload if available.
	pub fn payload(&self) -> Option<&CachePayload> {
		match self {
			CacheState::Ready(payload) | CacheState::Refreshing(payload) => Some(payload),
			_ => None,
		}
	}

	/// Whether a fetch is in progress.
	pub fn is_fetching(&self) -> bool {
		matches!(self, CacheState::Fetching | CacheState::Refreshing(_))
	}

	/// Project the state onto its public form at `now`.
	pub fn metadata_state(&self, now: Instant) -> MetadataState {
		match self {
			CacheState::Empty => MetadataState::Empty,
			CacheState::Fetching => MetadataState::Fetching,
			CacheState::Ready(payload) | CacheState::Refreshing(payload) =>
				if payload.is_expired(now) {
					MetadataState::Stale
				} else {
					MetadataState::Fresh
				},
		}
	}
}

/// Public lifecycle state of a registration's server metadata.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum MetadataState {
	/// Nothing cached yet.
	Empty,
	/// First fetch in progress.
	Fetching,
	/// Cached document within its freshness horizon.
	Fresh,
	/// Cached document past its freshness horizon, still served.
	Stale,
}
