//! Cache entry transitions.

// self
use crate::{
	_prelude::*,
	cache::state::{CachePayload, CacheState},
};

/// Cached discovery document slot for one registration.
#[derive(Clone, Debug)]
pub struct CacheEntry {
	registration_id: Arc<str>,
	state: CacheState,
}
impl CacheEntry {
	/// Create a new empty cache entry.
	pub fn new(registration_id: impl Into<Arc<str>>) -> Self {
		Self { registration_id: registration_id.into(), state: CacheState::Empty }
	}

	/// Registration this entry belongs to.
	pub fn registration_id(&self) -> &str {
		&self.registration_id
	}

	/// Inspect the current cache state.
	pub fn state(&self) -> &CacheState {
		&self.state
	}

	/// Mark a fetch as started; returns false when one is already running.
	pub fn begin_fetch(&mut self) -> bool {
		self.state = match std::mem::replace(&mut self.state, CacheState::Empty) {
			CacheState::Empty => CacheState::Fetching,
			CacheState::Ready(payload) => CacheState::Refreshing(payload),
			state @ (CacheState::Fetching | CacheState::Refreshing(_)) => {
				self.state = state;

				return false;
			},
		};

		true
	}

	/// Store a freshly fetched or revalidated payload.
	pub fn fetch_success(&mut self, mut payload: CachePayload) {
		payload.reset_failures();
		self.state = CacheState::Ready(payload);
	}

	/// Record a failed fetch.
	///
	/// An initial fetch returns the entry to `Empty`. A refresh keeps the stale payload and
	/// defers the next attempt by `cooldown(consecutive_errors)`.
	pub fn fetch_failure<F>(&mut self, now: Instant, reason: String, cooldown: F)
	where
		F: FnOnce(u32) -> Duration,
	{
		self.state = match std::mem::replace(&mut self.state, CacheState::Empty) {
			CacheState::Refreshing(mut payload) | CacheState::Ready(mut payload) => {
				let delay = cooldown(payload.error_count.saturating_add(1));

				payload.bump_error(now, delay, reason);

				CacheState::Ready(payload)
			},
			CacheState::Fetching | CacheState::Empty => CacheState::Empty,
		};
	}

	/// Roll back a fetch that ended without an outcome (aborted task).
	pub fn abandon_fetch(&mut self) {
		self.state = match std::mem::replace(&mut self.state, CacheState::Empty) {
			CacheState::Refreshing(payload) => CacheState::Ready(payload),
			CacheState::Fetching => CacheState::Empty,
			state => state,
		};
	}

	/// Retrieve a clone of the cached payload if present.
	pub fn snapshot(&self) -> Option<CachePayload> {
		self.state.payload().cloned()
	}
}
