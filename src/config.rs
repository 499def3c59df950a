//! Process-wide client options, cache tuning, and retry configuration.

// std
use std::cell::RefCell;
// crates.io
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{_prelude::*, negotiation::Dimension};

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Freshness horizon used when the server gives no caching hint.
pub const DEFAULT_TTL: Duration = Duration::from_secs(12 * 60 * 60);
/// Minimum accepted freshness horizon.
pub const MIN_TTL_FLOOR: Duration = Duration::from_secs(30);
/// Default maximum freshness horizon.
pub const DEFAULT_MAX_TTL: Duration = Duration::from_secs(60 * 60 * 24);
/// Default refresh lead time before expiry.
pub const DEFAULT_REFRESH_EARLY: Duration = Duration::from_secs(30);
/// Default prefetch jitter.
pub const DEFAULT_PREFETCH_JITTER: Duration = Duration::from_secs(5);
/// Default cool-down after the first failed background refresh.
pub const DEFAULT_REFRESH_BACKOFF_INITIAL: Duration = Duration::from_secs(5);
/// Default upper bound of the background refresh cool-down.
pub const DEFAULT_REFRESH_BACKOFF_MAX: Duration = Duration::from_secs(5 * 60);
/// Default size guard for discovery and JWKS documents (1 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 1_048_576;

/// Process-wide client options.
///
/// Each enabled list is ordered by preference; negotiation never reorders it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientOptions {
	/// Enabled grant types.
	#[serde(default = "default_grant_types")]
	pub grant_types: Vec<String>,
	/// Enabled response types.
	#[serde(default = "default_response_types")]
	pub response_types: Vec<String>,
	/// Enabled response modes.
	#[serde(default = "default_response_modes")]
	pub response_modes: Vec<String>,
	/// Enabled PKCE challenge methods.
	#[serde(default = "default_code_challenge_methods")]
	pub code_challenge_methods: Vec<String>,
	/// Redirect URIs accepted besides the ones declared by registrations.
	#[serde(default)]
	pub redirect_uris: Vec<Url>,
	/// Post-logout redirect URIs accepted besides the ones declared by registrations.
	#[serde(default)]
	pub post_logout_redirect_uris: Vec<Url>,
}
impl ClientOptions {
	/// Enabled values for a dimension in priority order.
	pub fn enabled(&self, dimension: Dimension) -> &[String] {
		match dimension {
			Dimension::GrantType => &self.grant_types,
			Dimension::ResponseType => &self.response_types,
			Dimension::ResponseMode => &self.response_modes,
			Dimension::CodeChallengeMethod => &self.code_challenge_methods,
		}
	}

	/// Replace the enabled values for a dimension.
	pub fn with_enabled<I, S>(mut self, dimension: Dimension, values: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let values = values.into_iter().map(Into::into).collect();

		match dimension {
			Dimension::GrantType => self.grant_types = values,
			Dimension::ResponseType => self.response_types = values,
			Dimension::ResponseMode => self.response_modes = values,
			Dimension::CodeChallengeMethod => self.code_challenge_methods = values,
		}

		self
	}

	/// Validate that every dimension enables at least one well-formed value.
	pub fn validate(&self) -> Result<()> {
		for dimension in Dimension::ALL {
			let values = self.enabled(dimension);

			if values.is_empty() {
				return Err(Error::Configuration {
					field: dimension_field(dimension),
					reason: "At least one value must be enabled.".into(),
				});
			}

			for (index, value) in values.iter().enumerate() {
				if value.trim().is_empty() {
					return Err(Error::Configuration {
						field: dimension_field(dimension),
						reason: "Values must not be blank.".into(),
					});
				}
				if values[..index].contains(value) {
					return Err(Error::Configuration {
						field: dimension_field(dimension),
						reason: format!("Duplicate value '{value}'."),
					});
				}
			}
		}

		for uri in self.redirect_uris.iter().chain(&self.post_logout_redirect_uris) {
			if uri.fragment().is_some() {
				return Err(Error::Configuration {
					field: "redirect_uris",
					reason: format!("Redirect URI {uri} must not contain a fragment."),
				});
			}
		}

		Ok(())
	}
}
impl Default for ClientOptions {
	fn default() -> Self {
		Self {
			grant_types: default_grant_types(),
			response_types: default_response_types(),
			response_modes: default_response_modes(),
			code_challenge_methods: default_code_challenge_methods(),
			redirect_uris: Vec::new(),
			post_logout_redirect_uris: Vec::new(),
		}
	}
}

/// Supported jitter strategies for retry policies.
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
	/// Deterministic backoff schedule.
	None,
	/// Randomize the delay within the upper fifth of the computed backoff.
	#[default]
	Full,
	/// Decorrelated jitter bounded by three times the previous delay.
	Decorrelated,
}

/// Retry configuration for a single configuration fetch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Retries performed after the initial attempt.
	pub max_retries: u32,
	/// Timeout applied to each attempt; an elapsed timeout counts as a failure.
	pub attempt_timeout: Duration,
	/// Delay before the first retry.
	pub initial_backoff: Duration,
	/// Upper bound applied to exponential backoff growth.
	pub max_backoff: Duration,
	/// Deadline bounding the whole retry sequence.
	pub deadline: Duration,
	/// Strategy used to randomize the computed backoff.
	#[serde(default)]
	pub jitter: JitterStrategy,
}
impl RetryPolicy {
	/// Policy performing a single attempt.
	pub fn no_retry(attempt_timeout: Duration) -> Self {
		Self {
			max_retries: 0,
			attempt_timeout,
			deadline: attempt_timeout,
			jitter: JitterStrategy::None,
			..Default::default()
		}
	}

	/// Validate invariants for retry configuration.
	pub fn validate(&self) -> Result<()> {
		if self.attempt_timeout < Duration::from_millis(100) {
			return Err(Error::Configuration {
				field: "retry_policy.attempt_timeout",
				reason: "Must be at least 100 ms.".into(),
			});
		}
		if self.initial_backoff.is_zero() {
			return Err(Error::Configuration {
				field: "retry_policy.initial_backoff",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_backoff < self.initial_backoff {
			return Err(Error::Configuration {
				field: "retry_policy.max_backoff",
				reason: "Must be greater than or equal to initial_backoff.".into(),
			});
		}
		if self.deadline < self.attempt_timeout {
			return Err(Error::Configuration {
				field: "retry_policy.deadline",
				reason: "Must be greater than or equal to attempt_timeout.".into(),
			});
		}

		Ok(())
	}

	/// Backoff before retry number `attempt` (zero based).
	pub fn compute_backoff(&self, attempt: u32) -> Duration {
		let bounded = exponential(self.initial_backoff, self.max_backoff, attempt);

		match self.jitter {
			JitterStrategy::None => bounded,
			JitterStrategy::Full =>
				random_within(bounded.mul_f64(0.8).max(self.initial_backoff), bounded),
			JitterStrategy::Decorrelated => {
				let previous = if attempt == 0 { self.initial_backoff } else { bounded };
				let ceiling = self.max_backoff.min(previous.saturating_mul(3));

				random_within(self.initial_backoff, ceiling.max(self.initial_backoff))
			},
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: 2,
			attempt_timeout: Duration::from_secs(3),
			initial_backoff: Duration::from_millis(250),
			max_backoff: Duration::from_secs(2),
			deadline: Duration::from_secs(8),
			jitter: JitterStrategy::Full,
		}
	}
}

/// Freshness and refresh tuning for configuration caches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheSettings {
	/// Freshness horizon used when the retriever reports no caching hint.
	#[serde(default = "default_ttl")]
	pub default_ttl: Duration,
	/// Lower clamp for server supplied freshness.
	#[serde(default = "default_min_ttl")]
	pub min_ttl: Duration,
	/// Upper clamp for server supplied freshness.
	#[serde(default = "default_max_ttl")]
	pub max_ttl: Duration,
	/// Lead time before expiry at which a background refresh starts.
	#[serde(default = "default_refresh_early")]
	pub refresh_early: Duration,
	/// Random jitter subtracted from the proactive refresh instant.
	#[serde(default = "default_prefetch_jitter")]
	pub prefetch_jitter: Duration,
	/// Cool-down after the first failed background refresh; doubles per consecutive failure.
	#[serde(default = "default_refresh_backoff_initial")]
	pub refresh_backoff_initial: Duration,
	/// Upper bound of the background refresh cool-down.
	#[serde(default = "default_refresh_backoff_max")]
	pub refresh_backoff_max: Duration,
	/// Retry policy applied within one fetch.
	#[serde(default)]
	pub retry_policy: RetryPolicy,
}
impl CacheSettings {
	/// Validate the settings against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if self.min_ttl < MIN_TTL_FLOOR {
			return Err(Error::Configuration {
				field: "min_ttl",
				reason: format!("Must be at least {MIN_TTL_FLOOR:?}."),
			});
		}
		if self.max_ttl < self.min_ttl {
			return Err(Error::Configuration {
				field: "max_ttl",
				reason: "Must be greater than or equal to min_ttl.".into(),
			});
		}
		if !(self.min_ttl..=self.max_ttl).contains(&self.default_ttl) {
			return Err(Error::Configuration {
				field: "default_ttl",
				reason: "Must lie between min_ttl and max_ttl.".into(),
			});
		}
		if self.refresh_early >= self.max_ttl {
			return Err(Error::Configuration {
				field: "refresh_early",
				reason: "Must be less than max_ttl.".into(),
			});
		}
		if self.refresh_backoff_initial.is_zero() {
			return Err(Error::Configuration {
				field: "refresh_backoff_initial",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.refresh_backoff_max < self.refresh_backoff_initial {
			return Err(Error::Configuration {
				field: "refresh_backoff_max",
				reason: "Must be greater than or equal to refresh_backoff_initial.".into(),
			});
		}

		self.retry_policy.validate()
	}

	/// Clamp a server freshness hint, falling back to `default_ttl`.
	pub fn effective_ttl(&self, hint: Option<Duration>) -> Duration {
		match hint {
			Some(ttl) => ttl.clamp(self.min_ttl, self.max_ttl),
			None => self.default_ttl,
		}
	}

	/// Cool-down applied after `consecutive_errors` failed background refreshes.
	pub fn refresh_cooldown(&self, consecutive_errors: u32) -> Duration {
		exponential(
			self.refresh_backoff_initial,
			self.refresh_backoff_max,
			consecutive_errors.saturating_sub(1),
		)
	}

	/// Random prefetch offset within `[0, prefetch_jitter]`.
	pub fn prefetch_offset(&self) -> Duration {
		random_within(Duration::ZERO, self.prefetch_jitter)
	}
}
impl Default for CacheSettings {
	fn default() -> Self {
		Self {
			default_ttl: DEFAULT_TTL,
			min_ttl: MIN_TTL_FLOOR,
			max_ttl: DEFAULT_MAX_TTL,
			refresh_early: DEFAULT_REFRESH_EARLY,
			prefetch_jitter: DEFAULT_PREFETCH_JITTER,
			refresh_backoff_initial: DEFAULT_REFRESH_BACKOFF_INITIAL,
			refresh_backoff_max: DEFAULT_REFRESH_BACKOFF_MAX,
			retry_policy: RetryPolicy::default(),
		}
	}
}

fn exponential(initial: Duration, max: Duration, exponent: u32) -> Duration {
	initial.saturating_mul(1 << exponent.min(31)).min(max).max(initial)
}

fn random_within(min: Duration, max: Duration) -> Duration {
	if max <= min {
		return max;
	}

	SMALL_RNG.with(|cell| {
		let mut rng = cell.borrow_mut();
		let span = (max.as_nanos() - min.as_nanos()).min(u64::MAX as u128) as u64;

		min + Duration::from_nanos(rng.random_range(0..=span))
	})
}

fn dimension_field(dimension: Dimension) -> &'static str {
	match dimension {
		Dimension::GrantType => "grant_types",
		Dimension::ResponseType => "response_types",
		Dimension::ResponseMode => "response_modes",
		Dimension::CodeChallengeMethod => "code_challenge_methods",
	}
}

fn strings(values: &[&str]) -> Vec<String> {
	values.iter().map(|value| value.to_string()).collect()
}

fn default_grant_types() -> Vec<String> {
	strings(&[
		"authorization_code",
		"refresh_token",
		"client_credentials",
		"urn:ietf:params:oauth:grant-type:device_code",
		"implicit",
	])
}

fn default_response_types() -> Vec<String> {
	strings(&["code", "code id_token", "id_token", "none"])
}

fn default_response_modes() -> Vec<String> {
	strings(&["form_post", "fragment", "query"])
}

fn default_code_challenge_methods() -> Vec<String> {
	strings(&["S256", "plain"])
}

fn default_ttl() -> Duration {
	DEFAULT_TTL
}

fn default_min_ttl() -> Duration {
	MIN_TTL_FLOOR
}

fn default_max_ttl() -> Duration {
	DEFAULT_MAX_TTL
}

fn default_refresh_early() -> Duration {
	DEFAULT_REFRESH_EARLY
}

fn default_prefetch_jitter() -> Duration {
	DEFAULT_PREFETCH_JITTER
}

fn default_refresh_backoff_initial() -> Duration {
	DEFAULT_REFRESH_BACKOFF_INITIAL
}

fn default_refresh_backoff_max() -> Duration {
	DEFAULT_REFRESH_BACKOFF_MAX
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_valid() {
		ClientOptions::default().validate().expect("client options");
		CacheSettings::default().validate().expect("cache settings");
	}

	#[test]
	fn empty_or_duplicate_dimensions_are_rejected() {
		let options = ClientOptions::default()
			.with_enabled(Dimension::CodeChallengeMethod, Vec::<String>::new());
		let err = options.validate().unwrap_err();

		assert!(matches!(err, Error::Configuration { field: "code_challenge_methods", .. }));

		let options = ClientOptions::default().with_enabled(Dimension::GrantType, ["a", "a"]);

		assert!(options.validate().is_err());
	}

	#[test]
	fn options_deserialize_with_defaults() {
		let options: ClientOptions = serde_json::from_value(serde_json::json!({
			"code_challenge_methods": ["S256"],
			"redirect_uris": ["https://app.example.com/callback"]
		}))
		.expect("options");

		assert_eq!(options.enabled(Dimension::CodeChallengeMethod), ["S256".to_string()]);
		assert_eq!(options.enabled(Dimension::GrantType)[0], "authorization_code");
		assert_eq!(options.redirect_uris.len(), 1);
	}

	#[test]
	fn ttl_hint_is_clamped() {
		let settings = CacheSettings::default();

		assert_eq!(settings.effective_ttl(Some(Duration::from_secs(1))), MIN_TTL_FLOOR);
		assert_eq!(settings.effective_ttl(Some(Duration::from_secs(86_400 * 7))), DEFAULT_MAX_TTL);
		assert_eq!(settings.effective_ttl(None), DEFAULT_TTL);
	}

	#[test]
	fn huge_backoffs_saturate() {
		let settings = CacheSettings {
			refresh_backoff_initial: Duration::MAX / 2,
			refresh_backoff_max: Duration::MAX,
			..CacheSettings::default()
		};

		assert_eq!(settings.refresh_cooldown(u32::MAX), Duration::MAX);

		for jitter in [JitterStrategy::None, JitterStrategy::Full, JitterStrategy::Decorrelated] {
			let policy = RetryPolicy {
				initial_backoff: Duration::MAX / 4,
				max_backoff: Duration::MAX,
				jitter,
				..RetryPolicy::default()
			};

			assert!(policy.compute_backoff(40) >= policy.initial_backoff);
		}
	}

	#[test]
	fn refresh_cooldown_grows_and_caps() {
		let settings = CacheSettings::default();

		assert_eq!(settings.refresh_cooldown(1), Duration::from_secs(5));
		assert_eq!(settings.refresh_cooldown(2), Duration::from_secs(10));
		assert_eq!(settings.refresh_cooldown(3), Duration::from_secs(20));
		assert_eq!(settings.refresh_cooldown(30), DEFAULT_REFRESH_BACKOFF_MAX);
	}

	#[test]
	fn backoff_respects_bounds() {
		let policy = RetryPolicy::default();

		for attempt in 0..6 {
			let delay = policy.compute_backoff(attempt);

			assert!(delay >= policy.initial_backoff);
			assert!(delay <= policy.max_backoff);
		}

		let deterministic = RetryPolicy { jitter: JitterStrategy::None, ..RetryPolicy::default() };

		assert_eq!(deterministic.compute_backoff(1), Duration::from_millis(500));
	}
}
