//! Protocol parameter negotiation.
//!
//! Every dimension is resolved from three sources: the registration allow-list, the
//! process-wide enabled list, and the values advertised by the authorization server. The
//! registration and server lists only restrict the candidates; the process-wide list decides
//! their priority.

// std
use std::{
	collections::{BTreeSet, HashSet},
	fmt::{Display, Formatter, Result as FmtResult},
};
// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

/// Response mode that carries parameters in the query string.
pub const RESPONSE_MODE_QUERY: &str = "query";

/// Protocol dimensions chosen per request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
	/// `grant_type` used at the token endpoint.
	GrantType,
	/// `response_type` sent in authorization requests.
	ResponseType,
	/// `response_mode` sent in authorization requests.
	ResponseMode,
	/// PKCE `code_challenge_method`.
	CodeChallengeMethod,
}
impl Dimension {
	/// Every dimension, in a stable order.
	pub const ALL: [Dimension; 4] = [
		Dimension::GrantType,
		Dimension::ResponseType,
		Dimension::ResponseMode,
		Dimension::CodeChallengeMethod,
	];

	/// Protocol parameter name of the dimension.
	pub fn as_str(self) -> &'static str {
		match self {
			Dimension::GrantType => "grant_type",
			Dimension::ResponseType => "response_type",
			Dimension::ResponseMode => "response_mode",
			Dimension::CodeChallengeMethod => "code_challenge_method",
		}
	}

	fn matches(self, left: &str, right: &str) -> bool {
		match self {
			// Response types are unordered combinations of space-delimited tokens.
			Dimension::ResponseType => token_set(left) == token_set(right),
			_ => left == right,
		}
	}
}
impl Display for Dimension {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Compute the ordered candidates for a dimension.
///
/// `process_enabled` fixes the order. An empty `registration_allowed` set and a missing
/// `server_supported` list impose no restriction.
pub fn candidates<'a>(
	dimension: Dimension,
	registration_allowed: &BTreeSet<String>,
	process_enabled: &'a [String],
	server_supported: Option<&[String]>,
) -> Result<Vec<&'a str>> {
	let effective: Vec<&str> = process_enabled
		.iter()
		.map(String::as_str)
		.filter(|value| {
			registration_allowed.is_empty()
				|| registration_allowed.iter().any(|allowed| dimension.matches(allowed, value))
		})
		.filter(|value| {
			server_supported.is_none_or(|supported| {
				supported.iter().any(|advertised| dimension.matches(advertised, value))
			})
		})
		.collect();

	if effective.is_empty() {
		tracing::debug!(
			%dimension,
			registration_allowed = ?registration_allowed,
			process_enabled = ?process_enabled,
			server_supported = ?server_supported,
			"negotiation produced no compatible value"
		);

		return Err(Error::NoCompatibleValue { dimension });
	}

	Ok(effective)
}

/// Resolve the single effective value for a dimension.
pub fn negotiate<'a>(
	dimension: Dimension,
	registration_allowed: &BTreeSet<String>,
	process_enabled: &'a [String],
	server_supported: Option<&[String]>,
) -> Result<&'a str> {
	let effective = candidates(dimension, registration_allowed, process_enabled, server_supported)?;

	// `candidates` never returns an empty list.
	effective.first().copied().ok_or(Error::NoCompatibleValue { dimension })
}

/// Resolve the response mode for an already chosen response type.
///
/// The `query` mode is dropped when the response type returns a token or an ID token through
/// the front channel.
pub fn negotiate_response_mode<'a>(
	response_type: &str,
	registration_allowed: &BTreeSet<String>,
	process_enabled: &'a [String],
	server_supported: Option<&[String]>,
) -> Result<&'a str> {
	let dimension = Dimension::ResponseMode;
	let effective = candidates(dimension, registration_allowed, process_enabled, server_supported)?;
	let tokens = token_set(response_type);
	let allows_query = !tokens.contains("token") && !tokens.contains("id_token");

	effective
		.into_iter()
		.find(|mode| allows_query || *mode != RESPONSE_MODE_QUERY)
		.ok_or(Error::NoCompatibleValue { dimension })
}

fn token_set(value: &str) -> HashSet<&str> {
	value.split_ascii_whitespace().collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn set(values: &[&str]) -> BTreeSet<String> {
		values.iter().map(|value| value.to_string()).collect()
	}

	fn list(values: &[&str]) -> Vec<String> {
		values.iter().map(|value| value.to_string()).collect()
	}

	#[test]
	fn registration_restriction_keeps_global_priority() {
		let enabled = list(&["authorization_code", "refresh_token"]);
		let server = list(&["authorization_code", "refresh_token"]);
		let value = negotiate(
			Dimension::GrantType,
			&set(&["authorization_code"]),
			&enabled,
			Some(&server),
		)
		.expect("grant type");

		assert_eq!(value, "authorization_code");
	}

	#[test]
	fn empty_registration_list_falls_back_to_server_support() {
		let enabled = list(&["S256", "plain"]);
		let server = list(&["plain"]);
		let value = negotiate(Dimension::CodeChallengeMethod, &set(&[]), &enabled, Some(&server))
			.expect("challenge method");

		assert_eq!(value, "plain");
	}

	#[test]
	fn empty_registration_list_equals_unrestricted_registration() {
		let enabled = list(&["S256", "plain"]);
		let server = list(&["S256", "plain"]);
		let unrestricted =
			candidates(Dimension::CodeChallengeMethod, &set(&[]), &enabled, Some(&server))
				.expect("candidates");
		let explicit = candidates(
			Dimension::CodeChallengeMethod,
			&set(&["plain", "S256"]),
			&enabled,
			Some(&server),
		)
		.expect("candidates");

		assert_eq!(unrestricted, explicit);
		assert_eq!(unrestricted, vec!["S256", "plain"]);
	}

	#[test]
	fn missing_server_list_is_permissive() {
		let enabled = list(&["form_post", "query"]);
		let value =
			negotiate(Dimension::ResponseMode, &set(&["query"]), &enabled, None).expect("mode");

		assert_eq!(value, "query");
	}

	#[test]
	fn never_returns_values_outside_process_enabled() {
		let enabled = list(&["authorization_code"]);
		let server = list(&["authorization_code", "password"]);
		let registration = set(&["password"]);
		let err =
			negotiate(Dimension::GrantType, &registration, &enabled, Some(&server)).unwrap_err();

		assert!(matches!(err, Error::NoCompatibleValue { dimension: Dimension::GrantType }));
	}

	#[test]
	fn empty_intersection_fails() {
		let enabled = list(&["S256"]);
		let server = list(&["plain"]);
		let err = negotiate(Dimension::CodeChallengeMethod, &set(&[]), &enabled, Some(&server))
			.unwrap_err();

		assert!(matches!(err, Error::NoCompatibleValue {
			dimension: Dimension::CodeChallengeMethod
		}));
	}

	#[test]
	fn tokens_are_case_sensitive() {
		let enabled = list(&["S256"]);
		let server = list(&["s256"]);

		assert!(
			negotiate(Dimension::CodeChallengeMethod, &set(&[]), &enabled, Some(&server)).is_err()
		);
	}

	#[test]
	fn response_type_combinations_ignore_token_order() {
		let enabled = list(&["code id_token", "code"]);
		let server = list(&["id_token code"]);
		let value = negotiate(Dimension::ResponseType, &set(&[]), &enabled, Some(&server))
			.expect("response type");

		assert_eq!(value, "code id_token");
	}

	#[test]
	fn query_mode_is_skipped_for_front_channel_tokens() {
		let enabled = list(&["query", "fragment"]);
		let mode = negotiate_response_mode("code id_token", &set(&[]), &enabled, None)
			.expect("response mode");

		assert_eq!(mode, "fragment");

		let mode = negotiate_response_mode("code", &set(&[]), &enabled, None).expect("mode");

		assert_eq!(mode, "query");

		let err =
			negotiate_response_mode("id_token", &set(&["query"]), &enabled, None).unwrap_err();

		assert!(matches!(err, Error::NoCompatibleValue { dimension: Dimension::ResponseMode }));
	}
}
