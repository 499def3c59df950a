//! Authorization server metadata (RFC 8414 / OpenID Connect Discovery).

// std
use std::collections::BTreeMap;
// crates.io
use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::negotiation::Dimension;

/// Discovery document describing an authorization server.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerMetadata {
	/// Issuer identifier of the authorization server.
	pub issuer: String,
	/// Authorization endpoint.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub authorization_endpoint: Option<Url>,
	/// Token endpoint.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token_endpoint: Option<Url>,
	/// OpenID Connect userinfo endpoint.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub userinfo_endpoint: Option<Url>,
	/// JWK set document holding the server signing keys.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub jwks_uri: Option<Url>,
	/// RP-initiated logout endpoint.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub end_session_endpoint: Option<Url>,
	/// Device authorization endpoint (RFC 8628).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub device_authorization_endpoint: Option<Url>,
	/// Token introspection endpoint (RFC 7662).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub introspection_endpoint: Option<Url>,
	/// Token revocation endpoint (RFC 7009).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub revocation_endpoint: Option<Url>,
	/// Dynamic client registration endpoint (RFC 7591).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub registration_endpoint: Option<Url>,
	/// Advertised `grant_type` values.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub grant_types_supported: Option<Vec<String>>,
	/// Advertised `response_type` values.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub response_types_supported: Option<Vec<String>>,
	/// Advertised `response_mode` values.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub response_modes_supported: Option<Vec<String>>,
	/// Advertised PKCE challenge methods.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub code_challenge_methods_supported: Option<Vec<String>>,
	/// Advertised scopes.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub scopes_supported: Option<Vec<String>>,
	/// Advertised client authentication methods for the token endpoint.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token_endpoint_auth_methods_supported: Option<Vec<String>>,
	/// Signing keys resolved from `jwks_uri`, or supplied inline for static configurations.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub signing_keys: Option<JwkSet>,
	/// Members not modelled above.
	#[serde(flatten)]
	pub extra: BTreeMap<String, serde_json::Value>,
}
impl ServerMetadata {
	/// Create an otherwise empty document for the given issuer.
	pub fn new(issuer: impl Into<String>) -> Self {
		Self { issuer: issuer.into(), ..Default::default() }
	}

	/// Values advertised for a negotiation dimension, `None` when the server is silent.
	pub fn supported(&self, dimension: Dimension) -> Option<&[String]> {
		match dimension {
			Dimension::GrantType => self.grant_types_supported.as_deref(),
			Dimension::ResponseType => self.response_types_supported.as_deref(),
			Dimension::ResponseMode => self.response_modes_supported.as_deref(),
			Dimension::CodeChallengeMethod => self.code_challenge_methods_supported.as_deref(),
		}
	}

	/// Whether the advertised issuer designates the same server as `expected`.
	pub fn issuer_matches(&self, expected: &Url) -> bool {
		Url::parse(&self.issuer).map(|issuer| same_issuer(&issuer, expected)).unwrap_or(false)
	}
}

pub(crate) fn same_issuer(left: &Url, right: &Url) -> bool {
	// `https://a.example` and `https://a.example/` parse to the same URL; paths are compared
	// without a trailing slash so that tenant issuers are not confused.
	left.scheme() == right.scheme()
		&& left.host_str() == right.host_str()
		&& left.port_or_known_default() == right.port_or_known_default()
		&& left.path().trim_end_matches('/') == right.path().trim_end_matches('/')
		&& left.query() == right.query()
}
