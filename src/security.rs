//! Endpoint security checks: HTTPS enforcement and host allowlists.
//!
//! Issuers and configuration endpoints are checked once at registration time; the HTTP
//! retriever re-checks every URL it is about to contact.

// std
use std::collections::HashSet;
// crates.io
use serde::{Deserialize, de::Deserializer};
use url::Url;
// self
use crate::_prelude::*;

/// Canonicalise a DNS name by trimming whitespace, removing any trailing dot, and lowercasing.
pub fn canonicalize_dns_name(value: &str) -> Option<String> {
	let trimmed = value.trim().trim_end_matches('.');

	(!trimmed.is_empty()).then(|| trimmed.to_ascii_lowercase())
}

/// Canonicalise allowlist entries, dropping duplicates and blanks.
pub fn normalize_allowlist(domains: Vec<String>) -> Vec<String> {
	let mut seen = HashSet::new();

	domains
		.into_iter()
		.filter_map(|domain| canonicalize_dns_name(&domain))
		.filter(|domain| seen.insert(domain.clone()))
		.collect()
}

/// `serde` helper normalising allowlist domains during deserialisation.
pub fn deserialize_allowed_domains<'de, D>(
	deserializer: D,
) -> std::result::Result<Vec<String>, D::Error>
where
	D: Deserializer<'de>,
{
	Ok(normalize_allowlist(Vec::<String>::deserialize(deserializer)?))
}

/// Whether `host` equals an allowlist entry or is a subdomain of one.
///
/// An empty allowlist accepts every host.
pub fn host_is_allowed(host: &str, allowed_domains: &[String]) -> bool {
	if allowed_domains.is_empty() {
		return true;
	}

	let Some(host) = canonicalize_dns_name(host) else {
		return false;
	};

	allowed_domains.iter().filter_map(|domain| canonicalize_dns_name(domain)).any(|domain| {
		host == domain
			|| host.strip_suffix(domain.as_str()).is_some_and(|prefix| prefix.ends_with('.'))
	})
}

/// Ensure the URL uses HTTPS.
pub fn enforce_https(url: &Url) -> Result<()> {
	if url.scheme() == "https" {
		Ok(())
	} else {
		Err(Error::Security(format!("Upstream URL {url} must use HTTPS.")))
	}
}

/// Check a URL the registry is going to contact against the HTTPS rule and the allowlist.
pub fn check_endpoint(url: &Url, require_https: bool, allowed_domains: &[String]) -> Result<()> {
	if require_https {
		enforce_https(url)?;
	}

	let Some(host) = url.host_str() else {
		return Err(Error::Security(format!("Upstream URL {url} has no host component.")));
	};

	if !host_is_allowed(host, allowed_domains) {
		return Err(Error::Security(format!("Host '{host}' is not in the registry allowlist.")));
	}

	Ok(())
}
