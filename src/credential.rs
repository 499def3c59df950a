//! Signing and encryption credentials with validity windows.

// std
use std::fmt::{Display, Formatter, Result as FmtResult};
// crates.io
use base64::prelude::*;
use jsonwebtoken::jwk::{Jwk, PublicKeyUse};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

/// Cryptographic operation a credential is dedicated to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialUsage {
	/// Creates signed tokens (client assertions, request objects).
	Signing,
	/// Creates encrypted tokens.
	Encryption,
}
impl CredentialUsage {
	fn matches_jwk_use(self, public_key_use: &PublicKeyUse) -> bool {
		matches!(
			(self, public_key_use),
			(CredentialUsage::Signing, PublicKeyUse::Signature)
				| (CredentialUsage::Encryption, PublicKeyUse::Encryption)
		)
	}
}
impl Display for CredentialUsage {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self {
			CredentialUsage::Signing => f.write_str("signing"),
			CredentialUsage::Encryption => f.write_str("encryption"),
		}
	}
}

/// Key material bound to a usage and an optional validity window.
///
/// The window is half-open: `not_before` is inclusive, `not_after` is exclusive. A missing
/// bound is unbounded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Credential {
	/// JSON Web Key holding the key material.
	pub key: Jwk,
	/// Operation the key is dedicated to.
	pub usage: CredentialUsage,
	/// First instant at which the key may be used.
	#[serde(default)]
	pub not_before: Option<DateTime<Utc>>,
	/// Instant from which the key must no longer be used.
	#[serde(default)]
	pub not_after: Option<DateTime<Utc>>,
}
impl Credential {
	/// Create a credential without a validity window.
	pub fn new(key: Jwk, usage: CredentialUsage) -> Self {
		Self { key, usage, not_before: None, not_after: None }
	}

	/// Restrict the credential to `[not_before, not_after)`.
	pub fn with_validity(
		mut self,
		not_before: Option<DateTime<Utc>>,
		not_after: Option<DateTime<Utc>>,
	) -> Self {
		self.not_before = not_before;
		self.not_after = not_after;

		self
	}

	/// Whether the validity window contains `at`.
	pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
		self.not_before.is_none_or(|not_before| not_before <= at)
			&& self.not_after.is_none_or(|not_after| at < not_after)
	}

	/// Key identifier, falling back to the key fingerprint when the JWK has no `kid`.
	pub fn key_id(&self) -> Result<String> {
		match &self.key.common.key_id {
			Some(kid) => Ok(kid.clone()),
			None => self.fingerprint(),
		}
	}

	/// Base64url SHA-256 digest of the serialized JWK.
	pub fn fingerprint(&self) -> Result<String> {
		let encoded = serde_json::to_vec(&self.key)?;

		Ok(BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(&encoded)))
	}

	fn validate(&self, expected: CredentialUsage) -> Result<()> {
		if self.usage != expected {
			return Err(Error::Configuration {
				field: "credentials",
				reason: format!("A {} credential was placed in the {expected} set.", self.usage),
			});
		}
		if let Some(public_key_use) = &self.key.common.public_key_use
			&& !expected.matches_jwk_use(public_key_use)
		{
			return Err(Error::Configuration {
				field: "credentials",
				reason: format!("JWK `use` member conflicts with {expected} usage."),
			});
		}
		if let (Some(not_before), Some(not_after)) = (self.not_before, self.not_after)
			&& not_before >= not_after
		{
			return Err(Error::Configuration {
				field: "credentials",
				reason: "not_before must be earlier than not_after.".into(),
			});
		}

		Ok(())
	}
}

/// Ordered credentials for one usage.
///
/// Insertion order is kept and breaks ties between keys activated at the same instant.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialSet {
	credentials: Vec<Credential>,
}
impl CredentialSet {
	/// Create an empty set.
	pub fn new() -> Self {
		Self::default()
	}

	/// Append a credential.
	pub fn push(&mut self, credential: Credential) {
		self.credentials.push(credential);
	}

	/// Iterate over credentials in insertion order.
	pub fn iter(&self) -> impl Iterator<Item = &Credential> {
		self.credentials.iter()
	}

	/// Number of credentials in the set.
	pub fn len(&self) -> usize {
		self.credentials.len()
	}

	/// Whether the set is empty.
	pub fn is_empty(&self) -> bool {
		self.credentials.is_empty()
	}

	/// Pick the credential to use at `at`.
	///
	/// Among valid credentials the most recently activated one wins; credentials without a
	/// `not_before` rank as the oldest.
	pub fn select(&self, usage: CredentialUsage, at: DateTime<Utc>) -> Result<&Credential> {
		let mut selected: Option<&Credential> = None;

		for credential in self.credentials.iter().filter(|c| c.usage == usage && c.is_valid_at(at))
		{
			// Strictly greater so the earliest inserted credential keeps ties.
			if selected.is_none_or(|current| credential.not_before > current.not_before) {
				selected = Some(credential);
			}
		}

		selected.ok_or(Error::NoValidCredential { usage })
	}

	/// Check usage consistency and that a non-empty set still holds an unexpired key.
	pub fn validate(&self, usage: CredentialUsage, now: DateTime<Utc>) -> Result<()> {
		for credential in &self.credentials {
			credential.validate(usage)?;
		}

		if !self.credentials.is_empty()
			&& !self.credentials.iter().any(|c| c.not_after.is_none_or(|not_after| now < not_after))
		{
			return Err(Error::Configuration {
				field: "credentials",
				reason: format!("Every {usage} credential has expired."),
			});
		}

		Ok(())
	}
}
impl FromIterator<Credential> for CredentialSet {
	fn from_iter<I: IntoIterator<Item = Credential>>(iter: I) -> Self {
		Self { credentials: iter.into_iter().collect() }
	}
}

/// Signing capability provided by the token layer.
pub trait TokenSigner: Send + Sync {
	/// Produce a signed token for `payload` with the selected credential.
	fn sign(&self, credential: &Credential, payload: &[u8]) -> Result<String>;
}

/// Encryption capability provided by the token layer.
pub trait TokenEncryptor: Send + Sync {
	/// Produce an encrypted token for `payload` with the selected credential.
	fn encrypt(&self, credential: &Credential, payload: &[u8]) -> Result<String>;
}

#[cfg(test)]
mod tests {
	// crates.io
	use chrono::TimeZone;
	// self
	use super::*;

	fn jwk(kid: &str) -> Jwk {
		serde_json::from_value(serde_json::json!({
			"kty": "oct",
			"kid": kid,
			"k": "c2VjcmV0LWtleS1tYXRlcmlhbA"
		}))
		.expect("jwk")
	}

	fn at(hour: u32) -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2026, 1, 1, hour, 0, 0).single().expect("timestamp")
	}

	fn signing(kid: &str, window: (Option<u32>, Option<u32>)) -> Credential {
		Credential::new(jwk(kid), CredentialUsage::Signing)
			.with_validity(window.0.map(at), window.1.map(at))
	}

	#[test]
	fn adjacent_windows_select_the_newer_key_at_the_boundary() {
		let set: CredentialSet = [signing("old", (Some(0), Some(1))), signing("new", (Some(1), Some(2)))]
			.into_iter()
			.collect();
		let selected = set.select(CredentialUsage::Signing, at(1)).expect("credential");

		assert_eq!(selected.key_id().expect("kid"), "new");
	}

	#[test]
	fn latest_activation_wins_during_rollover() {
		let set: CredentialSet = [
			signing("unbounded", (None, None)),
			signing("first", (Some(0), Some(5))),
			signing("second", (Some(2), Some(5))),
		]
		.into_iter()
		.collect();
		let selected = set.select(CredentialUsage::Signing, at(3)).expect("credential");

		assert_eq!(selected.key_id().expect("kid"), "second");
	}

	#[test]
	fn insertion_order_breaks_ties_deterministically() {
		let set: CredentialSet =
			[signing("a", (Some(0), None)), signing("b", (Some(0), None))].into_iter().collect();

		for _ in 0..3 {
			let selected = set.select(CredentialUsage::Signing, at(4)).expect("credential");

			assert_eq!(selected.key_id().expect("kid"), "a");
		}
	}

	#[test]
	fn fails_when_no_key_is_valid() {
		let set: CredentialSet = [signing("expired", (Some(0), Some(1)))].into_iter().collect();
		let err = set.select(CredentialUsage::Signing, at(2)).unwrap_err();

		assert!(matches!(err, Error::NoValidCredential { usage: CredentialUsage::Signing }));
		assert!(CredentialSet::new().select(CredentialUsage::Encryption, at(0)).is_err());
	}

	#[test]
	fn validation_rejects_misplaced_and_expired_keys() {
		let set: CredentialSet = [signing("a", (None, None))].into_iter().collect();

		assert!(set.validate(CredentialUsage::Signing, at(0)).is_ok());
		assert!(set.validate(CredentialUsage::Encryption, at(0)).is_err());

		let expired: CredentialSet = [signing("a", (Some(0), Some(1)))].into_iter().collect();

		assert!(expired.validate(CredentialUsage::Signing, at(3)).is_err());

		let inverted: CredentialSet = [signing("a", (Some(2), Some(1)))].into_iter().collect();

		assert!(inverted.validate(CredentialUsage::Signing, at(0)).is_err());
	}

	#[test]
	fn fingerprint_is_used_without_kid() {
		let mut key = jwk("ignored");

		key.common.key_id = None;

		let credential = Credential::new(key, CredentialUsage::Encryption);
		let kid = credential.key_id().expect("fingerprint");

		assert_eq!(kid, credential.fingerprint().expect("fingerprint"));
		assert_eq!(kid.len(), 43);
	}
}
