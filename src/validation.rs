//! Token validation defaults attached to each registration.

// crates.io
use jsonwebtoken::{Algorithm, Validation};
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

/// Authentication type stamped on identities built from validated tokens.
pub const DEFAULT_AUTHENTICATION_TYPE: &str = "Federation";
/// Claim holding the display name.
pub const NAME_CLAIM: &str = "name";
/// Claim holding roles.
pub const ROLE_CLAIM: &str = "role";

/// Generic token validation settings for tokens issued by the registered server.
///
/// Audience and lifetime checks are off here: the flow layer validates them itself with the
/// registration's client id and its own clock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenValidationParameters {
	/// Authentication type stamped on identities.
	pub authentication_type: String,
	/// Claim mapped to the identity name.
	pub name_claim_type: String,
	/// Claim mapped to identity roles.
	pub role_claim_type: String,
	/// Tolerated clock skew.
	pub clock_skew: Duration,
	/// Whether generic audience validation runs.
	pub validate_audience: bool,
	/// Whether generic lifetime validation runs.
	pub validate_lifetime: bool,
	/// Issuer tokens must carry, when known.
	#[serde(default)]
	pub valid_issuer: Option<String>,
}
impl TokenValidationParameters {
	/// Build `jsonwebtoken` validation settings for tokens signed with `algorithm`.
	pub fn to_validation(&self, algorithm: Algorithm) -> Validation {
		let mut validation = Validation::new(algorithm);

		validation.leeway = self.clock_skew.as_secs();
		validation.validate_aud = self.validate_audience;
		validation.validate_exp = self.validate_lifetime;
		validation.validate_nbf = self.validate_lifetime;

		if !self.validate_lifetime {
			validation.required_spec_claims.remove("exp");
		}
		if let Some(issuer) = &self.valid_issuer {
			validation.set_issuer(&[issuer]);
		}

		validation
	}
}
impl Default for TokenValidationParameters {
	fn default() -> Self {
		Self {
			authentication_type: DEFAULT_AUTHENTICATION_TYPE.into(),
			name_claim_type: NAME_CLAIM.into(),
			role_claim_type: ROLE_CLAIM.into(),
			clock_skew: Duration::ZERO,
			validate_audience: false,
			validate_lifetime: false,
			valid_issuer: None,
		}
	}
}
