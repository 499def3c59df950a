//! Client registration records.
//!
//! A [`ClientRegistration`] binds a local client identity to one authorization server. Records
//! are validated once when registered and are immutable afterwards.

// std
use std::{
	collections::BTreeSet,
	fmt::{Debug, Formatter, Result as FmtResult},
};
// crates.io
use base64::prelude::*;
use jsonwebtoken::{Algorithm, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;
// self
use crate::{
	_prelude::*,
	credential::{Credential, CredentialSet, CredentialUsage},
	metadata::ServerMetadata,
	negotiation::Dimension,
	properties::{PropertyBag, PropertyValue},
	security,
	validation::TokenValidationParameters,
};

/// Path appended to the issuer when no configuration source is given.
pub const WELL_KNOWN_CONFIGURATION_PATH: &str = ".well-known/openid-configuration";

/// Where a registration obtains its server metadata.
#[derive(Clone, Debug)]
pub enum MetadataSource<'a> {
	/// Statically supplied document.
	Static(&'a ServerMetadata),
	/// Absolute discovery endpoint fetched through the registry retriever.
	Endpoint(Url),
}

/// OAuth 2.0 / OpenID Connect client registration.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ClientRegistration {
	/// Stable identifier; derived from the issuer and provider name when absent.
	#[serde(default)]
	pub registration_id: Option<String>,
	/// Client identifier issued by the authorization server.
	#[serde(default)]
	pub client_id: Option<String>,
	/// Client secret; absent for public clients.
	#[serde(default)]
	pub client_secret: Option<String>,
	/// Redirect URI used by authorization requests.
	#[serde(default)]
	pub redirect_uri: Option<Url>,
	/// Redirect URI used after RP-initiated logout.
	#[serde(default)]
	pub post_logout_redirect_uri: Option<Url>,
	/// Encryption credentials in insertion order.
	#[serde(default)]
	pub encryption_credentials: CredentialSet,
	/// Signing credentials in insertion order.
	#[serde(default)]
	pub signing_credentials: CredentialSet,
	/// Allowed PKCE challenge methods; empty means unrestricted.
	#[serde(default)]
	pub code_challenge_methods: BTreeSet<String>,
	/// Allowed grant types; empty means unrestricted.
	#[serde(default)]
	pub grant_types: BTreeSet<String>,
	/// Allowed response types; empty means unrestricted.
	#[serde(default)]
	pub response_types: BTreeSet<String>,
	/// Allowed response modes; empty means unrestricted.
	#[serde(default)]
	pub response_modes: BTreeSet<String>,
	/// Allowed scopes; empty means unrestricted.
	#[serde(default)]
	pub scopes: BTreeSet<String>,
	/// Issuer identifier of the authorization server.
	#[serde(default)]
	pub issuer: Option<Url>,
	/// Name shown to end users.
	#[serde(default)]
	pub provider_display_name: Option<String>,
	/// Stable provider name, safe to persist.
	#[serde(default)]
	pub provider_name: Option<String>,
	/// Provider implementation type.
	#[serde(default)]
	pub provider_type: Option<String>,
	/// Provider specific settings.
	#[serde(default)]
	pub provider_settings: Option<PropertyValue>,
	/// Static server metadata; takes precedence over `configuration_endpoint`.
	#[serde(default)]
	pub configuration: Option<ServerMetadata>,
	/// Discovery endpoint, absolute or relative to `issuer`.
	#[serde(default)]
	pub configuration_endpoint: Option<String>,
	/// Token validation defaults.
	#[serde(default)]
	pub token_validation: TokenValidationParameters,
	/// Free-form properties with case-insensitive keys.
	#[serde(default)]
	pub properties: PropertyBag,
}
impl ClientRegistration {
	/// Start a registration discovered from `issuer`.
	pub fn for_issuer(issuer: impl AsRef<str>) -> Result<Self> {
		Ok(Self { issuer: Some(Url::parse(issuer.as_ref())?), ..Default::default() })
	}

	/// Set an explicit registration identifier.
	pub fn with_registration_id(mut self, registration_id: impl Into<String>) -> Self {
		self.registration_id = Some(registration_id.into());

		self
	}

	/// Set the client identifier.
	pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
		self.client_id = Some(client_id.into());

		self
	}

	/// Set the client secret.
	pub fn with_client_secret(mut self, client_secret: impl Into<String>) -> Self {
		self.client_secret = Some(client_secret.into());

		self
	}

	/// Set the provider name.
	pub fn with_provider_name(mut self, provider_name: impl Into<String>) -> Self {
		self.provider_name = Some(provider_name.into());

		self
	}

	/// Set the redirect URI.
	pub fn with_redirect_uri(mut self, redirect_uri: Url) -> Self {
		self.redirect_uri = Some(redirect_uri);

		self
	}

	/// Set the post-logout redirect URI.
	pub fn with_post_logout_redirect_uri(mut self, redirect_uri: Url) -> Self {
		self.post_logout_redirect_uri = Some(redirect_uri);

		self
	}

	/// Use a static metadata document.
	pub fn with_configuration(mut self, configuration: ServerMetadata) -> Self {
		self.configuration = Some(configuration);

		self
	}

	/// Use a discovery endpoint, absolute or relative to the issuer.
	pub fn with_configuration_endpoint(mut self, endpoint: impl Into<String>) -> Self {
		self.configuration_endpoint = Some(endpoint.into());

		self
	}

	/// Restrict a negotiation dimension to `values`.
	pub fn with_allowed<I, S>(mut self, dimension: Dimension, values: I) -> Self
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

	/// Append a credential to the set matching its usage.
	pub fn with_credential(mut self, credential: Credential) -> Self {
		match credential.usage {
			CredentialUsage::Signing => self.signing_credentials.push(credential),
			CredentialUsage::Encryption => self.encryption_credentials.push(credential),
		}

		self
	}

	/// Registration-level allow-list for a dimension.
	pub fn allowed(&self, dimension: Dimension) -> &BTreeSet<String> {
		match dimension {
			Dimension::GrantType => &self.grant_types,
			Dimension::ResponseType => &self.response_types,
			Dimension::ResponseMode => &self.response_modes,
			Dimension::CodeChallengeMethod => &self.code_challenge_methods,
		}
	}

	/// Credential set dedicated to `usage`.
	pub fn credentials(&self, usage: CredentialUsage) -> &CredentialSet {
		match usage {
			CredentialUsage::Signing => &self.signing_credentials,
			CredentialUsage::Encryption => &self.encryption_credentials,
		}
	}

	/// The explicit registration identifier, or the one derived from issuer and provider name.
	pub fn resolve_registration_id(&self) -> Result<String> {
		match &self.registration_id {
			Some(id) if id.trim().is_empty() => Err(Error::Configuration {
				field: "registration_id",
				reason: "Must not be blank when set.".into(),
			}),
			Some(id) => Ok(id.clone()),
			None => derive_registration_id(self.issuer.as_ref(), self.provider_name.as_deref()),
		}
	}

	/// Resolve the effective metadata source.
	///
	/// A static document wins over an endpoint. A relative endpoint is joined onto the issuer,
	/// and a registration with only an issuer uses its well-known discovery document.
	pub fn metadata_source(&self) -> Result<MetadataSource<'_>> {
		if let Some(configuration) = &self.configuration {
			return Ok(MetadataSource::Static(configuration));
		}

		match (&self.configuration_endpoint, &self.issuer) {
			(Some(endpoint), issuer) => match Url::parse(endpoint) {
				Ok(endpoint) => Ok(MetadataSource::Endpoint(endpoint)),
				Err(url::ParseError::RelativeUrlWithoutBase) => {
					let issuer = issuer.as_ref().ok_or_else(|| Error::Configuration {
						field: "configuration_endpoint",
						reason: "A relative endpoint requires an issuer.".into(),
					})?;

					Ok(MetadataSource::Endpoint(issuer_base(issuer).join(endpoint)?))
				},
				Err(err) => Err(Error::Configuration {
					field: "configuration_endpoint",
					reason: format!("Invalid endpoint '{endpoint}': {err}."),
				}),
			},
			(None, Some(issuer)) =>
				Ok(MetadataSource::Endpoint(issuer_base(issuer).join(WELL_KNOWN_CONFIGURATION_PATH)?)),
			(None, None) => Err(Error::Configuration {
				field: "configuration",
				reason: "One of configuration, configuration_endpoint, or issuer must be set.".into(),
			}),
		}
	}

	/// Token validation settings for `algorithm`, pinned to the issuer when one is known.
	///
	/// A static document's own `issuer` string is used verbatim. An issuer known only as a URL
	/// is accepted with and without its trailing slash, since `Url` always adds one to a bare
	/// host.
	pub fn token_validation_for(&self, algorithm: Algorithm) -> Validation {
		let mut validation = self.token_validation.to_validation(algorithm);

		if self.token_validation.valid_issuer.is_some() {
			return validation;
		}

		let mut issuers = Vec::new();

		if let Some(configuration) = &self.configuration {
			issuers.push(configuration.issuer.clone());
		}
		if let Some(issuer) = &self.issuer {
			let spelled = issuer.as_str();
			let trimmed = spelled.trim_end_matches('/');

			issuers.push(spelled.to_owned());

			if !trimmed.is_empty() && trimmed != spelled {
				issuers.push(trimmed.to_owned());
			}
		}

		if !issuers.is_empty() {
			validation.set_issuer(&issuers[..]);
		}

		validation
	}

	/// Validate the registration.
	///
	/// `require_https` and `allowed_domains` apply to the issuer and the discovery endpoint.
	pub fn validate(
		&self,
		require_https: bool,
		allowed_domains: &[String],
		now: DateTime<Utc>,
	) -> Result<()> {
		self.resolve_registration_id()?;

		non_blank("client_id", self.client_id.as_deref())?;
		non_blank("client_secret", self.client_secret.as_deref())?;

		for (field, uri) in [
			("redirect_uri", &self.redirect_uri),
			("post_logout_redirect_uri", &self.post_logout_redirect_uri),
		] {
			if let Some(uri) = uri
				&& uri.fragment().is_some()
			{
				return Err(Error::Configuration {
					field,
					reason: format!("{uri} must not contain a fragment."),
				});
			}
		}

		if let Some(issuer) = &self.issuer {
			if issuer.query().is_some() || issuer.fragment().is_some() {
				return Err(Error::Configuration {
					field: "issuer",
					reason: "Must not contain a query or fragment.".into(),
				});
			}

			security::check_endpoint(issuer, require_https, allowed_domains)?;
		}

		for dimension in Dimension::ALL {
			no_blank_tokens(dimension.as_str(), self.allowed(dimension))?;
		}

		no_blank_tokens("scope", &self.scopes)?;

		self.signing_credentials.validate(CredentialUsage::Signing, now)?;
		self.encryption_credentials.validate(CredentialUsage::Encryption, now)?;

		match self.metadata_source()? {
			MetadataSource::Static(configuration) => {
				if let Some(issuer) = &self.issuer
					&& !configuration.issuer_matches(issuer)
				{
					return Err(Error::Configuration {
						field: "configuration",
						reason: format!(
							"Static configuration issuer '{}' does not match the registration issuer.",
							configuration.issuer
						),
					});
				}
			},
			MetadataSource::Endpoint(endpoint) =>
				security::check_endpoint(&endpoint, require_https, allowed_domains)?,
		}

		Ok(())
	}
}
impl Debug for ClientRegistration {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("ClientRegistration")
			.field("registration_id", &self.registration_id)
			.field("client_id", &self.client_id)
			.field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
			.field("redirect_uri", &self.redirect_uri)
			.field("post_logout_redirect_uri", &self.post_logout_redirect_uri)
			.field("encryption_credentials", &self.encryption_credentials.len())
			.field("signing_credentials", &self.signing_credentials.len())
			.field("code_challenge_methods", &self.code_challenge_methods)
			.field("grant_types", &self.grant_types)
			.field("response_types", &self.response_types)
			.field("response_modes", &self.response_modes)
			.field("scopes", &self.scopes)
			.field("issuer", &self.issuer)
			.field("provider_display_name", &self.provider_display_name)
			.field("provider_name", &self.provider_name)
			.field("provider_type", &self.provider_type)
			.field("configuration", &self.configuration.as_ref().map(|c| &c.issuer))
			.field("configuration_endpoint", &self.configuration_endpoint)
			.field("properties", &self.properties.len())
			.finish_non_exhaustive()
	}
}

/// Derive a stable registration identifier as `base64url(SHA-256(issuer "\n" provider_name))`.
pub fn derive_registration_id(issuer: Option<&Url>, provider_name: Option<&str>) -> Result<String> {
	if issuer.is_none() && provider_name.is_none() {
		return Err(Error::Configuration {
			field: "registration_id",
			reason: "Cannot be derived without an issuer or a provider name.".into(),
		});
	}

	let mut hasher = Sha256::new();

	hasher.update(issuer.map(Url::as_str).unwrap_or_default());
	hasher.update(b"\n");
	hasher.update(provider_name.unwrap_or_default());

	Ok(BASE64_URL_SAFE_NO_PAD.encode(hasher.finalize()))
}

fn issuer_base(issuer: &Url) -> Url {
	let mut base = issuer.clone();

	if !base.path().ends_with('/') {
		let path = format!("{}/", base.path());

		base.set_path(&path);
	}

	base
}

fn non_blank(field: &'static str, value: Option<&str>) -> Result<()> {
	match value {
		Some(value) if value.trim().is_empty() =>
			Err(Error::Configuration { field, reason: "Must not be blank when set.".into() }),
		_ => Ok(()),
	}
}

fn no_blank_tokens(field: &'static str, values: &BTreeSet<String>) -> Result<()> {
	if values.iter().any(|value| value.trim().is_empty()) {
		return Err(Error::Configuration { field, reason: "Values must not be blank.".into() });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn url(value: &str) -> Url {
		Url::parse(value).expect("url")
	}

	fn endpoint(registration: &ClientRegistration) -> Url {
		match registration.metadata_source().expect("source") {
			MetadataSource::Endpoint(endpoint) => endpoint,
			MetadataSource::Static(_) => panic!("expected an endpoint"),
		}
	}

	#[test]
	fn relative_endpoint_joins_onto_issuer_path() {
		let registration = ClientRegistration::for_issuer("https://login.example.com/tenant")
			.unwrap()
			.with_configuration_endpoint(".well-known/openid-configuration");

		assert_eq!(
			endpoint(&registration).as_str(),
			"https://login.example.com/tenant/.well-known/openid-configuration"
		);
	}

	#[test]
	fn blank_allowed_values_are_rejected() {
		let registration = ClientRegistration::for_issuer("https://login.example.com/")
			.unwrap()
			.with_allowed(Dimension::ResponseMode, ["fragment", " "]);
		let err = registration.validate(true, &[], Utc::now()).expect_err("blank value");

		assert!(matches!(err, Error::Configuration { field: "response_mode", .. }));
	}

	#[test]
	fn issuer_alone_defaults_to_well_known_document() {
		let registration = ClientRegistration::for_issuer("https://login.example.com/").unwrap();

		assert_eq!(
			endpoint(&registration).as_str(),
			"https://login.example.com/.well-known/openid-configuration"
		);
	}

	#[test]
	fn relative_endpoint_without_issuer_is_rejected() {
		let registration = ClientRegistration::default()
			.with_provider_name("contoso")
			.with_configuration_endpoint("/metadata");

		assert!(matches!(
			registration.metadata_source(),
			Err(Error::Configuration { field: "configuration_endpoint", .. })
		));
	}

	#[test]
	fn static_configuration_wins_over_endpoint() {
		let registration = ClientRegistration::for_issuer("https://login.example.com/")
			.unwrap()
			.with_configuration(ServerMetadata::new("https://login.example.com/"))
			.with_configuration_endpoint("https://elsewhere.example.com/metadata");

		assert!(matches!(registration.metadata_source(), Ok(MetadataSource::Static(_))));
		assert!(registration.validate(true, &[], Utc::now()).is_ok());
	}

	#[test]
	fn missing_source_is_rejected() {
		let registration = ClientRegistration::default().with_registration_id("orphan");

		assert!(matches!(
			registration.validate(true, &[], Utc::now()),
			Err(Error::Configuration { field: "configuration", .. })
		));
	}

	#[test]
	fn registration_id_is_derived_deterministically() {
		let issuer = url("https://login.example.com/");
		let first = derive_registration_id(Some(&issuer), Some("contoso")).unwrap();
		let second = derive_registration_id(Some(&issuer), Some("contoso")).unwrap();
		let other = derive_registration_id(Some(&issuer), Some("fabrikam")).unwrap();

		assert_eq!(first, second);
		assert_ne!(first, other);
		assert_eq!(first.len(), 43);
		assert!(derive_registration_id(None, None).is_err());
	}

	#[test]
	fn validation_rejects_fragments_blank_secrets_and_insecure_issuers() {
		let base = ClientRegistration::for_issuer("https://login.example.com/").unwrap();

		assert!(
			base.clone()
				.with_redirect_uri(url("https://app.example.com/callback#frag"))
				.validate(true, &[], Utc::now())
				.is_err()
		);
		assert!(base.clone().with_client_secret(" ").validate(true, &[], Utc::now()).is_err());
		assert!(
			ClientRegistration::for_issuer("http://login.example.com/")
				.unwrap()
				.validate(true, &[], Utc::now())
				.is_err()
		);
		assert!(base.validate(true, &["other.org".into()], Utc::now()).is_err());
	}

	#[test]
	fn debug_output_redacts_the_secret() {
		let registration = ClientRegistration::for_issuer("https://login.example.com/")
			.unwrap()
			.with_client_secret("s3cr3t");
		let rendered = format!("{registration:?}");

		assert!(!rendered.contains("s3cr3t"));
		assert!(rendered.contains("<redacted>"));
	}

	#[test]
	fn bare_host_issuer_accepts_tokens_without_trailing_slash() {
		let registration = ClientRegistration::for_issuer("https://accounts.example.com").unwrap();
		let validation = registration.token_validation_for(Algorithm::HS256);
		let secret = b"registration-test-secret";
		let encode = |issuer: &str| {
			jsonwebtoken::encode(
				&jsonwebtoken::Header::new(Algorithm::HS256),
				&serde_json::json!({ "iss": issuer, "sub": "alice" }),
				&jsonwebtoken::EncodingKey::from_secret(secret),
			)
			.expect("token")
		};
		let key = jsonwebtoken::DecodingKey::from_secret(secret);

		for issuer in ["https://accounts.example.com", "https://accounts.example.com/"] {
			let decoded =
				jsonwebtoken::decode::<serde_json::Value>(&encode(issuer), &key, &validation)
					.expect("issuer accepted");

			assert_eq!(decoded.claims["iss"], issuer);
		}

		assert!(
			jsonwebtoken::decode::<serde_json::Value>(
				&encode("https://other.example.com"),
				&key,
				&validation
			)
			.is_err()
		);
	}

	#[test]
	fn static_configuration_issuer_is_pinned_verbatim() {
		let registration = ClientRegistration::default()
			.with_registration_id("static")
			.with_configuration(ServerMetadata::new("https://static.example.com"));
		let validation = registration.token_validation_for(Algorithm::RS256);

		assert!(
			validation
				.iss
				.as_ref()
				.is_some_and(|issuers| issuers.contains("https://static.example.com"))
		);
	}

	#[test]
	fn token_validation_is_pinned_to_issuer() {
		let registration = ClientRegistration::for_issuer("https://login.example.com/").unwrap();
		let validation = registration.token_validation_for(Algorithm::RS256);

		assert!(
			validation
				.iss
				.as_ref()
				.is_some_and(|issuers| issuers.contains("https://login.example.com/"))
		);
		assert!(!validation.validate_aud);
	}
}
