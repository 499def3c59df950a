//! Client registration registry.
//!
//! The registry owns every registration, its metadata source, and the process-wide client
//! options. Reloading a registration replaces its record in one write; handles obtained
//! earlier keep the record they were issued with.

// std
use std::collections::HashMap;
// crates.io
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::{
		manager::{CacheStatus, ConfigurationCache},
		state::MetadataState,
	},
	config::{CacheSettings, ClientOptions},
	credential::{Credential, CredentialUsage, TokenEncryptor, TokenSigner},
	http::client::HttpConfigurationRetriever,
	metadata::{self, ServerMetadata},
	negotiation::{self, Dimension},
	registration::{ClientRegistration, MetadataSource},
	retriever::ConfigurationRetriever,
	security,
};

/// Serializable registry configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistrySettings {
	/// Whether issuers and discovery endpoints must use HTTPS.
	#[serde(default = "default_true")]
	pub require_https: bool,
	/// Hosts the registry may contact; empty allows every host.
	#[serde(default, deserialize_with = "crate::security::deserialize_allowed_domains")]
	pub allowed_domains: Vec<String>,
	/// Process-wide client options.
	#[serde(default)]
	pub client_options: ClientOptions,
	/// Discovery cache tuning shared by every registration.
	#[serde(default)]
	pub cache: CacheSettings,
}
impl RegistrySettings {
	/// Validate the nested settings.
	pub fn validate(&self) -> Result<()> {
		self.client_options.validate()?;
		self.cache.validate()?;

		for domain in &self.allowed_domains {
			if security::canonicalize_dns_name(domain).as_deref() != Some(domain.as_str()) {
				return Err(Error::Configuration {
					field: "allowed_domains",
					reason: "Entries must be canonical hostnames (lowercase, no trailing dot)."
						.into(),
				});
			}
		}

		Ok(())
	}
}
impl Default for RegistrySettings {
	fn default() -> Self {
		Self {
			require_https: true,
			allowed_domains: Vec::new(),
			client_options: ClientOptions::default(),
			cache: CacheSettings::default(),
		}
	}
}

/// Builder for [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
	settings: RegistrySettings,
	retriever: Option<Arc<dyn ConfigurationRetriever>>,
}
impl RegistryBuilder {
	/// Create a builder with default settings.
	pub fn new() -> Self {
		Self::default()
	}

	/// Replace every setting at once, e.g. with deserialized configuration.
	pub fn settings(mut self, settings: RegistrySettings) -> Self {
		self.settings = settings;

		self
	}

	/// Enforce HTTPS for issuers and discovery endpoints (enabled by default).
	pub fn require_https(mut self, require_https: bool) -> Self {
		self.settings.require_https = require_https;

		self
	}

	/// Add an entry to the host allowlist.
	pub fn add_allowed_domain(mut self, domain: impl Into<String>) -> Self {
		let raw = domain.into();

		if let Some(domain) = security::canonicalize_dns_name(&raw)
			&& !self.settings.allowed_domains.contains(&domain)
		{
			self.settings.allowed_domains.push(domain);
		}

		self
	}

	/// Replace the host allowlist.
	pub fn allowed_domains<I, S>(mut self, domains: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.settings.allowed_domains.clear();

		for domain in domains {
			self = self.add_allowed_domain(domain);
		}

		self
	}

	/// Set the process-wide client options.
	pub fn client_options(mut self, client_options: ClientOptions) -> Self {
		self.settings.client_options = client_options;

		self
	}

	/// Set the discovery cache tuning.
	pub fn cache_settings(mut self, cache: CacheSettings) -> Self {
		self.settings.cache = cache;

		self
	}

	/// Use a custom retriever instead of the default HTTP one.
	pub fn retriever(mut self, retriever: Arc<dyn ConfigurationRetriever>) -> Self {
		self.retriever = Some(retriever);

		self
	}

	/// Validate the configuration and construct a [`Registry`].
	pub fn build(self) -> Result<Registry> {
		let mut settings = self.settings;

		settings.allowed_domains = security::normalize_allowlist(settings.allowed_domains);
		settings.validate()?;

		let retriever = match self.retriever {
			Some(retriever) => retriever,
			None => Arc::new(
				HttpConfigurationRetriever::new()?
					.with_require_https(settings.require_https)
					.with_allowed_domains(settings.allowed_domains.clone()),
			),
		};

		Ok(Registry {
			inner: Arc::new(RwLock::new(RegistryState { registrations: HashMap::new() })),
			config: Arc::new(RegistryConfig { settings, retriever }),
		})
	}
}

/// Registry of client registrations.
#[derive(Clone, Debug)]
pub struct Registry {
	inner: Arc<RwLock<RegistryState>>,
	config: Arc<RegistryConfig>,
}
impl Registry {
	/// Create a [`RegistryBuilder`].
	pub fn builder() -> RegistryBuilder {
		RegistryBuilder::new()
	}

	/// Process-wide client options.
	pub fn client_options(&self) -> &ClientOptions {
		&self.config.settings.client_options
	}

	/// Validate and publish a registration, replacing any record with the same id.
	///
	/// A replaced registration keeps its discovery cache when the resolved endpoint and issuer
	/// are unchanged.
	pub async fn register(&self, registration: ClientRegistration) -> Result<RegistrationHandle> {
		let settings = &self.config.settings;

		registration.validate(settings.require_https, &settings.allowed_domains, Utc::now())?;

		let id: Arc<str> = registration.resolve_registration_id()?.into();
		let mut state = self.inner.write().await;
		let previous = state.registrations.get(&*id).cloned();
		let metadata = match registration.metadata_source()? {
			MetadataSource::Static(configuration) =>
				MetadataProvider::Static(Arc::new(configuration.clone())),
			MetadataSource::Endpoint(endpoint) => {
				let reusable = previous.as_ref().and_then(|entry| match &entry.metadata {
					MetadataProvider::Cached { cache, issuer }
						if *cache.endpoint() == endpoint && *issuer == registration.issuer =>
						Some(cache.clone()),
					_ => None,
				});
				let cache = match reusable {
					Some(cache) => cache,
					None => ConfigurationCache::new(
						id.clone(),
						endpoint,
						registration.issuer.clone(),
						settings.cache.clone(),
						self.config.retriever.clone(),
					)?,
				};

				MetadataProvider::Cached { cache, issuer: registration.issuer.clone() }
			},
		};
		let entry = Arc::new(RegistrationEntry {
			id: id.clone(),
			registration: Arc::new(registration),
			metadata,
		});

		state.registrations.insert(id.to_string(), entry.clone());

		tracing::info!(registration = %id, reload = previous.is_some(), "registration published");

		Ok(RegistrationHandle { entry, config: self.config.clone() })
	}

	/// Remove a registration, returning whether it existed.
	pub async fn unregister(&self, registration_id: &str) -> bool {
		let removed = { self.inner.write().await.registrations.remove(registration_id).is_some() };

		if removed {
			tracing::info!(registration = registration_id, "registration removed");
		}

		removed
	}

	/// Identifiers of every registration, sorted.
	pub async fn registration_ids(&self) -> Vec<String> {
		let mut ids: Vec<String> =
			{ self.inner.read().await.registrations.keys().cloned().collect() };

		ids.sort_unstable();

		ids
	}

	/// Obtain a handle pinned to the current record of a registration.
	pub async fn handle(&self, registration_id: &str) -> Result<RegistrationHandle> {
		let entry = { self.inner.read().await.registrations.get(registration_id).cloned() };
		let entry = entry.ok_or_else(|| Error::NotRegistered {
			registration: registration_id.to_string(),
		})?;

		Ok(RegistrationHandle { entry, config: self.config.clone() })
	}

	/// Current record of a registration.
	pub async fn registration(&self, registration_id: &str) -> Result<Arc<ClientRegistration>> {
		Ok(self.handle(registration_id).await?.entry.registration.clone())
	}

	/// Handle of the registration with the given provider name.
	///
	/// When several registrations share the name, the one with the smallest id is returned.
	pub async fn handle_by_provider_name(&self, provider_name: &str) -> Result<RegistrationHandle> {
		self.find(
			|registration| registration.provider_name.as_deref() == Some(provider_name),
			provider_name,
		)
		.await
	}

	/// Handle of the registration for the given issuer (a trailing slash is ignored).
	pub async fn handle_by_issuer(&self, issuer: &Url) -> Result<RegistrationHandle> {
		self.find(
			|registration| {
				registration
					.issuer
					.as_ref()
					.is_some_and(|candidate| metadata::same_issuer(candidate, issuer))
			},
			issuer.as_str(),
		)
		.await
	}

	/// Resolve the effective value of a dimension.
	pub async fn resolve(&self, registration_id: &str, dimension: Dimension) -> Result<String> {
		self.handle(registration_id).await?.resolve(dimension).await
	}

	/// Ordered candidates of a dimension.
	pub async fn candidates(
		&self,
		registration_id: &str,
		dimension: Dimension,
	) -> Result<Vec<String>> {
		self.handle(registration_id).await?.candidates(dimension).await
	}

	/// Resolve the response mode to pair with `response_type`.
	pub async fn resolve_response_mode_for(
		&self,
		registration_id: &str,
		response_type: &str,
	) -> Result<String> {
		self.handle(registration_id).await?.resolve_response_mode_for(response_type).await
	}

	/// Server metadata of a registration.
	pub async fn server_metadata(&self, registration_id: &str) -> Result<Arc<ServerMetadata>> {
		self.handle(registration_id).await?.server_metadata().await
	}

	/// Credential of `usage` active at `at`.
	pub async fn select_credential(
		&self,
		registration_id: &str,
		usage: CredentialUsage,
		at: DateTime<Utc>,
	) -> Result<Credential> {
		self.handle(registration_id).await?.select_credential(usage, at)
	}

	/// Sign `payload` with the signing credential active at `at`.
	pub async fn sign(
		&self,
		registration_id: &str,
		signer: &dyn TokenSigner,
		payload: &[u8],
		at: DateTime<Utc>,
	) -> Result<String> {
		self.handle(registration_id).await?.sign(signer, payload, at)
	}

	/// Encrypt `payload` with the encryption credential active at `at`.
	pub async fn encrypt(
		&self,
		registration_id: &str,
		encryptor: &dyn TokenEncryptor,
		payload: &[u8],
		at: DateTime<Utc>,
	) -> Result<String> {
		self.handle(registration_id).await?.encrypt(encryptor, payload, at)
	}

	/// Start a forced metadata fetch without waiting for it.
	pub async fn invalidate_metadata(&self, registration_id: &str) -> Result<()> {
		self.handle(registration_id).await?.invalidate_metadata().await;

		Ok(())
	}

	/// Fetch metadata now and wait for the outcome.
	pub async fn refresh_metadata(&self, registration_id: &str) -> Result<Arc<ServerMetadata>> {
		self.handle(registration_id).await?.refresh_metadata().await
	}

	/// Whether `uri` is an accepted redirect URI.
	///
	/// The allow-list is the union of the client options and every registration's redirect URI.
	pub async fn is_redirect_uri_allowed(&self, uri: &Url) -> bool {
		self.uri_allowed(uri, &self.config.settings.client_options.redirect_uris, |registration| {
			registration.redirect_uri.as_ref()
		})
		.await
	}

	/// Whether `uri` is an accepted post-logout redirect URI.
	pub async fn is_post_logout_redirect_uri_allowed(&self, uri: &Url) -> bool {
		self.uri_allowed(
			uri,
			&self.config.settings.client_options.post_logout_redirect_uris,
			|registration| registration.post_logout_redirect_uri.as_ref(),
		)
		.await
	}

	/// Status of one registration.
	pub async fn status(&self, registration_id: &str) -> Result<RegistrationStatus> {
		Ok(self.handle(registration_id).await?.status().await)
	}

	/// Status of every registration, sorted by id.
	pub async fn all_statuses(&self) -> Vec<RegistrationStatus> {
		let mut entries: Vec<Arc<RegistrationEntry>> =
			{ self.inner.read().await.registrations.values().cloned().collect() };

		entries.sort_unstable_by(|left, right| left.id.cmp(&right.id));

		let mut statuses = Vec::with_capacity(entries.len());

		for entry in entries {
			statuses.push(entry.status().await);
		}

		statuses
	}

	async fn find<F>(&self, predicate: F, key: &str) -> Result<RegistrationHandle>
	where
		F: Fn(&ClientRegistration) -> bool,
	{
		let entry = {
			let state = self.inner.read().await;

			state
				.registrations
				.values()
				.filter(|entry| predicate(entry.registration.as_ref()))
				.min_by(|left, right| left.id.cmp(&right.id))
				.cloned()
		};
		let entry = entry.ok_or_else(|| Error::NotRegistered { registration: key.to_string() })?;

		Ok(RegistrationHandle { entry, config: self.config.clone() })
	}

	async fn uri_allowed<F>(&self, uri: &Url, configured: &[Url], declared: F) -> bool
	where
		F: Fn(&ClientRegistration) -> Option<&Url>,
	{
		if configured.contains(uri) {
			return true;
		}

		let state = self.inner.read().await;

		state.registrations.values().any(|entry| declared(entry.registration.as_ref()) == Some(uri))
	}
}

/// Handle pinned to one published record of a registration.
#[derive(Clone, Debug)]
pub struct RegistrationHandle {
	entry: Arc<RegistrationEntry>,
	config: Arc<RegistryConfig>,
}
impl RegistrationHandle {
	/// Registration identifier.
	pub fn id(&self) -> &str {
		&self.entry.id
	}

	/// Record this handle was issued with.
	pub fn registration(&self) -> &Arc<ClientRegistration> {
		&self.entry.registration
	}

	/// Server metadata, from the static configuration or the discovery cache.
	pub async fn server_metadata(&self) -> Result<Arc<ServerMetadata>> {
		match &self.entry.metadata {
			MetadataProvider::Static(metadata) => Ok(metadata.clone()),
			MetadataProvider::Cached { cache, .. } => cache.metadata().await,
		}
	}

	/// Ordered candidates of a dimension.
	pub async fn candidates(&self, dimension: Dimension) -> Result<Vec<String>> {
		let metadata = self.server_metadata().await?;
		let candidates = negotiation::candidates(
			dimension,
			self.entry.registration.allowed(dimension),
			self.config.settings.client_options.enabled(dimension),
			metadata.supported(dimension),
		)?;

		Ok(candidates.into_iter().map(str::to_owned).collect())
	}

	/// Resolve the effective value of a dimension.
	#[tracing::instrument(skip(self), fields(registration = %self.entry.id))]
	pub async fn resolve(&self, dimension: Dimension) -> Result<String> {
		let metadata = self.server_metadata().await?;

		negotiation::negotiate(
			dimension,
			self.entry.registration.allowed(dimension),
			self.config.settings.client_options.enabled(dimension),
			metadata.supported(dimension),
		)
		.map(str::to_owned)
	}

	/// Resolve the response mode to pair with `response_type`.
	pub async fn resolve_response_mode_for(&self, response_type: &str) -> Result<String> {
		let metadata = self.server_metadata().await?;
		let dimension = Dimension::ResponseMode;

		negotiation::negotiate_response_mode(
			response_type,
			self.entry.registration.allowed(dimension),
			self.config.settings.client_options.enabled(dimension),
			metadata.supported(dimension),
		)
		.map(str::to_owned)
	}

	/// Credential of `usage` active at `at`.
	pub fn select_credential(&self, usage: CredentialUsage, at: DateTime<Utc>) -> Result<Credential> {
		self.entry.registration.credentials(usage).select(usage, at).cloned()
	}

	/// Sign `payload` with the signing credential active at `at`.
	pub fn sign(
		&self,
		signer: &dyn TokenSigner,
		payload: &[u8],
		at: DateTime<Utc>,
	) -> Result<String> {
		let credential = self.select_credential(CredentialUsage::Signing, at)?;

		signer.sign(&credential, payload)
	}

	/// Encrypt `payload` with the encryption credential active at `at`.
	pub fn encrypt(
		&self,
		encryptor: &dyn TokenEncryptor,
		payload: &[u8],
		at: DateTime<Utc>,
	) -> Result<String> {
		let credential = self.select_credential(CredentialUsage::Encryption, at)?;

		encryptor.encrypt(&credential, payload)
	}

	/// Start a forced metadata fetch without waiting for it; no-op for static configurations.
	pub async fn invalidate_metadata(&self) {
		if let MetadataProvider::Cached { cache, .. } = &self.entry.metadata {
			cache.invalidate().await;
		}
	}

	/// Fetch metadata now and wait for the outcome.
	pub async fn refresh_metadata(&self) -> Result<Arc<ServerMetadata>> {
		match &self.entry.metadata {
			MetadataProvider::Static(metadata) => Ok(metadata.clone()),
			MetadataProvider::Cached { cache, .. } => cache.refresh().await,
		}
	}

	/// Status of the registration.
	pub async fn status(&self) -> RegistrationStatus {
		self.entry.status().await
	}
}

/// Status projection of one registration.
#[derive(Clone, Debug, Serialize)]
pub struct RegistrationStatus {
	/// Registration identifier.
	pub registration_id: String,
	/// Provider name, if any.
	pub provider_name: Option<String>,
	/// Issuer of the registration, if any.
	pub issuer: Option<Url>,
	/// Whether the metadata is static.
	pub static_configuration: bool,
	/// Lifecycle state of the server metadata; static documents are always fresh.
	pub state: MetadataState,
	/// Discovery cache details, absent for static configurations.
	pub cache: Option<CacheStatus>,
}

#[derive(Debug)]
struct RegistryConfig {
	settings: RegistrySettings,
	retriever: Arc<dyn ConfigurationRetriever>,
}

#[derive(Debug)]
struct RegistryState {
	registrations: HashMap<String, Arc<RegistrationEntry>>,
}

#[derive(Debug)]
struct RegistrationEntry {
	id: Arc<str>,
	registration: Arc<ClientRegistration>,
	metadata: MetadataProvider,
}
impl RegistrationEntry {
	async fn status(&self) -> RegistrationStatus {
		let (static_configuration, state, cache) = match &self.metadata {
			MetadataProvider::Static(_) => (true, MetadataState::Fresh, None),
			MetadataProvider::Cached { cache, .. } => {
				let status = cache.status().await;

				(false, status.state, Some(status))
			},
		};

		RegistrationStatus {
			registration_id: self.id.to_string(),
			provider_name: self.registration.provider_name.clone(),
			issuer: self.registration.issuer.clone(),
			static_configuration,
			state,
			cache,
		}
	}
}

#[derive(Debug)]
enum MetadataProvider {
	Static(Arc<ServerMetadata>),
	Cached { cache: ConfigurationCache, issuer: Option<Url> },
}

fn default_true() -> bool {
	true
}
