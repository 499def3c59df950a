//! reqwest-backed discovery document retriever.

// crates.io
use http::{
	Request, Response, StatusCode,
	header::{ETAG, IF_NONE_MATCH, LAST_MODIFIED},
};
use jsonwebtoken::jwk::JwkSet;
use reqwest::{Client, redirect::Policy};
use serde::de::DeserializeOwned;
use url::Url;
// self
use crate::{
	_prelude::*,
	config::DEFAULT_MAX_RESPONSE_BYTES,
	http::semantics::{base_request, freshness_lifetime, revalidated_lifetime},
	metadata::ServerMetadata,
	retriever::{ConfigurationRetriever, Retrieval, RetrievalRequest, RetrievedConfiguration},
	security,
};

/// Maximum redirect depth followed by the default client.
pub const MAX_REDIRECTS: usize = 10;

/// Retriever fetching discovery documents and their JWK sets over HTTP.
///
/// When the document advertises a `jwks_uri`, the key set is downloaded in the same retrieval
/// and stored in [`ServerMetadata::signing_keys`].
#[derive(Clone, Debug)]
pub struct HttpConfigurationRetriever {
	client: Client,
	require_https: bool,
	allowed_domains: Vec<String>,
	max_response_bytes: u64,
}
impl HttpConfigurationRetriever {
	/// Build a retriever with the default reqwest client.
	pub fn new() -> Result<Self> {
		let client = Client::builder()
			.redirect(Policy::limited(MAX_REDIRECTS))
			.user_agent(format!("oidc-client-registry/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(Duration::from_secs(5))
			.build()?;

		Ok(Self::with_client(client))
	}

	/// Build a retriever around the supplied client (primarily for tests).
	pub fn with_client(client: Client) -> Self {
		Self {
			client,
			require_https: true,
			allowed_domains: Vec::new(),
			max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
		}
	}

	/// Set the HTTPS requirement.
	pub fn with_require_https(mut self, require_https: bool) -> Self {
		self.require_https = require_https;

		self
	}

	/// Restrict contacted hosts to the allowlist (an empty list allows every host).
	pub fn with_allowed_domains(mut self, domains: Vec<String>) -> Self {
		self.allowed_domains = security::normalize_allowlist(domains);

		self
	}

	/// Override the response size guard.
	pub fn with_max_response_bytes(mut self, max_response_bytes: u64) -> Self {
		self.max_response_bytes = max_response_bytes;

		self
	}

	async fn send(
		&self,
		url: &Url,
		etag: Option<&str>,
		timeout: Duration,
	) -> Result<(Request<()>, Response<()>, reqwest::Response)> {
		security::check_endpoint(url, self.require_https, &self.allowed_domains)?;

		let mut request = base_request(url)?;

		if let Some(etag) = etag
			&& let Ok(value) = etag.parse()
		{
			request.headers_mut().insert(IF_NONE_MATCH, value);
		}

		let mut builder = self.client.request(request.method().clone(), url.clone());

		for (name, value) in request.headers() {
			builder = builder.header(name, value);
		}

		let start = Instant::now();
		let response = builder.timeout(timeout).send().await?;
		let mut template = Response::builder().status(response.status()).body(())?;

		template.headers_mut().extend(response.headers().clone());

		tracing::debug!(
			url = %url,
			status = %response.status(),
			elapsed = ?start.elapsed(),
			"http exchange complete"
		);

		Ok((request, template, response))
	}

	async fn read_json<T>(&self, url: &Url, response: reqwest::Response) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let status = response.status();

		if !status.is_success() {
			let body = response.text().await.ok();

			return Err(Error::HttpStatus { status, url: url.clone(), body });
		}
		if response.content_length().is_some_and(|length| length > self.max_response_bytes) {
			return Err(self.oversized(url));
		}

		let bytes = response.bytes().await?;

		if bytes.len() as u64 > self.max_response_bytes {
			return Err(self.oversized(url));
		}

		Ok(serde_json::from_slice(&bytes)?)
	}

	async fn fetch_signing_keys(&self, jwks_uri: &Url, timeout: Duration) -> Result<JwkSet> {
		let (_, _, response) = self.send(jwks_uri, None, timeout).await?;

		self.read_json(jwks_uri, response).await
	}

	fn oversized(&self, url: &Url) -> Error {
		Error::Configuration {
			field: "max_response_bytes",
			reason: format!(
				"Response from {url} exceeds the configured guard of {} bytes.",
				self.max_response_bytes
			),
		}
	}
}

#[async_trait::async_trait]
impl ConfigurationRetriever for HttpConfigurationRetriever {
	async fn retrieve(&self, request: RetrievalRequest<'_>) -> Result<Retrieval> {
		let started = Instant::now();
		let (http_request, template, response) =
			self.send(request.endpoint, request.etag, request.timeout).await?;

		if template.status() == StatusCode::NOT_MODIFIED {
			return Ok(Retrieval::NotModified {
				max_age: revalidated_lifetime(&http_request, &template),
			});
		}

		let mut metadata: ServerMetadata = self.read_json(request.endpoint, response).await?;

		if metadata.signing_keys.is_none()
			&& let Some(jwks_uri) = metadata.jwks_uri.clone()
		{
			let remaining = request.timeout.saturating_sub(started.elapsed());

			if remaining.is_zero() {
				return Err(Error::Timeout(request.timeout));
			}

			metadata.signing_keys = Some(self.fetch_signing_keys(&jwks_uri, remaining).await?);
		}

		let etag = template.headers().get(ETAG).and_then(|v| v.to_str().ok()).map(str::to_owned);
		let last_modified = template
			.headers()
			.get(LAST_MODIFIED)
			.and_then(|value| value.to_str().ok())
			.and_then(|raw| httpdate::parse_http_date(raw).ok())
			.map(DateTime::<Utc>::from);

		Ok(Retrieval::Document(RetrievedConfiguration {
			metadata: Arc::new(metadata),
			max_age: freshness_lifetime(&http_request, &template),
			etag,
			last_modified,
		}))
	}
}
