//! Capability used by configuration caches to obtain discovery documents.

// std
use std::fmt::Debug;
// crates.io
use url::Url;
// self
use crate::{_prelude::*, metadata::ServerMetadata};

/// Parameters of one retrieval attempt.
#[derive(Clone, Copy, Debug)]
pub struct RetrievalRequest<'a> {
	/// Absolute configuration endpoint.
	pub endpoint: &'a Url,
	/// Validator of the cached document, for conditional requests.
	pub etag: Option<&'a str>,
	/// Time budget of the attempt; the cache enforces it as well.
	pub timeout: Duration,
}

/// Document returned by a successful retrieval.
#[derive(Clone, Debug)]
pub struct RetrievedConfiguration {
	/// Parsed server metadata.
	pub metadata: Arc<ServerMetadata>,
	/// Freshness lifetime advertised by the origin, if any.
	pub max_age: Option<Duration>,
	/// Validator advertised by the origin.
	pub etag: Option<String>,
	/// Last-Modified timestamp advertised by the origin.
	pub last_modified: Option<DateTime<Utc>>,
}
impl RetrievedConfiguration {
	/// Wrap a document without caching hints.
	pub fn new(metadata: ServerMetadata) -> Self {
		Self { metadata: Arc::new(metadata), max_age: None, etag: None, last_modified: None }
	}

	/// Attach a freshness lifetime.
	pub fn with_max_age(mut self, max_age: Duration) -> Self {
		self.max_age = Some(max_age);

		self
	}

	/// Attach a validator.
	pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
		self.etag = Some(etag.into());

		self
	}
}

/// Outcome of a retrieval attempt.
#[derive(Clone, Debug)]
pub enum Retrieval {
	/// A new representation was returned.
	Document(RetrievedConfiguration),
	/// The cached representation is still current.
	NotModified {
		/// Renewed freshness lifetime, if any.
		max_age: Option<Duration>,
	},
}

/// Source of discovery documents.
///
/// Implementations perform transport and parsing; caching, coalescing, retries, and timeouts
/// are handled by the caller.
#[async_trait::async_trait]
pub trait ConfigurationRetriever: Debug + Send + Sync {
	/// Retrieve the document published at `request.endpoint`.
	async fn retrieve(&self, request: RetrievalRequest<'_>) -> Result<Retrieval>;
}
