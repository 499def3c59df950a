//! Crate-wide error types and `Result` alias.

// self
use crate::{credential::CredentialUsage, negotiation::Dimension};

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the client registry crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Http(#[from] http::Error),
	#[error(transparent)]
	Jsonwebtoken(#[from] jsonwebtoken::errors::Error),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Cache error: {0}")]
	Cache(String),
	#[error("Invalid configuration for {field}: {reason}")]
	Configuration { field: &'static str, reason: String },
	#[error("Upstream HTTP status {status} from {url}: {body:?}")]
	HttpStatus { status: http::StatusCode, url: url::Url, body: Option<String> },
	#[error("Server metadata unavailable for registration '{registration}': {reason}")]
	MetadataUnavailable { registration: String, reason: String },
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("No compatible value for {dimension}.")]
	NoCompatibleValue { dimension: Dimension },
	#[error("No valid {usage} credential at the requested instant.")]
	NoValidCredential { usage: CredentialUsage },
	#[error("Registration '{registration}' is not registered.")]
	NotRegistered { registration: String },
	#[error("Security violation: {0}")]
	Security(String),
	#[error("Attempt timed out after {0:?}.")]
	Timeout(std::time::Duration),
}
#[cfg(feature = "metrics")]
impl<T> From<metrics::SetRecorderError<T>> for Error
where
	T: std::fmt::Display,
{
	fn from(value: metrics::SetRecorderError<T>) -> Self {
		Self::Metrics(value.to_string())
	}
}
