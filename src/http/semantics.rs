//! HTTP cache semantics integration helpers.

// crates.io
use http::{
	Method, Request, Response, StatusCode, Uri,
	header::{ACCEPT, CACHE_CONTROL, EXPIRES},
};
use http_cache_semantics::CachePolicy;
use url::Url;
// self
use crate::_prelude::*;

/// Build a baseline GET request for a JSON document.
pub fn base_request(url: &Url) -> Result<Request<()>> {
	Request::builder()
		.method(Method::GET)
		.uri(parse_uri(url)?)
		.header(ACCEPT, "application/json")
		.body(())
		.map_err(Error::from)
}

/// Freshness lifetime granted by a response.
///
/// `None` means the origin sent neither `Cache-Control` nor `Expires`. A response forbidding
/// storage or granting no lifetime yields [`Duration::ZERO`], which callers clamp to their floor.
pub fn freshness_lifetime(request: &Request<()>, response: &Response<()>) -> Option<Duration> {
	let headers = response.headers();

	if !headers.contains_key(CACHE_CONTROL) && !headers.contains_key(EXPIRES) {
		return None;
	}

	let policy = CachePolicy::new(request, response);

	if !policy.is_storable() {
		tracing::debug!(status = %response.status(), "response is not storable");

		return Some(Duration::ZERO);
	}

	let ttl = policy.time_to_live(SystemTime::now());

	tracing::debug!(ttl = ?ttl, "evaluated freshness");

	Some(ttl)
}

/// Freshness lifetime renewed by a `304 Not Modified` response.
///
/// The 304 headers are evaluated as if they accompanied the cached representation.
pub fn revalidated_lifetime(request: &Request<()>, response: &Response<()>) -> Option<Duration> {
	let mut renewed = Response::builder().status(StatusCode::OK).body(()).ok()?;

	renewed.headers_mut().extend(response.headers().clone());

	freshness_lifetime(request, &renewed)
}

fn parse_uri(url: &Url) -> Result<Uri> {
	url.as_str().parse::<Uri>().map_err(|err| Error::Configuration {
		field: "configuration_endpoint",
		reason: format!("Failed to convert URL to http::Uri: {err}."),
	})
}
