//! Discovery, negotiation, and revalidation against a live mock server.

// std
use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};
// crates.io
use oidc_client_registry::{
	ClientOptions, ClientRegistration, Dimension, Error, MetadataState, Result,
};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::{
	discovery_document, insecure_registry, insecure_registry_with, json_response, jwks_response,
};

#[tokio::test]
async fn discovers_metadata_once_and_negotiates() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/.well-known/openid-configuration"))
		.respond_with(json_response(discovery_document(&server.uri()), 60))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/jwks"))
		.respond_with(jwks_response())
		.expect(1)
		.mount(&server)
		.await;

	let options = ClientOptions::default()
		.with_enabled(Dimension::ResponseMode, ["form_post", "query", "fragment"]);
	let registry = insecure_registry_with(options);
	let handle = registry
		.register(ClientRegistration::for_issuer(server.uri())?.with_registration_id("mock"))
		.await?;
	let first = handle.server_metadata().await?;
	let second = registry.server_metadata("mock").await?;

	assert!(Arc::ptr_eq(&first, &second));
	assert_eq!(first.signing_keys.as_ref().map(|keys| keys.keys.len()), Some(1));
	assert_eq!(handle.resolve(Dimension::ResponseType).await?, "code");
	assert_eq!(handle.resolve(Dimension::GrantType).await?, "authorization_code");
	assert_eq!(handle.resolve(Dimension::CodeChallengeMethod).await?, "S256");
	// The server lacks `form_post`, and `query` cannot carry front-channel ID tokens.
	assert_eq!(handle.resolve_response_mode_for("code").await?, "query");
	assert_eq!(handle.resolve_response_mode_for("code id_token").await?, "fragment");
	assert_eq!(registry.status("mock").await?.state, MetadataState::Fresh);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn relative_endpoint_resolves_against_issuer() -> Result<()> {
	let server = MockServer::start().await;
	let issuer = format!("{}/tenant", server.uri());

	Mock::given(method("GET"))
		.and(path("/tenant/metadata/openid.json"))
		.respond_with(json_response(discovery_document(&issuer), 60))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/tenant/jwks"))
		.respond_with(jwks_response())
		.mount(&server)
		.await;

	let registry = insecure_registry();
	let handle = registry
		.register(
			ClientRegistration::for_issuer(&issuer)?
				.with_provider_name("tenant")
				.with_configuration_endpoint("metadata/openid.json"),
		)
		.await?;
	let metadata = handle.server_metadata().await?;

	assert_eq!(metadata.issuer, issuer);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn refresh_revalidates_with_etag() -> Result<()> {
	let server = MockServer::start().await;
	let document = discovery_document(&server.uri());
	let requests = Arc::new(AtomicUsize::new(0));
	let counter = requests.clone();

	Mock::given(method("GET"))
		.and(path("/.well-known/openid-configuration"))
		.respond_with(move |request: &wiremock::Request| {
			match counter.fetch_add(1, Ordering::SeqCst) {
				0 => json_response(document.clone(), 60).insert_header("etag", "\"v1\""),
				_ => {
					assert_eq!(
						request.headers.get("if-none-match").and_then(|v| v.to_str().ok()),
						Some("\"v1\""),
						"conditional header missing"
					);

					ResponseTemplate::new(304)
						.insert_header("etag", "\"v1\"")
						.insert_header("cache-control", "public, max-age=60")
				},
			}
		})
		.mount(&server)
		.await;
	Mock::given(method("GET")).and(path("/jwks")).respond_with(jwks_response()).mount(&server).await;

	let registry = insecure_registry();
	let handle = registry.register(ClientRegistration::for_issuer(server.uri())?).await?;
	let first = handle.server_metadata().await?;
	let revalidated = handle.refresh_metadata().await?;

	assert!(Arc::ptr_eq(&first, &revalidated), "304 should reuse the cached document");
	assert_eq!(requests.load(Ordering::SeqCst), 2);

	let status = handle.status().await;
	let cache = status.cache.expect("discovery cache");

	assert_eq!(cache.etag.as_deref(), Some("\"v1\""));
	assert_eq!(cache.metrics.refresh_successes, 2);

	Ok(())
}

#[tokio::test]
async fn unreachable_server_surfaces_metadata_unavailable() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/.well-known/openid-configuration"))
		.respond_with(ResponseTemplate::new(503))
		.mount(&server)
		.await;

	let registry = insecure_registry();
	let handle = registry
		.register(ClientRegistration::for_issuer(server.uri())?.with_registration_id("down"))
		.await?;
	let err = handle.resolve(Dimension::ResponseType).await.expect_err("server is down");

	assert!(
		matches!(err, Error::MetadataUnavailable { ref registration, .. } if registration == "down")
	);

	let status = handle.status().await;

	assert_eq!(status.state, MetadataState::Empty);
	assert_eq!(status.cache.map(|cache| cache.metrics.refresh_errors), Some(1));

	Ok(())
}

#[tokio::test]
async fn foreign_issuer_is_rejected() -> Result<()> {
	let server = MockServer::start().await;
	let mut document = discovery_document(&server.uri());

	document["issuer"] = "https://impostor.example.com".into();

	Mock::given(method("GET"))
		.and(path("/.well-known/openid-configuration"))
		.respond_with(json_response(document, 60))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("GET")).and(path("/jwks")).respond_with(jwks_response()).mount(&server).await;

	let registry = insecure_registry();
	let handle = registry.register(ClientRegistration::for_issuer(server.uri())?).await?;
	let err = handle.server_metadata().await.expect_err("issuer mismatch");

	assert!(matches!(
		err,
		Error::MetadataUnavailable { ref reason, .. } if reason.contains("impostor")
	));

	server.verify().await;

	Ok(())
}
