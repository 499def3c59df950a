//! Several registrations sharing one registry.

// crates.io
use oidc_client_registry::{
	ClientOptions, ClientRegistration, Dimension, Error, MetadataState, Registry, Result,
	ServerMetadata,
};
use url::Url;
use wiremock::{
	Mock, MockServer,
	matchers::{method, path},
};
// self
use crate::{discovery_document, insecure_registry, json_response, jwks_response};

#[tokio::test]
async fn registrations_are_isolated() -> Result<()> {
	let server = MockServer::start().await;

	for tenant in ["alpha", "beta"] {
		let issuer = format!("{}/{tenant}", server.uri());

		Mock::given(method("GET"))
			.and(path(format!("/{tenant}/.well-known/openid-configuration")))
			.respond_with(json_response(discovery_document(&issuer), 60))
			.expect(1)
			.mount(&server)
			.await;
		Mock::given(method("GET"))
			.and(path(format!("/{tenant}/jwks")))
			.respond_with(jwks_response())
			.mount(&server)
			.await;
	}

	let registry = insecure_registry();

	for tenant in ["alpha", "beta"] {
		registry
			.register(
				ClientRegistration::for_issuer(format!("{}/{tenant}", server.uri()))?
					.with_provider_name(tenant),
			)
			.await?;
	}

	let alpha = registry.handle_by_provider_name("alpha").await?;
	let beta = registry.handle_by_provider_name("beta").await?;

	assert_ne!(alpha.id(), beta.id());
	assert!(alpha.server_metadata().await?.issuer.ends_with("/alpha"));

	// Fetching one registration leaves the other untouched.
	let statuses = registry.all_statuses().await;

	assert_eq!(statuses.len(), 2);
	assert_eq!(
		statuses.iter().filter(|status| status.state == MetadataState::Fresh).count(),
		1
	);

	assert!(beta.server_metadata().await?.issuer.ends_with("/beta"));
	assert!(registry.unregister(alpha.id()).await);
	assert!(matches!(
		registry.handle_by_provider_name("alpha").await,
		Err(Error::NotRegistered { .. })
	));
	// Handles issued before removal keep working.
	assert!(alpha.server_metadata().await?.issuer.ends_with("/alpha"));

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn negotiation_failures_are_not_masked() -> Result<()> {
	let options = ClientOptions::default().with_enabled(Dimension::CodeChallengeMethod, ["plain"]);
	let mut configuration = ServerMetadata::new("https://static.example.com/");

	configuration.code_challenge_methods_supported = Some(vec!["S256".into()]);

	let registry = Registry::builder().client_options(options).build()?;

	registry
		.register(
			ClientRegistration::default()
				.with_registration_id("static")
				.with_configuration(configuration)
				.with_allowed(Dimension::GrantType, ["refresh_token"])
				.with_redirect_uri(Url::parse("https://app.example.com/signin").expect("url")),
		)
		.await?;

	assert!(matches!(
		registry.resolve("static", Dimension::CodeChallengeMethod).await,
		Err(Error::NoCompatibleValue { dimension: Dimension::CodeChallengeMethod })
	));
	// The static document has no grant list, so only the registration restricts it.
	assert_eq!(registry.resolve("static", Dimension::GrantType).await?, "refresh_token");
	assert!(
		registry
			.is_redirect_uri_allowed(&Url::parse("https://app.example.com/signin").expect("url"))
			.await
	);

	Ok(())
}
