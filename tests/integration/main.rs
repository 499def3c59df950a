//! Integration tests driving the registry against a mock authorization server.

mod discovery;
mod multi_registration;

// crates.io
use oidc_client_registry::{CacheSettings, ClientOptions, Registry, RetryPolicy};
use serde_json::{Value, json};
use wiremock::ResponseTemplate;

pub const JWKS_BODY: &str = r#"{
    "keys": [
        {
            "kty": "RSA",
            "alg": "RS256",
            "use": "sig",
            "kid": "primary",
            "n": "AQIDBAUGBwgJCgsMDQ4PEBESExQVFhcYGRobHB0eHyAhIiMkJSYnKCkqKywtLi8wMTIzNDU2Nzg5Ojs8PT4_QEFCQ0RFRkdISUpLTE1OT1BRUlNUVVZXWFlaW1xdXl9gYWJjZGVmZ2hpamtsbW5vcHFyc3R1dnd4eXp7fH1-f4A",
            "e": "AQAB"
        }
    ]
}"#;

/// Discovery document for `issuer`, advertising a JWK set at `<issuer>/jwks`.
pub fn discovery_document(issuer: &str) -> Value {
	let issuer = issuer.trim_end_matches('/');

	json!({
		"issuer": issuer,
		"authorization_endpoint": format!("{issuer}/authorize"),
		"token_endpoint": format!("{issuer}/token"),
		"jwks_uri": format!("{issuer}/jwks"),
		"response_types_supported": ["code", "id_token", "code id_token"],
		"response_modes_supported": ["query", "fragment"],
		"grant_types_supported": ["authorization_code", "refresh_token"],
		"code_challenge_methods_supported": ["S256"]
	})
}

pub fn json_response(body: Value, max_age: u64) -> ResponseTemplate {
	ResponseTemplate::new(200)
		.set_body_json(body)
		.insert_header("cache-control", format!("public, max-age={max_age}").as_str())
}

pub fn jwks_response() -> ResponseTemplate {
	ResponseTemplate::new(200)
		.set_body_string(JWKS_BODY)
		.insert_header("content-type", "application/json")
		.insert_header("cache-control", "public, max-age=300")
}

/// Registry over plain HTTP with a single-attempt retry policy.
pub fn insecure_registry() -> Registry {
	insecure_registry_with(ClientOptions::default())
}

pub fn insecure_registry_with(options: ClientOptions) -> Registry {
	let _ = tracing_subscriber::fmt::try_init();
	let mut cache = CacheSettings::default();

	cache.retry_policy = RetryPolicy::no_retry(std::time::Duration::from_secs(2));

	Registry::builder()
		.require_https(false)
		.client_options(options)
		.cache_settings(cache)
		.build()
		.expect("registry")
}
