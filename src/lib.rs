//! Multi-provider OAuth 2.0 / OpenID Connect client registrations with parameter negotiation
//! and a self-refreshing discovery cache.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod config;
pub mod credential;
pub mod http;
pub mod metadata;
pub mod metrics;
pub mod negotiation;
pub mod properties;
pub mod registration;
pub mod retriever;
pub mod security;
pub mod validation;

mod error;
mod registry;
mod _prelude {
	pub use std::{
		sync::Arc,
		time::{Duration, SystemTime},
	};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	cache::{
		manager::{CacheStatus, ConfigurationCache},
		state::MetadataState,
	},
	config::{CacheSettings, ClientOptions, JitterStrategy, RetryPolicy},
	credential::{Credential, CredentialSet, CredentialUsage, TokenEncryptor, TokenSigner},
	error::{Error, Result},
	http::client::HttpConfigurationRetriever,
	metadata::ServerMetadata,
	negotiation::Dimension,
	properties::{PropertyBag, PropertyValue},
	registration::ClientRegistration,
	registry::{
		Registry, RegistryBuilder, RegistrationHandle, RegistrationStatus, RegistrySettings,
	},
	retriever::{ConfigurationRetriever, Retrieval, RetrievalRequest, RetrievedConfiguration},
	validation::TokenValidationParameters,
};
