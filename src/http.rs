//! HTTP transport for discovery documents: retriever, cache semantics, and retries.

pub mod client;
pub mod retry;
pub mod semantics;
