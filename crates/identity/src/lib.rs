//! Courier credential infrastructure adapter.
//!
//! Implements the [`pipeline::TokenProvider`] trait against a platform
//! managed-identity endpoint, plus a fixed-token provider for local runs.
//! Token caching is not done here; wrap a provider in
//! [`pipeline::CachedTokenProvider`] to share tokens across invocations.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Endpoint detection, HTTP transport, and token response
//! parsing live here. The [`pipeline`] crate sees only
//! [`pipeline::TokenProvider`].

mod managed;
mod static_token;

pub use managed::{IdentityEndpoint, ManagedIdentityCredential, IMDS_ENDPOINT};
pub use static_token::StaticTokenProvider;
