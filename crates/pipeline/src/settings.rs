//! Process-wide settings for the callback step.
//!
//! [`Settings`] is loaded once at startup and shared read-only as
//! `Arc<Settings>`. A reload replaces the whole `Arc`; fields are never
//! mutated in place.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::StartupConfigError;

/// Absolute `http`/`https` URL of the callback endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackUrl(String);

impl CallbackUrl {
    /// Validates and wraps a callback URL.
    ///
    /// # Errors
    ///
    /// Returns [`StartupConfigError::Missing`] for an empty value and
    /// [`StartupConfigError::Invalid`] for a value that does not parse as an
    /// absolute URL, does not use `http`/`https`, has no host, or contains
    /// whitespace.
    pub fn parse(value: &str) -> Result<Self, StartupConfigError> {
        const NAME: &str = "callback.ping_api_url";
        let invalid = |reason: String| StartupConfigError::Invalid { name: NAME, reason };

        let value = value.trim();
        if value.is_empty() {
            return Err(StartupConfigError::Missing { name: NAME });
        }
        if value.chars().any(char::is_whitespace) {
            return Err(invalid(format!("'{value}' contains whitespace")));
        }
        let url = Url::parse(value).map_err(|e| invalid(format!("'{value}' is not a valid URL: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("'{value}' must use the http or https scheme")));
        }
        // The parser lifts the first path segment of `https:///x` into the host.
        let authority = value.split_once("://").map(|(_, rest)| rest).unwrap_or_default();
        if authority.starts_with('/') || url.host_str().map_or(true, str::is_empty) {
            return Err(invalid(format!("'{value}' has no host")));
        }
        Ok(Self(value.to_string()))
    }

    /// Returns the URL as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallbackUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Audience a bearer credential is requested for
/// (e.g. `"https://management.azure.com/.default"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthenticationScope(String);

impl AuthenticationScope {
    /// Validates and wraps a scope string.
    ///
    /// # Errors
    ///
    /// Returns [`StartupConfigError::Missing`] for an empty value and
    /// [`StartupConfigError::Invalid`] if it contains whitespace.
    pub fn parse(value: &str) -> Result<Self, StartupConfigError> {
        const NAME: &str = "callback.authentication_scope";
        let value = value.trim();
        if value.is_empty() {
            return Err(StartupConfigError::Missing { name: NAME });
        }
        if value.chars().any(char::is_whitespace) {
            return Err(StartupConfigError::Invalid {
                name: NAME,
                reason: format!("'{value}' contains whitespace"),
            });
        }
        Ok(Self(value.to_string()))
    }

    /// Returns the scope as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the resource (audience) this scope targets.
    ///
    /// Token endpoints that speak the v1 protocol want `https://x` where the v2
    /// scope is `https://x/.default`.
    pub fn resource(&self) -> &str {
        self.0.strip_suffix("/.default").unwrap_or(&self.0)
    }
}

impl std::fmt::Display for AuthenticationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read-only callback settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Endpoint called once per invocation.
    pub ping_api_url: CallbackUrl,
    /// Scope of the bearer credential attached to the callback.
    pub authentication_scope: AuthenticationScope,
}

impl Settings {
    /// Validates both settings together.
    ///
    /// # Errors
    ///
    /// Returns the first [`StartupConfigError`] encountered.
    pub fn new(ping_api_url: &str, authentication_scope: &str) -> Result<Self, StartupConfigError> {
        Ok(Self {
            ping_api_url: CallbackUrl::parse(ping_api_url)?,
            authentication_scope: AuthenticationScope::parse(authentication_scope)?,
        })
    }
}
