//! Managed-identity token endpoint client.
//!
//! Two endpoint flavours are supported, matching what hosting platforms
//! expose:
//!
//! - **App Service / Functions**: `IDENTITY_ENDPOINT` + `IDENTITY_HEADER`
//!   environment variables, api-version `2019-08-01`, secret sent in the
//!   `X-IDENTITY-HEADER` header.
//! - **Instance metadata service (IMDS)**: fixed link-local endpoint,
//!   api-version `2018-02-01`, `Metadata: true` header.
//!
//! Both speak the v1 protocol: a `resource` query parameter rather than a
//! scope, so `https://x/.default` is requested as `https://x`.

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{AuthError, AuthenticationScope, CredentialToken, Timestamp, TokenProvider};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Default IMDS token endpoint.
pub const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

const APP_SERVICE_API_VERSION: &str = "2019-08-01";
const IMDS_API_VERSION: &str = "2018-02-01";

/// Where tokens are requested from.
#[derive(Clone, PartialEq, Eq)]
pub enum IdentityEndpoint {
    /// App Service style endpoint with its per-process secret header.
    AppService {
        /// `IDENTITY_ENDPOINT`.
        endpoint: String,
        /// `IDENTITY_HEADER`.
        header: String,
    },
    /// Instance metadata service.
    Imds {
        /// Token endpoint URL.
        endpoint: String,
    },
}

impl IdentityEndpoint {
    /// Detects the endpoint from variables looked up with `var`.
    ///
    /// Falls back to IMDS when the App Service variables are absent.
    pub fn detect(var: impl Fn(&str) -> Option<String>) -> Self {
        match (var("IDENTITY_ENDPOINT"), var("IDENTITY_HEADER")) {
            (Some(endpoint), Some(header)) if !endpoint.is_empty() && !header.is_empty() => {
                IdentityEndpoint::AppService { endpoint, header }
            }
            _ => IdentityEndpoint::Imds {
                endpoint: IMDS_ENDPOINT.to_string(),
            },
        }
    }

    /// Detects the endpoint from the process environment.
    pub fn from_env() -> Self {
        Self::detect(|name| std::env::var(name).ok())
    }
}

impl std::fmt::Debug for IdentityEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityEndpoint::AppService { endpoint, .. } => f
                .debug_struct("AppService")
                .field("endpoint", endpoint)
                .field("header", &"<redacted>")
                .finish(),
            IdentityEndpoint::Imds { endpoint } => {
                f.debug_struct("Imds").field("endpoint", endpoint).finish()
            }
        }
    }
}

/// Token endpoint response body.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_on: ExpiresOn,
}

/// `expires_on` is a string on some hosts and a number on others.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExpiresOn {
    Seconds(i64),
    Text(String),
}

impl ExpiresOn {
    fn to_timestamp(&self) -> Option<Timestamp> {
        match self {
            ExpiresOn::Seconds(secs) => Timestamp::from_unix_seconds(*secs),
            ExpiresOn::Text(text) => text.trim().parse().ok().and_then(Timestamp::from_unix_seconds),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

/// Acquires tokens from a managed-identity endpoint.
#[derive(Debug, Clone)]
pub struct ManagedIdentityCredential {
    client: reqwest::Client,
    endpoint: IdentityEndpoint,
    client_id: Option<String>,
}

impl ManagedIdentityCredential {
    /// Creates a credential for `endpoint`.
    ///
    /// `client_id` selects a user-assigned identity; `None` uses the
    /// system-assigned one.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NotConfigured`] if the HTTP client cannot be built.
    pub fn new(
        endpoint: IdentityEndpoint,
        client_id: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::NotConfigured {
                message: format!("could not build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint,
            client_id,
        })
    }

    fn request(&self, resource: &str) -> reqwest::RequestBuilder {
        let mut query: Vec<(&str, &str)> = vec![("resource", resource)];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        match &self.endpoint {
            IdentityEndpoint::AppService { endpoint, header } => {
                query.push(("api-version", APP_SERVICE_API_VERSION));
                self.client
                    .get(endpoint)
                    .query(&query)
                    .header("X-IDENTITY-HEADER", header)
            }
            IdentityEndpoint::Imds { endpoint } => {
                query.push(("api-version", IMDS_API_VERSION));
                self.client.get(endpoint).query(&query).header("Metadata", "true")
            }
        }
    }

    async fn fetch(&self, scope: &AuthenticationScope) -> Result<CredentialToken, AuthError> {
        let response = self
            .request(scope.resource())
            .send()
            .await
            .map_err(|e| AuthError::Unavailable {
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| AuthError::Unavailable {
            message: e.to_string(),
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .ok()
                .and_then(|e| e.error_description.or(e.error))
                .unwrap_or(body);
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::InvalidResponse {
                message: e.to_string(),
            })?;
        let expires_at = parsed
            .expires_on
            .to_timestamp()
            .ok_or_else(|| AuthError::InvalidResponse {
                message: format!("unparseable expires_on {:?}", parsed.expires_on),
            })?;
        if parsed.access_token.is_empty() {
            return Err(AuthError::InvalidResponse {
                message: "empty access_token".to_string(),
            });
        }

        debug!(expires_at = %expires_at, "managed identity token acquired");
        Ok(CredentialToken::new(parsed.access_token, expires_at))
    }
}

#[async_trait]
impl TokenProvider for ManagedIdentityCredential {
    #[instrument(skip_all, fields(scope = %scope))]
    async fn get_token(
        &self,
        scope: &AuthenticationScope,
        cancel: &CancellationToken,
    ) -> Result<CredentialToken, AuthError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(AuthError::Unavailable {
                message: "token request cancelled".to_string(),
            }),
            result = self.fetch(scope) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serves one canned response and returns the raw request text.
    async fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{addr}/msi/token"), task)
    }

    fn scope() -> AuthenticationScope {
        AuthenticationScope::parse("https://management.azure.com/.default").unwrap()
    }

    #[test]
    fn test_detect_prefers_app_service_variables() {
        let endpoint = IdentityEndpoint::detect(|name| match name {
            "IDENTITY_ENDPOINT" => Some("http://127.0.0.1:41741/msi/token".into()),
            "IDENTITY_HEADER" => Some("secret-header".into()),
            _ => None,
        });
        assert_eq!(
            endpoint,
            IdentityEndpoint::AppService {
                endpoint: "http://127.0.0.1:41741/msi/token".into(),
                header: "secret-header".into()
            }
        );
        assert_eq!(
            IdentityEndpoint::detect(|_| None),
            IdentityEndpoint::Imds { endpoint: IMDS_ENDPOINT.into() }
        );
    }

    #[tokio::test]
    async fn test_app_service_token_request() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"access_token":"jwt-abc","expires_on":"1900000000","resource":"https://management.azure.com","token_type":"Bearer"}"#,
        )
        .await;
        let credential = ManagedIdentityCredential::new(
            IdentityEndpoint::AppService { endpoint: url, header: "h-secret".into() },
            Some("client-1".into()),
            Duration::from_secs(5),
        )
        .unwrap();

        let token = credential.get_token(&scope(), &CancellationToken::new()).await.unwrap();
        assert_eq!(token.secret(), "jwt-abc");
        assert_eq!(token.expires_at(), Timestamp::from_unix_seconds(1_900_000_000).unwrap());

        let request = server.await.unwrap();
        let request_lower = request.to_ascii_lowercase();
        assert!(request.starts_with("GET /msi/token?"));
        assert!(request.contains("resource=https%3A%2F%2Fmanagement.azure.com"));
        assert!(request.contains("api-version=2019-08-01"));
        assert!(request.contains("client_id=client-1"));
        assert!(request_lower.contains("x-identity-header: h-secret"));
    }

    #[tokio::test]
    async fn test_imds_token_request_with_numeric_expiry() {
        let (url, server) = serve_once("200 OK", r#"{"access_token":"jwt-imds","expires_on":1900000000}"#).await;
        let credential = ManagedIdentityCredential::new(
            IdentityEndpoint::Imds { endpoint: url },
            None,
            Duration::from_secs(5),
        )
        .unwrap();

        let token = credential.get_token(&scope(), &CancellationToken::new()).await.unwrap();
        assert_eq!(token.secret(), "jwt-imds");

        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.contains("api-version=2018-02-01"));
        assert!(request.contains("metadata: true"));
        assert!(!request.contains("client_id"));
    }

    #[tokio::test]
    async fn test_rejection_carries_error_description() {
        let (url, _server) = serve_once(
            "400 Bad Request",
            r#"{"error":"invalid_resource","error_description":"unknown audience"}"#,
        )
        .await;
        let credential = ManagedIdentityCredential::new(
            IdentityEndpoint::Imds { endpoint: url },
            None,
            Duration::from_secs(5),
        )
        .unwrap();

        let err = credential.get_token(&scope(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(
            err,
            AuthError::Rejected { status: 400, message: "unknown audience".into() }
        );
    }

    #[tokio::test]
    async fn test_garbage_response_is_invalid() {
        let (url, _server) = serve_once("200 OK", r#"{"token":"nope"}"#).await;
        let credential = ManagedIdentityCredential::new(
            IdentityEndpoint::Imds { endpoint: url },
            None,
            Duration::from_secs(5),
        )
        .unwrap();

        let err = credential.get_token(&scope(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let credential = ManagedIdentityCredential::new(
            IdentityEndpoint::Imds { endpoint: format!("http://{addr}/token") },
            None,
            Duration::from_secs(5),
        )
        .unwrap();

        let err = credential.get_token(&scope(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AuthError::Unavailable { .. }));
    }
}
