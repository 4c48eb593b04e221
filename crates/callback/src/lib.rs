//! Courier callback transport adapter.
//!
//! Implements the [`pipeline::CallbackTransport`] trait with `reqwest`. The
//! transport performs exactly one `GET` per call; retries, cancellation, and
//! classification of the response belong to [`pipeline::CallbackInvoker`].
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Connection pooling, TLS, and header formatting live
//! here. The [`pipeline`] crate sees only [`pipeline::CallbackTransport`].

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{CallbackTransport, CallbackUrl, CredentialToken, HttpResponse, TransportError};
use tracing::{debug, instrument};

/// `reqwest`-backed callback transport.
///
/// Clones share one connection pool.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with a default client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport over an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout { after: timeout }
    } else {
        TransportError::Io {
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl CallbackTransport for ReqwestTransport {
    #[instrument(skip_all, fields(url = %url))]
    async fn get(
        &self,
        url: &CallbackUrl,
        token: &CredentialToken,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .get(url.as_str())
            .bearer_auth(token.secret())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(e, timeout))?;
        debug!(status, body_len = body.len(), "callback response received");

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::Timestamp;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        String::from_utf8_lossy(&request).into_owned()
    }

    async fn serve_once(status: &str, body: &str) -> (CallbackUrl, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request
        });
        let url = CallbackUrl::parse(&format!("http://{addr}/helloworld/hello")).unwrap();
        (url, task)
    }

    fn token() -> CredentialToken {
        CredentialToken::new("jwt-xyz", Timestamp::now())
    }

    #[tokio::test]
    async fn test_sends_bearer_token_and_returns_body() {
        let (url, server) = serve_once("200 OK", "Hello from the API").await;
        let transport = ReqwestTransport::new();

        let response = transport.get(&url, &token(), Duration::from_secs(5)).await.unwrap();

        assert_eq!(response, HttpResponse { status: 200, body: "Hello from the API".into() });
        let request = server.await.unwrap();
        assert!(request.starts_with("GET /helloworld/hello HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer jwt-xyz"));
    }

    #[tokio::test]
    async fn test_error_status_is_a_response_not_an_error() {
        let (url, _server) = serve_once("503 Service Unavailable", "busy").await;
        let transport = ReqwestTransport::new();

        let response = transport.get(&url, &token(), Duration::from_secs(5)).await.unwrap();

        assert_eq!(response.status, 503);
        assert!(!response.is_success());
        assert_eq!(response.body, "busy");
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _ = read_request(&mut socket).await;
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        let url = CallbackUrl::parse(&format!("http://{addr}/slow")).unwrap();

        let err = ReqwestTransport::new()
            .get(&url, &token(), Duration::from_millis(200))
            .await
            .unwrap_err();

        assert_eq!(err, TransportError::Timeout { after: Duration::from_millis(200) });
    }

    #[tokio::test]
    async fn test_refused_connection_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = CallbackUrl::parse(&format!("http://{addr}/gone")).unwrap();

        let err = ReqwestTransport::new()
            .get(&url, &token(), Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Io { .. }));
    }
}
