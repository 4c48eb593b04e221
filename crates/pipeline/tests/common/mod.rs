//! Shared fakes for pipeline integration tests.
//!
//! The fakes record every call so scenarios can assert on what the pipeline
//! did, not only on what it returned.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeZone;
use pipeline::{
    AuthError, AuthenticationScope, CallbackInvoker, CallbackOptions, CallbackTransport,
    CallbackUrl, CredentialToken, HttpResponse, InvocationContext, InvocationId, MessageHandler,
    MessageId, RawMessage, Settings, Timestamp, TokenProvider, TransportError,
};
use tokio_util::sync::CancellationToken;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

pub const SCOPE: &str = "https://example/.default";
pub const CALLBACK_URL: &str = "https://callback.example/helloworld/hello";

pub fn settings() -> Settings {
    Settings::new(CALLBACK_URL, SCOPE).expect("valid settings")
}

pub fn raw_message(id: &str, body: &str) -> RawMessage {
    RawMessage {
        message_id: MessageId::new(id).expect("non-empty id"),
        content_type: Some("application/json".to_string()),
        body: body.as_bytes().to_vec(),
        delivery_count: 1,
    }
}

/// 2024-05-06T07:08:09Z
pub fn fixed_timestamp() -> Timestamp {
    Timestamp::from_utc(
        chrono::Utc
            .with_ymd_and_hms(2024, 5, 6, 7, 8, 9)
            .single()
            .expect("valid time"),
    )
}

pub fn context(cancel: CancellationToken) -> InvocationContext {
    InvocationContext::with_timestamp(InvocationId::new_random(), cancel, fixed_timestamp())
}

/// Token provider returning a fixed token or a fixed error.
pub struct FakeTokens {
    result: Result<String, AuthError>,
    pub calls: AtomicUsize,
    pub scopes: Mutex<Vec<String>>,
}

impl FakeTokens {
    pub fn ok(secret: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(secret.to_string()),
            calls: AtomicUsize::new(0),
            scopes: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(err: AuthError) -> Arc<Self> {
        Arc::new(Self {
            result: Err(err),
            calls: AtomicUsize::new(0),
            scopes: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for FakeTokens {
    async fn get_token(
        &self,
        scope: &AuthenticationScope,
        _cancel: &CancellationToken,
    ) -> Result<CredentialToken, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.scopes.lock().unwrap().push(scope.to_string());
        self.result
            .clone()
            .map(|secret| CredentialToken::new(secret, fixed_timestamp()))
    }
}

/// Transport answering every request with the same response.
pub struct FakeTransport {
    response: Result<HttpResponse, TransportError>,
    pub requests: Mutex<Vec<(String, String)>>,
}

impl FakeTransport {
    pub fn responding(status: u16, body: &str) -> Arc<Self> {
        Arc::new(Self {
            response: Ok(HttpResponse {
                status,
                body: body.to_string(),
            }),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(err: TransportError) -> Arc<Self> {
        Arc::new(Self {
            response: Err(err),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CallbackTransport for FakeTransport {
    async fn get(
        &self,
        url: &CallbackUrl,
        token: &CredentialToken,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), format!("Bearer {}", token.secret())));
        self.response.clone()
    }
}

pub fn handler(
    tokens: Arc<FakeTokens>,
    transport: Arc<FakeTransport>,
    options: pipeline::HandlerOptions,
) -> MessageHandler {
    let invoker = CallbackInvoker::new(
        tokens,
        transport,
        CallbackOptions {
            timeout: Duration::from_secs(1),
            max_retries: 0,
            retry_backoff: Duration::from_millis(1),
        },
    );
    MessageHandler::new(Arc::new(invoker), options)
}

// ---------------------------------------------------------------------------
// Log capture
// ---------------------------------------------------------------------------

/// One captured event: its level and rendered `message` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
}

/// Records every event emitted on the current thread while its guard lives.
///
/// `#[tokio::test]` runs on a current-thread runtime, so events from the
/// handler's futures land on the test thread.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl CapturedLogs {
    /// Installs the capture as the thread-default subscriber.
    pub fn install() -> (Self, DefaultGuard) {
        let logs = Self::default();
        let subscriber = tracing_subscriber::registry().with(logs.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (logs, guard)
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn contains(&self, level: Level, message: &str) -> bool {
        self.records().iter().any(|r| r.level == level && r.message == message)
    }

    pub fn contains_message(&self, message: &str) -> bool {
        self.records().iter().any(|r| r.message == message)
    }
}

impl<S: Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.records.lock().unwrap().push(LogRecord {
            level: *event.metadata().level(),
            message: visitor.message,
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}
