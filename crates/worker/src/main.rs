//! Courier worker entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Load configuration**: `COURIER_CONFIG` (default `courier.toml`) plus
//!    `COURIER_*` environment overrides, validated before anything starts.
//! 2. **Wire observability**: JSON `tracing` output and, when enabled, an
//!    OpenTelemetry OTLP span exporter.
//! 3. **Construct infrastructure**: token provider (managed identity or
//!    static, behind the expiry-aware cache), callback transport, archive
//!    stores, and the spool queue source.
//! 4. **Run** the worker until Ctrl-C / SIGTERM, then drain in-flight
//!    invocations and flush telemetry.

mod config;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use archive::{FsBlobStore, FsDocumentStore};
use callback::ReqwestTransport;
use identity::{IdentityEndpoint, ManagedIdentityCredential, StaticTokenProvider};
use listener::{EnvelopeDispatcher, SpoolQueueSource, Worker};
use pipeline::{CachedTokenProvider, CallbackInvoker, MessageHandler, TokenProvider};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{CourierConfig, IdentitySource, ValidatedConfig};
use crate::telemetry::{init_telemetry, shutdown_telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let raw = CourierConfig::load().context("failed to load configuration")?;
    let providers = init_telemetry(&raw.telemetry)?;

    let result = run(&raw).await;
    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), fatal = true, "worker failed");
    }

    shutdown_telemetry(providers);
    result
}

async fn run(raw: &CourierConfig) -> Result<()> {
    let validated = raw.validate().context("invalid configuration")?;
    info!(
        ping_api_url = %validated.settings.ping_api_url,
        authentication_scope = %validated.settings.authentication_scope,
        callback_enabled = validated.handler.callback_enabled,
        cancellation_policy = ?validated.handler.cancellation_policy,
        "configuration loaded"
    );

    let worker = build_worker(validated).await?;

    let shutdown = CancellationToken::new();
    let signal = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            shutdown.cancel();
        })
    };

    worker.run(shutdown).await;
    signal.abort();
    Ok(())
}

async fn build_worker(config: ValidatedConfig) -> Result<Worker> {
    let tokens: Arc<dyn TokenProvider> = match config.identity {
        IdentitySource::Managed {
            client_id,
            request_timeout,
        } => {
            let endpoint = IdentityEndpoint::from_env();
            let kind = match &endpoint {
                IdentityEndpoint::AppService { .. } => "app_service",
                IdentityEndpoint::Imds { .. } => "imds",
            };
            info!(endpoint = kind, "using managed identity");
            let credential = ManagedIdentityCredential::new(endpoint, client_id, request_timeout)?;
            Arc::new(CachedTokenProvider::new(credential))
        }
        IdentitySource::Static { token } => {
            info!("using static token");
            Arc::new(CachedTokenProvider::new(StaticTokenProvider::new(token)?))
        }
    };

    let invoker = CallbackInvoker::new(tokens, Arc::new(ReqwestTransport::new()), config.callback);
    let targets = config.handler.archive.clone();
    let handler = MessageHandler::new(Arc::new(invoker), config.handler);

    let mut dispatcher = EnvelopeDispatcher::new();
    if let Some(blob) = &targets.blob {
        let root = config.archive_root.join("blobs");
        info!(root = %root.display(), slot = %blob.slot, "blob archive enabled");
        dispatcher = dispatcher.with_blob_sink(blob.slot.clone(), Arc::new(FsBlobStore::new(root)));
    }
    if let Some(document) = &targets.document {
        let root = config.archive_root.join("documents");
        info!(root = %root.display(), slot = %document.slot, "document archive enabled");
        dispatcher = dispatcher
            .with_document_sink(document.slot.clone(), Arc::new(FsDocumentStore::new(root)));
    }

    let unrouted: Vec<String> = targets
        .slots()
        .into_iter()
        .filter(|slot| !dispatcher.has_sink(slot))
        .map(|slot| slot.to_string())
        .collect();
    if !unrouted.is_empty() {
        anyhow::bail!("no archive sink registered for slots: {}", unrouted.join(", "));
    }

    let source = SpoolQueueSource::open(&config.spool_dir, config.spool)
        .await
        .with_context(|| format!("failed to open spool at {}", config.spool_dir.display()))?;

    Ok(Worker::new(
        Arc::new(source),
        Arc::new(handler),
        Arc::new(dispatcher),
        Arc::new(config.settings),
        config.worker,
    ))
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "could not install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
