//! Directory-backed queue source.
//!
//! ```text
//! <root>/inbox/<message-id>.json          - waiting for a consumer
//! <root>/processing/<message-id>.json     - claimed, not yet settled
//! <root>/deadletter/<message-id>.json     - given up on
//! <root>/deadletter/<message-id>.reason.json
//! <root>/attempts/<message-id>            - deliveries so far
//! ```
//!
//! A message is claimed by renaming it from `inbox/` into `processing/`, so
//! two consumers sharing a root never receive the same delivery. Files in
//! `processing/` at open time belong to a consumer that died mid-invocation
//! and are returned to the inbox.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use pipeline::{Delivery, MessageId, QueueError, QueueSource, RawMessage, ReceiptHandle, Timestamp};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Deliveries allowed before an abandoned message is dead-lettered.
pub const DEFAULT_MAX_DELIVERY_COUNT: u32 = 10;

/// Delay between inbox scans while the inbox is empty.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

const MESSAGE_EXTENSION: &str = "json";
const SPOOL_CONTENT_TYPE: &str = "application/json";
const REASON_SUFFIX: &str = ".reason";

/// Tuning for [`SpoolQueueSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpoolOptions {
    /// Deliveries after which `abandon` dead-letters instead of requeueing.
    pub max_delivery_count: u32,
    /// Inbox scan interval when idle.
    pub poll_interval: Duration,
}

impl Default for SpoolOptions {
    fn default() -> Self {
        Self {
            max_delivery_count: DEFAULT_MAX_DELIVERY_COUNT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Serialize)]
struct DeadLetterRecord<'a> {
    message_id: &'a str,
    reason: &'a str,
    delivery_count: u32,
    dead_lettered_at: Timestamp,
}

/// Rejects ids that are empty, hidden, would escape the spool directory, or
/// would collide with a dead-letter reason file.
fn validate_message_id(id: &str) -> Result<MessageId, QueueError> {
    let unsafe_id = id.is_empty()
        || id.starts_with('.')
        || id.ends_with(REASON_SUFFIX)
        || id.contains('/')
        || id.contains('\\')
        || id.contains('\0');
    if unsafe_id {
        return Err(QueueError::InvalidMessageId(id.to_string()));
    }
    MessageId::new(id).ok_or_else(|| QueueError::InvalidMessageId(id.to_string()))
}

/// Filesystem spool implementing [`QueueSource`].
#[derive(Debug, Clone)]
pub struct SpoolQueueSource {
    root: PathBuf,
    options: SpoolOptions,
}

impl SpoolQueueSource {
    /// Opens (creating if needed) a spool at `root` and requeues any
    /// deliveries left in `processing/` by a previous run.
    ///
    /// Must be called before any consumer of the same root is running.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Io`] if the directories cannot be created or
    /// scanned.
    pub async fn open(root: impl Into<PathBuf>, options: SpoolOptions) -> Result<Self, QueueError> {
        let spool = Self {
            root: root.into(),
            options,
        };
        for dir in [spool.inbox(), spool.processing(), spool.deadletter(), spool.attempts()] {
            tokio::fs::create_dir_all(&dir).await?;
        }

        let recovered = spool.recover_interrupted().await?;
        if recovered > 0 {
            warn!(recovered, root = %spool.root.display(), "requeued interrupted deliveries");
        }
        info!(root = %spool.root.display(), "spool opened");
        Ok(spool)
    }

    fn inbox(&self) -> PathBuf {
        self.root.join("inbox")
    }

    fn processing(&self) -> PathBuf {
        self.root.join("processing")
    }

    fn deadletter(&self) -> PathBuf {
        self.root.join("deadletter")
    }

    fn attempts(&self) -> PathBuf {
        self.root.join("attempts")
    }

    fn file_name(id: &str) -> String {
        format!("{id}.{MESSAGE_EXTENSION}")
    }

    /// Adds a message to the inbox.
    ///
    /// The body is written to a hidden temp file first, so consumers never
    /// claim a partial message.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidMessageId`] for unsafe ids and
    /// [`QueueError::Io`] for filesystem failures.
    pub async fn enqueue(&self, message_id: &str, body: &[u8]) -> Result<MessageId, QueueError> {
        let id = validate_message_id(message_id)?;
        let inbox = self.inbox();
        let temp_path = inbox.join(format!(".{message_id}.{}.tmp", Uuid::new_v4().simple()));
        {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(body).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&temp_path, inbox.join(Self::file_name(message_id))).await?;
        debug!(message_id, "message enqueued");
        Ok(id)
    }

    /// Lists ids of dead-lettered messages in id order.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Io`] if the directory cannot be read.
    pub async fn dead_lettered(&self) -> Result<Vec<String>, QueueError> {
        let mut ids = message_ids_in(&self.deadletter()).await?;
        ids.retain(|id| !id.ends_with(REASON_SUFFIX));
        Ok(ids)
    }

    async fn recover_interrupted(&self) -> Result<usize, QueueError> {
        let mut recovered = 0;
        for id in message_ids_in(&self.processing()).await? {
            let name = Self::file_name(&id);
            match tokio::fs::rename(self.processing().join(&name), self.inbox().join(&name)).await {
                Ok(()) => recovered += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(recovered)
    }

    /// Deliveries recorded so far. An unreadable count is treated as one short
    /// of the limit, so the next abandon dead-letters the message.
    async fn read_attempts(&self, id: &str) -> Result<u32, QueueError> {
        match tokio::fs::read_to_string(self.attempts().join(id)).await {
            Ok(text) => match text.trim().parse() {
                Ok(count) => Ok(count),
                Err(e) => {
                    warn!(message_id = id, error = %e, "delivery counter is corrupt, treating as final delivery");
                    Ok(self.options.max_delivery_count.saturating_sub(1))
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_attempts(&self, id: &str, count: u32) -> Result<(), QueueError> {
        let dir = self.attempts();
        let temp_path = dir.join(format!(".{id}.{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&temp_path, count.to_string()).await?;
        tokio::fs::rename(&temp_path, dir.join(id)).await?;
        Ok(())
    }

    async fn remove_attempts(&self, id: &str) -> Result<(), QueueError> {
        match tokio::fs::remove_file(self.attempts().join(id)).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Claims the first inbox message, if any.
    async fn try_claim(&self) -> Result<Option<Delivery>, QueueError> {
        for id in message_ids_in(&self.inbox()).await? {
            let message_id = match validate_message_id(&id) {
                Ok(message_id) => message_id,
                Err(e) => {
                    warn!(error = %e, "skipping unclaimable inbox file");
                    continue;
                }
            };

            let receipt = ReceiptHandle::new(id.clone())
                .ok_or_else(|| QueueError::InvalidMessageId(id.clone()))?;
            let name = Self::file_name(&id);
            let claimed = self.processing().join(&name);
            match tokio::fs::rename(self.inbox().join(&name), &claimed).await {
                Ok(()) => {}
                // Another consumer won the race.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }

            let (delivery_count, body) = match self.load_claimed(&id, &claimed).await {
                Ok(loaded) => loaded,
                Err(e) => {
                    self.release_claim(&id, &claimed).await;
                    return Err(e);
                }
            };

            debug!(message_id = %message_id, delivery_count, "message claimed");
            return Ok(Some(Delivery {
                message: RawMessage {
                    message_id,
                    content_type: Some(SPOOL_CONTENT_TYPE.to_string()),
                    body,
                    delivery_count,
                },
                receipt,
            }));
        }
        Ok(None)
    }

    /// Bumps the delivery counter and reads the body of a claimed message.
    async fn load_claimed(&self, id: &str, claimed: &Path) -> Result<(u32, Vec<u8>), QueueError> {
        let delivery_count = self.read_attempts(id).await?.saturating_add(1);
        self.write_attempts(id, delivery_count).await?;
        let body = tokio::fs::read(claimed).await?;
        Ok((delivery_count, body))
    }

    /// Returns a claimed message to the inbox after a failed claim.
    async fn release_claim(&self, id: &str, claimed: &Path) {
        let inbox = self.inbox().join(Self::file_name(id));
        if let Err(e) = tokio::fs::rename(claimed, &inbox).await {
            error!(message_id = id, error = %e, "failed to return claimed message to the inbox");
        }
    }

    fn claimed_path(&self, delivery: &Delivery) -> PathBuf {
        self.processing().join(Self::file_name(delivery.receipt.as_str()))
    }

    async fn move_claimed(&self, delivery: &Delivery, to: PathBuf) -> Result<(), QueueError> {
        match tokio::fs::rename(self.claimed_path(delivery), to).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(QueueError::UnknownReceipt(delivery.receipt.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Lists `<id>.json` files in `dir`, skipping hidden temp files, sorted by id.
async fn message_ids_in(dir: &Path) -> Result<Vec<String>, QueueError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut ids = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.extension().is_some_and(|e| e == MESSAGE_EXTENSION) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem.starts_with('.') {
            continue;
        }
        ids.push(stem.to_string());
    }
    ids.sort();
    Ok(ids)
}

#[async_trait]
impl QueueSource for SpoolQueueSource {
    async fn receive(&self, cancel: &CancellationToken) -> Result<Option<Delivery>, QueueError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(delivery) = self.try_claim().await? {
                return Ok(Some(delivery));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }
        }
    }

    #[instrument(skip_all, fields(message_id = %delivery.message.message_id))]
    async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError> {
        match tokio::fs::remove_file(self.claimed_path(delivery)).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(QueueError::UnknownReceipt(delivery.receipt.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        self.remove_attempts(delivery.receipt.as_str()).await?;
        debug!("message completed");
        Ok(())
    }

    #[instrument(skip_all, fields(message_id = %delivery.message.message_id))]
    async fn abandon(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let delivery_count = delivery.message.delivery_count;
        if delivery_count >= self.options.max_delivery_count {
            warn!(
                delivery_count,
                max_delivery_count = self.options.max_delivery_count,
                "max delivery count reached"
            );
            let reason = format!("max delivery count exceeded; last error: {reason}");
            return self.dead_letter(delivery, &reason).await;
        }

        let name = Self::file_name(delivery.receipt.as_str());
        self.move_claimed(delivery, self.inbox().join(name)).await?;
        debug!(delivery_count, reason, "message abandoned");
        Ok(())
    }

    #[instrument(skip_all, fields(message_id = %delivery.message.message_id))]
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let id = delivery.receipt.as_str();
        let dir = self.deadletter();
        self.move_claimed(delivery, dir.join(Self::file_name(id))).await?;

        let record = DeadLetterRecord {
            message_id: id,
            reason,
            delivery_count: delivery.message.delivery_count,
            dead_lettered_at: Timestamp::now(),
        };
        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|e| QueueError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        tokio::fs::write(dir.join(format!("{id}{REASON_SUFFIX}.{MESSAGE_EXTENSION}")), bytes).await?;
        self.remove_attempts(id).await?;

        warn!(reason, "message dead-lettered");
        Ok(())
    }
}
