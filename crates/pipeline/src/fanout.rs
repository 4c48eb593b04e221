//! Archive fan-out: one envelope entry per configured sink.
//!
//! Keys are deterministic so every sink tolerates at-least-once delivery:
//!
//! - blob keys render a [`PathTemplate`] with values taken from the event and
//!   the invocation timestamp (captured at invocation start, never at write
//!   time);
//! - document keys come from the event's own fields, falling back to a UUID v5
//!   of the canonical payload, so a redelivered message overwrites its earlier
//!   copy.

use tracing::debug;
use uuid::Uuid;

use crate::{
    ArchiveEntry, BlobKey, DocumentId, Event, FanoutError, InvocationContext, OutputEnvelope,
    PartitionKey, PathTemplate, SinkName, TemplateValues,
};

/// Namespace for content-derived document ids.
const DOCUMENT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b7e_4d3a_5c9e_8a0b_1f2e_3d4c_5b6a);

/// Blob archive output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobTarget {
    /// Slot (and sink) name.
    pub slot: SinkName,
    /// Key template.
    pub template: PathTemplate,
    /// Event field used for `{name}`; `name` and then the message id are the
    /// fallbacks.
    pub name_field: String,
}

impl Default for BlobTarget {
    fn default() -> Self {
        Self {
            slot: SinkName::archive_blob(),
            template: PathTemplate::default(),
            name_field: "id".to_string(),
        }
    }
}

/// Document archive output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentTarget {
    /// Slot (and sink) name.
    pub slot: SinkName,
    /// Event field holding the partition key.
    pub partition_key_field: String,
    /// Event field holding the document id.
    pub id_field: String,
}

impl Default for DocumentTarget {
    fn default() -> Self {
        Self {
            slot: SinkName::archive_document(),
            partition_key_field: "id".to_string(),
            id_field: "id".to_string(),
        }
    }
}

/// The sinks every invocation writes to. Fixed per deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTargets {
    /// Blob output, if enabled.
    pub blob: Option<BlobTarget>,
    /// Document output, if enabled.
    pub document: Option<DocumentTarget>,
}

impl Default for ArchiveTargets {
    fn default() -> Self {
        Self {
            blob: Some(BlobTarget::default()),
            document: None,
        }
    }
}

impl ArchiveTargets {
    /// Returns the slot names in use.
    pub fn slots(&self) -> Vec<SinkName> {
        self.blob
            .iter()
            .map(|b| b.slot.clone())
            .chain(self.document.iter().map(|d| d.slot.clone()))
            .collect()
    }
}

/// Builds output envelopes for a fixed set of [`ArchiveTargets`].
#[derive(Debug, Clone, Default)]
pub struct ArchiveFanout {
    targets: ArchiveTargets,
}

impl ArchiveFanout {
    /// Creates a fan-out for `targets`.
    pub fn new(targets: ArchiveTargets) -> Self {
        Self { targets }
    }

    /// Populates one envelope entry per configured target.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::UnsafeKey`] if a rendered blob key is not a safe
    /// relative path, [`FanoutError::SlotOccupied`] if two targets share a
    /// slot, and [`FanoutError::Serialisation`] if a content-derived id cannot
    /// be computed.
    pub fn fan_out(
        &self,
        event: &Event,
        ctx: &InvocationContext,
    ) -> Result<OutputEnvelope, FanoutError> {
        let mut envelope = OutputEnvelope::new();

        if let Some(target) = &self.targets.blob {
            let key = blob_key(target, event, ctx)?;
            debug!(slot = %target.slot, key = %key, "blob output declared");
            envelope.insert(
                target.slot.clone(),
                ArchiveEntry::Blob {
                    key,
                    content: event.clone(),
                },
            )?;
        }

        if let Some(target) = &self.targets.document {
            let (partition_key, document_id) = document_key(target, event)?;
            debug!(
                slot = %target.slot,
                partition_key = %partition_key,
                document_id = %document_id,
                "document output declared"
            );
            envelope.insert(
                target.slot.clone(),
                ArchiveEntry::Document {
                    partition_key,
                    document_id,
                    content: event.clone(),
                },
            )?;
        }

        Ok(envelope)
    }
}

/// Replaces characters that would change the shape of a path.
fn path_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect()
}

fn blob_key(target: &BlobTarget, event: &Event, ctx: &InvocationContext) -> Result<BlobKey, FanoutError> {
    let message_id = event.message_id().as_str();
    let name = event
        .field_as_string(&target.name_field)
        .or_else(|| event.field_as_string("name"))
        .unwrap_or_else(|| message_id.to_string());
    let id = event
        .field_as_string("id")
        .unwrap_or_else(|| message_id.to_string());
    let invocation_id = ctx.invocation_id().to_string();

    let name = path_safe(&name);
    let id = path_safe(&id);
    let message_id = path_safe(message_id);
    let rendered = target.template.render(&TemplateValues {
        name: &name,
        id: &id,
        message_id: &message_id,
        invocation_id: &invocation_id,
        timestamp: ctx.received_at(),
    });

    let unsafe_key = rendered.starts_with('/')
        || rendered.contains('\\')
        || rendered.split('/').any(|segment| segment == ".." || segment == ".");
    if unsafe_key {
        return Err(FanoutError::UnsafeKey { key: rendered });
    }
    BlobKey::new(rendered).ok_or_else(|| FanoutError::UnsafeKey { key: String::new() })
}

/// Rebuilds `value` with object keys in sorted order, whatever map ordering
/// serde_json was compiled with.
fn canonical(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: std::collections::BTreeMap<&String, serde_json::Value> =
                map.iter().map(|(k, v)| (k, canonical(v))).collect();
            serde_json::Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

fn content_id(event: &Event) -> Result<String, FanoutError> {
    let payload = canonical(&serde_json::Value::Object(event.payload().clone()));
    let bytes = serde_json::to_vec(&payload).map_err(|e| FanoutError::Serialisation {
        message: e.to_string(),
    })?;
    Ok(Uuid::new_v5(&DOCUMENT_ID_NAMESPACE, &bytes).to_string())
}

fn document_key(target: &DocumentTarget, event: &Event) -> Result<(PartitionKey, DocumentId), FanoutError> {
    let id = event.field_as_string(&target.id_field);
    let partition = event.field_as_string(&target.partition_key_field);
    let derived = match (&id, &partition) {
        (Some(_), Some(_)) => None,
        _ => Some(content_id(event)?),
    };

    let document_id = id.or_else(|| derived.clone()).and_then(DocumentId::new);
    let partition_key = partition.or(derived).and_then(PartitionKey::new);
    match (partition_key, document_id) {
        (Some(pk), Some(id)) => Ok((pk, id)),
        _ => Err(FanoutError::Serialisation {
            message: "derived an empty document key".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InvocationId, MessageId, MessageMetadata, Timestamp};
    use chrono::TimeZone;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn event(message_id: &str, payload: serde_json::Value) -> Event {
        let serde_json::Value::Object(map) = payload else {
            panic!("test payload must be an object");
        };
        Event::new(
            MessageMetadata {
                message_id: MessageId::new(message_id).unwrap(),
                content_type: Some("application/json".into()),
                body_len: 0,
                delivery_count: 1,
            },
            map,
        )
    }

    fn ctx_at(hms: (u32, u32, u32)) -> InvocationContext {
        let at = chrono::Utc.with_ymd_and_hms(2024, 1, 2, hms.0, hms.1, hms.2).unwrap();
        InvocationContext::with_timestamp(
            InvocationId::new_random(),
            CancellationToken::new(),
            Timestamp::from_utc(at),
        )
    }

    fn both_targets() -> ArchiveTargets {
        ArchiveTargets {
            blob: Some(BlobTarget::default()),
            document: Some(DocumentTarget::default()),
        }
    }

    #[test]
    fn test_one_entry_per_target_with_identical_content() {
        let e = event("m-1", json!({"id": "abc123", "body": "hello"}));
        let envelope = ArchiveFanout::new(both_targets()).fan_out(&e, &ctx_at((12, 0, 0))).unwrap();

        assert_eq!(envelope.len(), 2);
        for (_, entry) in envelope.iter() {
            assert_eq!(entry.content(), &e);
        }
    }

    #[test]
    fn test_slots_list_enabled_targets() {
        assert_eq!(
            both_targets().slots(),
            vec![SinkName::archive_blob(), SinkName::archive_document()]
        );
        assert_eq!(ArchiveTargets::default().slots(), vec![SinkName::archive_blob()]);
    }

    #[test]
    fn test_blob_key_uses_id_and_invocation_timestamp() {
        let e = event("m-1", json!({"id": "abc123", "body": "hello"}));
        let envelope = ArchiveFanout::default().fan_out(&e, &ctx_at((13, 4, 5))).unwrap();

        let Some(ArchiveEntry::Blob { key, .. }) = envelope.get(&SinkName::archive_blob()) else {
            panic!("blob entry missing");
        };
        assert_eq!(key.as_str(), "archive/abc123-20240102-130405-output.json");
        assert!(envelope.get(&SinkName::archive_document()).is_none());
    }

    #[test]
    fn test_blob_name_falls_back_to_name_field_then_message_id() {
        let by_name = event("m-1", json!({"name": "report"}));
        let by_message = event("m-2", json!({"body": "x"}));
        let fanout = ArchiveFanout::default();

        let key = |e: &Event| match fanout.fan_out(e, &ctx_at((0, 0, 0))).unwrap().get(&SinkName::archive_blob()) {
            Some(ArchiveEntry::Blob { key, .. }) => key.to_string(),
            _ => panic!("blob entry missing"),
        };
        assert_eq!(key(&by_name), "archive/report-20240102-000000-output.json");
        assert_eq!(key(&by_message), "archive/m-2-20240102-000000-output.json");
    }

    #[test]
    fn test_path_separators_in_values_are_neutralised() {
        let e = event("m-1", json!({"id": "../../etc/passwd"}));
        let envelope = ArchiveFanout::default().fan_out(&e, &ctx_at((0, 0, 0))).unwrap();
        let Some(ArchiveEntry::Blob { key, .. }) = envelope.get(&SinkName::archive_blob()) else {
            panic!("blob entry missing");
        };
        assert_eq!(key.as_str(), "archive/.._.._etc_passwd-20240102-000000-output.json");
    }

    #[test]
    fn test_unsafe_literal_template_is_rejected() {
        let targets = ArchiveTargets {
            blob: Some(BlobTarget {
                template: PathTemplate::parse("../{id}.json").unwrap(),
                ..BlobTarget::default()
            }),
            document: None,
        };
        let e = event("m-1", json!({"id": "a"}));
        let err = ArchiveFanout::new(targets).fan_out(&e, &ctx_at((0, 0, 0))).unwrap_err();
        assert!(matches!(err, FanoutError::UnsafeKey { .. }));
    }

    #[test]
    fn test_redelivery_keeps_document_key_and_only_blob_timestamp_changes() {
        let first = event("m-1", json!({"id": "abc123", "body": "hello"}));
        let second = event("m-1", json!({"id": "abc123", "body": "hello"}));
        let fanout = ArchiveFanout::new(both_targets());

        let a = fanout.fan_out(&first, &ctx_at((10, 0, 0))).unwrap();
        let b = fanout.fan_out(&second, &ctx_at((10, 0, 1))).unwrap();

        assert_eq!(
            a.get(&SinkName::archive_document()),
            b.get(&SinkName::archive_document())
        );
        let blob_key = |env: &OutputEnvelope| match env.get(&SinkName::archive_blob()) {
            Some(ArchiveEntry::Blob { key, .. }) => key.to_string(),
            _ => panic!("blob entry missing"),
        };
        assert_eq!(blob_key(&a), "archive/abc123-20240102-100000-output.json");
        assert_eq!(blob_key(&b), "archive/abc123-20240102-100001-output.json");
    }

    #[test]
    fn test_document_key_without_id_field_is_content_derived() {
        let targets = ArchiveTargets {
            blob: None,
            document: Some(DocumentTarget::default()),
        };
        let fanout = ArchiveFanout::new(targets);
        let doc = |e: &Event| match fanout.fan_out(e, &ctx_at((0, 0, 0))).unwrap().get(&SinkName::archive_document()) {
            Some(ArchiveEntry::Document { partition_key, document_id, .. }) => {
                (partition_key.to_string(), document_id.to_string())
            }
            _ => panic!("document entry missing"),
        };

        let one = doc(&event("m-1", json!({"body": "hello", "n": 1})));
        let same = doc(&event("m-7", json!({"n": 1, "body": "hello"})));
        let other = doc(&event("m-1", json!({"body": "bye", "n": 1})));

        assert_eq!(one, same);
        assert_ne!(one, other);
        assert_eq!(one.0, one.1);
    }

    #[test]
    fn test_document_partition_from_configured_field() {
        let targets = ArchiveTargets {
            blob: None,
            document: Some(DocumentTarget {
                partition_key_field: "tenant".into(),
                ..DocumentTarget::default()
            }),
        };
        let e = event("m-1", json!({"id": "abc123", "tenant": "contoso"}));
        let envelope = ArchiveFanout::new(targets).fan_out(&e, &ctx_at((0, 0, 0))).unwrap();
        let Some(ArchiveEntry::Document { partition_key, document_id, .. }) =
            envelope.get(&SinkName::archive_document())
        else {
            panic!("document entry missing");
        };
        assert_eq!(partition_key.as_str(), "contoso");
        assert_eq!(document_id.as_str(), "abc123");
    }

    #[test]
    fn test_targets_sharing_a_slot_are_rejected() {
        let targets = ArchiveTargets {
            blob: Some(BlobTarget::default()),
            document: Some(DocumentTarget {
                slot: SinkName::archive_blob(),
                ..DocumentTarget::default()
            }),
        };
        let e = event("m-1", json!({"id": "a"}));
        let err = ArchiveFanout::new(targets).fan_out(&e, &ctx_at((0, 0, 0))).unwrap_err();
        assert_eq!(err, FanoutError::SlotOccupied { slot: SinkName::archive_blob() });
    }
}
