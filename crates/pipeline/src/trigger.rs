//! Trigger adapter: turns a delivered [`RawMessage`] into a typed [`Event`].
//!
//! Decoding never swallows malformed input. Any failure is returned as a
//! [`DecodeError`] so the queue source can apply its own redelivery and
//! dead-letter policy.

use tracing::{debug, error};

use crate::{DecodeError, Event, InvocationContext, MessageMetadata, RawMessage};

/// Returns `true` if `content_type` can carry a JSON event.
///
/// Accepts `application/json`, `text/json` and any `+json` suffix type, with
/// or without parameters. A missing content type is accepted: many senders
/// never set one.
fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence == "text/json" || essence.ends_with("+json")
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Decodes a delivered message into an [`Event`].
///
/// # Errors
///
/// Returns a [`DecodeError`] for unsupported content types, empty bodies,
/// invalid JSON, and JSON values other than objects.
pub fn decode(raw: &RawMessage) -> Result<Event, DecodeError> {
    if let Some(content_type) = raw.content_type.as_deref() {
        if !is_json_content_type(content_type) {
            return Err(DecodeError::UnsupportedContentType {
                message_id: raw.message_id.clone(),
                content_type: content_type.to_string(),
            });
        }
    }

    if raw.body.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::EmptyBody {
            message_id: raw.message_id.clone(),
        });
    }

    let value: serde_json::Value =
        serde_json::from_slice(&raw.body).map_err(|e| DecodeError::Malformed {
            message_id: raw.message_id.clone(),
            reason: e.to_string(),
        })?;

    let serde_json::Value::Object(payload) = value else {
        return Err(DecodeError::NotAnObject {
            message_id: raw.message_id.clone(),
            found: json_kind(&value),
        });
    };

    let metadata = MessageMetadata {
        message_id: raw.message_id.clone(),
        content_type: raw.content_type.clone(),
        body_len: raw.body.len(),
        delivery_count: raw.delivery_count,
    };
    Ok(Event::new(metadata, payload))
}

/// Logs receipt of a message and decodes it.
///
/// Decode failures are logged as fatal to the invocation before being
/// returned.
pub fn receive(raw: &RawMessage, ctx: &InvocationContext) -> Result<Event, DecodeError> {
    debug!(
        invocation_id = %ctx.invocation_id(),
        message_id = %raw.message_id,
        delivery_count = raw.delivery_count,
        body_len = raw.body.len(),
        "message received"
    );

    decode(raw).inspect_err(|e| {
        error!(
            invocation_id = %ctx.invocation_id(),
            message_id = %raw.message_id,
            delivery_count = raw.delivery_count,
            fatal = true,
            error = %e,
            "message could not be decoded"
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageId;
    use serde_json::json;

    fn raw(content_type: Option<&str>, body: &[u8]) -> RawMessage {
        RawMessage {
            message_id: MessageId::new("msg-1").unwrap(),
            content_type: content_type.map(str::to_string),
            body: body.to_vec(),
            delivery_count: 2,
        }
    }

    #[test]
    fn test_decode_json_object() {
        let event = decode(&raw(Some("application/json"), br#"{"id":"abc123","body":"hello"}"#))
            .unwrap();
        assert_eq!(event.payload().get("id"), Some(&json!("abc123")));
        assert_eq!(event.metadata().delivery_count, 2);
        assert_eq!(event.metadata().body_len, 30);
    }

    #[test]
    fn test_decode_accepts_missing_and_parameterised_content_types() {
        assert!(decode(&raw(None, b"{}")).is_ok());
        assert!(decode(&raw(Some("application/json; charset=utf-8"), b"{}")).is_ok());
        assert!(decode(&raw(Some("application/cloudevents+json"), b"{}")).is_ok());
    }

    #[test]
    fn test_decode_rejects_unsupported_content_type() {
        let err = decode(&raw(Some("application/octet-stream"), b"{}")).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedContentType { .. }));
    }

    #[test]
    fn test_decode_rejects_empty_body() {
        assert!(matches!(decode(&raw(None, b"")).unwrap_err(), DecodeError::EmptyBody { .. }));
        assert!(matches!(decode(&raw(None, b"  \n")).unwrap_err(), DecodeError::EmptyBody { .. }));
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        let err = decode(&raw(None, b"{\"id\":")).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn test_decode_rejects_non_objects() {
        let err = decode(&raw(None, b"[1,2]")).unwrap_err();
        assert_eq!(
            err,
            DecodeError::NotAnObject {
                message_id: MessageId::new("msg-1").unwrap(),
                found: "array"
            }
        );
    }
}
