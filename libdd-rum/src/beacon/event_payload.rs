// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! JSON payload assembly for `send_event` / `send_biz_event`.

use serde_json::{Map, Value};
use thiserror::Error;

/// Hard upper bound of a serialized event payload.
pub const MAX_EVENT_PAYLOAD_BYTES: usize = 16 * 1024;

/// Schema version stamped into every payload.
const SCHEMA_VERSION: &str = "1.2";

/// The one user-visible failure of the event API.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventPayloadError {
    /// The serialized payload exceeds [`MAX_EVENT_PAYLOAD_BYTES`].
    #[error("event payload of {size} bytes exceeds the {MAX_EVENT_PAYLOAD_BYTES} byte limit")]
    TooLarge { size: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventKind {
    Rum,
    Biz,
}

/// Session-scoped values forced into every payload.
pub(crate) struct EventPayloadContext<'a> {
    pub application_id: &'a str,
    pub instance_id: i64,
    pub session_number: i32,
    pub timestamp_nanos: u64,
    pub application_version: &'a str,
    pub operating_system: Option<&'a str>,
    pub manufacturer: Option<&'a str>,
    pub model_id: Option<&'a str>,
}

/// Builds the final JSON string: caller attributes minus reserved
/// `dt.*` keys, then the forced attributes on top.
pub(crate) fn build(
    kind: EventKind,
    name: &str,
    attributes: Map<String, Value>,
    ctx: &EventPayloadContext<'_>,
) -> Result<String, EventPayloadError> {
    let mut payload: Map<String, Value> = attributes
        .into_iter()
        .filter(|(key, _)| !key.starts_with("dt."))
        .collect();

    let has_non_finite = contains_non_finite(payload.values());

    match kind {
        EventKind::Rum => {
            payload.insert("event.name".to_string(), Value::from(name));
            payload.insert("event.kind".to_string(), Value::from("RUM_EVENT"));
        }
        EventKind::Biz => {
            payload.insert("event.type".to_string(), Value::from(name));
            payload.insert("event.kind".to_string(), Value::from("BIZ_EVENT"));
        }
    }
    payload.insert("timestamp".to_string(), Value::from(ctx.timestamp_nanos));
    payload.insert(
        "dt.rum.application.id".to_string(),
        Value::from(ctx.application_id),
    );
    payload.insert(
        "dt.rum.instance.id".to_string(),
        Value::from(ctx.instance_id.to_string()),
    );
    payload.insert(
        "dt.rum.sid".to_string(),
        Value::from(ctx.session_number.to_string()),
    );
    payload.insert(
        "dt.rum.schema_version".to_string(),
        Value::from(SCHEMA_VERSION),
    );
    if has_non_finite {
        payload.insert("dt.rum.has_nfn_values".to_string(), Value::from(true));
    }

    payload.insert(
        "app.version".to_string(),
        Value::from(ctx.application_version),
    );
    if let Some(os) = ctx.operating_system {
        payload.insert("os.name".to_string(), Value::from(os));
    }
    if let Some(manufacturer) = ctx.manufacturer {
        payload.insert(
            "device.manufacturer".to_string(),
            Value::from(manufacturer),
        );
    }
    if let Some(model) = ctx.model_id {
        payload.insert("device.model.identifier".to_string(), Value::from(model));
    }

    let serialized = Value::Object(payload).to_string();
    if serialized.len() > MAX_EVENT_PAYLOAD_BYTES {
        return Err(EventPayloadError::TooLarge {
            size: serialized.len(),
        });
    }
    Ok(serialized)
}

// `serde_json` numbers cannot hold NaN or infinities today, so this
// only fires for value models that can; the wire flag is part of the
// payload contract either way.
fn contains_non_finite<'a>(values: impl Iterator<Item = &'a Value>) -> bool {
    values.into_iter().any(non_finite)
}

fn non_finite(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.as_f64().is_some_and(|f| !f.is_finite()),
        Value::Array(items) => items.iter().any(non_finite),
        Value::Object(map) => contains_non_finite(map.values()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> EventPayloadContext<'static> {
        EventPayloadContext {
            application_id: "APP",
            instance_id: 42,
            session_number: 17,
            timestamp_nanos: 1_000_000_000,
            application_version: "2.1.0",
            operating_system: Some("linux"),
            manufacturer: None,
            model_id: None,
        }
    }

    fn parse(payload: &str) -> Map<String, Value> {
        match serde_json::from_str(payload).unwrap() {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn rum_event_carries_forced_attributes() {
        let payload = build(EventKind::Rum, "click", Map::new(), &ctx()).unwrap();
        let parsed = parse(&payload);
        assert_eq!(parsed["event.name"], json!("click"));
        assert_eq!(parsed["event.kind"], json!("RUM_EVENT"));
        assert_eq!(parsed["timestamp"], json!(1_000_000_000u64));
        assert_eq!(parsed["dt.rum.application.id"], json!("APP"));
        assert_eq!(parsed["dt.rum.instance.id"], json!("42"));
        assert_eq!(parsed["dt.rum.sid"], json!("17"));
        assert_eq!(parsed["dt.rum.schema_version"], json!("1.2"));
        assert_eq!(parsed["app.version"], json!("2.1.0"));
        assert_eq!(parsed["os.name"], json!("linux"));
        assert!(!parsed.contains_key("device.manufacturer"));
    }

    #[test]
    fn biz_event_uses_event_type() {
        let payload = build(EventKind::Biz, "purchase", Map::new(), &ctx()).unwrap();
        let parsed = parse(&payload);
        assert_eq!(parsed["event.type"], json!("purchase"));
        assert_eq!(parsed["event.kind"], json!("BIZ_EVENT"));
        assert!(!parsed.contains_key("event.name"));
    }

    #[test]
    fn caller_attributes_survive() {
        let mut attrs = Map::new();
        attrs.insert("cart.size".to_string(), json!(3));
        let payload = build(EventKind::Rum, "checkout", attrs, &ctx()).unwrap();
        assert_eq!(parse(&payload)["cart.size"], json!(3));
    }

    #[test]
    fn reserved_keys_are_cleaned_then_reinstated() {
        let mut attrs = Map::new();
        attrs.insert("dt.rum.sid".to_string(), json!("spoofed"));
        attrs.insert("dt.anything".to_string(), json!(1));
        let payload = build(EventKind::Rum, "x", attrs, &ctx()).unwrap();
        let parsed = parse(&payload);
        assert_eq!(parsed["dt.rum.sid"], json!("17"));
        assert!(!parsed.contains_key("dt.anything"));
    }

    #[test]
    fn forced_attributes_override_caller_values() {
        let mut attrs = Map::new();
        attrs.insert("event.kind".to_string(), json!("FORGED"));
        attrs.insert("timestamp".to_string(), json!(5));
        let payload = build(EventKind::Rum, "x", attrs, &ctx()).unwrap();
        let parsed = parse(&payload);
        assert_eq!(parsed["event.kind"], json!("RUM_EVENT"));
        assert_eq!(parsed["timestamp"], json!(1_000_000_000u64));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut attrs = Map::new();
        attrs.insert("blob".to_string(), json!("x".repeat(17_000)));
        let err = build(EventKind::Rum, "x", attrs, &ctx()).unwrap_err();
        assert!(matches!(err, EventPayloadError::TooLarge { size } if size > 17_000));
    }

    #[test]
    fn payload_just_under_the_limit_passes() {
        let mut attrs = Map::new();
        attrs.insert("blob".to_string(), json!("x".repeat(15_000)));
        assert!(build(EventKind::Rum, "x", attrs, &ctx()).is_ok());
    }
}
