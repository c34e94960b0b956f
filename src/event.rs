use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// An immutable record produced by the server. Opaque to the core beyond `seq` and `actor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inserted_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer_seq: Option<u64>,
}

impl Event {
    /// Parse and validate a single event from an arbitrary JSON value, matching the
    /// frame codec's schema: `seq` non-negative integer, `type` non-empty string,
    /// `payload` object, `actor` non-empty string, remaining fields optional.
    ///
    /// On failure the message names the first schema issue encountered, field by field.
    pub fn from_value(value: Value) -> Result<Self, Error> {
        let Value::Object(ref map) = value else {
            return Err(Error::FrameDecode("event must be a JSON object".into()));
        };

        let seq = match map.get("seq") {
            Some(Value::Number(n)) if n.as_u64().is_some() => n.as_u64().unwrap(),
            Some(Value::Number(_)) => {
                return Err(Error::FrameDecode(
                    "event.seq must be a non-negative integer".into(),
                ))
            }
            Some(_) => {
                return Err(Error::FrameDecode("event.seq must be a number".into()));
            }
            None => return Err(Error::FrameDecode("event.seq is required".into())),
        };

        let event_type = match map.get("type") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::String(_)) => {
                return Err(Error::FrameDecode("event.type must not be empty".into()))
            }
            Some(_) => return Err(Error::FrameDecode("event.type must be a string".into())),
            None => return Err(Error::FrameDecode("event.type is required".into())),
        };

        let payload = match map.get("payload") {
            Some(v @ Value::Object(_)) => v.clone(),
            Some(_) => return Err(Error::FrameDecode("event.payload must be an object".into())),
            None => return Err(Error::FrameDecode("event.payload is required".into())),
        };

        let actor = match map.get("actor") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::String(_)) => {
                return Err(Error::FrameDecode("event.actor must not be empty".into()))
            }
            Some(_) => return Err(Error::FrameDecode("event.actor must be a string".into())),
            None => return Err(Error::FrameDecode("event.actor is required".into())),
        };

        let source = match map.get("source") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => return Err(Error::FrameDecode("event.source must be a string".into())),
        };

        let metadata = match map.get("metadata") {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.clone()),
        };

        let refs = match map.get("refs") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => out.push(s.clone()),
                        _ => {
                            return Err(Error::FrameDecode(
                                "event.refs must be an array of strings".into(),
                            ))
                        }
                    }
                }
                Some(out)
            }
            Some(_) => {
                return Err(Error::FrameDecode(
                    "event.refs must be an array of strings".into(),
                ))
            }
        };

        let idempotency_key = match map.get("idempotency_key") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                return Err(Error::FrameDecode(
                    "event.idempotency_key must be a string".into(),
                ))
            }
        };

        let inserted_at = match map.get("inserted_at") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                return Err(Error::FrameDecode(
                    "event.inserted_at must be a string".into(),
                ))
            }
        };

        let producer_id = match map.get("producer_id") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                return Err(Error::FrameDecode(
                    "event.producer_id must be a string".into(),
                ))
            }
        };

        let producer_seq = match map.get("producer_seq") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) if n.as_u64().is_some() => n.as_u64(),
            Some(_) => {
                return Err(Error::FrameDecode(
                    "event.producer_seq must be a non-negative integer".into(),
                ))
            }
        };

        Ok(Event {
            seq,
            event_type,
            payload,
            actor,
            source,
            metadata,
            refs,
            idempotency_key,
            inserted_at,
            producer_id,
            producer_seq,
        })
    }

    /// The event's `actor` convention prefix, e.g. `"agent"` from `"agent:drafter"`.
    pub fn actor_kind(&self) -> Option<&str> {
        self.actor.split_once(':').map(|(kind, _)| kind)
    }

    /// The event's `actor` name, e.g. `"drafter"` from `"agent:drafter"`.
    pub fn actor_name(&self) -> Option<&str> {
        self.actor.split_once(':').map(|(_, name)| name)
    }

    /// Parse `inserted_at` as an RFC 3339 timestamp, if present. `inserted_at` is
    /// otherwise opaque to the client; this is a convenience for callers that want
    /// to sort or display events without re-parsing the raw string themselves.
    pub fn inserted_at_time(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let raw = self.inserted_at.as_deref()?;
        chrono::DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&chrono::Utc))
    }

    /// Deterministic canonical serialization used for conflict-detecting fingerprints.
    /// `serde_json::Value`'s default map representation is a `BTreeMap`, so round-tripping
    /// through it yields lexicographically sorted object keys — this is a cache-breaking
    /// format choice and must not change without a migration plan.
    pub fn fingerprint(&self) -> Result<String, Error> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_string(&value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "seq": 1,
            "type": "message.created",
            "payload": {"text": "hi"},
            "actor": "agent:drafter",
        })
    }

    #[test]
    fn parses_minimal_event() {
        let e = Event::from_value(sample()).unwrap();
        assert_eq!(e.seq, 1);
        assert_eq!(e.event_type, "message.created");
        assert_eq!(e.actor, "agent:drafter");
        assert_eq!(e.actor_kind(), Some("agent"));
        assert_eq!(e.actor_name(), Some("drafter"));
    }

    #[test]
    fn rejects_missing_seq() {
        let mut v = sample();
        v.as_object_mut().unwrap().remove("seq");
        let err = Event::from_value(v).unwrap_err();
        assert!(err.to_string().contains("seq"));
    }

    #[test]
    fn rejects_empty_type() {
        let mut v = sample();
        v["type"] = json!("");
        let err = Event::from_value(v).unwrap_err();
        assert!(err.to_string().contains("type"));
    }

    #[test]
    fn rejects_non_object_payload() {
        let mut v = sample();
        v["payload"] = json!("not an object");
        let err = Event::from_value(v).unwrap_err();
        assert!(err.to_string().contains("payload"));
    }

    #[test]
    fn fingerprint_is_order_independent_of_field_declaration() {
        let e1 = Event::from_value(sample()).unwrap();
        let mut v2 = sample();
        // Re-order keys in the source JSON; the parsed struct is identical either way.
        let obj = v2.as_object_mut().unwrap();
        let reordered: serde_json::Map<String, Value> = obj.clone().into_iter().rev().collect();
        *obj = reordered;
        let e2 = Event::from_value(v2).unwrap();
        assert_eq!(e1.fingerprint().unwrap(), e2.fingerprint().unwrap());
    }

    #[test]
    fn inserted_at_time_parses_rfc3339() {
        let mut v = sample();
        v["inserted_at"] = json!("2026-01-02T03:04:05Z");
        let e = Event::from_value(v).unwrap();
        let parsed = e.inserted_at_time().unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-01-02T03:04:05+00:00");
    }

    #[test]
    fn inserted_at_time_is_none_when_absent_or_unparseable() {
        let e = Event::from_value(sample()).unwrap();
        assert!(e.inserted_at_time().is_none());

        let mut v = sample();
        v["inserted_at"] = json!("not a timestamp");
        let e2 = Event::from_value(v).unwrap();
        assert!(e2.inserted_at_time().is_none());
    }

    #[test]
    fn fingerprint_differs_on_payload_change() {
        let e1 = Event::from_value(sample()).unwrap();
        let mut v2 = sample();
        v2["payload"] = json!({"text": "bye"});
        let e2 = Event::from_value(v2).unwrap();
        assert_ne!(e1.fingerprint().unwrap(), e2.fingerprint().unwrap());
    }
}
