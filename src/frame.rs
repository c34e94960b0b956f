use serde_json::Value;

use crate::error::Error;
use crate::event::Event;

/// One websocket message payload, either text or binary. Mirrors the set of shapes a
/// `tokio-tungstenite` `Message` can carry that are relevant to the tail protocol.
pub enum RawFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Extract a [`RawFrame`] from a websocket message, or `None` for control frames
/// (ping/pong/close) that carry no events — the managed socket handles those directly.
pub fn frame_from_message(msg: tokio_tungstenite::tungstenite::Message) -> Option<RawFrame> {
    use tokio_tungstenite::tungstenite::Message;
    match msg {
        Message::Text(t) => Some(RawFrame::Text(t.to_string())),
        Message::Binary(b) => Some(RawFrame::Binary(b.to_vec())),
        _ => None,
    }
}

/// Decode one tail frame into a non-empty, ordered sequence of events.
///
/// Behavior: decode bytes as UTF-8 if binary, parse as JSON, accept either a single
/// event object or a non-empty array. Any failure fails with [`Error::FrameDecode`]
/// whose message names the first schema issue.
pub fn decode_frame(frame: RawFrame) -> Result<Vec<Event>, Error> {
    let text = match frame {
        RawFrame::Text(t) => t,
        RawFrame::Binary(b) => String::from_utf8(b)
            .map_err(|e| Error::FrameDecode(format!("frame is not valid UTF-8: {e}")))?,
    };

    let value: Value = serde_json::from_str(&text)
        .map_err(|e| Error::FrameDecode(format!("frame is not valid JSON: {e}")))?;

    let events = match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(Error::FrameDecode(
                    "frame array must not be empty".to_string(),
                ));
            }
            items
                .into_iter()
                .map(Event::from_value)
                .collect::<Result<Vec<_>, _>>()?
        }
        single @ Value::Object(_) => vec![Event::from_value(single)?],
        _ => {
            return Err(Error::FrameDecode(
                "frame must be a JSON object or a non-empty array of objects".to_string(),
            ))
        }
    };

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_event_object() {
        let frame = RawFrame::Text(r#"{"seq":1,"type":"t","payload":{},"actor":"agent:a"}"#.into());
        let events = decode_frame(frame).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].seq, 1);
    }

    #[test]
    fn decodes_array_of_events_preserving_order() {
        let frame = RawFrame::Text(
            r#"[{"seq":1,"type":"t","payload":{},"actor":"agent:a"},
                {"seq":2,"type":"t","payload":{},"actor":"agent:a"}]"#
                .into(),
        );
        let events = decode_frame(frame).unwrap();
        assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn decodes_binary_utf8_frame() {
        let bytes = br#"{"seq":7,"type":"t","payload":{},"actor":"agent:a"}"#.to_vec();
        let events = decode_frame(RawFrame::Binary(bytes)).unwrap();
        assert_eq!(events[0].seq, 7);
    }

    #[test]
    fn rejects_non_utf8_binary() {
        let bytes = vec![0xff, 0xfe, 0xfd];
        let err = decode_frame(RawFrame::Binary(bytes)).unwrap_err();
        assert!(matches!(err, Error::FrameDecode(_)));
    }

    #[test]
    fn rejects_empty_array() {
        let frame = RawFrame::Text("[]".into());
        let err = decode_frame(frame).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn rejects_malformed_json() {
        let frame = RawFrame::Text("{not json".into());
        let err = decode_frame(frame).unwrap_err();
        assert!(matches!(err, Error::FrameDecode(_)));
    }

    #[test]
    fn names_first_schema_issue() {
        let frame = RawFrame::Text(r#"{"type":"t","payload":{},"actor":"agent:a"}"#.into());
        let err = decode_frame(frame).unwrap_err();
        assert!(err.to_string().contains("seq"));
    }
}
