//! Wire framing for the realtime channel.
//!
//! Every WebSocket text frame carries one named event:
//!
//! ```text
//! {"event": "new_message", "data": { ... }}
//! ```
//!
//! Frames are decoded into [`InboundEvent`] by [`WireFrame::decode`], and
//! outbound events are framed with [`WireFrame::from_event`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use chatwire_core::prelude::*;
use chatwire_core::{parse_inbound, InboundEvent, OutboundEvent};

// ---------------------------------------------------------------------------
// WireFrame
// ---------------------------------------------------------------------------

/// One named event on the realtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFrame {
    /// Event name, e.g. `"new_message"`.
    pub event: String,
    /// Event payload. Absent payloads decode as `null`.
    #[serde(default)]
    pub data: Value,
}

impl WireFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Frame a typed outbound event.
    pub fn from_event(event: &OutboundEvent) -> Self {
        Self::new(event.name(), event.payload())
    }

    /// Serialize for a text frame.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode the payload into an [`InboundEvent`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedEvent`] for unknown names and bad payloads.
    pub fn decode(self) -> Result<InboundEvent> {
        parse_inbound(&self.event, self.data)
    }
}

// ---------------------------------------------------------------------------
// Parsed message discriminant
// ---------------------------------------------------------------------------

/// The result of parsing a raw text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// A well-formed `{event, data}` frame.
    Frame(WireFrame),
    /// A frame we received but could not interpret.
    Unknown(String),
}

/// Parse a raw text frame into a [`WireMessage`].
///
/// Frames that are not JSON objects with a string `event` field are returned
/// as [`WireMessage::Unknown`].
pub fn parse_wire_message(text: &str) -> WireMessage {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return WireMessage::Unknown(text.to_string()),
    };

    if !value.get("event").is_some_and(Value::is_string) {
        return WireMessage::Unknown(text.to_string());
    }

    match serde_json::from_value::<WireFrame>(value) {
        Ok(frame) => WireMessage::Frame(frame),
        Err(_) => WireMessage::Unknown(text.to_string()),
    }
}

/// Shorten a raw frame for diagnostics.
pub(crate) fn preview(raw: &str) -> &str {
    let mut end = raw.len().min(120);
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    &raw[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatwire_core::PresenceStatus;
    use serde_json::json;

    #[test]
    fn test_parse_event_frame() {
        let text = r#"{"event":"typing_start","data":{"roomId":"r1","userId":"u2"}}"#;
        let WireMessage::Frame(frame) = parse_wire_message(text) else {
            panic!("expected a frame");
        };
        assert_eq!(frame.event, "typing_start");
        assert_eq!(frame.data["roomId"], "r1");

        let event = frame.decode().unwrap();
        assert_eq!(event.tag(), "TypingStarted");
    }

    #[test]
    fn test_frame_without_data_is_null() {
        let WireMessage::Frame(frame) = parse_wire_message(r#"{"event":"get_rooms"}"#) else {
            panic!("expected a frame");
        };
        assert_eq!(frame.data, Value::Null);
    }

    #[test]
    fn test_invalid_json_is_unknown() {
        assert!(matches!(
            parse_wire_message("not json"),
            WireMessage::Unknown(_)
        ));
    }

    #[test]
    fn test_missing_or_non_string_event_is_unknown() {
        assert!(matches!(
            parse_wire_message(r#"{"data":{}}"#),
            WireMessage::Unknown(_)
        ));
        assert!(matches!(
            parse_wire_message(r#"{"event":42}"#),
            WireMessage::Unknown(_)
        ));
        assert!(matches!(parse_wire_message("[1,2]"), WireMessage::Unknown(_)));
    }

    #[test]
    fn test_unknown_event_name_fails_decode() {
        let frame = WireFrame::new("stock_ticker", json!({}));
        assert!(matches!(
            frame.decode(),
            Err(Error::MalformedEvent { .. })
        ));
    }

    #[test]
    fn test_outbound_frame_text() {
        let frame = WireFrame::from_event(&OutboundEvent::UpdateStatus(PresenceStatus::Busy));
        let text = frame.to_text().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({ "event": "update_status", "data": { "status": "busy" } }));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let raw = "é".repeat(100);
        let shown = preview(&raw);
        assert!(shown.len() <= 120);
        assert!(raw.starts_with(shown));
    }
}
