//! Inbound frame decoding and classification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MalformedFrame;

/// Event kind carrying a log line in `data`.
pub const LOG_EVENT: &str = "LOGS";

/// A decoded event frame. `data` is opaque apart from the few keys read by
/// [`InboundFrame::effects`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

pub type DecodeResult = Result<InboundFrame, MalformedFrame>;

/// Decode a text frame. Anything that is not a JSON object with a string
/// `event` field is reported as [`MalformedFrame`].
pub fn decode(raw: &str) -> DecodeResult {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| MalformedFrame::new(raw, e.to_string()))?;
    // Derived struct impls also accept sequences; frames must be objects.
    if !value.is_object() {
        return Err(MalformedFrame::new(raw, "frame is not a JSON object"));
    }
    serde_json::from_value(value).map_err(|e| MalformedFrame::new(raw, e.to_string()))
}

/// What a frame asks the listener to do.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FrameEffects<'a> {
    /// New session id issued by the remote side.
    pub session_id: Option<&'a str>,
    /// Record the frame as a structured event under this correlation id.
    pub correlation_id: Option<&'a str>,
    /// Append this line to the machine's log.
    pub log_line: Option<String>,
}

impl FrameEffects<'_> {
    pub fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.correlation_id.is_none() && self.log_line.is_none()
    }
}

impl InboundFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Non-empty string at `data.<key>`.
    fn data_str(&self, key: &str) -> Option<&str> {
        self.data
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn session_id(&self) -> Option<&str> {
        self.data_str("sid")
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.data_str("prompt_id")
    }

    pub fn is_log(&self) -> bool {
        self.event == LOG_EVENT
    }

    /// Text of a log frame: strings verbatim, anything else as compact JSON.
    pub fn log_text(&self) -> String {
        match &self.data {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    pub fn effects(&self) -> FrameEffects<'_> {
        FrameEffects {
            session_id: self.session_id(),
            correlation_id: self.correlation_id(),
            log_line: self.is_log().then(|| self.log_text()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_log_frame() {
        let frame = decode(r#"{"event":"LOGS","data":"hello"}"#).unwrap();
        assert_eq!(frame.event, "LOGS");
        let effects = frame.effects();
        assert_eq!(effects.log_line.as_deref(), Some("hello"));
        assert!(effects.correlation_id.is_none());
        assert!(effects.session_id.is_none());
    }

    #[test]
    fn prompt_id_is_independent_of_event_kind() {
        let frame = decode(r#"{"event":"executing","data":{"prompt_id":"abc","node":"3"}}"#).unwrap();
        let effects = frame.effects();
        assert_eq!(effects.correlation_id, Some("abc"));
        assert!(effects.log_line.is_none());
    }

    #[test]
    fn status_frame_carries_sid() {
        let frame = decode(r#"{"event":"status","data":{"sid":"s-1","status":{}}}"#).unwrap();
        assert_eq!(frame.effects().session_id, Some("s-1"));
    }

    #[test]
    fn unknown_event_has_no_effects() {
        let frame = decode(r#"{"event":"progress","data":{"value":3,"max":10}}"#).unwrap();
        assert!(frame.effects().is_empty());
    }

    #[test]
    fn missing_data_decodes_as_null() {
        let frame = decode(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(frame.data, Value::Null);
        assert!(frame.effects().is_empty());
    }

    #[test]
    fn non_string_ids_are_ignored() {
        let frame = InboundFrame::new("x", json!({"sid": 4, "prompt_id": null}));
        assert!(frame.effects().is_empty());
    }

    #[test]
    fn empty_ids_are_ignored() {
        let frame = decode(r#"{"event":"executed","data":{"sid":"","prompt_id":""}}"#).unwrap();
        assert!(frame.effects().is_empty());
    }

    #[test]
    fn structured_log_payload_is_rendered_as_json() {
        let frame = InboundFrame::new(LOG_EVENT, json!({"line": "a"}));
        assert_eq!(frame.log_text(), r#"{"line":"a"}"#);
    }

    #[test]
    fn malformed_frames_keep_raw_text() {
        for raw in [
            "not json",
            "[1,2]",
            r#"["LOGS","x"]"#,
            r#"["LOGS"]"#,
            "\"LOGS\"",
            r#"{"data":{}}"#,
            r#"{"event":5}"#,
        ] {
            let err = decode(raw).unwrap_err();
            assert_eq!(err.raw, raw);
            assert!(!err.reason.is_empty());
        }
    }
}
