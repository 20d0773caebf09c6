//! WebSocket frame codec
//!
//! Signaling travels as JSON text frames:
//! - event: `{"event": "meeting:offer", "data": {...}}`
//! - event expecting an acknowledgement: `{"event": "meeting:join", "data": {...}, "ack": 7}`
//! - acknowledgement: `{"ack": 7, "data": {...}}`

use super::TransportError;
use serde_json::{json, Map, Value};

/// Event the server sends first to announce the connection's socket id
pub const CONNECTED_EVENT: &str = "connected";

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event {
        event: String,
        data: Value,
        ack: Option<u64>,
    },
    Ack {
        id: u64,
        data: Value,
    },
}

pub struct FrameCodec;

impl FrameCodec {
    pub fn encode(frame: &Frame) -> String {
        let value = match frame {
            Frame::Event { event, data, ack: Some(id) } => {
                json!({ "event": event, "data": data, "ack": id })
            }
            Frame::Event { event, data, ack: None } => json!({ "event": event, "data": data }),
            Frame::Ack { id, data } => json!({ "ack": id, "data": data }),
        };
        value.to_string()
    }

    pub fn decode(text: &str) -> Result<Frame, TransportError> {
        let value: Value = serde_json::from_str(text.trim())
            .map_err(|e| TransportError::Protocol(format!("Invalid frame: {}", e)))?;
        let mut object: Map<String, Value> = match value {
            Value::Object(object) => object,
            _ => return Err(TransportError::Protocol("Frame is not an object".to_string())),
        };

        let data = object.remove("data").unwrap_or(Value::Null);
        let ack = match object.remove("ack") {
            Some(Value::Number(n)) => Some(
                n.as_u64()
                    .ok_or_else(|| TransportError::Protocol(format!("Invalid ack id: {}", n)))?,
            ),
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(TransportError::Protocol(format!("Invalid ack id: {}", other)))
            }
        };

        match object.remove("event") {
            Some(Value::String(event)) => Ok(Frame::Event { event, data, ack }),
            Some(other) => Err(TransportError::Protocol(format!("Invalid event name: {}", other))),
            None => match ack {
                Some(id) => Ok(Frame::Ack { id, data }),
                None => Err(TransportError::Protocol("Frame has neither event nor ack".to_string())),
            },
        }
    }

    /// Socket id carried by the `connected` announcement
    pub fn socket_id_from_connected(data: &Value) -> Option<String> {
        data.get("socketId")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}
