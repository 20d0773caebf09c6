//! Transport layer for meeting signaling
//!
//! A `Transport` is the duplex event channel owned by the surrounding
//! application (a WebSocket connection, or the in-process loopback hub used by
//! tests and demos). The signaling adapter only emits events, issues
//! acknowledged requests and subscribes to inbound events through it.

pub mod codec;
pub mod loopback;
pub mod websocket;

pub use loopback::{LoopbackHub, LoopbackTransport};
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use serde_json::Value;
use std::error::Error;
use std::fmt;
use tokio::sync::broadcast;

/// Capacity of each transport's inbound event fan-out
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// An inbound named event with its JSON payload
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub event: String,
    pub payload: Value,
}

impl TransportEvent {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self { event: event.into(), payload }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Server-assigned id of this connection, once known
    fn socket_id(&self) -> Option<String>;

    /// Fire-and-forget event
    fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError>;

    /// Event with acknowledgement; resolves with the ack payload
    async fn request(&self, event: &str, payload: Value) -> Result<Value, TransportError>;

    /// Fresh receiver for inbound events; only events sent after the call are seen
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

/// Transport-related errors
#[derive(Debug)]
pub enum TransportError {
    /// Connection is closed
    Closed,
    /// Sending a frame failed
    Send(String),
    /// Malformed frame
    Protocol(String),
    /// Connection dropped before the acknowledgement arrived
    AckDropped(String),
    /// Connecting failed
    Connect(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Closed => write!(f, "Transport closed"),
            TransportError::Send(msg) => write!(f, "Send failed: {}", msg),
            TransportError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            TransportError::AckDropped(event) => write!(f, "No acknowledgement for {}", event),
            TransportError::Connect(msg) => write!(f, "Connect failed: {}", msg),
        }
    }
}

impl Error for TransportError {}
