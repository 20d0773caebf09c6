//! Meeting signaling
//!
//! Wraps an externally owned `Transport`: listeners are attached idempotently,
//! inbound traffic is validated into a closed set of `InboundEvent` variants
//! and filtered by the active meeting id before it reaches the negotiation
//! layer.

pub mod channel;
pub mod message;

pub use channel::SignalingChannel;
pub use message::{InboundEvent, OutboundMessage, RosterEntry};

use crate::transport::TransportError;
use std::error::Error;
use std::fmt;

/// Signaling-related errors
#[derive(Debug)]
pub enum SignalingError {
    /// No transport attached
    NotAttached,
    /// Operation needs an active meeting
    NoActiveMeeting,
    /// Transport failure
    Transport(TransportError),
    /// Payload failed validation
    Decode(String),
    /// Server denied the join
    JoinRejected(String),
}

impl fmt::Display for SignalingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalingError::NotAttached => write!(f, "Signaling transport not attached"),
            SignalingError::NoActiveMeeting => write!(f, "No active meeting"),
            SignalingError::Transport(e) => write!(f, "Transport error: {}", e),
            SignalingError::Decode(msg) => write!(f, "Invalid signaling payload: {}", msg),
            SignalingError::JoinRejected(reason) => write!(f, "Join rejected: {}", reason),
        }
    }
}

impl Error for SignalingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SignalingError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for SignalingError {
    fn from(e: TransportError) -> Self {
        SignalingError::Transport(e)
    }
}
