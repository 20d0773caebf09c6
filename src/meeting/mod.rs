//! Meeting facade
//!
//! `MeetingService` is the single entry point for the UI layer; it composes
//! signaling, local media, peer connections and the roster.

pub mod service;
pub mod store;

pub use service::MeetingService;
pub use store::{MeetingStore, StoredMeeting};

use crate::signaling::SignalingError;
use std::error::Error;
use std::fmt;

/// Errors surfaced to callers of the facade
#[derive(Debug)]
pub enum MeetingError {
    /// No signaling transport attached
    NotConnected,
    /// The server refused the join
    JoinRejected(String),
    /// Signaling failed during join
    Signaling(SignalingError),
    /// Active meeting record could not be read or written
    Store(std::io::Error),
    /// Metrics registry setup failed
    Metrics(prometheus::Error),
}

impl fmt::Display for MeetingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeetingError::NotConnected => write!(f, "Signaling is not connected"),
            MeetingError::JoinRejected(reason) => write!(f, "Join rejected: {}", reason),
            MeetingError::Signaling(e) => write!(f, "Signaling error: {}", e),
            MeetingError::Store(e) => write!(f, "Meeting store error: {}", e),
            MeetingError::Metrics(e) => write!(f, "Metrics error: {}", e),
        }
    }
}

impl Error for MeetingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MeetingError::Signaling(e) => Some(e),
            MeetingError::Store(e) => Some(e),
            MeetingError::Metrics(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SignalingError> for MeetingError {
    fn from(err: SignalingError) -> Self {
        match err {
            SignalingError::NotAttached => MeetingError::NotConnected,
            SignalingError::JoinRejected(reason) => MeetingError::JoinRejected(reason),
            other => MeetingError::Signaling(other),
        }
    }
}

impl From<std::io::Error> for MeetingError {
    fn from(err: std::io::Error) -> Self {
        MeetingError::Store(err)
    }
}

impl From<prometheus::Error> for MeetingError {
    fn from(err: prometheus::Error) -> Self {
        MeetingError::Metrics(err)
    }
}
