//! meeting-core - WebRTC mesh meeting core
//!
//! Signaling, local media, per-peer negotiation and roster tracking for
//! meetings where every participant connects directly to every other.

pub mod config;
pub mod media;
pub mod meeting;
pub mod metrics;
pub mod model;
pub mod negotiation;
pub mod observers;
pub mod participants;
pub mod peer;
pub mod rtc;
pub mod signaling;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-exports
pub use config::Config;
pub use media::{CaptureProvider, MediaSessionController, SyntheticCapture};
pub use meeting::{MeetingError, MeetingService};
pub use model::{
    IncomingCall, JoinOutcome, MediaDeviceState, MediaKind, MeetingConfig, MeetingType, Participant, StartOptions,
};
pub use observers::Subscription;
pub use peer::StreamUpdate;
pub use rtc::{PeerConnectionFactory, WebRtcFactory};
pub use transport::{LoopbackHub, Transport, WebSocketTransport};
