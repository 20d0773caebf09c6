//! Peer connection abstraction
//!
//! The negotiation layer talks to connections through `PeerConnection`, built
//! by a `PeerConnectionFactory`. The production factory wraps webrtc-rs; tests
//! substitute a recording mock.

pub mod peer_connection;

pub use peer_connection::WebRtcFactory;

use crate::media::LocalTrack;
use crate::model::{IceCandidate, MediaKind, SessionDescription};
use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Connection-level errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcError {
    /// Peer connection creation failed
    ConnectionFailed(String),
    /// SDP processing failed
    SdpError(String),
    /// ICE candidate processing failed
    IceError(String),
    /// Attaching a track failed
    MediaError(String),
    /// Operation not valid in the current signaling state
    InvalidState(String),
    /// Connection already closed
    Closed,
}

impl fmt::Display for RtcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtcError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            RtcError::SdpError(msg) => write!(f, "SDP error: {}", msg),
            RtcError::IceError(msg) => write!(f, "ICE error: {}", msg),
            RtcError::MediaError(msg) => write!(f, "Media error: {}", msg),
            RtcError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            RtcError::Closed => write!(f, "Peer connection closed"),
        }
    }
}

impl Error for RtcError {}

/// Transport-level connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// States from which a fresh offer may recover the connection
    pub fn needs_recovery(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }
}

/// A track received from a remote participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackInfo {
    pub track_id: String,
    pub stream_id: String,
    pub kind: MediaKind,
}

/// Everything received from one remote participant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteStream {
    pub tracks: Vec<RemoteTrackInfo>,
}

impl RemoteStream {
    pub fn has(&self, kind: MediaKind) -> bool {
        self.tracks.iter().any(|t| t.kind == kind)
    }
}

/// Callbacks wired into each connection at construction
#[derive(Clone)]
pub struct PeerCallbacks {
    /// Local candidate gathered; forwarded to the peer immediately
    pub on_ice_candidate: Arc<dyn Fn(IceCandidate) + Send + Sync>,
    pub on_remote_track: Arc<dyn Fn(RemoteTrackInfo) + Send + Sync>,
    pub on_state_change: Arc<dyn Fn(ConnectionState) + Send + Sync>,
}

impl PeerCallbacks {
    pub fn noop() -> Self {
        Self {
            on_ice_candidate: Arc::new(|_| {}),
            on_remote_track: Arc::new(|_| {}),
            on_state_change: Arc::new(|_| {}),
        }
    }
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<(), RtcError>;

    async fn create_offer(&self) -> Result<SessionDescription, RtcError>;

    async fn create_answer(&self) -> Result<SessionDescription, RtcError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), RtcError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), RtcError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), RtcError>;

    async fn close(&self) -> Result<(), RtcError>;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    /// Build a connection to `peer_id` with the fixed ICE configuration
    async fn create(&self, peer_id: &str, callbacks: PeerCallbacks) -> Result<Arc<dyn PeerConnection>, RtcError>;
}
