//! Test doubles that log every call to a shared, ordered journal

use crate::media::{CaptureConstraints, CaptureProvider, CapturedMedia, DeviceHandle, LocalTrack, MediaError};
use crate::model::{IceCandidate, MediaKind, SdpType, SessionDescription};
use crate::negotiation::ConnectionSource;
use crate::rtc::{
    ConnectionState, PeerCallbacks, PeerConnection, PeerConnectionFactory, RemoteTrackInfo, RtcError,
};
use crate::signaling::message::events;
use crate::transport::{Transport, TransportError, TransportEvent, EVENT_CHANNEL_CAPACITY};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Let spawned tasks run until they block
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }

    /// Index of the first entry starting with `prefix`
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e.starts_with(prefix))
    }
}

fn sdp_label(sdp_type: SdpType) -> &'static str {
    match sdp_type {
        SdpType::Offer => "offer",
        SdpType::Answer => "answer",
        SdpType::Pranswer => "pranswer",
        SdpType::Rollback => "rollback",
    }
}

// ---- transport ----

pub struct RecordingTransport {
    journal: Journal,
    socket_id: String,
    events: broadcast::Sender<TransportEvent>,
    sent: Mutex<Vec<(String, Value)>>,
    requests: Mutex<Vec<(String, Value)>>,
    join_ack: Mutex<Value>,
}

impl RecordingTransport {
    pub fn new(journal: Journal, socket_id: &str) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            journal,
            socket_id: socket_id.to_string(),
            events,
            sent: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            join_ack: Mutex::new(json!({ "success": true, "participants": [] })),
        })
    }

    /// Deliver an event as if the server had sent it
    pub fn inject(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn set_join_ack(&self, ack: Value) {
        *self.join_ack.lock() = ack;
    }

    pub fn emitted(&self, event: &str) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn requested(&self, event: &str) -> Vec<Value> {
        self.requests
            .lock()
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn socket_id(&self) -> Option<String> {
        Some(self.socket_id.clone())
    }

    fn emit(&self, event: &str, payload: Value) -> Result<(), TransportError> {
        self.journal.record(format!("emit:{}", event));
        self.sent.lock().push((event.to_string(), payload));
        Ok(())
    }

    async fn request(&self, event: &str, payload: Value) -> Result<Value, TransportError> {
        self.journal.record(format!("request:{}", event));
        self.requests.lock().push((event.to_string(), payload));
        match event {
            events::JOIN => Ok(self.join_ack.lock().clone()),
            other => Err(TransportError::AckDropped(other.to_string())),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

// ---- capture ----

pub struct MockCapture {
    journal: Journal,
    deny_audio: bool,
    deny_video: bool,
}

impl MockCapture {
    pub fn new(journal: Journal) -> Self {
        Self { journal, deny_audio: false, deny_video: false }
    }

    pub fn deny_audio(mut self) -> Self {
        self.deny_audio = true;
        self
    }

    pub fn deny_video(mut self) -> Self {
        self.deny_video = true;
        self
    }
}

#[async_trait]
impl CaptureProvider for MockCapture {
    async fn open(&self, constraints: CaptureConstraints) -> Result<CapturedMedia, MediaError> {
        self.journal.record(format!(
            "capture:open audio={} video={}",
            constraints.audio, constraints.video
        ));
        if constraints.audio && self.deny_audio {
            return Err(MediaError::PermissionDenied("microphone".to_string()));
        }
        if constraints.video && self.deny_video {
            return Err(MediaError::PermissionDenied("camera".to_string()));
        }

        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(Arc::new(LocalTrack::new(MediaKind::Audio, "mock")));
        }
        if constraints.video {
            tracks.push(Arc::new(LocalTrack::new(MediaKind::Video, "mock")));
        }
        Ok(CapturedMedia { tracks, device: Box::new(MockDevice { journal: self.journal.clone() }) })
    }
}

struct MockDevice {
    journal: Journal,
}

impl DeviceHandle for MockDevice {
    fn release(&mut self) {
        self.journal.record("device:release");
    }

    fn switch_camera(&mut self) -> bool {
        self.journal.record("device:switch");
        true
    }
}

// ---- peer connections ----

pub struct MockPeerFactory {
    journal: Journal,
    peers: Mutex<HashMap<String, Arc<MockPeer>>>,
    failing: Mutex<HashSet<String>>,
}

impl MockPeerFactory {
    pub fn new(journal: Journal) -> Self {
        Self { journal, peers: Mutex::new(HashMap::new()), failing: Mutex::new(HashSet::new()) }
    }

    /// Make connection creation for `peer_id` fail
    pub fn fail_create(&self, peer_id: &str) {
        self.failing.lock().insert(peer_id.to_string());
    }

    /// Latest connection built for `peer_id`
    pub fn peer(&self, peer_id: &str) -> Option<Arc<MockPeer>> {
        self.peers.lock().get(peer_id).cloned()
    }
}

#[async_trait]
impl PeerConnectionFactory for MockPeerFactory {
    async fn create(&self, peer_id: &str, callbacks: PeerCallbacks) -> Result<Arc<dyn PeerConnection>, RtcError> {
        self.journal.record(format!("factory:create {}", peer_id));
        if self.failing.lock().contains(peer_id) {
            return Err(RtcError::ConnectionFailed(format!("refused for {}", peer_id)));
        }
        let peer = Arc::new(MockPeer {
            journal: self.journal.clone(),
            peer_id: peer_id.to_string(),
            callbacks,
        });
        self.peers.lock().insert(peer_id.to_string(), peer.clone());
        Ok(peer)
    }
}

/// Closes the latest mock for a peer and builds the next one
pub struct MockSource {
    factory: Arc<MockPeerFactory>,
    peer_id: String,
}

impl MockSource {
    pub fn new(factory: Arc<MockPeerFactory>, peer_id: &str) -> Arc<Self> {
        Arc::new(Self { factory, peer_id: peer_id.to_string() })
    }
}

#[async_trait]
impl ConnectionSource for MockSource {
    async fn replace(&self) -> Result<Arc<dyn PeerConnection>, RtcError> {
        if let Some(current) = self.factory.peer(&self.peer_id) {
            current.close().await?;
        }
        self.factory.create(&self.peer_id, PeerCallbacks::noop()).await
    }
}

pub struct MockPeer {
    journal: Journal,
    peer_id: String,
    callbacks: PeerCallbacks,
}

impl MockPeer {
    fn record(&self, op: impl std::fmt::Display) {
        self.journal.record(format!("pc:{}:{}", self.peer_id, op));
    }

    /// Simulate a locally gathered candidate
    pub fn gather(&self, candidate: IceCandidate) {
        (self.callbacks.on_ice_candidate)(candidate);
    }

    pub fn receive_track(&self, track: RemoteTrackInfo) {
        (self.callbacks.on_remote_track)(track);
    }

    pub fn set_state(&self, state: ConnectionState) {
        (self.callbacks.on_state_change)(state);
    }
}

#[async_trait]
impl PeerConnection for MockPeer {
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<(), RtcError> {
        self.record(format_args!("add-track {}", track.kind()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, RtcError> {
        self.record("create-offer");
        Ok(SessionDescription::offer(format!("v=0 offer for {}", self.peer_id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, RtcError> {
        self.record("create-answer");
        Ok(SessionDescription::answer(format!("v=0 answer for {}", self.peer_id)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), RtcError> {
        self.record(format_args!("set-local {}", sdp_label(desc.sdp_type)));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), RtcError> {
        self.record(format_args!("set-remote {}", sdp_label(desc.sdp_type)));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), RtcError> {
        self.record(format_args!("candidate {}", candidate.candidate));
        Ok(())
    }

    async fn close(&self) -> Result<(), RtcError> {
        self.record("close");
        Ok(())
    }
}
