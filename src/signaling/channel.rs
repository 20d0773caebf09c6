//! Signaling channel adapter
//!
//! Owns the listener attached to the current transport and the active meeting
//! filter. Inbound events that pass validation and the meeting-id filter are
//! forwarded, in arrival order, to a single consumer.

use super::message::{Envelope, InboundEvent, JoinAck, OutboundMessage, RosterEntry};
use super::SignalingError;
use crate::model::{IceCandidate, MediaKind, MeetingConfig, SessionDescription};
use crate::transport::{Transport, TransportEvent};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

pub struct SignalingChannel {
    local_user_id: String,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    active: Arc<RwLock<Option<MeetingConfig>>>,
    inbound: mpsc::UnboundedSender<InboundEvent>,
}

impl SignalingChannel {
    /// Create a detached channel and the receiver for its filtered inbound events
    pub fn new(local_user_id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<InboundEvent>) {
        let (inbound, rx) = mpsc::unbounded_channel();
        let channel = Self {
            local_user_id: local_user_id.into(),
            transport: RwLock::new(None),
            listener: Mutex::new(None),
            active: Arc::new(RwLock::new(None)),
            inbound,
        };
        (channel, rx)
    }

    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    /// Attach to `transport`, replacing any previous listener
    pub fn attach(&self, transport: Arc<dyn Transport>) {
        // Subscribe before spawning so nothing sent after attach is missed
        let events = transport.subscribe();
        let handle = tokio::spawn(listen(events, self.active.clone(), self.inbound.clone()));

        let previous = self.listener.lock().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
            debug!("Replaced signaling listener");
        }
        *self.transport.write() = Some(transport);
        info!("Signaling attached for user {}", self.local_user_id);
    }

    /// Stop listening and forget the transport
    pub fn detach(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
        *self.transport.write() = None;
    }

    pub fn is_attached(&self) -> bool {
        self.transport.read().is_some()
    }

    pub fn active(&self) -> Option<MeetingConfig> {
        self.active.read().clone()
    }

    pub fn set_active(&self, config: Option<MeetingConfig>) {
        *self.active.write() = config;
    }

    /// Join `config`; the meeting becomes active before the request goes out so
    /// roster events racing the acknowledgement are not dropped
    pub async fn join(&self, config: &MeetingConfig) -> Result<Vec<RosterEntry>, SignalingError> {
        let transport = self.transport()?;
        self.set_active(Some(config.clone()));

        let result = self.request_join(transport.as_ref(), config).await;
        if result.is_err() {
            self.clear_active_if(config);
        }
        result
    }

    async fn request_join(
        &self,
        transport: &dyn Transport,
        config: &MeetingConfig,
    ) -> Result<Vec<RosterEntry>, SignalingError> {
        let message = OutboundMessage::Join;
        let payload = message.payload(config, &self.local_user_id, None)?;
        let ack = transport.request(message.event(), payload).await?;
        let ack: JoinAck = serde_json::from_value(ack)
            .map_err(|e| SignalingError::Decode(format!("join ack: {}", e)))?;

        if !ack.success {
            let reason = ack.error.unwrap_or_else(|| "Failed to join meeting".to_string());
            warn!("Join of meeting {} rejected: {}", config.meeting_id, reason);
            return Err(SignalingError::JoinRejected(reason));
        }

        info!(
            "Joined meeting {} with {} member(s) present",
            config.meeting_id,
            ack.participants.len()
        );
        Ok(ack.participants)
    }

    /// Fire-and-forget leave; clears the active meeting
    pub fn leave(&self, config: &MeetingConfig) -> Result<(), SignalingError> {
        self.clear_active_if(config);
        self.send(config, OutboundMessage::Leave)
    }

    pub fn send_offer(&self, target_socket_id: &str, offer: SessionDescription) -> Result<(), SignalingError> {
        self.send_active(OutboundMessage::Offer { target_socket_id: target_socket_id.to_string(), offer })
    }

    pub fn send_answer(&self, target_socket_id: &str, answer: SessionDescription) -> Result<(), SignalingError> {
        self.send_active(OutboundMessage::Answer { target_socket_id: target_socket_id.to_string(), answer })
    }

    pub fn send_ice_candidate(&self, target_socket_id: &str, candidate: IceCandidate) -> Result<(), SignalingError> {
        self.send_active(OutboundMessage::IceCandidate {
            target_socket_id: target_socket_id.to_string(),
            candidate,
        })
    }

    pub fn send_media_state(&self, kind: MediaKind, enabled: bool) -> Result<(), SignalingError> {
        self.send_active(OutboundMessage::ToggleMedia { kind, enabled })
    }

    fn send_active(&self, message: OutboundMessage) -> Result<(), SignalingError> {
        let config = self.active().ok_or(SignalingError::NoActiveMeeting)?;
        self.send(&config, message)
    }

    fn send(&self, config: &MeetingConfig, message: OutboundMessage) -> Result<(), SignalingError> {
        let transport = self.transport()?;
        let socket_id = transport.socket_id();
        let payload = message.payload(config, &self.local_user_id, socket_id.as_deref())?;
        transport.emit(message.event(), payload)?;
        Ok(())
    }

    fn transport(&self) -> Result<Arc<dyn Transport>, SignalingError> {
        self.transport.read().clone().ok_or(SignalingError::NotAttached)
    }

    fn clear_active_if(&self, config: &MeetingConfig) {
        let mut active = self.active.write();
        if active.as_ref().map(|c| c.meeting_id.as_str()) == Some(config.meeting_id.as_str()) {
            *active = None;
        }
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

async fn listen(
    mut events: broadcast::Receiver<TransportEvent>,
    active: Arc<RwLock<Option<MeetingConfig>>>,
    inbound: mpsc::UnboundedSender<InboundEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Signaling listener lagged, {} event(s) skipped", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        if let Some(event) = admit(&event, &active.read()) {
            if inbound.send(event).is_err() {
                break;
            }
        }
    }
    debug!("Signaling listener stopped");
}

/// Decode and apply the meeting-id filter
fn admit(event: &TransportEvent, active: &Option<MeetingConfig>) -> Option<InboundEvent> {
    let envelope = match Envelope::decode(&event.event, &event.payload) {
        Ok(Some(envelope)) => envelope,
        Ok(None) => return None,
        Err(e) => {
            warn!("{}", e);
            return None;
        }
    };

    if envelope.event.is_unscoped() {
        return Some(envelope.event);
    }

    let active = active.as_ref()?;
    match envelope.meeting_id.as_deref() {
        Some(id) if id == active.meeting_id => Some(envelope.event),
        // Disconnect notifications carry no meeting id
        None if matches!(envelope.event, InboundEvent::UserLeft { .. }) => Some(envelope.event),
        other => {
            debug!("Dropping {} for meeting {:?}", event.event, other);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Journal, RecordingTransport};
    use serde_json::json;

    fn joined(meeting: &str, user: &str) -> TransportEvent {
        TransportEvent::new(
            "meeting:user-joined",
            json!({ "meetingId": meeting, "userId": user, "socketId": format!("s-{}", user) }),
        )
    }

    #[test]
    fn admit_filters_by_active_meeting() {
        let active = Some(MeetingConfig::group("m1", "g1"));
        assert!(admit(&joined("m1", "u2"), &active).is_some());
        assert!(admit(&joined("m2", "u2"), &active).is_none());
        assert!(admit(&joined("m1", "u2"), &None).is_none());

        let left = TransportEvent::new("meeting:user-left", json!({ "userId": "u2" }));
        assert!(admit(&left, &active).is_some());
        assert!(admit(&left, &None).is_none());

        let ring = TransportEvent::new(
            "meeting:incoming-call",
            json!({ "meetingId": "m7", "type": "group", "groupId": "g2", "callerId": "u3" }),
        );
        assert!(admit(&ring, &None).is_some());
    }

    #[tokio::test]
    async fn reattach_does_not_duplicate_handlers() {
        let journal = Journal::new();
        let transport = RecordingTransport::new(journal.clone(), "s1");
        let (channel, mut rx) = SignalingChannel::new("u1");
        channel.set_active(Some(MeetingConfig::group("m1", "g1")));

        channel.attach(transport.clone());
        channel.attach(transport.clone());
        tokio::task::yield_now().await;

        transport.inject(joined("m1", "u2"));
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, InboundEvent::UserJoined { ref user_id, .. } if user_id == "u2"));

        transport.inject(joined("m1", "u3"));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, InboundEvent::UserJoined { ref user_id, .. } if user_id == "u3"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn join_rejection_clears_active_meeting() {
        let journal = Journal::new();
        let transport = RecordingTransport::new(journal.clone(), "s1");
        transport.set_join_ack(json!({ "success": false, "error": "Not a member" }));
        let (channel, _rx) = SignalingChannel::new("u1");
        channel.attach(transport);

        let result = channel.join(&MeetingConfig::group("m1", "g1")).await;
        assert!(matches!(result, Err(SignalingError::JoinRejected(ref r)) if r == "Not a member"));
        assert!(channel.active().is_none());
    }

    #[tokio::test]
    async fn sends_are_addressed_and_require_active_meeting() {
        let journal = Journal::new();
        let transport = RecordingTransport::new(journal.clone(), "s1");
        let (channel, _rx) = SignalingChannel::new("u1");

        assert!(matches!(
            channel.send_offer("s2", SessionDescription::offer("v=0")),
            Err(SignalingError::NotAttached) | Err(SignalingError::NoActiveMeeting)
        ));

        channel.attach(transport.clone());
        channel.join(&MeetingConfig::group("m1", "g1")).await.unwrap();
        channel.send_offer("s2", SessionDescription::offer("v=0")).unwrap();

        let offers = transport.emitted("meeting:offer");
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0]["targetSocketId"], "s2");
        assert_eq!(offers[0]["fromUserId"], "u1");
        assert_eq!(offers[0]["fromSocketId"], "s1");

        channel.leave(&MeetingConfig::group("m1", "g1")).unwrap();
        assert!(channel.active().is_none());
        assert_eq!(transport.emitted("meeting:leave").len(), 1);
        assert!(matches!(
            channel.send_media_state(MediaKind::Audio, false),
            Err(SignalingError::NoActiveMeeting)
        ));
    }
}
