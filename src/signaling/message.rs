//! Meeting signaling messages
//!
//! Inbound payloads are decoded and validated here; nothing loosely shaped
//! crosses into the negotiation layer.

use super::SignalingError;
use crate::model::{
    IceCandidate, IncomingCall, MediaKind, MeetingConfig, SdpType, SessionDescription,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wire event names
pub mod events {
    pub const JOIN: &str = "meeting:join";
    pub const LEAVE: &str = "meeting:leave";
    pub const OFFER: &str = "meeting:offer";
    pub const ANSWER: &str = "meeting:answer";
    pub const ICE_CANDIDATE: &str = "meeting:ice-candidate";
    pub const TOGGLE_MEDIA: &str = "meeting:toggle-media";
    pub const MEDIA_STATE: &str = "meeting:media-state";
    pub const USER_JOINED: &str = "meeting:user-joined";
    pub const USER_LEFT: &str = "meeting:user-left";
    pub const INCOMING_CALL: &str = "meeting:incoming-call";
}

/// Validated inbound event
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    UserJoined {
        user_id: String,
        socket_id: String,
        name: Option<String>,
        avatar: Option<String>,
    },
    UserLeft {
        user_id: String,
    },
    Offer {
        from_user_id: String,
        from_socket_id: String,
        offer: SessionDescription,
    },
    Answer {
        from_user_id: String,
        from_socket_id: String,
        answer: SessionDescription,
    },
    IceCandidate {
        from_user_id: String,
        from_socket_id: String,
        candidate: IceCandidate,
    },
    MediaState {
        user_id: String,
        kind: MediaKind,
        enabled: bool,
    },
    IncomingCall(IncomingCall),
}

impl InboundEvent {
    /// Events that are delivered regardless of the active meeting
    pub fn is_unscoped(&self) -> bool {
        matches!(self, InboundEvent::IncomingCall(_))
    }

    /// User id of the remote side this event concerns
    pub fn user_id(&self) -> Option<&str> {
        match self {
            InboundEvent::UserJoined { user_id, .. }
            | InboundEvent::UserLeft { user_id }
            | InboundEvent::MediaState { user_id, .. } => Some(user_id),
            InboundEvent::Offer { from_user_id, .. }
            | InboundEvent::Answer { from_user_id, .. }
            | InboundEvent::IceCandidate { from_user_id, .. } => Some(from_user_id),
            InboundEvent::IncomingCall(call) => Some(&call.caller_id),
        }
    }
}

/// A decoded event and the meeting id it was tagged with
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub meeting_id: Option<String>,
    pub event: InboundEvent,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserJoinedPayload {
    meeting_id: Option<String>,
    user_id: String,
    socket_id: String,
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    user_avatar: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserLeftPayload {
    meeting_id: Option<String>,
    user_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferPayload {
    meeting_id: Option<String>,
    from_user_id: String,
    from_socket_id: String,
    offer: SessionDescription,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerPayload {
    meeting_id: Option<String>,
    from_user_id: String,
    from_socket_id: String,
    answer: SessionDescription,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidatePayload {
    meeting_id: Option<String>,
    from_user_id: String,
    from_socket_id: String,
    candidate: IceCandidate,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaStatePayload {
    meeting_id: Option<String>,
    user_id: String,
    media_type: MediaKind,
    enabled: bool,
}

fn parse<T: DeserializeOwned>(event: &str, payload: &Value) -> Result<T, SignalingError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| SignalingError::Decode(format!("{}: {}", event, e)))
}

fn require(event: &str, field: &str, value: &str) -> Result<(), SignalingError> {
    if value.is_empty() {
        return Err(SignalingError::Decode(format!("{}: empty {}", event, field)));
    }
    Ok(())
}

fn require_sdp(event: &str, desc: &SessionDescription, expected: SdpType) -> Result<(), SignalingError> {
    if desc.sdp_type != expected {
        return Err(SignalingError::Decode(format!(
            "{}: unexpected description type {:?}",
            event, desc.sdp_type
        )));
    }
    require(event, "sdp", &desc.sdp)
}

impl Envelope {
    /// Decode a named event; `Ok(None)` for events outside the meeting namespace
    pub fn decode(event: &str, payload: &Value) -> Result<Option<Self>, SignalingError> {
        let envelope = match event {
            events::USER_JOINED => {
                let p: UserJoinedPayload = parse(event, payload)?;
                require(event, "userId", &p.user_id)?;
                require(event, "socketId", &p.socket_id)?;
                Envelope {
                    meeting_id: p.meeting_id,
                    event: InboundEvent::UserJoined {
                        user_id: p.user_id,
                        socket_id: p.socket_id,
                        name: p.user_name,
                        avatar: p.user_avatar,
                    },
                }
            }
            events::USER_LEFT => {
                let p: UserLeftPayload = parse(event, payload)?;
                require(event, "userId", &p.user_id)?;
                Envelope {
                    meeting_id: p.meeting_id,
                    event: InboundEvent::UserLeft { user_id: p.user_id },
                }
            }
            events::OFFER => {
                let p: OfferPayload = parse(event, payload)?;
                require(event, "fromUserId", &p.from_user_id)?;
                require_sdp(event, &p.offer, SdpType::Offer)?;
                Envelope {
                    meeting_id: p.meeting_id,
                    event: InboundEvent::Offer {
                        from_user_id: p.from_user_id,
                        from_socket_id: p.from_socket_id,
                        offer: p.offer,
                    },
                }
            }
            events::ANSWER => {
                let p: AnswerPayload = parse(event, payload)?;
                require(event, "fromUserId", &p.from_user_id)?;
                require_sdp(event, &p.answer, SdpType::Answer)?;
                Envelope {
                    meeting_id: p.meeting_id,
                    event: InboundEvent::Answer {
                        from_user_id: p.from_user_id,
                        from_socket_id: p.from_socket_id,
                        answer: p.answer,
                    },
                }
            }
            events::ICE_CANDIDATE => {
                let p: CandidatePayload = parse(event, payload)?;
                require(event, "fromUserId", &p.from_user_id)?;
                require(event, "candidate", &p.candidate.candidate)?;
                Envelope {
                    meeting_id: p.meeting_id,
                    event: InboundEvent::IceCandidate {
                        from_user_id: p.from_user_id,
                        from_socket_id: p.from_socket_id,
                        candidate: p.candidate,
                    },
                }
            }
            events::MEDIA_STATE => {
                let p: MediaStatePayload = parse(event, payload)?;
                require(event, "userId", &p.user_id)?;
                Envelope {
                    meeting_id: p.meeting_id,
                    event: InboundEvent::MediaState {
                        user_id: p.user_id,
                        kind: p.media_type,
                        enabled: p.enabled,
                    },
                }
            }
            events::INCOMING_CALL => {
                let call: IncomingCall = parse(event, payload)?;
                require(event, "meetingId", &call.meeting_id)?;
                Envelope {
                    meeting_id: Some(call.meeting_id.clone()),
                    event: InboundEvent::IncomingCall(call),
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(envelope))
    }
}

/// One entry of the join acknowledgement roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub user_id: String,
    pub socket_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub user_avatar: Option<String>,
}

/// Join acknowledgement
#[derive(Debug, Clone, Deserialize)]
pub struct JoinAck {
    pub success: bool,
    #[serde(default)]
    pub participants: Vec<RosterEntry>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Outbound meeting-scoped message
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Join,
    Leave,
    Offer {
        target_socket_id: String,
        offer: SessionDescription,
    },
    Answer {
        target_socket_id: String,
        answer: SessionDescription,
    },
    IceCandidate {
        target_socket_id: String,
        candidate: IceCandidate,
    },
    ToggleMedia {
        kind: MediaKind,
        enabled: bool,
    },
}

impl OutboundMessage {
    pub fn event(&self) -> &'static str {
        match self {
            OutboundMessage::Join => events::JOIN,
            OutboundMessage::Leave => events::LEAVE,
            OutboundMessage::Offer { .. } => events::OFFER,
            OutboundMessage::Answer { .. } => events::ANSWER,
            OutboundMessage::IceCandidate { .. } => events::ICE_CANDIDATE,
            OutboundMessage::ToggleMedia { .. } => events::TOGGLE_MEDIA,
        }
    }

    /// Wire payload: the meeting config flattened, plus the message body and
    /// the sender's identity on peer-addressed messages
    pub fn payload(
        &self,
        config: &MeetingConfig,
        from_user_id: &str,
        from_socket_id: Option<&str>,
    ) -> Result<Value, SignalingError> {
        let mut object = match serde_json::to_value(config) {
            Ok(Value::Object(object)) => object,
            Ok(_) => Map::new(),
            Err(e) => return Err(SignalingError::Decode(e.to_string())),
        };

        match self {
            OutboundMessage::Join | OutboundMessage::Leave => {}
            OutboundMessage::Offer { target_socket_id, offer } => {
                object.insert("offer".into(), encode(offer)?);
                addressed(&mut object, target_socket_id, from_user_id, from_socket_id);
            }
            OutboundMessage::Answer { target_socket_id, answer } => {
                object.insert("answer".into(), encode(answer)?);
                addressed(&mut object, target_socket_id, from_user_id, from_socket_id);
            }
            OutboundMessage::IceCandidate { target_socket_id, candidate } => {
                object.insert("candidate".into(), encode(candidate)?);
                addressed(&mut object, target_socket_id, from_user_id, from_socket_id);
            }
            OutboundMessage::ToggleMedia { kind, enabled } => {
                object.insert("mediaType".into(), Value::String(kind.to_string()));
                object.insert("enabled".into(), Value::Bool(*enabled));
            }
        }
        Ok(Value::Object(object))
    }
}

fn addressed(
    object: &mut Map<String, Value>,
    target_socket_id: &str,
    from_user_id: &str,
    from_socket_id: Option<&str>,
) {
    object.insert("targetSocketId".into(), Value::String(target_socket_id.to_string()));
    object.insert("fromUserId".into(), Value::String(from_user_id.to_string()));
    if let Some(socket_id) = from_socket_id {
        object.insert("fromSocketId".into(), Value::String(socket_id.to_string()));
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value, SignalingError> {
    serde_json::to_value(value).map_err(|e| SignalingError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_offer_with_sender_identity() {
        let envelope = Envelope::decode(
            events::OFFER,
            &json!({
                "meetingId": "m1",
                "fromUserId": "u2",
                "fromSocketId": "s2",
                "offer": { "type": "offer", "sdp": "v=0" }
            }),
        )
        .unwrap()
        .unwrap();
        assert_eq!(envelope.meeting_id.as_deref(), Some("m1"));
        assert_eq!(
            envelope.event,
            InboundEvent::Offer {
                from_user_id: "u2".into(),
                from_socket_id: "s2".into(),
                offer: SessionDescription::offer("v=0"),
            }
        );
    }

    #[test]
    fn rejects_answer_carried_in_offer_event() {
        let result = Envelope::decode(
            events::OFFER,
            &json!({
                "meetingId": "m1",
                "fromUserId": "u2",
                "fromSocketId": "s2",
                "offer": { "type": "answer", "sdp": "v=0" }
            }),
        );
        assert!(matches!(result, Err(SignalingError::Decode(_))));
    }

    #[test]
    fn rejects_missing_fields_and_bad_media_type() {
        assert!(Envelope::decode(events::USER_JOINED, &json!({ "meetingId": "m1" })).is_err());
        assert!(Envelope::decode(
            events::MEDIA_STATE,
            &json!({ "meetingId": "m1", "userId": "u2", "mediaType": "screen", "enabled": true })
        )
        .is_err());
    }

    #[test]
    fn user_left_without_meeting_id_decodes() {
        let envelope = Envelope::decode(events::USER_LEFT, &json!({ "userId": "u2", "socketId": "s2" }))
            .unwrap()
            .unwrap();
        assert_eq!(envelope.meeting_id, None);
        assert_eq!(envelope.event, InboundEvent::UserLeft { user_id: "u2".into() });
    }

    #[test]
    fn unrelated_events_are_skipped() {
        assert!(Envelope::decode("chat:message", &json!({})).unwrap().is_none());
    }

    #[test]
    fn offer_payload_flattens_config() {
        let config = MeetingConfig::group("m1", "g1");
        let msg = OutboundMessage::Offer {
            target_socket_id: "s2".into(),
            offer: SessionDescription::offer("v=0"),
        };
        let payload = msg.payload(&config, "u1", Some("s1")).unwrap();
        assert_eq!(
            payload,
            json!({
                "meetingId": "m1",
                "type": "group",
                "groupId": "g1",
                "offer": { "type": "offer", "sdp": "v=0" },
                "targetSocketId": "s2",
                "fromUserId": "u1",
                "fromSocketId": "s1"
            })
        );
        assert_eq!(msg.event(), "meeting:offer");
    }

    #[test]
    fn toggle_payload_carries_media_type() {
        let config = MeetingConfig::direct("m1", "c1");
        let payload = OutboundMessage::ToggleMedia { kind: MediaKind::Audio, enabled: false }
            .payload(&config, "u1", None)
            .unwrap();
        assert_eq!(payload["mediaType"], "audio");
        assert_eq!(payload["enabled"], false);
        assert_eq!(payload["conversationId"], "c1");
        assert!(payload.get("fromUserId").is_none());
    }
}
