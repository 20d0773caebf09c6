//! Meeting domain types
//!
//! Shared by the signaling, media, negotiation and facade layers. Field names
//! serialize in the camelCase form used on the signaling wire.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Meeting scope kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingType {
    /// Meeting attached to a group chat
    Group,
    /// One-to-one meeting attached to a direct conversation
    Direct,
}

impl MeetingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingType::Group => "group",
            MeetingType::Direct => "direct",
        }
    }
}

/// Identifies the signaling scope of one meeting session.
///
/// Immutable for the lifetime of a session; inbound traffic whose meeting id
/// does not match the active config is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingConfig {
    pub meeting_id: String,
    #[serde(rename = "type")]
    pub meeting_type: MeetingType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl MeetingConfig {
    pub fn group(meeting_id: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            meeting_type: MeetingType::Group,
            group_id: Some(group_id.into()),
            conversation_id: None,
        }
    }

    pub fn direct(meeting_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            meeting_type: MeetingType::Direct,
            group_id: None,
            conversation_id: Some(conversation_id.into()),
        }
    }

    /// Group id or conversation id, whichever matches the meeting type
    pub fn scope_id(&self) -> Option<&str> {
        match self.meeting_type {
            MeetingType::Group => self.group_id.as_deref(),
            MeetingType::Direct => self.conversation_id.as_deref(),
        }
    }
}

/// Local capture kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// A remote meeting member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub socket_id: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

impl Participant {
    /// New roster entry; remote media is assumed on until a media-state event says otherwise
    pub fn new(
        user_id: impl Into<String>,
        socket_id: impl Into<String>,
        name: Option<String>,
        avatar: Option<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            socket_id: socket_id.into(),
            name,
            avatar,
            audio_enabled: true,
            video_enabled: true,
        }
    }

    pub fn set_media(&mut self, kind: MediaKind, enabled: bool) {
        match kind {
            MediaKind::Audio => self.audio_enabled = enabled,
            MediaKind::Video => self.video_enabled = enabled,
        }
    }
}

/// Local capability vs. user-chosen enablement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDeviceState {
    pub has_audio: bool,
    pub has_video: bool,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub is_front_camera: bool,
}

impl Default for MediaDeviceState {
    fn default() -> Self {
        Self {
            has_audio: false,
            has_video: false,
            audio_enabled: false,
            video_enabled: false,
            is_front_camera: true,
        }
    }
}

impl MediaDeviceState {
    pub fn has(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.has_audio,
            MediaKind::Video => self.has_video,
        }
    }

    pub fn is_enabled(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio_enabled,
            MediaKind::Video => self.video_enabled,
        }
    }
}

/// SDP type as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description exchanged through signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    #[serde(default)]
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { sdp_type: SdpType::Answer, sdp: sdp.into() }
    }
}

/// Network path candidate in its browser JSON shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }
}

/// Options accepted by `MeetingService::start_meeting`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOptions {
    pub audio: bool,
    pub video: bool,
    pub title: Option<String>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self { audio: true, video: true, title: None }
    }
}

/// Result of a successful join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub success: bool,
    pub participants: Vec<Participant>,
    pub media_state: MediaDeviceState,
}

/// Ring notification for a meeting this user has not joined yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    pub meeting_id: String,
    #[serde(rename = "type")]
    pub meeting_type: MeetingType,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub caller_id: String,
    #[serde(default)]
    pub caller_name: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
}

impl IncomingCall {
    /// The config to pass to `start_meeting` when accepting the call
    pub fn meeting_config(&self) -> MeetingConfig {
        MeetingConfig {
            meeting_id: self.meeting_id.clone(),
            meeting_type: self.meeting_type,
            group_id: self.group_id.clone(),
            conversation_id: self.conversation_id.clone(),
        }
    }
}
