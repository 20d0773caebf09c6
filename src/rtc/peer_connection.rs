//! WebRTC peer connections over webrtc-rs
//!
//! Each connection gets its own API instance with the default codecs and
//! interceptors, and the fixed STUN-only ICE configuration.

use super::{
    ConnectionState, PeerCallbacks, PeerConnection, PeerConnectionFactory, RemoteTrackInfo, RtcError,
};
use crate::config::IceConfig;
use crate::media::LocalTrack;
use crate::model::{IceCandidate, MediaKind, SdpType, SessionDescription};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice::network_type::NetworkType;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;

/// Builds webrtc-rs connections
pub struct WebRtcFactory {
    stun_urls: Vec<String>,
    include_loopback: bool,
}

impl WebRtcFactory {
    pub fn new(ice: &IceConfig) -> Self {
        Self { stun_urls: ice.stun_urls.clone(), include_loopback: ice.include_loopback }
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.stun_urls.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.stun_urls.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration { ice_servers, ..Default::default() }
    }

    fn setting_engine(&self) -> SettingEngine {
        let mut settings = SettingEngine::default();
        if self.include_loopback {
            settings.set_include_loopback_candidate(true);
            settings.set_network_types(vec![NetworkType::Udp4]);
        }
        settings
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcFactory {
    async fn create(&self, peer_id: &str, callbacks: PeerCallbacks) -> Result<Arc<dyn PeerConnection>, RtcError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| RtcError::ConnectionFailed(format!("Failed to register codecs: {}", e)))?;

        // Interceptor registry for RTCP feedback
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| RtcError::ConnectionFailed(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(self.setting_engine())
            .build();

        let pc = api
            .new_peer_connection(self.rtc_configuration())
            .await
            .map_err(|e| RtcError::ConnectionFailed(format!("Failed to create peer connection: {}", e)))?;
        let pc = Arc::new(pc);

        wire_callbacks(&pc, peer_id, callbacks);
        debug!("Created peer connection for {}", peer_id);

        Ok(Arc::new(WebRtcPeer { peer_id: peer_id.to_string(), pc }))
    }
}

fn wire_callbacks(pc: &Arc<RTCPeerConnection>, peer_id: &str, callbacks: PeerCallbacks) {
    let on_candidate = callbacks.on_ice_candidate.clone();
    let candidate_peer = peer_id.to_string();
    pc.on_ice_candidate(Box::new(move |candidate| {
        let on_candidate = on_candidate.clone();
        let peer = candidate_peer.clone();
        Box::pin(async move {
            // None marks the end of gathering
            let candidate = match candidate {
                Some(candidate) => candidate,
                None => return,
            };
            match candidate.to_json() {
                Ok(init) => on_candidate(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                }),
                Err(e) => warn!("Failed to serialize local candidate for {}: {}", peer, e),
            }
        })
    }));

    let on_track = callbacks.on_remote_track.clone();
    let track_peer = peer_id.to_string();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let on_track = on_track.clone();
        let peer = track_peer.clone();
        Box::pin(async move {
            let kind = match track.kind() {
                RTPCodecType::Audio => MediaKind::Audio,
                RTPCodecType::Video => MediaKind::Video,
                other => {
                    debug!("Ignoring {} track from {}", other, peer);
                    return;
                }
            };
            info!(
                "Remote {} track from {} ({})",
                kind,
                peer,
                track.codec().capability.mime_type
            );
            on_track(RemoteTrackInfo {
                track_id: track.id(),
                stream_id: track.stream_id(),
                kind,
            });

            // Drain RTP so the receive buffer never stalls the transport
            tokio::spawn(async move {
                while track.read_rtp().await.is_ok() {}
            });
        })
    }));

    let on_state = callbacks.on_state_change.clone();
    pc.on_peer_connection_state_change(Box::new(move |state| {
        let on_state = on_state.clone();
        Box::pin(async move {
            if let Some(state) = map_state(state) {
                on_state(state);
            }
        })
    }));
}

fn map_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, RtcError> {
    let result = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => {
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            return Ok(rollback);
        }
    };
    result.map_err(|e| RtcError::SdpError(format!("Invalid SDP: {}", e)))
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription, RtcError> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(RtcError::SdpError("Unspecified description type".to_string()))
        }
    };
    Ok(SessionDescription { sdp_type, sdp: desc.sdp })
}

/// A webrtc-rs connection to one remote participant
pub struct WebRtcPeer {
    peer_id: String,
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_track(&self, track: Arc<LocalTrack>) -> Result<(), RtcError> {
        let sender = self
            .pc
            .add_track(track.rtc_track() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| RtcError::MediaError(format!("Failed to add {} track: {}", track.kind(), e)))?;

        // Read incoming RTCP so interceptors keep running
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, RtcError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| RtcError::SdpError(format!("Failed to create offer: {}", e)))?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, RtcError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| RtcError::SdpError(format!("Failed to create answer: {}", e)))?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), RtcError> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(|e| RtcError::SdpError(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), RtcError> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(|e| RtcError::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), RtcError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| RtcError::IceError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<(), RtcError> {
        debug!("Closing peer connection for {}", self.peer_id);
        self.pc
            .close()
            .await
            .map_err(|e| RtcError::ConnectionFailed(format!("Failed to close connection to {}: {}", self.peer_id, e)))
    }
}
