//! Local stream and tracks
//!
//! One `LocalStream` exists per session. Every peer connection attaches the
//! same `LocalTrack`s, so enabling or disabling a track is observed by all
//! peers at once.

use super::capture::DeviceHandle;
use crate::model::MediaKind;
use log::{debug, info};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// A captured audio or video track
pub struct LocalTrack {
    id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    rtc: Arc<TrackLocalStaticSample>,
}

impl LocalTrack {
    pub fn new(kind: MediaKind, stream_id: &str) -> Self {
        let id = format!("{}-{}", kind, uuid::Uuid::new_v4());
        let capability = match kind {
            MediaKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                rtcp_feedback: vec![],
            },
            MediaKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: "".to_string(),
                rtcp_feedback: vec![],
            },
        };
        let rtc = Arc::new(TrackLocalStaticSample::new(capability, id.clone(), stream_id.to_string()));

        Self {
            id,
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            rtc,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Mute or unmute; the track stays attached to every connection
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// The RTP sender side handed to peer connections
    pub fn rtc_track(&self) -> Arc<TrackLocalStaticSample> {
        self.rtc.clone()
    }

    /// Whether samples should currently be produced
    pub fn is_live(&self) -> bool {
        self.is_enabled() && !self.is_stopped()
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Teardown progress of a local stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleasePhase {
    Active,
    /// Tracks muted, still attached
    Disabling,
    /// Tracks stopped, hardware still held
    Stopped,
    /// Hardware handle released
    Released,
}

/// The session's local capture
pub struct LocalStream {
    id: String,
    tracks: Vec<Arc<LocalTrack>>,
    device: Mutex<Option<Box<dyn DeviceHandle>>>,
    phase: Mutex<ReleasePhase>,
    view_detached: Notify,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<LocalTrack>>, device: Box<dyn DeviceHandle>) -> Self {
        Self {
            id: id.into(),
            tracks,
            device: Mutex::new(Some(device)),
            phase: Mutex::new(ReleasePhase::Active),
            view_detached: Notify::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<LocalTrack>] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: MediaKind) -> impl Iterator<Item = &Arc<LocalTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn has(&self, kind: MediaKind) -> bool {
        self.tracks_of(kind).next().is_some()
    }

    pub fn set_enabled(&self, kind: MediaKind, enabled: bool) {
        for track in self.tracks_of(kind) {
            track.set_enabled(enabled);
        }
    }

    pub fn phase(&self) -> ReleasePhase {
        *self.phase.lock()
    }

    /// Flip front/back camera on the capture device
    pub fn switch_camera(&self) -> bool {
        match self.device.lock().as_mut() {
            Some(device) => device.switch_camera(),
            None => false,
        }
    }

    /// Phase 1: mute every track
    pub fn disable_all(&self) {
        for track in &self.tracks {
            track.set_enabled(false);
        }
        self.advance(ReleasePhase::Disabling);
    }

    /// Phase 2: stop every track
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
        self.advance(ReleasePhase::Stopped);
    }

    /// Phase 3: free the hardware; runs at most once
    pub fn release_device(&self) {
        let device = self.device.lock().take();
        if let Some(mut device) = device {
            device.release();
            info!("Released capture device for stream {}", self.id);
        }
        self.advance(ReleasePhase::Released);
    }

    /// Acknowledgement from the rendering layer that no view reads this stream
    ///
    /// Ignored while the stream is active; returns whether it was taken.
    pub fn mark_view_detached(&self) -> bool {
        if self.phase() == ReleasePhase::Active {
            debug!("Ignoring view detach for active stream {}", self.id);
            return false;
        }
        self.view_detached.notify_one();
        true
    }

    pub(crate) async fn view_detached(&self) {
        self.view_detached.notified().await;
    }

    fn advance(&self, next: ReleasePhase) {
        let mut phase = self.phase.lock();
        if next as u8 > *phase as u8 {
            debug!("Stream {} {:?} -> {:?}", self.id, *phase, next);
            *phase = next;
        }
    }
}

impl fmt::Debug for LocalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks)
            .field("phase", &self.phase())
            .finish()
    }
}
