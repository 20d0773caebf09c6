//! Camera and microphone providers

use super::track::LocalTrack;
use super::MediaError;
use crate::model::MediaKind;
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use webrtc::media::Sample;

/// What to open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub audio: bool,
    pub video: bool,
    /// Facing mode for the camera
    pub front_camera: bool,
}

impl CaptureConstraints {
    pub fn new(audio: bool, video: bool) -> Self {
        Self { audio, video, front_camera: true }
    }
}

/// Opened tracks plus the hardware handle backing them
pub struct CapturedMedia {
    pub tracks: Vec<Arc<LocalTrack>>,
    pub device: Box<dyn DeviceHandle>,
}

/// Hardware backing a local stream
pub trait DeviceHandle: Send {
    /// Free the camera/microphone
    fn release(&mut self);

    /// Flip front/back camera; false when unsupported
    fn switch_camera(&mut self) -> bool {
        false
    }
}

#[async_trait]
pub trait CaptureProvider: Send + Sync {
    /// Open the requested devices; fails as a whole if any requested device is unavailable
    async fn open(&self, constraints: CaptureConstraints) -> Result<CapturedMedia, MediaError>;
}

const AUDIO_FRAME: Duration = Duration::from_millis(20);
const VIDEO_FRAME: Duration = Duration::from_millis(33);
// Opus comfort-noise frame
const OPUS_SILENCE: &[u8] = &[0xf8, 0xff, 0xfe];
// VP8 keyframe header with an empty partition
const VP8_PLACEHOLDER: &[u8] = &[0x10, 0x02, 0x00, 0x9d, 0x01, 0x2a, 0x02, 0x00, 0x02, 0x00];

/// Capture provider that produces placeholder Opus/VP8 samples
///
/// Stands in for real devices in the CLI and in integration runs; either kind
/// can be configured as denied to exercise acquisition fallback.
#[derive(Debug, Clone)]
pub struct SyntheticCapture {
    allow_audio: bool,
    allow_video: bool,
}

impl Default for SyntheticCapture {
    fn default() -> Self {
        Self { allow_audio: true, allow_video: true }
    }
}

impl SyntheticCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_audio(mut self) -> Self {
        self.allow_audio = false;
        self
    }

    pub fn deny_video(mut self) -> Self {
        self.allow_video = false;
        self
    }
}

#[async_trait]
impl CaptureProvider for SyntheticCapture {
    async fn open(&self, constraints: CaptureConstraints) -> Result<CapturedMedia, MediaError> {
        if constraints.audio && !self.allow_audio {
            return Err(MediaError::PermissionDenied("microphone".to_string()));
        }
        if constraints.video && !self.allow_video {
            return Err(MediaError::PermissionDenied("camera".to_string()));
        }

        let stream_id = format!("local-{}", uuid::Uuid::new_v4());
        let mut tracks = Vec::new();
        let mut pumps = Vec::new();

        if constraints.audio {
            let track = Arc::new(LocalTrack::new(MediaKind::Audio, &stream_id));
            pumps.push(spawn_pump(track.clone(), OPUS_SILENCE, AUDIO_FRAME));
            tracks.push(track);
        }
        if constraints.video {
            let track = Arc::new(LocalTrack::new(MediaKind::Video, &stream_id));
            pumps.push(spawn_pump(track.clone(), VP8_PLACEHOLDER, VIDEO_FRAME));
            tracks.push(track);
        }

        info!(
            "Synthetic capture opened (audio: {}, video: {})",
            constraints.audio, constraints.video
        );
        Ok(CapturedMedia {
            tracks,
            device: Box::new(SyntheticDevice { pumps, front_camera: constraints.front_camera }),
        })
    }
}

fn spawn_pump(track: Arc<LocalTrack>, payload: &'static [u8], frame: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(frame);
        let rtc = track.rtc_track();
        loop {
            ticker.tick().await;
            if track.is_stopped() {
                break;
            }
            if !track.is_enabled() {
                continue;
            }
            let sample = Sample {
                data: Bytes::from_static(payload),
                duration: frame,
                ..Default::default()
            };
            if let Err(e) = rtc.write_sample(&sample).await {
                debug!("Sample write on {} failed: {}", track.id(), e);
            }
        }
    })
}

struct SyntheticDevice {
    pumps: Vec<JoinHandle<()>>,
    front_camera: bool,
}

impl DeviceHandle for SyntheticDevice {
    fn release(&mut self) {
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
    }

    fn switch_camera(&mut self) -> bool {
        self.front_camera = !self.front_camera;
        debug!("Synthetic camera now facing {}", if self.front_camera { "front" } else { "back" });
        true
    }
}

impl Drop for SyntheticDevice {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn denied_kind_fails_the_whole_open() {
        let capture = SyntheticCapture::new().deny_video();
        let err = capture.open(CaptureConstraints::new(true, true)).await.err();
        assert_eq!(err, Some(MediaError::PermissionDenied("camera".to_string())));

        let media = capture.open(CaptureConstraints::new(true, false)).await.unwrap();
        assert_eq!(media.tracks.len(), 1);
        assert_eq!(media.tracks[0].kind(), MediaKind::Audio);
    }

    #[tokio::test]
    async fn release_stops_pumps() {
        let capture = SyntheticCapture::new();
        let mut media = capture.open(CaptureConstraints::new(true, true)).await.unwrap();
        assert_eq!(media.tracks.len(), 2);
        assert!(media.device.switch_camera());
        media.device.release();
        media.device.release();
    }
}
