//! Media session controller
//!
//! Acquisition never fails a join: full capture degrades to audio-only and
//! then to no media. Toggles only flip track enablement. Release is two-phase:
//! tracks are muted synchronously, then a background task stops them, waits
//! for the rendering layer to detach (or the grace delay) and only then frees
//! the hardware.

use super::capture::{CaptureConstraints, CaptureProvider};
use super::track::LocalStream;
use crate::config::MediaConfig;
use crate::model::{MediaDeviceState, MediaKind};
use crate::observers::{ObserverSet, Subscription};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

struct Inner {
    stream: Option<Arc<LocalStream>>,
    state: MediaDeviceState,
    releasing: Vec<(Arc<LocalStream>, JoinHandle<()>)>,
}

pub struct MediaSessionController {
    provider: Arc<dyn CaptureProvider>,
    config: MediaConfig,
    inner: Mutex<Inner>,
    observers: ObserverSet<MediaDeviceState>,
}

impl MediaSessionController {
    pub fn new(provider: Arc<dyn CaptureProvider>, config: MediaConfig) -> Self {
        Self {
            provider,
            config,
            inner: Mutex::new(Inner {
                stream: None,
                state: MediaDeviceState::default(),
                releasing: Vec::new(),
            }),
            observers: ObserverSet::new(),
        }
    }

    /// Acquire local media, degrading on failure
    pub async fn acquire(&self, want_audio: bool, want_video: bool) -> (MediaDeviceState, Option<Arc<LocalStream>>) {
        self.release();

        let attempts: Vec<CaptureConstraints> = match (want_audio, want_video) {
            (true, true) => vec![CaptureConstraints::new(true, true), CaptureConstraints::new(true, false)],
            (false, false) => Vec::new(),
            (audio, video) => vec![CaptureConstraints::new(audio, video)],
        };

        let mut stream = None;
        for constraints in attempts {
            match self.provider.open(constraints).await {
                Ok(media) => {
                    let id = format!("local-{}", uuid::Uuid::new_v4());
                    stream = Some(Arc::new(LocalStream::new(id, media.tracks, media.device)));
                    break;
                }
                Err(e) => warn!(
                    "Capture failed (audio: {}, video: {}): {}",
                    constraints.audio, constraints.video, e
                ),
            }
        }

        let state = match &stream {
            Some(stream) => {
                let has_audio = stream.has(MediaKind::Audio);
                let has_video = stream.has(MediaKind::Video);
                MediaDeviceState {
                    has_audio,
                    has_video,
                    audio_enabled: has_audio,
                    video_enabled: has_video,
                    is_front_camera: true,
                }
            }
            None => {
                if want_audio || want_video {
                    warn!("Continuing without local media");
                }
                MediaDeviceState::default()
            }
        };
        info!(
            "Local media: audio={} video={}",
            state.has_audio, state.has_video
        );

        {
            let mut inner = self.inner.lock();
            inner.stream = stream.clone();
            inner.state = state;
        }
        self.observers.notify(&state);
        (state, stream)
    }

    /// Flip the enabled flag on every local track of `kind`
    pub fn toggle(&self, kind: MediaKind, enabled: bool) -> MediaDeviceState {
        let state = {
            let mut inner = self.inner.lock();
            let stream = match inner.stream.clone() {
                Some(stream) => stream,
                None => return inner.state,
            };
            stream.set_enabled(kind, enabled);
            let effective = enabled && inner.state.has(kind);
            match kind {
                MediaKind::Audio => inner.state.audio_enabled = effective,
                MediaKind::Video => inner.state.video_enabled = effective,
            }
            inner.state
        };
        debug!("Local {} {}", kind, if enabled { "enabled" } else { "disabled" });
        self.observers.notify(&state);
        state
    }

    /// Switch between front and back camera
    pub fn switch_camera(&self) -> bool {
        let state = {
            let mut inner = self.inner.lock();
            let stream = match inner.stream.clone() {
                Some(stream) if stream.has(MediaKind::Video) => stream,
                _ => return false,
            };
            if !stream.switch_camera() {
                return false;
            }
            inner.state.is_front_camera = !inner.state.is_front_camera;
            inner.state
        };
        self.observers.notify(&state);
        true
    }

    /// Mute every local track without stopping it
    pub fn disable_all(&self) {
        if let Some(stream) = self.local_stream() {
            stream.disable_all();
        }
    }

    /// Start the two-phase release of the current stream
    ///
    /// Tracks are muted before this returns; stopping them and freeing the
    /// hardware happen in the background.
    pub fn release(&self) {
        let (stream, state) = {
            let mut inner = self.inner.lock();
            let stream = match inner.stream.take() {
                Some(stream) => stream,
                None => return,
            };
            inner.state = MediaDeviceState::default();
            (stream, inner.state)
        };

        stream.disable_all();
        let handle = tokio::spawn(finish_release(
            stream.clone(),
            Duration::from_millis(self.config.release_grace_ms),
            self.config.wait_for_view_detach,
        ));

        {
            let mut inner = self.inner.lock();
            inner.releasing.retain(|(_, h)| !h.is_finished());
            inner.releasing.push((stream, handle));
        }
        self.observers.notify(&state);
    }

    /// Acknowledgement from the rendering layer that local views are detached
    ///
    /// Only streams already being released take it; the live stream may be
    /// attached to a view again before it is released.
    pub fn view_detached(&self) {
        let inner = self.inner.lock();
        for (stream, _) in &inner.releasing {
            stream.mark_view_detached();
        }
    }

    /// Wait for every pending release to free its hardware
    pub async fn wait_released(&self) {
        let handles: Vec<JoinHandle<()>> = self
            .inner
            .lock()
            .releasing
            .drain(..)
            .map(|(_, handle)| handle)
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Media release task failed: {}", e);
            }
        }
    }

    pub fn local_stream(&self) -> Option<Arc<LocalStream>> {
        self.inner.lock().stream.clone()
    }

    pub fn state(&self) -> MediaDeviceState {
        self.inner.lock().state
    }

    pub fn on_media_device_update(
        &self,
        callback: impl Fn(&MediaDeviceState) + Send + Sync + 'static,
    ) -> Subscription {
        self.observers.subscribe(callback)
    }
}

async fn finish_release(stream: Arc<LocalStream>, grace: Duration, wait_for_view_detach: bool) {
    stream.stop_all();
    if wait_for_view_detach {
        tokio::select! {
            _ = stream.view_detached() => debug!("View detached from stream {}", stream.id()),
            _ = tokio::time::sleep(grace) => debug!("Grace delay elapsed for stream {}", stream.id()),
        }
    } else {
        tokio::time::sleep(grace).await;
    }
    stream.release_device();
}
