//! Meeting service
//!
//! Owns every per-meeting map; nothing lives in module-level state. Inbound
//! signaling is consumed by one dispatcher task in arrival order, while each
//! peer's negotiation continues on its own worker.

use super::store::{MeetingStore, StoredMeeting};
use super::MeetingError;
use crate::config::Config;
use crate::media::{CaptureProvider, LocalStream, MediaSessionController};
use crate::metrics::MeetingMetrics;
use crate::model::{
    IncomingCall, JoinOutcome, MediaDeviceState, MediaKind, MeetingConfig, Participant, StartOptions,
};
use crate::negotiation::{NegotiationCoordinator, PendingIceCandidates};
use crate::observers::{ObserverSet, Subscription};
use crate::participants::ParticipantRegistry;
use crate::peer::{PeerConnectionManager, StreamUpdate};
use crate::rtc::{PeerConnectionFactory, RemoteStream};
use crate::signaling::channel::SignalingChannel;
use crate::signaling::InboundEvent;
use crate::transport::Transport;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct MeetingService {
    local_user_id: String,
    signaling: Arc<SignalingChannel>,
    media: Arc<MediaSessionController>,
    peers: Arc<PeerConnectionManager>,
    negotiation: Arc<NegotiationCoordinator>,
    participants: Arc<ParticipantRegistry>,
    pending: Arc<PendingIceCandidates>,
    metrics: Arc<MeetingMetrics>,
    incoming_calls: Arc<ObserverSet<IncomingCall>>,
    store: MeetingStore,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl MeetingService {
    /// Build a service for `config.signaling.user_id`; must run inside a Tokio runtime
    pub fn new(
        config: &Config,
        capture: Arc<dyn CaptureProvider>,
        factory: Arc<dyn PeerConnectionFactory>,
    ) -> Result<Self, MeetingError> {
        let local_user_id = config.signaling.user_id.clone();
        let (signaling, inbound) = SignalingChannel::new(local_user_id.clone());
        let signaling = Arc::new(signaling);
        let metrics = Arc::new(MeetingMetrics::new()?);
        let pending = Arc::new(PendingIceCandidates::new());

        let peers = Arc::new(PeerConnectionManager::new(
            factory,
            signaling.clone(),
            pending.clone(),
            metrics.clone(),
            config.negotiation.clone(),
        ));
        let negotiation = Arc::new(NegotiationCoordinator::new(peers.clone(), pending.clone(), metrics.clone()));
        let participants = Arc::new(ParticipantRegistry::new(local_user_id.clone()));
        let incoming_calls = Arc::new(ObserverSet::new());

        let dispatcher = Dispatcher {
            local_user_id: local_user_id.clone(),
            peers: peers.clone(),
            negotiation: negotiation.clone(),
            participants: participants.clone(),
            incoming_calls: incoming_calls.clone(),
        };
        let dispatcher = tokio::spawn(dispatcher.run(inbound));

        Ok(Self {
            local_user_id,
            signaling,
            media: Arc::new(MediaSessionController::new(capture, config.media.clone())),
            peers,
            negotiation,
            participants,
            pending,
            metrics,
            incoming_calls,
            store: MeetingStore::new(&config.storage),
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    /// Attach or replace the signaling transport
    pub fn attach_transport(&self, transport: Arc<dyn Transport>) {
        self.signaling.attach(transport);
    }

    /// Join `config` with fresh local media
    ///
    /// Returns once the server acknowledges the join; negotiation with the
    /// members already present continues in the background.
    pub async fn start_meeting(
        &self,
        config: MeetingConfig,
        options: StartOptions,
    ) -> Result<JoinOutcome, MeetingError> {
        if !self.signaling.is_attached() {
            return Err(MeetingError::NotConnected);
        }
        self.reset().await;

        info!("Starting {} meeting {}", config.meeting_type.as_str(), config.meeting_id);
        let (media_state, stream) = self.media.acquire(options.audio, options.video).await;
        self.peers.set_local_stream(stream);

        if let Err(e) = self.store.save(&config, options.title.as_deref()) {
            warn!("Failed to persist meeting {}: {}", config.meeting_id, e);
        }

        let roster = match self.signaling.join(&config).await {
            Ok(roster) => roster,
            Err(e) => {
                self.peers.set_local_stream(None);
                self.media.release();
                if let Err(e) = self.store.clear() {
                    warn!("Failed to clear meeting record: {}", e);
                }
                return Err(e.into());
            }
        };

        for participant in self.participants.seed(&roster) {
            self.peers.create_as_initiator(&participant.user_id, &participant.socket_id);
        }

        Ok(JoinOutcome {
            success: true,
            participants: self.participants.snapshot(),
            media_state,
        })
    }

    /// Leave the active meeting; no-op when there is none
    pub async fn leave_meeting(&self) {
        let config = match self.signaling.active() {
            Some(config) => config,
            None => {
                debug!("Leave requested with no active meeting");
                return;
            }
        };

        // Peers learn about the departure before any local teardown
        if let Err(e) = self.signaling.leave(&config) {
            warn!("Failed to send leave for {}: {}", config.meeting_id, e);
        }
        self.teardown().await;
        if let Err(e) = self.store.clear() {
            warn!("Failed to clear meeting record: {}", e);
        }
        info!("Left meeting {}", config.meeting_id);
    }

    async fn reset(&self) {
        if self.signaling.active().is_some() {
            self.leave_meeting().await;
        } else {
            self.teardown().await;
        }
    }

    async fn teardown(&self) {
        self.peers.close_all().await;
        self.peers.set_local_stream(None);
        self.media.release();
        self.participants.clear();
        self.pending.clear();
    }

    pub fn toggle_audio(&self, enabled: bool) -> MediaDeviceState {
        self.toggle(MediaKind::Audio, enabled)
    }

    pub fn toggle_video(&self, enabled: bool) -> MediaDeviceState {
        self.toggle(MediaKind::Video, enabled)
    }

    /// Track enablement plus a media-state broadcast; never renegotiates
    fn toggle(&self, kind: MediaKind, enabled: bool) -> MediaDeviceState {
        let state = self.media.toggle(kind, enabled);
        if self.signaling.active().is_some() {
            if let Err(e) = self.signaling.send_media_state(kind, state.is_enabled(kind)) {
                warn!("Failed to broadcast {} state: {}", kind, e);
            }
        }
        state
    }

    pub fn switch_camera(&self) -> bool {
        self.media.switch_camera()
    }

    /// The rendering layer has detached every view of the local stream
    pub fn notify_view_detached(&self) {
        self.media.view_detached();
    }

    /// Wait until released capture devices are actually freed
    pub async fn media_released(&self) {
        self.media.wait_released().await;
    }

    pub fn get_local_stream(&self) -> Option<Arc<LocalStream>> {
        self.media.local_stream()
    }

    pub fn get_remote_stream(&self, user_id: &str) -> Option<RemoteStream> {
        self.peers.get_remote_stream(user_id)
    }

    pub fn get_participants(&self) -> Vec<Participant> {
        self.participants.snapshot()
    }

    pub fn get_media_device_state(&self) -> MediaDeviceState {
        self.media.state()
    }

    pub fn active_meeting(&self) -> Option<MeetingConfig> {
        self.signaling.active()
    }

    /// A meeting record young enough to offer a rejoin
    pub fn stored_meeting(&self) -> Option<StoredMeeting> {
        match self.store.load() {
            Ok(record) => record,
            Err(e) => {
                warn!("Failed to read meeting record: {}", e);
                None
            }
        }
    }

    pub fn negotiation(&self) -> &NegotiationCoordinator {
        &self.negotiation
    }

    pub fn metrics(&self) -> &MeetingMetrics {
        &self.metrics
    }

    pub fn on_participant_update(
        &self,
        callback: impl Fn(&Vec<Participant>) + Send + Sync + 'static,
    ) -> Subscription {
        self.participants.on_participant_update(callback)
    }

    pub fn on_stream_update(&self, callback: impl Fn(&StreamUpdate) + Send + Sync + 'static) -> Subscription {
        self.peers.on_stream_update(callback)
    }

    pub fn on_media_device_update(
        &self,
        callback: impl Fn(&MediaDeviceState) + Send + Sync + 'static,
    ) -> Subscription {
        self.media.on_media_device_update(callback)
    }

    pub fn on_incoming_call(&self, callback: impl Fn(&IncomingCall) + Send + Sync + 'static) -> Subscription {
        self.incoming_calls.subscribe(callback)
    }

    /// Leave, stop consuming signaling and detach from the transport
    pub async fn dispose(&self) {
        self.leave_meeting().await;
        self.teardown().await;
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.abort();
        }
        self.signaling.detach();
        info!("Meeting service for {} disposed", self.local_user_id);
    }
}

impl Drop for MeetingService {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.get_mut().take() {
            dispatcher.abort();
        }
    }
}

/// Applies inbound signaling in arrival order
struct Dispatcher {
    local_user_id: String,
    peers: Arc<PeerConnectionManager>,
    negotiation: Arc<NegotiationCoordinator>,
    participants: Arc<ParticipantRegistry>,
    incoming_calls: Arc<ObserverSet<IncomingCall>>,
}

impl Dispatcher {
    async fn run(self, mut inbound: mpsc::UnboundedReceiver<InboundEvent>) {
        while let Some(event) = inbound.recv().await {
            if event.user_id() == Some(self.local_user_id.as_str()) {
                debug!("Ignoring own {:?}", event);
                continue;
            }
            self.handle(event).await;
        }
        debug!("Signaling dispatcher stopped");
    }

    async fn handle(&self, event: InboundEvent) {
        match event {
            InboundEvent::UserJoined { user_id, socket_id, name, avatar } => {
                info!("{} joined", user_id);
                self.participants
                    .insert(Participant::new(user_id.clone(), socket_id.clone(), name, avatar));
                self.peers.create_as_initiator(&user_id, &socket_id);
            }
            InboundEvent::UserLeft { user_id } => {
                if self.participants.remove(&user_id).is_some() {
                    info!("{} left", user_id);
                }
                self.peers.remove(&user_id).await;
            }
            InboundEvent::Offer { from_user_id, from_socket_id, offer } => {
                self.negotiation.handle_offer(&from_user_id, &from_socket_id, offer);
            }
            InboundEvent::Answer { from_user_id, answer, .. } => {
                self.negotiation.handle_answer(&from_user_id, answer);
            }
            InboundEvent::IceCandidate { from_user_id, candidate, .. } => {
                self.negotiation.handle_ice_candidate(&from_user_id, candidate);
            }
            InboundEvent::MediaState { user_id, kind, enabled } => {
                if !self.participants.patch_media(&user_id, kind, enabled) {
                    debug!("Media state for unknown participant {}", user_id);
                }
            }
            InboundEvent::IncomingCall(call) => {
                info!(
                    "Incoming call for meeting {} from {}",
                    call.meeting_id,
                    call.caller_name.as_deref().unwrap_or(&call.caller_id)
                );
                self.incoming_calls.notify(&call);
            }
        }
    }
}
