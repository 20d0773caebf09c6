//! Per-peer worker task
//!
//! Builds the connection, attaches the local tracks, then runs the peer's
//! commands one at a time until the entry is removed.

use super::StreamUpdate;
use crate::config::NegotiationConfig;
use crate::media::LocalStream;
use crate::metrics::MeetingMetrics;
use crate::model::IceCandidate;
use crate::negotiation::{ConnectionSource, PeerAddress, PeerCommand, PeerNegotiator, PendingIceCandidates};
use crate::observers::ObserverSet;
use crate::rtc::{
    ConnectionState, PeerCallbacks, PeerConnection, PeerConnectionFactory, RemoteStream, RemoteTrackInfo, RtcError,
};
use crate::signaling::channel::SignalingChannel;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Connection handle shared between the worker and the manager
#[derive(Default)]
pub(super) struct PeerSlot {
    pub connection: Option<Arc<dyn PeerConnection>>,
    pub closed: bool,
}

pub(super) struct PeerWorker {
    pub user_id: String,
    pub address: PeerAddress,
    pub factory: Arc<dyn PeerConnectionFactory>,
    pub signaling: Arc<SignalingChannel>,
    pub pending: Arc<PendingIceCandidates>,
    pub metrics: Arc<MeetingMetrics>,
    pub config: NegotiationConfig,
    pub local_stream: Option<Arc<LocalStream>>,
    pub slot: Arc<Mutex<PeerSlot>>,
    pub remote_streams: Arc<Mutex<HashMap<String, RemoteStream>>>,
    pub stream_observers: Arc<ObserverSet<StreamUpdate>>,
    pub inbox: mpsc::WeakUnboundedSender<PeerCommand>,
}

impl PeerWorker {
    pub async fn run(self, mut commands: mpsc::UnboundedReceiver<PeerCommand>) {
        let connector = Arc::new(PeerConnector {
            user_id: self.user_id.clone(),
            factory: self.factory.clone(),
            callbacks: self.callbacks(),
            local_stream: self.local_stream.clone(),
            slot: self.slot.clone(),
            metrics: self.metrics.clone(),
        });

        let connection = match connector.connect().await {
            Ok(connection) => connection,
            Err(RtcError::Closed) => return,
            Err(e) => {
                error!("Failed to create connection for {}: {}", self.user_id, e);
                self.metrics.negotiation_failures.inc();
                return;
            }
        };

        let mut negotiator = PeerNegotiator::new(
            self.user_id.clone(),
            self.address.clone(),
            connection,
            connector,
            self.signaling.clone(),
            self.pending.clone(),
            self.metrics.clone(),
        );
        debug!("Worker for {} ready ({:?})", self.user_id, negotiator.role());

        while let Some(command) = commands.recv().await {
            negotiator.handle(command).await;
        }
        debug!("Worker for {} stopped", self.user_id);
    }

    fn callbacks(&self) -> PeerCallbacks {
        // Local candidates go out as soon as they are gathered
        let signaling = self.signaling.clone();
        let address = self.address.clone();
        let candidate_peer = self.user_id.clone();
        let on_ice_candidate = Arc::new(move |candidate: IceCandidate| {
            if let Err(e) = signaling.send_ice_candidate(&address.get(), candidate) {
                debug!("Local candidate for {} not sent: {}", candidate_peer, e);
            }
        });

        let slot = self.slot.clone();
        let remote_streams = self.remote_streams.clone();
        let observers = self.stream_observers.clone();
        let track_peer = self.user_id.clone();
        let on_remote_track = Arc::new(move |track: RemoteTrackInfo| {
            if slot.lock().closed {
                return;
            }
            let stream = {
                let mut streams = remote_streams.lock();
                let stream = streams.entry(track_peer.clone()).or_default();
                if !stream.tracks.iter().any(|t| t.track_id == track.track_id) {
                    stream.tracks.push(track);
                }
                stream.clone()
            };
            observers.notify(&StreamUpdate { user_id: track_peer.clone(), stream: Some(stream) });
        });

        let state_peer = self.user_id.clone();
        let inbox = self.inbox.clone();
        let renegotiate = self.config.renegotiate_on_failure;
        let delay = Duration::from_millis(self.config.renegotiate_delay_ms);
        let on_state_change = Arc::new(move |state: ConnectionState| {
            info!("Connection to {} is {:?}", state_peer, state);
            if !(renegotiate && state.needs_recovery()) {
                return;
            }
            let inbox = inbox.clone();
            let peer = state_peer.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                // Gone if the entry was removed meanwhile
                if let Some(inbox) = inbox.upgrade() {
                    info!("Renegotiating with {} after {:?}", peer, state);
                    let _ = inbox.send(PeerCommand::CreateOffer);
                }
            });
        });

        PeerCallbacks { on_ice_candidate, on_remote_track, on_state_change }
    }
}

/// Builds this peer's connections and keeps the shared slot pointing at the live one
struct PeerConnector {
    user_id: String,
    factory: Arc<dyn PeerConnectionFactory>,
    callbacks: PeerCallbacks,
    local_stream: Option<Arc<LocalStream>>,
    slot: Arc<Mutex<PeerSlot>>,
    metrics: Arc<MeetingMetrics>,
}

impl PeerConnector {
    async fn connect(&self) -> Result<Arc<dyn PeerConnection>, RtcError> {
        let connection = self.factory.create(&self.user_id, self.callbacks.clone()).await?;

        let (removed, previous) = {
            let mut slot = self.slot.lock();
            if slot.closed {
                (true, None)
            } else {
                (false, slot.connection.replace(connection.clone()))
            }
        };
        if removed {
            let _ = connection.close().await;
            return Err(RtcError::Closed);
        }

        match previous {
            Some(previous) => {
                if let Err(e) = previous.close().await {
                    debug!("Replaced connection to {} did not close cleanly: {}", self.user_id, e);
                }
            }
            None => self.metrics.open_connections.inc(),
        }

        if let Some(stream) = &self.local_stream {
            for track in stream.tracks() {
                if let Err(e) = connection.add_track(track.clone()).await {
                    warn!("Failed to attach local {} track for {}: {}", track.kind(), self.user_id, e);
                }
            }
        }
        Ok(connection)
    }
}

#[async_trait]
impl ConnectionSource for PeerConnector {
    async fn replace(&self) -> Result<Arc<dyn PeerConnection>, RtcError> {
        info!("Replacing connection to {}", self.user_id);
        self.connect().await
    }
}
