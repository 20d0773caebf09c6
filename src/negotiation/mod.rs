//! Offer/answer negotiation
//!
//! `NegotiationCoordinator` routes inbound negotiation traffic to the owning
//! peer's worker. Work for one peer runs in arrival order on that worker;
//! different peers negotiate concurrently.

pub mod candidates;
pub mod negotiator;
pub mod state;

pub use candidates::PendingIceCandidates;
pub use negotiator::{ConnectionSource, PeerAddress, PeerCommand, PeerNegotiator};
pub use state::{NegotiationState, Role};

use crate::metrics::MeetingMetrics;
use crate::model::{IceCandidate, SessionDescription};
use crate::peer::PeerConnectionManager;
use log::debug;
use std::sync::Arc;

pub struct NegotiationCoordinator {
    peers: Arc<PeerConnectionManager>,
    pending: Arc<PendingIceCandidates>,
    metrics: Arc<MeetingMetrics>,
}

impl NegotiationCoordinator {
    pub fn new(
        peers: Arc<PeerConnectionManager>,
        pending: Arc<PendingIceCandidates>,
        metrics: Arc<MeetingMetrics>,
    ) -> Self {
        Self { peers, pending, metrics }
    }

    /// Queue a fresh offer to `user_id`; false when there is no such peer
    pub fn create_offer(&self, user_id: &str) -> bool {
        self.peers.dispatch(user_id, PeerCommand::CreateOffer).is_ok()
    }

    pub fn handle_offer(&self, from_user_id: &str, from_socket_id: &str, offer: SessionDescription) {
        self.peers.create_as_responder(from_user_id, from_socket_id);
        let command = PeerCommand::RemoteOffer { from_socket_id: from_socket_id.to_string(), offer };
        if self.peers.dispatch(from_user_id, command).is_err() {
            debug!("Offer from {} arrived after teardown", from_user_id);
        }
    }

    pub fn handle_answer(&self, from_user_id: &str, answer: SessionDescription) {
        if self.peers.dispatch(from_user_id, PeerCommand::RemoteAnswer { answer }).is_err() {
            debug!("Dropping answer from unknown peer {}", from_user_id);
        }
    }

    /// Apply or queue; candidates for peers without an entry wait in the queue
    pub fn handle_ice_candidate(&self, from_user_id: &str, candidate: IceCandidate) {
        if let Err(PeerCommand::RemoteCandidate { candidate }) =
            self.peers.dispatch(from_user_id, PeerCommand::RemoteCandidate { candidate })
        {
            let queued = self.pending.push(from_user_id, candidate);
            self.metrics.ice_queued.inc();
            debug!("Queued candidate for {} before its connection ({} pending)", from_user_id, queued);
        }
    }

    pub fn pending(&self) -> &PendingIceCandidates {
        &self.pending
    }
}
