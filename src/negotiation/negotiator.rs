//! Offer/answer driver for a single peer
//!
//! A `PeerNegotiator` is owned by that peer's worker task and only ever sees
//! one command at a time, so it needs no locking of its own.

use super::candidates::PendingIceCandidates;
use super::state::{decide, next_state, Action, NegotiationState, Role, Signal};
use crate::metrics::MeetingMetrics;
use crate::model::{IceCandidate, SessionDescription};
use crate::rtc::{PeerConnection, RtcError};
use crate::signaling::channel::SignalingChannel;
use crate::signaling::SignalingError;
use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Work item for one peer's worker
#[derive(Debug, Clone, PartialEq)]
pub enum PeerCommand {
    CreateOffer,
    RemoteOffer { from_socket_id: String, offer: SessionDescription },
    RemoteAnswer { answer: SessionDescription },
    RemoteCandidate { candidate: IceCandidate },
}

/// Socket currently addressed for a peer; follows the latest offer
#[derive(Debug, Clone, Default)]
pub struct PeerAddress(Arc<Mutex<String>>);

impl PeerAddress {
    pub fn new(socket_id: impl Into<String>) -> Self {
        Self(Arc::new(Mutex::new(socket_id.into())))
    }

    pub fn get(&self) -> String {
        self.0.lock().clone()
    }

    pub fn set(&self, socket_id: impl Into<String>) {
        *self.0.lock() = socket_id.into();
    }
}

/// Builds replacement connections for one peer
///
/// webrtc-rs cannot roll back a pending local offer, so the polite side of
/// an offer collision discards its connection and answers on a fresh one.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    /// Close the current connection and return a new one with the local tracks attached
    async fn replace(&self) -> Result<Arc<dyn PeerConnection>, RtcError>;
}

#[derive(Debug)]
enum StepError {
    Rtc(RtcError),
    Signaling(SignalingError),
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::Rtc(e) => write!(f, "{}", e),
            StepError::Signaling(e) => write!(f, "{}", e),
        }
    }
}

impl From<RtcError> for StepError {
    fn from(err: RtcError) -> Self {
        StepError::Rtc(err)
    }
}

impl From<SignalingError> for StepError {
    fn from(err: SignalingError) -> Self {
        StepError::Signaling(err)
    }
}

pub struct PeerNegotiator {
    user_id: String,
    address: PeerAddress,
    role: Role,
    connection: Arc<dyn PeerConnection>,
    source: Arc<dyn ConnectionSource>,
    state: NegotiationState,
    remote_description_set: bool,
    signaling: Arc<SignalingChannel>,
    pending: Arc<PendingIceCandidates>,
    metrics: Arc<MeetingMetrics>,
}

impl PeerNegotiator {
    pub fn new(
        user_id: impl Into<String>,
        address: PeerAddress,
        connection: Arc<dyn PeerConnection>,
        source: Arc<dyn ConnectionSource>,
        signaling: Arc<SignalingChannel>,
        pending: Arc<PendingIceCandidates>,
        metrics: Arc<MeetingMetrics>,
    ) -> Self {
        let user_id = user_id.into();
        let role = Role::between(signaling.local_user_id(), &user_id);
        Self {
            user_id,
            address,
            role,
            connection,
            source,
            state: NegotiationState::Stable,
            remote_description_set: false,
            signaling,
            pending,
            metrics,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Run one command; failures are logged and stay with this peer
    pub async fn handle(&mut self, command: PeerCommand) {
        let result = match command {
            PeerCommand::CreateOffer => self.create_offer().await,
            PeerCommand::RemoteOffer { from_socket_id, offer } => self.handle_offer(from_socket_id, offer).await,
            PeerCommand::RemoteAnswer { answer } => self.handle_answer(answer).await,
            PeerCommand::RemoteCandidate { candidate } => self.handle_candidate(candidate).await,
        };

        if let Err(e) = result {
            warn!("Negotiation with {} failed: {}", self.user_id, e);
            self.metrics.negotiation_failures.inc();
            // A failed step leaves nothing in flight
            self.state = NegotiationState::Stable;
        }
    }

    async fn create_offer(&mut self) -> Result<(), StepError> {
        let action = decide(self.state, Signal::LocalOffer, self.role);
        if action == Action::SkipOffer {
            debug!("Offer to {} skipped, negotiation in flight ({:?})", self.user_id, self.state);
            return Ok(());
        }

        let offer = self.connection.create_offer().await?;
        self.connection.set_local_description(offer.clone()).await?;
        self.state = next_state(self.state, action);
        self.signaling.send_offer(&self.address.get(), offer)?;
        self.metrics.offers_sent.inc();
        info!("Sent offer to {}", self.user_id);
        Ok(())
    }

    async fn handle_offer(&mut self, from_socket_id: String, offer: SessionDescription) -> Result<(), StepError> {
        // Answers and local candidates go to the socket the offer came from
        self.address.set(from_socket_id);

        let action = decide(self.state, Signal::RemoteOffer, self.role);
        match action {
            Action::IgnoreOffer => {
                info!("Offer collision with {}: keeping local offer", self.user_id);
                self.metrics.glare_ignored();
                return Ok(());
            }
            Action::RollbackThenAccept => {
                info!("Offer collision with {}: dropping local offer", self.user_id);
                self.state = NegotiationState::Stable;
                self.remote_description_set = false;
                self.connection = self.source.replace().await?;
                self.metrics.glare_rolled_back();
            }
            _ => {}
        }

        self.state = NegotiationState::HaveRemoteOffer;
        self.connection.set_remote_description(offer).await?;
        self.remote_description_set = true;
        self.drain_pending().await;

        let answer = self.connection.create_answer().await?;
        self.connection.set_local_description(answer.clone()).await?;
        self.state = next_state(self.state, action);
        self.signaling.send_answer(&self.address.get(), answer)?;
        self.metrics.answers_sent.inc();
        info!("Sent answer to {}", self.user_id);
        Ok(())
    }

    async fn handle_answer(&mut self, answer: SessionDescription) -> Result<(), StepError> {
        let action = decide(self.state, Signal::RemoteAnswer, self.role);
        if action == Action::IgnoreAnswer {
            debug!("Ignoring answer from {} in state {:?}", self.user_id, self.state);
            return Ok(());
        }

        self.connection.set_remote_description(answer).await?;
        self.state = next_state(self.state, action);
        self.remote_description_set = true;
        self.drain_pending().await;
        debug!("Applied answer from {}", self.user_id);
        Ok(())
    }

    async fn handle_candidate(&mut self, candidate: IceCandidate) -> Result<(), StepError> {
        if !self.remote_description_set {
            let queued = self.pending.push(&self.user_id, candidate);
            self.metrics.ice_queued.inc();
            debug!("Queued candidate for {} ({} pending)", self.user_id, queued);
            return Ok(());
        }

        // A rejected candidate leaves the offer/answer state alone
        match self.connection.add_ice_candidate(candidate).await {
            Ok(()) => self.metrics.ice_applied.inc(),
            Err(e) => {
                warn!("Candidate from {} rejected: {}", self.user_id, e);
                self.metrics.negotiation_failures.inc();
            }
        }
        Ok(())
    }

    /// Apply queued candidates oldest first; a bad candidate does not stop the rest
    async fn drain_pending(&mut self) {
        let queued = self.pending.take(&self.user_id);
        if queued.is_empty() {
            return;
        }
        debug!("Applying {} queued candidate(s) for {}", queued.len(), self.user_id);
        for candidate in queued {
            match self.connection.add_ice_candidate(candidate).await {
                Ok(()) => self.metrics.ice_applied.inc(),
                Err(e) => {
                    warn!("Queued candidate for {} rejected: {}", self.user_id, e);
                    self.metrics.negotiation_failures.inc();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MeetingConfig;
    use crate::rtc::{PeerCallbacks, PeerConnectionFactory};
    use crate::testing::{Journal, MockPeerFactory, MockSource, RecordingTransport};

    struct Fixture {
        journal: Journal,
        transport: Arc<RecordingTransport>,
        pending: Arc<PendingIceCandidates>,
        metrics: Arc<MeetingMetrics>,
        negotiator: PeerNegotiator,
    }

    async fn fixture(local: &str, remote: &str) -> Fixture {
        let journal = Journal::new();
        let transport = RecordingTransport::new(journal.clone(), "s-local");
        let (channel, _rx) = SignalingChannel::new(local);
        channel.attach(transport.clone());
        channel.set_active(Some(MeetingConfig::group("m1", "g1")));

        let factory = Arc::new(MockPeerFactory::new(journal.clone()));
        let connection = factory.create(remote, PeerCallbacks::noop()).await.unwrap();
        let pending = Arc::new(PendingIceCandidates::new());
        let metrics = Arc::new(MeetingMetrics::new().unwrap());
        let negotiator = PeerNegotiator::new(
            remote,
            PeerAddress::new(format!("s-{}", remote)),
            connection,
            MockSource::new(factory, remote),
            Arc::new(channel),
            pending.clone(),
            metrics.clone(),
        );
        Fixture { journal, transport, pending, metrics, negotiator }
    }

    #[tokio::test]
    async fn offer_only_from_stable() {
        let mut f = fixture("u1", "u2").await;
        f.negotiator.handle(PeerCommand::CreateOffer).await;
        f.negotiator.handle(PeerCommand::CreateOffer).await;

        assert_eq!(f.negotiator.state(), NegotiationState::HaveLocalOffer);
        assert_eq!(f.journal.count("pc:u2:create-offer"), 1);
        let offers = f.transport.emitted("meeting:offer");
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0]["targetSocketId"], "s-u2");
    }

    #[tokio::test]
    async fn candidates_wait_for_answer_and_keep_order() {
        let mut f = fixture("u1", "u2").await;
        f.negotiator.handle(PeerCommand::CreateOffer).await;
        for c in ["candidate:a", "candidate:b"] {
            f.negotiator
                .handle(PeerCommand::RemoteCandidate { candidate: IceCandidate::new(c) })
                .await;
        }
        assert_eq!(f.pending.len("u2"), 2);
        assert_eq!(f.journal.count("pc:u2:candidate"), 0);

        f.negotiator
            .handle(PeerCommand::RemoteAnswer { answer: SessionDescription::answer("v=0 answer") })
            .await;
        f.negotiator
            .handle(PeerCommand::RemoteCandidate { candidate: IceCandidate::new("candidate:c") })
            .await;

        let applied: Vec<String> = f
            .journal
            .entries()
            .into_iter()
            .filter(|e| e.starts_with("pc:u2:candidate") || e.starts_with("pc:u2:set-remote"))
            .collect();
        assert_eq!(
            applied,
            vec![
                "pc:u2:set-remote answer",
                "pc:u2:candidate candidate:a",
                "pc:u2:candidate candidate:b",
                "pc:u2:candidate candidate:c",
            ]
        );
        assert_eq!(f.negotiator.state(), NegotiationState::Stable);
        assert_eq!(f.metrics.ice_queued.get(), 2);
        assert_eq!(f.metrics.ice_applied.get(), 3);
    }

    #[tokio::test]
    async fn polite_side_answers_on_a_fresh_connection() {
        // u1 < u2, so u1 is polite toward u2
        let mut f = fixture("u1", "u2").await;
        f.negotiator.handle(PeerCommand::CreateOffer).await;
        f.negotiator
            .handle(PeerCommand::RemoteOffer {
                from_socket_id: "s-u2-new".to_string(),
                offer: SessionDescription::offer("v=0 remote"),
            })
            .await;

        assert_eq!(f.journal.count("factory:create u2"), 2);
        let answers = f.transport.emitted("meeting:answer");
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0]["targetSocketId"], "s-u2-new");
        assert_eq!(f.negotiator.state(), NegotiationState::Stable);
        assert_eq!(f.metrics.glare_resolutions.with_label_values(&["rolled_back"]).get(), 1);
        assert_eq!(f.metrics.negotiation_failures.get(), 0);

        // The offer-holding connection is closed before the replacement accepts
        let entries = f.journal.entries();
        let closed = f.journal.position("pc:u2:close").unwrap();
        let rebuilt = entries.iter().rposition(|e| e == "factory:create u2").unwrap();
        let accept = f.journal.position("pc:u2:set-remote offer").unwrap();
        assert!(closed < rebuilt && rebuilt < accept);
    }

    #[tokio::test]
    async fn impolite_side_keeps_its_offer() {
        let mut f = fixture("u2", "u1").await;
        f.negotiator.handle(PeerCommand::CreateOffer).await;
        f.negotiator
            .handle(PeerCommand::RemoteOffer {
                from_socket_id: "s-u1".to_string(),
                offer: SessionDescription::offer("v=0 remote"),
            })
            .await;

        assert_eq!(f.journal.count("factory:create u1"), 1);
        assert_eq!(f.journal.count("pc:u1:close"), 0);
        assert_eq!(f.journal.count("pc:u1:set-remote"), 0);
        assert!(f.transport.emitted("meeting:answer").is_empty());
        assert_eq!(f.negotiator.state(), NegotiationState::HaveLocalOffer);
        assert_eq!(f.metrics.glare_resolutions.with_label_values(&["ignored"]).get(), 1);
    }

    #[tokio::test]
    async fn stray_answer_is_ignored() {
        let mut f = fixture("u1", "u2").await;
        f.negotiator
            .handle(PeerCommand::RemoteAnswer { answer: SessionDescription::answer("v=0") })
            .await;
        assert_eq!(f.journal.count("pc:u2:set-remote"), 0);
        assert_eq!(f.negotiator.state(), NegotiationState::Stable);
    }

    #[tokio::test]
    async fn candidates_queued_during_collision_reach_the_new_connection() {
        let mut f = fixture("u1", "u2").await;
        f.negotiator.handle(PeerCommand::CreateOffer).await;
        f.negotiator
            .handle(PeerCommand::RemoteCandidate { candidate: IceCandidate::new("candidate:early") })
            .await;
        f.negotiator
            .handle(PeerCommand::RemoteOffer {
                from_socket_id: "s-u2".to_string(),
                offer: SessionDescription::offer("v=0 remote"),
            })
            .await;

        let entries = f.journal.entries();
        let rebuilt = entries.iter().rposition(|e| e == "factory:create u2").unwrap();
        let applied = f.journal.position("pc:u2:candidate candidate:early").unwrap();
        assert!(rebuilt < applied);
        assert_eq!(f.pending.len("u2"), 0);
    }

    #[tokio::test]
    async fn offer_moves_the_shared_address() {
        let address = PeerAddress::new("s-old");
        let seen_by_callback = address.clone();
        let mut f = fixture("u1", "u2").await;
        f.negotiator.address = address;
        f.negotiator
            .handle(PeerCommand::RemoteOffer {
                from_socket_id: "s-new".to_string(),
                offer: SessionDescription::offer("v=0 remote"),
            })
            .await;
        assert_eq!(seen_by_callback.get(), "s-new");
    }
}
