//! Per-peer negotiation state machine
//!
//! Pure functions of (state, signal, role); nothing here touches a connection.

/// Offer/answer progress for one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationState {
    /// No negotiation in flight
    #[default]
    Stable,
    /// Our offer is out, awaiting the answer
    HaveLocalOffer,
    /// Processing the peer's offer
    HaveRemoteOffer,
}

/// Glare behavior of the local side toward one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Rolls back its own offer when offers collide
    Polite,
    /// Keeps its own offer when offers collide
    Impolite,
}

impl Role {
    /// The side whose user id sorts first (byte-wise) is polite
    pub fn between(local_user_id: &str, remote_user_id: &str) -> Role {
        if local_user_id < remote_user_id {
            Role::Polite
        } else {
            Role::Impolite
        }
    }
}

/// User id whose offer survives a collision between `a` and `b`
pub fn glare_winner<'a>(a: &'a str, b: &'a str) -> &'a str {
    match Role::between(a, b) {
        Role::Polite => b,
        Role::Impolite => a,
    }
}

/// Negotiation input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Local request to (re)negotiate
    LocalOffer,
    RemoteOffer,
    RemoteAnswer,
}

/// What the negotiator should do with a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateOffer,
    /// Negotiation already in flight; drop the local request
    SkipOffer,
    AcceptOffer,
    /// Glare, polite side: drop the local offer, then accept
    RollbackThenAccept,
    /// Glare, impolite side: keep the local offer
    IgnoreOffer,
    ApplyAnswer,
    /// Answer without an outstanding offer
    IgnoreAnswer,
}

pub fn decide(state: NegotiationState, signal: Signal, role: Role) -> Action {
    use NegotiationState::*;

    match (signal, state) {
        (Signal::LocalOffer, Stable) => Action::CreateOffer,
        (Signal::LocalOffer, _) => Action::SkipOffer,

        (Signal::RemoteOffer, Stable) => Action::AcceptOffer,
        (Signal::RemoteOffer, HaveLocalOffer) => match role {
            Role::Polite => Action::RollbackThenAccept,
            Role::Impolite => Action::IgnoreOffer,
        },
        // A previous offer never got answered; the newer one replaces it
        (Signal::RemoteOffer, HaveRemoteOffer) => Action::AcceptOffer,

        (Signal::RemoteAnswer, HaveLocalOffer) => Action::ApplyAnswer,
        (Signal::RemoteAnswer, _) => Action::IgnoreAnswer,
    }
}

/// State once `action` has completed successfully
pub fn next_state(state: NegotiationState, action: Action) -> NegotiationState {
    match action {
        Action::CreateOffer => NegotiationState::HaveLocalOffer,
        Action::AcceptOffer | Action::RollbackThenAccept | Action::ApplyAnswer => NegotiationState::Stable,
        Action::SkipOffer | Action::IgnoreOffer | Action::IgnoreAnswer => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_is_symmetric_and_byte_wise() {
        assert_eq!(Role::between("alice", "bob"), Role::Polite);
        assert_eq!(Role::between("bob", "alice"), Role::Impolite);
        // Uppercase sorts before lowercase
        assert_eq!(Role::between("Zed", "amy"), Role::Polite);
        assert_eq!(Role::between("u10", "u9"), Role::Polite);
    }

    #[test]
    fn glare_converges_on_same_offer_from_both_sides() {
        for (a, b) in [("alice", "bob"), ("u2", "u1"), ("64f0a1", "64f0a0"), ("A", "a")] {
            assert_eq!(glare_winner(a, b), glare_winner(b, a));

            let a_action = decide(NegotiationState::HaveLocalOffer, Signal::RemoteOffer, Role::between(a, b));
            let b_action = decide(NegotiationState::HaveLocalOffer, Signal::RemoteOffer, Role::between(b, a));
            let rolled_back = [a_action, b_action]
                .iter()
                .filter(|action| **action == Action::RollbackThenAccept)
                .count();
            let ignored = [a_action, b_action]
                .iter()
                .filter(|action| **action == Action::IgnoreOffer)
                .count();
            assert_eq!((rolled_back, ignored), (1, 1));

            let winner = glare_winner(a, b);
            let winner_action = if winner == a { a_action } else { b_action };
            assert_eq!(winner_action, Action::IgnoreOffer);
        }
    }

    #[test]
    fn offers_only_from_stable() {
        assert_eq!(decide(NegotiationState::Stable, Signal::LocalOffer, Role::Polite), Action::CreateOffer);
        assert_eq!(decide(NegotiationState::HaveLocalOffer, Signal::LocalOffer, Role::Polite), Action::SkipOffer);
        assert_eq!(decide(NegotiationState::HaveRemoteOffer, Signal::LocalOffer, Role::Impolite), Action::SkipOffer);
    }

    #[test]
    fn answers_only_with_outstanding_offer() {
        assert_eq!(decide(NegotiationState::HaveLocalOffer, Signal::RemoteAnswer, Role::Polite), Action::ApplyAnswer);
        assert_eq!(decide(NegotiationState::Stable, Signal::RemoteAnswer, Role::Polite), Action::IgnoreAnswer);
        assert_eq!(decide(NegotiationState::HaveRemoteOffer, Signal::RemoteAnswer, Role::Impolite), Action::IgnoreAnswer);
    }

    #[test]
    fn transitions() {
        let s = next_state(NegotiationState::Stable, Action::CreateOffer);
        assert_eq!(s, NegotiationState::HaveLocalOffer);
        assert_eq!(next_state(s, Action::IgnoreOffer), NegotiationState::HaveLocalOffer);
        assert_eq!(next_state(s, Action::ApplyAnswer), NegotiationState::Stable);
        assert_eq!(next_state(s, Action::RollbackThenAccept), NegotiationState::Stable);
    }
}
