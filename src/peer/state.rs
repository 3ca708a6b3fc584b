use std::fmt;

/// Role handed out by the coordinator's arrival order. Never negotiated between peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Second arrival; creates the offer.
    Offerer,
    /// First arrival; waits for the offer.
    Answerer,
}

// ========== NEGOTIATION STATES ==========

/// `Idle → RoleAssigned → OfferSent | OfferReceived → Stable`, with `Closed`
/// reachable from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    RoleAssigned(Role),
    OfferSent,
    OfferReceived,
    /// Answer exchanged; both descriptions are set.
    Stable,
    Closed,
}

impl NegotiationState {
    /// States in which the session is waiting on the remote side to make progress.
    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            NegotiationState::RoleAssigned(Role::Answerer) | NegotiationState::OfferSent
        )
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, NegotiationState::Closed)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationState::Idle => f.write_str("idle"),
            NegotiationState::RoleAssigned(Role::Offerer) => f.write_str("role-assigned(offerer)"),
            NegotiationState::RoleAssigned(Role::Answerer) => {
                f.write_str("role-assigned(answerer)")
            }
            NegotiationState::OfferSent => f.write_str("offer-sent"),
            NegotiationState::OfferReceived => f.write_str("offer-received"),
            NegotiationState::Stable => f.write_str("stable"),
            NegotiationState::Closed => f.write_str("closed"),
        }
    }
}
