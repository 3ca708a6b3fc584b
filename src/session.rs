use crate::error::NegotiationError;
use crate::peer::buffer::CandidateBuffer;
use crate::peer::connection::PeerConnection;
use crate::peer::state::{NegotiationState, Role};
use crate::peer::types::{IceCandidate, ParticipantId, SessionDescriptor, SessionId};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Negotiation state for one pairing. Owns the connection for its whole lifetime.
pub struct PeerSession<C> {
    id: SessionId,
    role: Option<Role>,
    peer: Option<ParticipantId>,
    state: NegotiationState,
    buffer: CandidateBuffer,
    connection: Option<C>,
    local_description_set: bool,
    remote_description_set: bool,
    deadline: Option<Instant>,
}

impl<C: PeerConnection> PeerSession<C> {
    pub fn new(id: SessionId, connection: C) -> Self {
        Self {
            id,
            role: None,
            peer: None,
            state: NegotiationState::Idle,
            buffer: CandidateBuffer::new(),
            connection: Some(connection),
            local_description_set: false,
            remote_description_set: false,
            deadline: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn peer(&self) -> Option<&ParticipantId> {
        self.peer.as_ref()
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn set_state(&mut self, state: NegotiationState) {
        debug!(session = %self.id, from = %self.state, to = %state, "negotiation state change");
        self.state = state;
    }

    pub fn is_live(&self) -> bool {
        !self.state.is_closed()
    }

    pub fn buffer(&self) -> &CandidateBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut CandidateBuffer {
        &mut self.buffer
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn arm_deadline(&mut self, timeout: Option<Duration>) {
        self.deadline = timeout.map(|t| Instant::now() + t);
    }

    pub fn clear_deadline(&mut self) {
        self.deadline = None;
    }

    /// Records role and peer. Both are set exactly once per session.
    pub fn assign(&mut self, role: Role, peer: ParticipantId) -> Result<(), NegotiationError> {
        if self.peer.is_some() || self.role.is_some() {
            return Err(NegotiationError::Invariant("session already paired"));
        }
        self.role = Some(role);
        self.peer = Some(peer);
        self.set_state(NegotiationState::RoleAssigned(role));
        Ok(())
    }

    /// Remote candidates may only reach the connection once both descriptions exist.
    pub fn descriptions_set(&self) -> bool {
        self.local_description_set && self.remote_description_set
    }

    fn connection(&self) -> Result<&C, NegotiationError> {
        self.connection
            .as_ref()
            .ok_or(NegotiationError::Invariant("connection used after release"))
    }

    /// Offerer side: create the offer and install it as the local description.
    pub async fn create_local_offer(&mut self) -> Result<SessionDescriptor, NegotiationError> {
        let conn = self.connection()?;
        let offer = conn
            .create_offer()
            .await
            .map_err(|e| NegotiationError::DescriptionRejected(e.0))?;
        conn.set_local_description(&offer)
            .await
            .map_err(|e| NegotiationError::DescriptionRejected(e.0))?;
        self.local_description_set = true;
        Ok(offer)
    }

    /// Answerer side: install the remote offer, then create and install the answer.
    pub async fn accept_offer(
        &mut self,
        offer: &SessionDescriptor,
    ) -> Result<SessionDescriptor, NegotiationError> {
        let conn = self.connection()?;
        conn.set_remote_description(offer)
            .await
            .map_err(|e| NegotiationError::DescriptionRejected(e.0))?;
        self.remote_description_set = true;

        let conn = self.connection()?;
        let answer = conn
            .create_answer()
            .await
            .map_err(|e| NegotiationError::DescriptionRejected(e.0))?;
        conn.set_local_description(&answer)
            .await
            .map_err(|e| NegotiationError::DescriptionRejected(e.0))?;
        self.local_description_set = true;
        Ok(answer)
    }

    /// Offerer side: install the remote answer.
    pub async fn accept_answer(&mut self, answer: &SessionDescriptor) -> Result<(), NegotiationError> {
        self.connection()?
            .set_remote_description(answer)
            .await
            .map_err(|e| NegotiationError::DescriptionRejected(e.0))?;
        self.remote_description_set = true;
        Ok(())
    }

    pub async fn apply_remote_candidate(
        &self,
        candidate: &IceCandidate,
    ) -> Result<(), NegotiationError> {
        self.connection()?
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| NegotiationError::CandidateApplicationFailed(e.0))
    }

    /// Opens the remote gate and applies whatever was queued, in arrival order.
    /// Returns the per-candidate failures; none of them stop the flush. The gate
    /// stays shut unless both descriptions are installed.
    pub async fn flush_remote_candidates(
        &mut self,
    ) -> Result<Vec<NegotiationError>, NegotiationError> {
        if !self.descriptions_set() {
            return Err(NegotiationError::Invariant(
                "remote candidates released before both descriptions were set",
            ));
        }
        let queued = self.buffer.release_remote();
        if !queued.is_empty() {
            debug!(session = %self.id, count = queued.len(), "applying queued remote candidates");
        }

        let mut failures = Vec::new();
        for candidate in &queued {
            if let Err(e) = self.apply_remote_candidate(candidate).await {
                warn!(session = %self.id, candidate = %candidate.candidate, "{e}");
                failures.push(e);
            }
        }
        Ok(failures)
    }

    /// Moves to `Closed`, drops buffered candidates and releases the connection.
    /// Returns how many buffered candidates were discarded.
    pub async fn close(&mut self) -> usize {
        self.set_state(NegotiationState::Closed);
        self.deadline = None;
        self.local_description_set = false;
        self.remote_description_set = false;
        let dropped = self.buffer.discard();

        if let Some(conn) = self.connection.take() {
            if let Err(e) = conn.close().await {
                warn!(session = %self.id, "failed to close connection: {e}");
            }
        }
        dropped
    }
}
