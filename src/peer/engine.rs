//! Offer/answer state machine for one participant.
//!
//! Everything that can happen to a peer arrives as an [`EngineEvent`] on a single
//! queue: relay messages, local candidates from the connection, transport state
//! changes, timeouts and leave requests. [`NegotiationEngine::handle`] consumes one
//! event at a time and returns the [`Effect`]s the caller must carry out, most
//! importantly the messages to put on the relay. Work whose precondition is not met
//! yet (peer unknown, descriptions not set) goes into the session's candidate buffer
//! and is flushed inside the same transition that satisfies the precondition.

use crate::error::NegotiationError;
use crate::peer::connection::ConnectionFactory;
use crate::peer::ice::CandidateSummary;
use crate::peer::state::{NegotiationState, Role};
use crate::peer::types::{
    IceCandidate, ParticipantId, RoomId, SessionId, TrackKind, TransportState,
};
use crate::session::PeerSession;
use crate::signaling::protocol::{
    AnswerPayload, CandidatePayload, ClientMessage, OfferPayload, ServerMessage,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A message delivered by the relay channel.
    Signal(ServerMessage),
    LocalCandidate {
        session: SessionId,
        candidate: IceCandidate,
    },
    TransportState {
        session: SessionId,
        state: TransportState,
    },
    RemoteTrack {
        session: SessionId,
        kind: TrackKind,
        track_id: String,
    },
    /// The negotiation deadline of `session` passed.
    Timeout { session: SessionId },
    RelayClosed,
    Leave,
}

pub type EventSender = mpsc::UnboundedSender<EngineEvent>;

/// What the driver of the engine has to do after a transition.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Put this message on the relay channel.
    Send(ClientMessage),
    StateChanged(NegotiationState),
    Transport(TransportState),
    RemoteTrack { kind: TrackKind, track_id: String },
    /// Non-fatal problem; the session continues.
    Warning(NegotiationError),
    /// The session is over. `None` for a voluntary leave.
    Closed(Option<NegotiationError>),
}

pub struct NegotiationEngine<F: ConnectionFactory> {
    factory: F,
    events: EventSender,
    negotiation_timeout: Option<Duration>,
    self_id: Option<ParticipantId>,
    room: Option<RoomId>,
    session: Option<PeerSession<F::Connection>>,
    next_session: u64,
    local_summary: CandidateSummary,
}

impl<F: ConnectionFactory> NegotiationEngine<F> {
    pub fn new(factory: F, events: EventSender, negotiation_timeout: Option<Duration>) -> Self {
        Self {
            factory,
            events,
            negotiation_timeout,
            self_id: None,
            room: None,
            session: None,
            next_session: 0,
            local_summary: CandidateSummary::default(),
        }
    }

    pub fn self_id(&self) -> Option<&ParticipantId> {
        self.self_id.as_ref()
    }

    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    /// State of the current session; `Idle` before any session was opened.
    pub fn state(&self) -> NegotiationState {
        self.session
            .as_ref()
            .map(|s| s.state())
            .unwrap_or(NegotiationState::Idle)
    }

    pub fn role(&self) -> Option<Role> {
        self.live().and_then(|s| s.role())
    }

    pub fn peer(&self) -> Option<&ParticipantId> {
        self.live().and_then(|s| s.peer())
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id())
    }

    pub fn pending_remote_candidates(&self) -> usize {
        self.live().map_or(0, |s| s.buffer().pending_remote())
    }

    pub fn pending_local_candidates(&self) -> usize {
        self.live().map_or(0, |s| s.buffer().pending_local())
    }

    /// When the live session gives up waiting for its peer, if it is waiting.
    pub fn deadline(&self) -> Option<(SessionId, Instant)> {
        self.live()
            .and_then(|s| s.deadline().map(|at| (s.id(), at)))
    }

    fn live(&self) -> Option<&PeerSession<F::Connection>> {
        self.session.as_ref().filter(|s| s.is_live())
    }

    fn live_mut(&mut self) -> Option<&mut PeerSession<F::Connection>> {
        self.session.as_mut().filter(|s| s.is_live())
    }

    fn is_current(&self, session: SessionId) -> bool {
        self.live().is_some_and(|s| s.id() == session)
    }

    /// Opens a session for `room` (unless one is live) and asks the coordinator to
    /// seat us there.
    pub async fn join(&mut self, room: RoomId) -> Vec<Effect> {
        let mut fx = Vec::new();

        if let Some(current) = self.room.clone() {
            if current != room {
                info!(from = %current, to = %room, "switching rooms");
                self.release_session(&mut fx).await;
                fx.push(Effect::Send(ClientMessage::LeaveRoom));
            }
        }
        self.room = Some(room.clone());

        if self.live().is_none() && !self.open_session(&mut fx).await {
            self.room = None;
            return fx;
        }

        info!(%room, "joining room");
        fx.push(Effect::Send(ClientMessage::JoinRoom(room)));
        fx
    }

    pub async fn handle(&mut self, event: EngineEvent) -> Vec<Effect> {
        let mut fx = Vec::new();
        match event {
            EngineEvent::Signal(msg) => self.on_signal(msg, &mut fx).await,
            EngineEvent::LocalCandidate { session, candidate } => {
                self.on_local_candidate(session, candidate, &mut fx)
            }
            EngineEvent::TransportState { session, state } => {
                self.on_transport_state(session, state, &mut fx).await
            }
            EngineEvent::RemoteTrack {
                session,
                kind,
                track_id,
            } => {
                if self.is_current(session) {
                    info!(%session, ?kind, %track_id, "remote track received");
                    fx.push(Effect::RemoteTrack { kind, track_id });
                }
            }
            EngineEvent::Timeout { session } => self.on_timeout(session, &mut fx).await,
            EngineEvent::RelayClosed => {
                warn!("relay channel closed");
                self.close_session(Some(NegotiationError::RelayClosed), &mut fx)
                    .await;
            }
            EngineEvent::Leave => self.leave(&mut fx).await,
        }
        fx
    }

    async fn on_signal(&mut self, msg: ServerMessage, fx: &mut Vec<Effect>) {
        debug!(event = msg.event_name(), "relay message");
        match msg {
            ServerMessage::Welcome(id) => {
                info!(self_id = %id, "registered with coordinator");
                self.self_id = Some(id);
            }
            ServerMessage::OtherUser(peer) => self.on_paired(Role::Offerer, peer, fx).await,
            ServerMessage::UserJoined(peer) => self.on_paired(Role::Answerer, peer, fx).await,
            ServerMessage::RoomFull(room) => {
                warn!(%room, "room is full");
                self.room = None;
                let err = NegotiationError::RoomFull(room);
                if !self.close_session(Some(err.clone()), fx).await {
                    fx.push(Effect::Closed(Some(err)));
                }
            }
            ServerMessage::PeerLeft(peer) => {
                if self.peer() == Some(&peer) {
                    info!(%peer, "peer left the room");
                    self.close_session(Some(NegotiationError::PeerDisconnected(peer)), fx)
                        .await;
                } else {
                    debug!(%peer, "ignoring departure of unrelated participant");
                }
            }
            ServerMessage::Offer(offer) => self.on_offer(offer, fx).await,
            ServerMessage::Answer(answer) => self.on_answer(answer, fx).await,
            ServerMessage::IceCandidate(payload) => {
                self.on_remote_candidate(payload.candidate, fx).await
            }
        }
    }

    async fn on_paired(&mut self, role: Role, peer: ParticipantId, fx: &mut Vec<Effect>) {
        match self.peer().cloned() {
            Some(current) if current == peer => {
                warn!(%peer, ?role, "duplicate pairing signal ignored");
                return;
            }
            Some(current) => {
                info!(old = %current, new = %peer, "peer changed, starting a fresh session");
                self.close_session(Some(NegotiationError::PeerDisconnected(current)), fx)
                    .await;
            }
            None => {}
        }

        if self.live().is_none() && !self.open_session(fx).await {
            return;
        }

        if let Err(e) = self.assign(role, peer, fx) {
            self.close_session(Some(e), fx).await;
            return;
        }

        match role {
            Role::Offerer => self.send_offer(fx).await,
            Role::Answerer => {
                let timeout = self.negotiation_timeout;
                if let Some(session) = self.live_mut() {
                    session.arm_deadline(timeout);
                }
                self.release_local_candidates(fx);
            }
        }
    }

    fn assign(
        &mut self,
        role: Role,
        peer: ParticipantId,
        fx: &mut Vec<Effect>,
    ) -> Result<(), NegotiationError> {
        let session = self
            .live_mut()
            .ok_or(NegotiationError::Invariant("pairing without a live session"))?;
        info!(session = %session.id(), %peer, ?role, "paired");
        session.assign(role, peer)?;
        fx.push(Effect::StateChanged(NegotiationState::RoleAssigned(role)));
        Ok(())
    }

    async fn send_offer(&mut self, fx: &mut Vec<Effect>) {
        let Some(caller) = self.self_id.clone() else {
            self.close_session(
                Some(NegotiationError::Invariant("offer requires a participant id")),
                fx,
            )
            .await;
            return;
        };
        let timeout = self.negotiation_timeout;

        let result = match self.live_mut() {
            Some(session) => session.create_local_offer().await,
            None => return,
        };
        let offer = match result {
            Ok(offer) => offer,
            Err(e) => {
                error!("failed to create offer: {e}");
                self.close_session(Some(e), fx).await;
                return;
            }
        };

        let Some(session) = self.live_mut() else {
            return;
        };
        let Some(target) = session.peer().cloned() else {
            return;
        };
        info!(session = %session.id(), %target, "sending offer");
        fx.push(Effect::Send(ClientMessage::Offer(OfferPayload {
            target,
            sdp: offer,
            caller,
        })));
        session.set_state(NegotiationState::OfferSent);
        session.arm_deadline(timeout);
        fx.push(Effect::StateChanged(NegotiationState::OfferSent));

        self.release_local_candidates(fx);
    }

    fn release_local_candidates(&mut self, fx: &mut Vec<Effect>) {
        let Some(session) = self.live_mut() else {
            return;
        };
        let Some(target) = session.peer().cloned() else {
            return;
        };
        let queued = session.buffer_mut().release_local();
        if !queued.is_empty() {
            debug!(session = %session.id(), count = queued.len(), "flushing queued local candidates");
        }
        for candidate in queued {
            fx.push(Effect::Send(ClientMessage::IceCandidate(CandidatePayload {
                target: target.clone(),
                candidate,
            })));
        }
    }

    async fn on_offer(&mut self, offer: OfferPayload, fx: &mut Vec<Effect>) {
        let Some((state, paired_with)) = self.live().map(|s| (s.state(), s.peer().cloned())) else {
            debug!(caller = %offer.caller, "offer without a live session dropped");
            return;
        };

        match (state, paired_with) {
            (NegotiationState::Idle, None) => {
                warn!(caller = %offer.caller, "offer before pairing signal, taking answerer role");
                if let Err(e) = self.assign(Role::Answerer, offer.caller.clone(), fx) {
                    self.close_session(Some(e), fx).await;
                    return;
                }
                self.release_local_candidates(fx);
            }
            (NegotiationState::RoleAssigned(Role::Answerer), Some(peer)) => {
                if peer != offer.caller {
                    warn!(caller = %offer.caller, %peer, "offer from a participant we are not paired with");
                    return;
                }
            }
            (state, _) => {
                warn!(%state, caller = %offer.caller, "renegotiation is not supported, offer ignored");
                return;
            }
        }

        let result = match self.live_mut() {
            Some(session) => {
                session.set_state(NegotiationState::OfferReceived);
                session.accept_offer(&offer.sdp).await
            }
            None => return,
        };
        fx.push(Effect::StateChanged(NegotiationState::OfferReceived));

        let answer = match result {
            Ok(answer) => answer,
            Err(e) => {
                error!("failed to answer offer: {e}");
                self.close_session(Some(e), fx).await;
                return;
            }
        };

        info!(target = %offer.caller, "sending answer");
        fx.push(Effect::Send(ClientMessage::Answer(AnswerPayload {
            target: offer.caller,
            sdp: answer,
        })));
        self.reach_stable(fx).await;
    }

    async fn on_answer(&mut self, answer: AnswerPayload, fx: &mut Vec<Effect>) {
        let result = match self.live_mut() {
            Some(session) if session.state() == NegotiationState::OfferSent => {
                session.accept_answer(&answer.sdp).await
            }
            Some(session) => {
                warn!(state = %session.state(), "unexpected answer ignored");
                return;
            }
            None => {
                debug!("answer without a live session dropped");
                return;
            }
        };

        if let Err(e) = result {
            error!("failed to apply answer: {e}");
            self.close_session(Some(e), fx).await;
            return;
        }
        info!("answer applied");
        self.reach_stable(fx).await;
    }

    /// Both descriptions are set: clear the deadline and drain remote candidates.
    async fn reach_stable(&mut self, fx: &mut Vec<Effect>) {
        let Some(session) = self.live_mut() else {
            return;
        };
        session.set_state(NegotiationState::Stable);
        session.clear_deadline();
        fx.push(Effect::StateChanged(NegotiationState::Stable));

        match session.flush_remote_candidates().await {
            Ok(failures) => fx.extend(failures.into_iter().map(Effect::Warning)),
            Err(e) => {
                error!("{e}");
                self.close_session(Some(e), fx).await;
            }
        }
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate, fx: &mut Vec<Effect>) {
        let Some(session) = self.live_mut() else {
            debug!("remote candidate without a live session dropped");
            return;
        };

        match session.buffer_mut().push_remote(candidate) {
            Some(candidate) => {
                if let Err(e) = session.apply_remote_candidate(&candidate).await {
                    warn!(candidate = %candidate.candidate, "{e}");
                    fx.push(Effect::Warning(e));
                }
            }
            None => debug!(
                session = %session.id(),
                pending = session.buffer().pending_remote(),
                "descriptions not set yet, queued remote candidate"
            ),
        }
    }

    fn on_local_candidate(
        &mut self,
        session_id: SessionId,
        candidate: IceCandidate,
        fx: &mut Vec<Effect>,
    ) {
        if !self.is_current(session_id) {
            debug!(session = %session_id, "local candidate from a stale session dropped");
            return;
        }
        self.local_summary.record(&candidate.candidate);

        let Some(session) = self.live_mut() else {
            return;
        };
        match session.buffer_mut().push_local(candidate) {
            Some(candidate) => {
                if let Some(target) = session.peer().cloned() {
                    fx.push(Effect::Send(ClientMessage::IceCandidate(CandidatePayload {
                        target,
                        candidate,
                    })));
                }
            }
            None => debug!(
                session = %session_id,
                pending = session.buffer().pending_local(),
                "peer not known yet, queued local candidate"
            ),
        }
    }

    async fn on_transport_state(
        &mut self,
        session: SessionId,
        state: TransportState,
        fx: &mut Vec<Effect>,
    ) {
        if !self.is_current(session) {
            return;
        }
        fx.push(Effect::Transport(state));

        match state {
            TransportState::Connected => {
                info!(%session, "media path established");
                self.local_summary.log("local");
            }
            TransportState::Disconnected => {
                warn!(%session, "transport disconnected, waiting for ICE to recover");
            }
            TransportState::Failed | TransportState::Closed => {
                self.close_session(Some(NegotiationError::TransportFailed), fx)
                    .await;
            }
            TransportState::Connecting => {}
        }
    }

    async fn on_timeout(&mut self, session: SessionId, fx: &mut Vec<Effect>) {
        let expired = self
            .live()
            .filter(|s| s.id() == session && s.state().is_waiting())
            .is_some();
        if expired {
            warn!(%session, "peer did not complete negotiation in time");
            self.close_session(Some(NegotiationError::NegotiationTimeout), fx)
                .await;
        }
    }

    async fn leave(&mut self, fx: &mut Vec<Effect>) {
        if !self.close_session(None, fx).await {
            fx.push(Effect::Closed(None));
        }
        if let Some(room) = self.room.take() {
            info!(%room, "leaving room");
            fx.push(Effect::Send(ClientMessage::LeaveRoom));
        }
    }

    async fn open_session(&mut self, fx: &mut Vec<Effect>) -> bool {
        self.next_session += 1;
        let id = SessionId(self.next_session);

        match self.factory.open(id, self.events.clone()).await {
            Ok(connection) => {
                debug!(session = %id, "opened peer session");
                self.session = Some(PeerSession::new(id, connection));
                self.local_summary = CandidateSummary::default();
                fx.push(Effect::StateChanged(NegotiationState::Idle));
                true
            }
            Err(e) => {
                error!(session = %id, "failed to open connection: {e}");
                fx.push(Effect::Closed(Some(NegotiationError::ConnectionUnavailable(
                    e.0,
                ))));
                false
            }
        }
    }

    /// Closes the live session, if any. Returns whether one was closed.
    async fn close_session(
        &mut self,
        reason: Option<NegotiationError>,
        fx: &mut Vec<Effect>,
    ) -> bool {
        let Some(id) = self.release_session(fx).await else {
            return false;
        };
        match &reason {
            Some(e) => info!(session = %id, "session closed: {e}"),
            None => info!(session = %id, "session closed"),
        }
        fx.push(Effect::Closed(reason));
        true
    }

    /// Tears down the live session without ending the run: the connection is
    /// released but no `Closed` effect is reported.
    async fn release_session(&mut self, fx: &mut Vec<Effect>) -> Option<SessionId> {
        let session = self.live_mut()?;
        let id = session.id();
        let dropped = session.close().await;
        debug!(session = %id, dropped, "released peer session");
        fx.push(Effect::StateChanged(NegotiationState::Closed));
        Some(id)
    }
}
