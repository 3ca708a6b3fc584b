//! Drives one participant: relay channel in, engine transitions, relay channel out.

use crate::config::ClientConfig;
use crate::error::{ClientError, NegotiationError};
use crate::peer::connection::WebRtcFactory;
use crate::peer::engine::{Effect, EngineEvent, NegotiationEngine};
use crate::peer::state::NegotiationState;
use crate::peer::types::{RoomId, SessionId};
use crate::signaling::client::RelayClient;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};

enum Next {
    Continue,
    Stop(Result<(), ClientError>),
}

/// Joins `room` and keeps negotiating until the user leaves or the session
/// fails for a reason a new pairing cannot fix.
pub async fn run(config: ClientConfig, room: RoomId) -> Result<(), ClientError> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let relay = RelayClient::connect(&config.signaling_url, events_tx.clone()).await?;

    let factory = WebRtcFactory::new(config.ice_servers.clone());
    let mut engine = NegotiationEngine::new(factory, events_tx, config.negotiation_timeout);
    let mut joined = false;

    loop {
        let deadline = engine.deadline();
        let event = tokio::select! {
            event = events_rx.recv() => event.unwrap_or(EngineEvent::RelayClosed),
            Some(session) = wait_deadline(deadline) => EngineEvent::Timeout { session },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, leaving room");
                EngineEvent::Leave
            }
        };

        let relay_closed = matches!(event, EngineEvent::RelayClosed);

        let mut effects = engine.handle(event).await;
        if !joined && engine.self_id().is_some() {
            joined = true;
            effects.extend(engine.join(room.clone()).await);
        }

        let next = match dispatch(&relay, effects) {
            Next::Continue if relay_closed => {
                Next::Stop(Err(NegotiationError::RelayClosed.into()))
            }
            next => next,
        };
        match next {
            Next::Continue => {}
            Next::Stop(result) => {
                if engine.room().is_some() {
                    let effects = engine.handle(EngineEvent::Leave).await;
                    let _ = dispatch(&relay, effects);
                }
                relay.close();
                return result;
            }
        }
    }
}

async fn wait_deadline(deadline: Option<(SessionId, Instant)>) -> Option<SessionId> {
    match deadline {
        Some((session, at)) => {
            sleep_until(at).await;
            Some(session)
        }
        None => std::future::pending().await,
    }
}

/// Carries out every effect of one transition, in order. A close does not cut
/// the batch short: trailing messages such as `leave-room` still go out.
fn dispatch(relay: &RelayClient, effects: Vec<Effect>) -> Next {
    let mut next = Next::Continue;
    for effect in effects {
        match effect {
            Effect::Send(msg) => {
                if let Err(e) = relay.send(&msg) {
                    return Next::Stop(Err(e.into()));
                }
            }
            Effect::StateChanged(NegotiationState::Stable) => {
                info!("session description exchange complete");
            }
            Effect::StateChanged(_) => {}
            Effect::Transport(state) => info!("transport {:?}", state),
            Effect::RemoteTrack { kind, track_id } => {
                info!("remote {:?} track {} ready for rendering", kind, track_id);
            }
            Effect::Warning(e) => warn!("{e}"),
            Effect::Closed(None) => next = Next::Stop(Ok(())),
            Effect::Closed(Some(NegotiationError::PeerDisconnected(peer))) => {
                info!(%peer, "peer disconnected, waiting in room for the next participant");
            }
            Effect::Closed(Some(e)) => next = Next::Stop(Err(e.into())),
        }
    }
    next
}
