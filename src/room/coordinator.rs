use crate::peer::types::ParticipantId;
use crate::room::registry::{Departure, JoinOutcome, RoomRegistry};
use crate::signaling::protocol::{ClientMessage, ServerMessage};
use crate::utils::random_id;
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;

#[derive(Default)]
struct Inner {
    registry: RoomRegistry,
    clients: HashMap<ParticipantId, ClientSender>,
}

impl Inner {
    /// Delivery is best effort: a vanished target is logged, never retried.
    fn deliver(&self, to: &ParticipantId, msg: ServerMessage) {
        let event = msg.event_name();
        match self.clients.get(to) {
            Some(tx) => {
                if tx.send(msg).is_err() {
                    warn!(%to, event, "target connection is gone, message dropped");
                }
            }
            None => warn!(%to, event, "unknown target, message dropped"),
        }
    }

    fn announce_departure(&self, who: &ParticipantId, departure: Departure) {
        info!(participant = %who, room = %departure.room, "left room");
        if let Some(lifetime) = departure.lifetime {
            info!(room = %departure.room, lifetime_secs = lifetime.num_seconds(), "room closed");
        }
        if let Some(remaining) = departure.remaining {
            self.deliver(&remaining, ServerMessage::PeerLeft(who.clone()));
        }
    }
}

/// Rendezvous point: pairs participants two per room and relays their
/// negotiation messages without looking inside them.
#[derive(Default)]
pub struct Coordinator {
    inner: Mutex<Inner>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection and greets it with its participant id.
    pub async fn connect(&self) -> (ParticipantId, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ParticipantId(random_id());

        let mut inner = self.inner.lock().await;
        inner.clients.insert(id.clone(), tx);
        inner.deliver(&id, ServerMessage::Welcome(id.clone()));
        info!(participant = %id, clients = inner.clients.len(), "client connected");
        (id, rx)
    }

    /// Forgets the connection and tells its room-mate, if any.
    pub async fn disconnect(&self, id: &ParticipantId) {
        let mut inner = self.inner.lock().await;
        inner.clients.remove(id);
        if let Some(departure) = inner.registry.leave(id) {
            inner.announce_departure(id, departure);
        }
        info!(participant = %id, clients = inner.clients.len(), "client disconnected");
    }

    pub async fn handle(&self, from: &ParticipantId, msg: ClientMessage) {
        let mut inner = self.inner.lock().await;
        match msg {
            ClientMessage::JoinRoom(room) => {
                let (outcome, departure) = inner.registry.join(&room, from);
                if let Some(departure) = departure {
                    inner.announce_departure(from, departure);
                }
                match outcome {
                    JoinOutcome::Waiting => {
                        info!(participant = %from, %room, "created room, waiting for a peer");
                    }
                    JoinOutcome::Paired { existing, joiner } => {
                        info!(%room, first = %existing, second = %joiner, "room paired");
                        inner.deliver(&joiner, ServerMessage::OtherUser(existing.clone()));
                        inner.deliver(&existing, ServerMessage::UserJoined(joiner));
                    }
                    JoinOutcome::AlreadyMember => {
                        debug!(participant = %from, %room, "already in room");
                    }
                    JoinOutcome::Full => {
                        warn!(participant = %from, %room, "room is full, join rejected");
                        inner.deliver(from, ServerMessage::RoomFull(room));
                    }
                    JoinOutcome::InvalidRoom => {
                        warn!(participant = %from, "empty room id ignored");
                    }
                }
            }
            ClientMessage::LeaveRoom => {
                if let Some(departure) = inner.registry.leave(from) {
                    inner.announce_departure(from, departure);
                }
            }
            relayed => {
                let event = relayed.event_name();
                let Some(target) = relayed.relay_target().cloned() else {
                    return;
                };

                if inner.registry.room_mate(from) != Some(&target) {
                    warn!(%from, %target, event, "relay outside the sender's room rejected");
                    return;
                }
                if let ClientMessage::Offer(offer) = &relayed {
                    if offer.caller != *from {
                        warn!(%from, caller = %offer.caller, "offer with spoofed caller rejected");
                        return;
                    }
                }

                debug!(%from, %target, event, "relaying");
                if let Some(msg) = relayed.into_relayed() {
                    inner.deliver(&target, msg);
                }
            }
        }
    }

    pub async fn client_count(&self) -> usize {
        self.inner.lock().await.clients.len()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.lock().await.registry.room_count()
    }
}
