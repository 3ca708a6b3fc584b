use crate::peer::types::{ParticipantId, RoomId};
use thiserror::Error;

/// Failure reported by the connection object underneath a session.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<webrtc::Error> for TransportError {
    fn from(e: webrtc::Error) -> Self {
        TransportError(e.to_string())
    }
}

/// Conditions surfaced to whoever drives a [`crate::peer::engine::NegotiationEngine`].
#[derive(Debug, Clone, Error)]
pub enum NegotiationError {
    #[error("session description rejected: {0}")]
    DescriptionRejected(String),

    /// Non-fatal: the session keeps negotiating.
    #[error("failed to apply ICE candidate: {0}")]
    CandidateApplicationFailed(String),

    #[error("peer {0} disconnected")]
    PeerDisconnected(ParticipantId),

    #[error("negotiation timed out")]
    NegotiationTimeout,

    #[error("room {0} is full")]
    RoomFull(RoomId),

    #[error("transport failed")]
    TransportFailed,

    #[error("relay channel closed")]
    RelayClosed,

    #[error("could not open a connection: {0}")]
    ConnectionUnavailable(String),

    #[error("invariant violated: {0}")]
    Invariant(&'static str),
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),

    #[error("relay channel closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse ICE server list: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("ICE server {0}: url cannot be empty")]
    EmptyUrl(String),

    #[error("ICE server {0}: TURN servers require username and credential")]
    MissingTurnCredentials(String),
}

/// Why a peer run ended
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
}
