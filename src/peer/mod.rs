pub mod buffer;
pub mod connection;
pub mod engine;
pub mod ice;
pub mod state;
pub mod types;

pub use buffer::CandidateBuffer;
pub use connection::{ConnectionFactory, PeerConnection, WebRtcConnection, WebRtcFactory};
pub use engine::{Effect, EngineEvent, EventSender, NegotiationEngine};
pub use state::{NegotiationState, Role};
pub use types::{
    IceCandidate, IceServerKind, ParticipantId, RoomId, SdpType, ServerConfig, SessionDescriptor,
    SessionId, TrackKind, TransportState,
};
