//! Two-party rooms and the offer/answer negotiation that connects them.
//!
//! The [`room`] module is the coordinator: it pairs participants two per room and
//! relays their negotiation messages. The [`peer`] module is the per-participant
//! side: a [`peer::NegotiationEngine`] that turns relay messages and connection
//! callbacks into an agreed session description and a working transport path.

pub mod client;
pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod room;
pub mod session;
pub mod signaling;
pub mod utils;

pub use error::{ClientError, ConfigError, NegotiationError, SignalingError, TransportError};
