pub mod client;
pub mod protocol;

pub use client::RelayClient;
pub use protocol::{AnswerPayload, CandidatePayload, ClientMessage, OfferPayload, ServerMessage};
