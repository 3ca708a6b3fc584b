//! Relay message protocol.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`. Negotiation
//! messages (`offer`, `answer`, `ice-candidate`) are forwarded by the coordinator
//! verbatim, so they share payload types in both directions.

use crate::peer::types::{IceCandidate, ParticipantId, RoomId, SessionDescriptor};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OfferPayload {
    pub target: ParticipantId,
    pub sdp: SessionDescriptor,
    pub caller: ParticipantId,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AnswerPayload {
    pub target: ParticipantId,
    pub sdp: SessionDescriptor,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CandidatePayload {
    pub target: ParticipantId,
    pub candidate: IceCandidate,
}

/// Client → coordinator
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinRoom(RoomId),
    LeaveRoom,
    Offer(OfferPayload),
    Answer(AnswerPayload),
    IceCandidate(CandidatePayload),
}

/// Coordinator → client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Identifier issued to this connection.
    Welcome(ParticipantId),
    /// You arrived second; the payload is the peer you must offer to.
    OtherUser(ParticipantId),
    /// The payload just joined your room; wait for its offer.
    UserJoined(ParticipantId),
    RoomFull(RoomId),
    PeerLeft(ParticipantId),
    Offer(OfferPayload),
    Answer(AnswerPayload),
    IceCandidate(CandidatePayload),
}

impl ClientMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::JoinRoom(_) => "join-room",
            ClientMessage::LeaveRoom => "leave-room",
            ClientMessage::Offer(_) => "offer",
            ClientMessage::Answer(_) => "answer",
            ClientMessage::IceCandidate(_) => "ice-candidate",
        }
    }

    /// Target of a relayed negotiation message.
    pub fn relay_target(&self) -> Option<&ParticipantId> {
        match self {
            ClientMessage::Offer(p) => Some(&p.target),
            ClientMessage::Answer(p) => Some(&p.target),
            ClientMessage::IceCandidate(p) => Some(&p.target),
            ClientMessage::JoinRoom(_) | ClientMessage::LeaveRoom => None,
        }
    }

    /// The message as the target receives it, for relayable messages.
    pub fn into_relayed(self) -> Option<ServerMessage> {
        match self {
            ClientMessage::Offer(p) => Some(ServerMessage::Offer(p)),
            ClientMessage::Answer(p) => Some(ServerMessage::Answer(p)),
            ClientMessage::IceCandidate(p) => Some(ServerMessage::IceCandidate(p)),
            ClientMessage::JoinRoom(_) | ClientMessage::LeaveRoom => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Welcome(_) => "welcome",
            ServerMessage::OtherUser(_) => "other-user",
            ServerMessage::UserJoined(_) => "user-joined",
            ServerMessage::RoomFull(_) => "room-full",
            ServerMessage::PeerLeft(_) => "peer-left",
            ServerMessage::Offer(_) => "offer",
            ServerMessage::Answer(_) => "answer",
            ServerMessage::IceCandidate(_) => "ice-candidate",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_room_wire_shape() {
        let msg = ClientMessage::JoinRoom("abc".into());
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({ "event": "join-room", "data": "abc" }));
    }

    #[test]
    fn browser_style_offer_parses() {
        let raw = json!({
            "event": "offer",
            "data": {
                "target": "a1",
                "sdp": { "type": "offer", "sdp": "v=0\r\n" },
                "caller": "b2"
            }
        })
        .to_string();

        match ClientMessage::from_json(&raw).unwrap() {
            ClientMessage::Offer(p) => {
                assert_eq!(p.target, ParticipantId::from("a1"));
                assert_eq!(p.caller, ParticipantId::from("b2"));
                assert_eq!(p.sdp, SessionDescriptor::offer("v=0\r\n"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn candidate_uses_browser_field_names() {
        let msg = ServerMessage::IceCandidate(CandidatePayload {
            target: "a1".into(),
            candidate: IceCandidate {
                candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            },
        });
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "ice-candidate");
        assert_eq!(value["data"]["candidate"]["sdpMid"], "0");
        assert_eq!(value["data"]["candidate"]["sdpMLineIndex"], 0);
        assert!(value["data"]["candidate"].get("usernameFragment").is_none());
    }

    #[test]
    fn leave_room_has_no_payload() {
        let parsed = ClientMessage::from_json(r#"{"event":"leave-room"}"#).unwrap();
        assert_eq!(parsed, ClientMessage::LeaveRoom);
    }

    #[test]
    fn only_negotiation_messages_are_relayable() {
        assert!(ClientMessage::JoinRoom("abc".into()).into_relayed().is_none());
        let answer = ClientMessage::Answer(AnswerPayload {
            target: "a1".into(),
            sdp: SessionDescriptor::answer("v=0"),
        });
        assert_eq!(answer.relay_target(), Some(&ParticipantId::from("a1")));
        assert_eq!(answer.into_relayed().map(|m| m.event_name()), Some("answer"));
    }
}
