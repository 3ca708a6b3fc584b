mod common;

use common::*;
use duocall_lib::peer::engine::{Effect, EngineEvent};
use duocall_lib::peer::state::{NegotiationState, Role};
use duocall_lib::peer::types::{ParticipantId, SdpType, SessionDescriptor, TransportState};
use duocall_lib::signaling::protocol::{
    AnswerPayload, CandidatePayload, ClientMessage, OfferPayload, ServerMessage,
};
use duocall_lib::NegotiationError;
use std::time::Duration;

fn offer_from(caller: &str, to: &str) -> ServerMessage {
    ServerMessage::Offer(OfferPayload {
        target: to.into(),
        sdp: SessionDescriptor::offer(format!("offer-from-{caller}")),
        caller: caller.into(),
    })
}

fn answer_to(target: &str) -> ServerMessage {
    ServerMessage::Answer(AnswerPayload {
        target: target.into(),
        sdp: SessionDescriptor::answer("answer-from-a"),
    })
}

fn remote_candidate(to: &str, n: u32) -> ServerMessage {
    ServerMessage::IceCandidate(CandidatePayload {
        target: to.into(),
        candidate: cand(n),
    })
}

#[tokio::test]
async fn join_opens_idle_session_and_asks_to_join() {
    let mut b = peer("b", Script::default(), None);
    b.engine
        .handle(signal(ServerMessage::Welcome("b".into())))
        .await;

    let fx = b.engine.join("abc".into()).await;
    assert_eq!(sent(&fx), vec![ClientMessage::JoinRoom("abc".into())]);
    assert_eq!(b.engine.state(), NegotiationState::Idle);
    assert_eq!(b.factory.opened(), 1);
    assert!(b.factory.calls().is_empty());
}

#[tokio::test]
async fn other_user_makes_us_offerer_and_sends_one_offer() {
    let mut b = joined_peer("b", "abc", Script::default()).await;

    let fx = b.engine.handle(signal(ServerMessage::OtherUser("a".into()))).await;

    assert_eq!(
        sent(&fx),
        vec![ClientMessage::Offer(OfferPayload {
            target: "a".into(),
            sdp: SessionDescriptor::offer("offer-from-b"),
            caller: "b".into(),
        })]
    );
    assert_eq!(b.engine.role(), Some(Role::Offerer));
    assert_eq!(b.engine.state(), NegotiationState::OfferSent);
    assert_eq!(
        b.factory.calls(),
        vec![Call::CreateOffer, Call::SetLocal(SdpType::Offer)]
    );

    let fx = b.engine.handle(signal(answer_to("b"))).await;
    assert!(sent(&fx).is_empty());
    assert_eq!(b.engine.state(), NegotiationState::Stable);
    assert_eq!(b.factory.calls().last(), Some(&Call::SetRemote(SdpType::Answer)));
}

#[tokio::test]
async fn user_joined_makes_us_answerer_without_sending_anything() {
    let mut a = joined_peer("a", "abc", Script::default()).await;

    let fx = a.engine.handle(signal(ServerMessage::UserJoined("b".into()))).await;

    assert!(sent(&fx).is_empty());
    assert_eq!(a.engine.state(), NegotiationState::RoleAssigned(Role::Answerer));
    assert_eq!(a.engine.peer(), Some(&ParticipantId::from("b")));
    assert!(a.factory.calls().is_empty());

    let fx = a.engine.handle(signal(offer_from("b", "a"))).await;
    assert_eq!(
        sent(&fx),
        vec![ClientMessage::Answer(AnswerPayload {
            target: "b".into(),
            sdp: SessionDescriptor::answer("answer-from-a"),
        })]
    );
    assert_eq!(a.engine.state(), NegotiationState::Stable);
    assert_eq!(
        a.factory.calls(),
        vec![
            Call::SetRemote(SdpType::Offer),
            Call::CreateAnswer,
            Call::SetLocal(SdpType::Answer)
        ]
    );
}

#[tokio::test]
async fn early_remote_candidates_are_applied_once_in_order_after_answer() {
    let mut a = joined_peer("a", "abc", Script::default()).await;
    a.engine.handle(signal(ServerMessage::UserJoined("b".into()))).await;

    for n in 1..=3 {
        let fx = a.engine.handle(signal(remote_candidate("a", n))).await;
        assert!(fx.is_empty());
    }
    assert_eq!(a.engine.pending_remote_candidates(), 3);
    assert!(added_candidates(&a.factory.calls()).is_empty());

    a.engine.handle(signal(offer_from("b", "a"))).await;

    let calls = a.factory.calls();
    let set_local = calls
        .iter()
        .position(|c| *c == Call::SetLocal(SdpType::Answer))
        .unwrap();
    assert_eq!(
        calls[set_local + 1..].to_vec(),
        vec![
            Call::AddCandidate(cand(1).candidate),
            Call::AddCandidate(cand(2).candidate),
            Call::AddCandidate(cand(3).candidate),
        ]
    );
    assert_eq!(a.engine.pending_remote_candidates(), 0);

    // later candidates go straight in, nothing is replayed
    a.engine.handle(signal(remote_candidate("a", 4))).await;
    assert_eq!(
        added_candidates(&a.factory.calls()),
        vec![
            cand(1).candidate,
            cand(2).candidate,
            cand(3).candidate,
            cand(4).candidate
        ]
    );
}

#[tokio::test]
async fn offerer_buffers_candidates_until_answer_arrives() {
    let mut b = joined_peer("b", "abc", Script::default()).await;
    b.engine.handle(signal(ServerMessage::OtherUser("a".into()))).await;

    b.engine.handle(signal(remote_candidate("b", 1))).await;
    b.engine.handle(signal(remote_candidate("b", 2))).await;
    assert_eq!(b.engine.pending_remote_candidates(), 2);

    b.engine.handle(signal(answer_to("b"))).await;
    assert_eq!(
        added_candidates(&b.factory.calls()),
        vec![cand(1).candidate, cand(2).candidate]
    );
}

#[tokio::test]
async fn local_candidates_wait_for_peer_then_flush_in_order() {
    let mut a = joined_peer("a", "abc", Script::default()).await;
    let session = a.engine.session_id().unwrap();

    for n in 1..=2 {
        let fx = a
            .engine
            .handle(EngineEvent::LocalCandidate {
                session,
                candidate: cand(n),
            })
            .await;
        assert!(sent(&fx).is_empty());
    }
    assert_eq!(a.engine.pending_local_candidates(), 2);

    let fx = a.engine.handle(signal(ServerMessage::UserJoined("b".into()))).await;
    let expected: Vec<ClientMessage> = (1..=2)
        .map(|n| {
            ClientMessage::IceCandidate(CandidatePayload {
                target: "b".into(),
                candidate: cand(n),
            })
        })
        .collect();
    assert_eq!(sent(&fx), expected);
    assert_eq!(a.engine.pending_local_candidates(), 0);

    let fx = a
        .engine
        .handle(EngineEvent::LocalCandidate {
            session,
            candidate: cand(3),
        })
        .await;
    assert_eq!(
        sent(&fx),
        vec![ClientMessage::IceCandidate(CandidatePayload {
            target: "b".into(),
            candidate: cand(3),
        })]
    );
}

#[tokio::test]
async fn offerer_sends_offer_before_its_queued_candidates() {
    let mut b = joined_peer("b", "abc", Script::default()).await;
    let session = b.engine.session_id().unwrap();
    b.engine
        .handle(EngineEvent::LocalCandidate {
            session,
            candidate: cand(1),
        })
        .await;

    let fx = b.engine.handle(signal(ServerMessage::OtherUser("a".into()))).await;
    let names: Vec<&str> = sent(&fx).iter().map(|m| m.event_name()).collect();
    assert_eq!(names, vec!["offer", "ice-candidate"]);
}

#[tokio::test]
async fn peer_disconnect_closes_session_and_silences_it() {
    let mut a = joined_peer("a", "abc", Script::default()).await;
    a.engine.handle(signal(ServerMessage::UserJoined("b".into()))).await;
    a.engine.handle(signal(remote_candidate("a", 1))).await;
    a.engine.handle(signal(remote_candidate("a", 2))).await;

    let fx = a.engine.handle(signal(ServerMessage::PeerLeft("b".into()))).await;

    assert_eq!(
        closed_reason(&fx),
        Some(Some(NegotiationError::PeerDisconnected("b".into()).to_string()))
    );
    assert!(sent(&fx).is_empty());
    assert_eq!(a.engine.state(), NegotiationState::Closed);
    assert_eq!(a.engine.pending_remote_candidates(), 0);
    assert_eq!(a.factory.calls(), vec![Call::Close]);

    // a late offer from the departed peer produces nothing
    let fx = a.engine.handle(signal(offer_from("b", "a"))).await;
    assert!(fx.is_empty());
    let fx = a.engine.handle(signal(remote_candidate("a", 3))).await;
    assert!(fx.is_empty());
    assert_eq!(a.factory.calls(), vec![Call::Close]);
}

#[tokio::test]
async fn departure_of_someone_else_is_ignored() {
    let mut a = joined_peer("a", "abc", Script::default()).await;
    a.engine.handle(signal(ServerMessage::UserJoined("b".into()))).await;

    let fx = a.engine.handle(signal(ServerMessage::PeerLeft("z".into()))).await;
    assert!(fx.is_empty());
    assert_eq!(a.engine.state(), NegotiationState::RoleAssigned(Role::Answerer));
}

#[tokio::test]
async fn next_pairing_after_disconnect_gets_a_fresh_session() {
    let mut a = joined_peer("a", "abc", Script::default()).await;
    a.engine.handle(signal(ServerMessage::UserJoined("b".into()))).await;
    let first = a.engine.session_id().unwrap();
    a.engine.handle(signal(ServerMessage::PeerLeft("b".into()))).await;

    a.engine.handle(signal(ServerMessage::UserJoined("c".into()))).await;
    let second = a.engine.session_id().unwrap();

    assert_ne!(first, second);
    assert_eq!(a.factory.opened(), 2);
    assert_eq!(a.engine.peer(), Some(&ParticipantId::from("c")));
    assert_eq!(a.engine.state(), NegotiationState::RoleAssigned(Role::Answerer));

    // callbacks from the released connection are dropped
    let fx = a
        .engine
        .handle(EngineEvent::LocalCandidate {
            session: first,
            candidate: cand(9),
        })
        .await;
    assert!(fx.is_empty());
}

#[tokio::test]
async fn pairing_with_a_different_peer_replaces_the_session() {
    let mut a = joined_peer("a", "abc", Script::default()).await;
    a.engine.handle(signal(ServerMessage::UserJoined("b".into()))).await;

    let fx = a.engine.handle(signal(ServerMessage::UserJoined("c".into()))).await;

    assert_eq!(
        closed_reason(&fx),
        Some(Some(NegotiationError::PeerDisconnected("b".into()).to_string()))
    );
    assert_eq!(a.factory.calls_of(0), vec![Call::Close]);
    assert_eq!(a.factory.opened(), 2);
    assert_eq!(a.engine.peer(), Some(&ParticipantId::from("c")));
}

#[tokio::test]
async fn duplicate_pairing_signal_is_ignored() {
    let mut b = joined_peer("b", "abc", Script::default()).await;
    b.engine.handle(signal(ServerMessage::OtherUser("a".into()))).await;

    let fx = b.engine.handle(signal(ServerMessage::OtherUser("a".into()))).await;
    assert!(fx.is_empty());
    assert_eq!(
        b.factory
            .calls()
            .iter()
            .filter(|c| **c == Call::CreateOffer)
            .count(),
        1
    );
}

#[tokio::test]
async fn bad_candidate_is_reported_but_not_fatal() {
    let script = Script {
        bad_candidates: vec![cand(2).candidate],
        ..Script::default()
    };
    let mut a = joined_peer("a", "abc", script).await;
    a.engine.handle(signal(ServerMessage::UserJoined("b".into()))).await;
    a.engine.handle(signal(remote_candidate("a", 1))).await;
    a.engine.handle(signal(remote_candidate("a", 2))).await;

    let fx = a.engine.handle(signal(offer_from("b", "a"))).await;
    assert!(fx.iter().any(|e| matches!(
        e,
        Effect::Warning(NegotiationError::CandidateApplicationFailed(_))
    )));
    assert_eq!(a.engine.state(), NegotiationState::Stable);

    let fx = a.engine.handle(signal(remote_candidate("a", 2))).await;
    assert!(matches!(
        fx.as_slice(),
        [Effect::Warning(NegotiationError::CandidateApplicationFailed(_))]
    ));
    let fx = a.engine.handle(signal(remote_candidate("a", 3))).await;
    assert!(fx.is_empty());
    assert_eq!(a.engine.state(), NegotiationState::Stable);
}

#[tokio::test]
async fn rejected_remote_description_closes_without_answering() {
    let script = Script {
        reject_remote_description: true,
        ..Script::default()
    };
    let mut a = joined_peer("a", "abc", script).await;
    a.engine.handle(signal(ServerMessage::UserJoined("b".into()))).await;

    let fx = a.engine.handle(signal(offer_from("b", "a"))).await;

    assert!(sent(&fx).is_empty());
    assert!(matches!(
        fx.last(),
        Some(Effect::Closed(Some(NegotiationError::DescriptionRejected(_))))
    ));
    assert_eq!(a.engine.state(), NegotiationState::Closed);
    assert_eq!(a.factory.calls().last(), Some(&Call::Close));
}

#[tokio::test]
async fn failed_offer_creation_closes_session() {
    let script = Script {
        reject_offer_creation: true,
        ..Script::default()
    };
    let mut b = joined_peer("b", "abc", script).await;

    let fx = b.engine.handle(signal(ServerMessage::OtherUser("a".into()))).await;

    assert!(sent(&fx).is_empty());
    assert!(matches!(
        fx.last(),
        Some(Effect::Closed(Some(NegotiationError::DescriptionRejected(_))))
    ));
}

#[tokio::test]
async fn offer_without_participant_id_is_an_invariant_violation() {
    let mut b = peer("b", Script::default(), None);
    b.engine.join("abc".into()).await;

    let fx = b.engine.handle(signal(ServerMessage::OtherUser("a".into()))).await;
    assert!(matches!(
        fx.last(),
        Some(Effect::Closed(Some(NegotiationError::Invariant(_))))
    ));
}

#[tokio::test]
async fn offer_before_pairing_signal_adopts_answerer_role() {
    let mut a = joined_peer("a", "abc", Script::default()).await;

    let fx = a.engine.handle(signal(offer_from("b", "a"))).await;

    assert_eq!(a.engine.role(), Some(Role::Answerer));
    assert_eq!(sent(&fx).len(), 1);
    assert_eq!(a.engine.state(), NegotiationState::Stable);
}

#[tokio::test]
async fn renegotiation_offer_is_ignored_once_stable() {
    let mut a = joined_peer("a", "abc", Script::default()).await;
    a.engine.handle(signal(ServerMessage::UserJoined("b".into()))).await;
    a.engine.handle(signal(offer_from("b", "a"))).await;
    let calls_before = a.factory.calls().len();

    let fx = a.engine.handle(signal(offer_from("b", "a"))).await;

    assert!(fx.is_empty());
    assert_eq!(a.factory.calls().len(), calls_before);
    assert_eq!(a.engine.state(), NegotiationState::Stable);
}

#[tokio::test]
async fn answer_when_no_offer_is_outstanding_is_ignored() {
    let mut a = joined_peer("a", "abc", Script::default()).await;
    a.engine.handle(signal(ServerMessage::UserJoined("b".into()))).await;

    let fx = a.engine.handle(signal(answer_to("a"))).await;
    assert!(fx.is_empty());
    assert!(a.factory.calls().is_empty());
}

#[tokio::test]
async fn offer_from_unpaired_participant_is_ignored() {
    let mut a = joined_peer("a", "abc", Script::default()).await;
    a.engine.handle(signal(ServerMessage::UserJoined("b".into()))).await;

    let fx = a.engine.handle(signal(offer_from("mallory", "a"))).await;
    assert!(fx.is_empty());
    assert_eq!(a.engine.state(), NegotiationState::RoleAssigned(Role::Answerer));
}

#[tokio::test(start_paused = true)]
async fn waiting_offerer_times_out() {
    let mut b = peer("b", Script::default(), Some(Duration::from_secs(10)));
    b.engine
        .handle(signal(ServerMessage::Welcome("b".into())))
        .await;
    b.engine.join("abc".into()).await;
    assert!(b.engine.deadline().is_none());

    b.engine.handle(signal(ServerMessage::OtherUser("a".into()))).await;
    let (session, at) = b.engine.deadline().unwrap();
    assert_eq!(at - tokio::time::Instant::now(), Duration::from_secs(10));

    let fx = b.engine.handle(EngineEvent::Timeout { session }).await;
    assert!(matches!(
        fx.last(),
        Some(Effect::Closed(Some(NegotiationError::NegotiationTimeout)))
    ));
    assert_eq!(b.engine.state(), NegotiationState::Closed);
    assert!(b.engine.deadline().is_none());
}

#[tokio::test(start_paused = true)]
async fn deadline_is_cleared_once_stable() {
    let mut a = peer("a", Script::default(), Some(Duration::from_secs(10)));
    a.engine
        .handle(signal(ServerMessage::Welcome("a".into())))
        .await;
    a.engine.join("abc".into()).await;
    a.engine.handle(signal(ServerMessage::UserJoined("b".into()))).await;
    let (session, _) = a.engine.deadline().unwrap();

    a.engine.handle(signal(offer_from("b", "a"))).await;
    assert!(a.engine.deadline().is_none());

    // a timer that fired late must not tear down a finished negotiation
    let fx = a.engine.handle(EngineEvent::Timeout { session }).await;
    assert!(fx.is_empty());
    assert_eq!(a.engine.state(), NegotiationState::Stable);
}

#[tokio::test]
async fn no_timeout_configured_means_no_deadline() {
    let mut b = joined_peer("b", "abc", Script::default()).await;
    b.engine.handle(signal(ServerMessage::OtherUser("a".into()))).await;
    assert!(b.engine.deadline().is_none());
}

#[tokio::test]
async fn full_room_closes_the_idle_session() {
    let mut c = joined_peer("c", "abc", Script::default()).await;

    let fx = c.engine.handle(signal(ServerMessage::RoomFull("abc".into()))).await;

    assert!(matches!(
        fx.last(),
        Some(Effect::Closed(Some(NegotiationError::RoomFull(_))))
    ));
    assert_eq!(c.engine.room(), None);
    assert_eq!(c.factory.calls(), vec![Call::Close]);
}

#[tokio::test]
async fn leave_closes_connection_and_notifies_coordinator() {
    let mut a = joined_peer("a", "abc", Script::default()).await;
    a.engine.handle(signal(ServerMessage::UserJoined("b".into()))).await;

    let fx = a.engine.handle(EngineEvent::Leave).await;

    assert_eq!(sent(&fx), vec![ClientMessage::LeaveRoom]);
    assert_eq!(closed_reason(&fx), Some(None));
    assert_eq!(a.factory.calls(), vec![Call::Close]);
    assert_eq!(a.engine.room(), None);
}

#[tokio::test]
async fn transport_failure_is_fatal_but_connected_is_a_notice() {
    let mut b = joined_peer("b", "abc", Script::default()).await;
    b.engine.handle(signal(ServerMessage::OtherUser("a".into()))).await;
    b.engine.handle(signal(answer_to("b"))).await;
    let session = b.engine.session_id().unwrap();

    let fx = b
        .engine
        .handle(EngineEvent::TransportState {
            session,
            state: TransportState::Connected,
        })
        .await;
    assert!(matches!(
        fx.as_slice(),
        [Effect::Transport(TransportState::Connected)]
    ));

    let fx = b
        .engine
        .handle(EngineEvent::TransportState {
            session,
            state: TransportState::Failed,
        })
        .await;
    assert!(matches!(
        fx.last(),
        Some(Effect::Closed(Some(NegotiationError::TransportFailed)))
    ));
}

#[tokio::test]
async fn connection_that_cannot_open_aborts_the_join() {
    let script = Script {
        fail_open: true,
        ..Script::default()
    };
    let mut a = peer("a", script, None);
    a.engine
        .handle(signal(ServerMessage::Welcome("a".into())))
        .await;

    let fx = a.engine.join("abc".into()).await;
    assert!(sent(&fx).is_empty());
    assert!(matches!(
        fx.as_slice(),
        [Effect::Closed(Some(NegotiationError::ConnectionUnavailable(_)))]
    ));
    assert_eq!(a.engine.room(), None);
}

#[tokio::test]
async fn switching_rooms_leaves_the_old_one_without_ending_the_run() {
    let mut a = joined_peer("a", "home", Script::default()).await;
    a.engine.handle(signal(ServerMessage::UserJoined("b".into()))).await;

    let fx = a.engine.join("elsewhere".into()).await;

    assert_eq!(
        sent(&fx),
        vec![
            ClientMessage::LeaveRoom,
            ClientMessage::JoinRoom("elsewhere".into())
        ]
    );
    assert_eq!(closed_reason(&fx), None);
    assert_eq!(a.factory.calls_of(0), vec![Call::Close]);
    assert_eq!(a.factory.opened(), 2);
    assert_eq!(a.engine.state(), NegotiationState::Idle);
    assert_eq!(a.engine.role(), None);
    assert_eq!(a.engine.room(), Some(&"elsewhere".into()));
}

#[tokio::test]
async fn closed_session_reports_no_role() {
    let mut b = joined_peer("b", "abc", Script::default()).await;
    b.engine.handle(signal(ServerMessage::OtherUser("a".into()))).await;
    assert_eq!(b.engine.role(), Some(Role::Offerer));

    b.engine.handle(signal(ServerMessage::PeerLeft("a".into()))).await;
    assert_eq!(b.engine.role(), None);
}
