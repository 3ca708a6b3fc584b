#![allow(dead_code)]

use async_trait::async_trait;
use duocall_lib::peer::connection::{ConnectionFactory, PeerConnection};
use duocall_lib::peer::engine::{Effect, EngineEvent, EventSender, NegotiationEngine};
use duocall_lib::peer::types::{IceCandidate, SdpType, SessionDescriptor, SessionId};
use duocall_lib::signaling::protocol::{ClientMessage, ServerMessage};
use duocall_lib::TransportError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Everything the engine asked a connection to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    AddCandidate(String),
    Close,
}

/// Failures to inject into every connection a factory opens.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub fail_open: bool,
    pub reject_offer_creation: bool,
    pub reject_remote_description: bool,
    pub bad_candidates: Vec<String>,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

pub struct MockConnection {
    label: String,
    log: CallLog,
    script: Script,
}

impl MockConnection {
    fn record(&self, call: Call) {
        self.log.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PeerConnection for MockConnection {
    async fn create_offer(&self) -> Result<SessionDescriptor, TransportError> {
        self.record(Call::CreateOffer);
        if self.script.reject_offer_creation {
            return Err(TransportError("no media sections".into()));
        }
        Ok(SessionDescriptor::offer(format!("offer-from-{}", self.label)))
    }

    async fn create_answer(&self) -> Result<SessionDescriptor, TransportError> {
        self.record(Call::CreateAnswer);
        Ok(SessionDescriptor::answer(format!("answer-from-{}", self.label)))
    }

    async fn set_local_description(&self, desc: &SessionDescriptor) -> Result<(), TransportError> {
        self.record(Call::SetLocal(desc.kind));
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: &SessionDescriptor,
    ) -> Result<(), TransportError> {
        self.record(Call::SetRemote(desc.kind));
        if self.script.reject_remote_description {
            return Err(TransportError("malformed sdp".into()));
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        self.record(Call::AddCandidate(candidate.candidate.clone()));
        if self.script.bad_candidates.contains(&candidate.candidate) {
            return Err(TransportError("unparseable candidate".into()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.record(Call::Close);
        Ok(())
    }
}

/// Hands out mock connections and keeps their call logs reachable from the test.
#[derive(Clone)]
pub struct MockFactory {
    label: String,
    script: Script,
    opened: Arc<Mutex<Vec<(SessionId, CallLog)>>>,
}

impl MockFactory {
    pub fn new(label: &str, script: Script) -> Self {
        Self {
            label: label.to_string(),
            script,
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    /// Calls made on the most recently opened connection.
    pub fn calls(&self) -> Vec<Call> {
        self.calls_of(self.opened() - 1)
    }

    pub fn calls_of(&self, index: usize) -> Vec<Call> {
        let opened = self.opened.lock().unwrap();
        let log = opened[index].1.lock().unwrap();
        log.clone()
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    async fn open(
        &self,
        session: SessionId,
        _events: EventSender,
    ) -> Result<MockConnection, TransportError> {
        if self.script.fail_open {
            return Err(TransportError("no network interfaces".into()));
        }
        let log = CallLog::default();
        self.opened.lock().unwrap().push((session, log.clone()));
        Ok(MockConnection {
            label: self.label.clone(),
            log,
            script: self.script.clone(),
        })
    }
}

pub struct TestPeer {
    pub engine: NegotiationEngine<MockFactory>,
    pub factory: MockFactory,
    pub events: mpsc::UnboundedReceiver<EngineEvent>,
}

pub fn peer(label: &str, script: Script, timeout: Option<Duration>) -> TestPeer {
    let (tx, rx) = mpsc::unbounded_channel();
    let factory = MockFactory::new(label, script);
    TestPeer {
        engine: NegotiationEngine::new(factory.clone(), tx, timeout),
        factory,
        events: rx,
    }
}

/// Peer that already knows its id and has joined `room`.
pub async fn joined_peer(label: &str, room: &str, script: Script) -> TestPeer {
    let mut p = peer(label, script, None);
    p.engine
        .handle(EngineEvent::Signal(ServerMessage::Welcome(label.into())))
        .await;
    p.engine.join(room.into()).await;
    p
}

pub fn signal(msg: ServerMessage) -> EngineEvent {
    EngineEvent::Signal(msg)
}

pub fn cand(n: u32) -> IceCandidate {
    IceCandidate::new(format!(
        "candidate:{n} 1 udp 2130706431 192.168.1.{n} 5000{n} typ host"
    ))
}

pub fn sent(effects: &[Effect]) -> Vec<ClientMessage> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Send(msg) => Some(msg.clone()),
            _ => None,
        })
        .collect()
}

pub fn closed_reason(effects: &[Effect]) -> Option<Option<String>> {
    effects.iter().find_map(|e| match e {
        Effect::Closed(reason) => Some(reason.as_ref().map(|r| r.to_string())),
        _ => None,
    })
}

pub fn added_candidates(calls: &[Call]) -> Vec<String> {
    calls
        .iter()
        .filter_map(|c| match c {
            Call::AddCandidate(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}
