use crate::error::TransportError;
use crate::peer::types::{IceServerKind, ServerConfig};
use crate::utils::add_ice_url_scheme;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use webrtc::{
    api::APIBuilder,
    ice_transport::{ice_gatherer_state::RTCIceGathererState, ice_server::RTCIceServer},
    peer_connection::{configuration::RTCConfiguration, RTCPeerConnection},
};

/// How long `probe_ice_server` waits for a matching candidate.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Converts configured servers into what the webrtc stack expects.
pub fn rtc_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Candidate type as advertised in the `typ` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    Host,
    ServerReflexive,
    PeerReflexive,
    Relay,
    Unknown,
}

impl CandidateKind {
    pub fn classify(candidate: &str) -> Self {
        let mut parts = candidate.split_whitespace();
        while let Some(part) = parts.next() {
            if part == "typ" {
                return match parts.next() {
                    Some("host") => CandidateKind::Host,
                    Some("srflx") => CandidateKind::ServerReflexive,
                    Some("prflx") => CandidateKind::PeerReflexive,
                    Some("relay") => CandidateKind::Relay,
                    _ => CandidateKind::Unknown,
                };
            }
        }
        CandidateKind::Unknown
    }

    /// The candidate type a working server of `kind` must produce.
    pub fn expected_from(kind: IceServerKind) -> Self {
        match kind {
            IceServerKind::Stun => CandidateKind::ServerReflexive,
            IceServerKind::Turn => CandidateKind::Relay,
        }
    }
}

/// Per-type candidate counts for one session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
    pub other: usize,
}

impl CandidateSummary {
    pub fn record(&mut self, candidate: &str) {
        match CandidateKind::classify(candidate) {
            CandidateKind::Host => self.host += 1,
            CandidateKind::ServerReflexive => self.srflx += 1,
            CandidateKind::Relay => self.relay += 1,
            CandidateKind::PeerReflexive | CandidateKind::Unknown => self.other += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.host + self.srflx + self.relay + self.other
    }

    pub fn log(&self, label: &str) {
        info!(
            "{label} candidate analysis: {} host, {} srflx, {} relay",
            self.host, self.srflx, self.relay
        );
        if self.total() > 0 && self.relay == 0 {
            warn!("{label}: no TURN relay candidates, connection through symmetric NAT may fail");
        }
    }
}

/// Checks that an ICE server answers by gathering candidates against it alone.
/// STUN servers must yield an srflx candidate, TURN servers a relay candidate.
pub async fn probe_ice_server(config: &ServerConfig) -> Result<bool, TransportError> {
    let url = add_ice_url_scheme(config);
    debug!("probing ICE server '{}' -> '{}'", config.url, url);

    let rtc_config = RTCConfiguration {
        ice_servers: rtc_ice_servers(std::slice::from_ref(config)),
        ..Default::default()
    };

    let api = APIBuilder::new().build();
    let pc = Arc::new(api.new_peer_connection(rtc_config).await?);

    let result = check_via_ice_gathering(&pc, CandidateKind::expected_from(config.kind)).await;
    if let Err(e) = pc.close().await {
        warn!("failed to close probe connection: {e}");
    }
    result
}

async fn check_via_ice_gathering(
    pc: &Arc<RTCPeerConnection>,
    expected: CandidateKind,
) -> Result<bool, TransportError> {
    let (state_tx, mut state_rx) = mpsc::unbounded_channel();
    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!("ICE gathering state changed to: {:?}", state);
        let _ = state_tx.send(state);
        Box::pin(async {})
    }));

    let (found_tx, mut found_rx) = mpsc::unbounded_channel();
    pc.on_ice_candidate(Box::new(move |candidate| {
        if let Some(c) = candidate {
            match c.to_json() {
                Ok(init) => {
                    let kind = CandidateKind::classify(&init.candidate);
                    debug!("probe candidate {:?}: {}", kind, init.candidate);
                    if kind == expected {
                        let _ = found_tx.send(());
                    }
                }
                Err(e) => warn!("failed to serialize probe candidate: {e}"),
            }
        }
        Box::pin(async {})
    }));

    // a data channel gives the offer something to gather for
    pc.create_data_channel("probe", None).await?;
    let offer = pc.create_offer(None).await?;
    pc.set_local_description(offer).await?;

    let gathering_done = async {
        while let Some(state) = state_rx.recv().await {
            if state == RTCIceGathererState::Complete {
                break;
            }
        }
    };

    tokio::select! {
        found = timeout(PROBE_TIMEOUT, found_rx.recv()) => match found {
            Ok(Some(())) => Ok(true),
            Ok(None) => Ok(false),
            Err(_) => {
                warn!("timed out after {}s waiting for a {:?} candidate", PROBE_TIMEOUT.as_secs(), expected);
                Ok(false)
            }
        },
        _ = gathering_done => {
            // gathering may complete right after the matching candidate was queued
            Ok(found_rx.try_recv().is_ok())
        }
    }
}
