use crate::error::TransportError;
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::peer::engine::{EngineEvent, EventSender};
use crate::peer::ice::rtc_ice_servers;
use crate::peer::types::{
    IceCandidate, SdpType, ServerConfig, SessionDescriptor, SessionId, TrackKind, TransportState,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;
use webrtc::{
    api::APIBuilder,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// The connection object a PeerSession drives. Every step may suspend, but the
/// engine never runs two of them concurrently on the same session.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescriptor, TransportError>;
    async fn create_answer(&self) -> Result<SessionDescriptor, TransportError>;
    async fn set_local_description(&self, desc: &SessionDescriptor) -> Result<(), TransportError>;
    async fn set_remote_description(&self, desc: &SessionDescriptor)
        -> Result<(), TransportError>;
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError>;
    async fn close(&self) -> Result<(), TransportError>;
}

/// Opens one connection per PeerSession. Connections report asynchronous
/// happenings (local candidates, state changes, tracks) through `events`,
/// tagged with `session`.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    type Connection: PeerConnection;

    async fn open(
        &self,
        session: SessionId,
        events: EventSender,
    ) -> Result<Self::Connection, TransportError>;
}

/// webrtc-rs backed connection
pub struct WebRtcConnection {
    pc: Arc<RTCPeerConnection>,
}

pub struct WebRtcFactory {
    ice_servers: Vec<ServerConfig>,
}

impl WebRtcFactory {
    pub fn new(ice_servers: Vec<ServerConfig>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl ConnectionFactory for WebRtcFactory {
    type Connection = WebRtcConnection;

    async fn open(
        &self,
        session: SessionId,
        events: EventSender,
    ) -> Result<WebRtcConnection, TransportError> {
        let pc = new_peer(session, rtc_config(&self.ice_servers), events).await?;
        Ok(WebRtcConnection { pc })
    }
}

/// Creates the peer connection and wires its callbacks into the engine's queue.
async fn new_peer(
    session: SessionId,
    config: RTCConfiguration,
    events: EventSender,
) -> Result<Arc<RTCPeerConnection>, TransportError> {
    let mut media = MediaEngine::default();
    media.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media)?;

    let api = APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .build();
    let pc = Arc::new(api.new_peer_connection(config).await?);

    let tx = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        match cand {
            Some(c) => match c.to_json() {
                Ok(init) => {
                    let candidate = IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    };
                    dump_candidate("LOCAL", &candidate);
                    let _ = tx.send(EngineEvent::LocalCandidate { session, candidate });
                }
                Err(e) => warn!(%session, "failed to serialize local candidate: {e}"),
            },
            None => debug!(%session, "ICE candidate gathering completed"),
        }
        Box::pin(async {})
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!(%session, "ICE gathering state changed to: {:?}", state);
        Box::pin(async {})
    }));

    let tx = events.clone();
    let pc_stats = Arc::downgrade(&pc);
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!(%session, "peer connection state changed to: {:?}", st);

        let state = match st {
            RTCPeerConnectionState::Connecting => Some(TransportState::Connecting),
            RTCPeerConnectionState::Connected => Some(TransportState::Connected),
            RTCPeerConnectionState::Disconnected => Some(TransportState::Disconnected),
            RTCPeerConnectionState::Failed => Some(TransportState::Failed),
            RTCPeerConnectionState::Closed => Some(TransportState::Closed),
            _ => None,
        };

        if matches!(
            st,
            RTCPeerConnectionState::Connected | RTCPeerConnectionState::Failed
        ) {
            if let Some(pc) = pc_stats.upgrade() {
                let moment = if st == RTCPeerConnectionState::Connected {
                    "CONNECTED"
                } else {
                    "FAILED"
                };
                tokio::spawn(async move {
                    dump_selected_pair(&pc, moment).await;
                });
            }
        }

        if let Some(state) = state {
            let _ = tx.send(EngineEvent::TransportState { session, state });
        }
        Box::pin(async {})
    }));

    let tx = events;
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
            let kind = match track.kind() {
                RTPCodecType::Audio => TrackKind::Audio,
                _ => TrackKind::Video,
            };
            let _ = tx.send(EngineEvent::RemoteTrack {
                session,
                kind,
                track_id: track.id(),
            });
            Box::pin(async {})
        },
    ));

    // media sections for the call; capture is attached by the caller later
    pc.add_transceiver_from_kind(RTPCodecType::Audio, None)
        .await?;
    pc.add_transceiver_from_kind(RTPCodecType::Video, None)
        .await?;

    Ok(pc)
}

/// Creates the configuration for a peer connection
fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: rtc_ice_servers(servers),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

fn to_rtc(desc: &SessionDescriptor) -> Result<RTCSessionDescription, TransportError> {
    let rtc = match desc.kind {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp.clone())?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp.clone())?,
    };
    Ok(rtc)
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescriptor, TransportError> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescriptor::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescriptor::answer(desc.sdp)),
        other => Err(TransportError(format!("unexpected sdp type {other:?}"))),
    }
}

#[async_trait]
impl PeerConnection for WebRtcConnection {
    async fn create_offer(&self) -> Result<SessionDescriptor, TransportError> {
        from_rtc(self.pc.create_offer(None).await?)
    }

    async fn create_answer(&self) -> Result<SessionDescriptor, TransportError> {
        from_rtc(self.pc.create_answer(None).await?)
    }

    async fn set_local_description(&self, desc: &SessionDescriptor) -> Result<(), TransportError> {
        self.pc.set_local_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: &SessionDescriptor,
    ) -> Result<(), TransportError> {
        self.pc.set_remote_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment.clone(),
        };
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.pc.close().await?;
        Ok(())
    }
}
