use crate::config::{DEFAULT_LOG_FILTER, LOG_TIME_FORMAT};
use crate::peer::ice::CandidateKind;
use crate::peer::types::IceCandidate;
use tracing::{debug, info};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

/// Installs the global subscriber with millisecond local timestamps.
/// `RUST_LOG` overrides the build-dependent default filter.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(LOG_TIME_FORMAT.to_string()))
        .with_target(false)
        .try_init();
}

/// Prints an ICE candidate as it trickles in
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        "Trickle {label}: {:?} candidate={} sdp_mid={:?} sdp_mline_index={:?}",
        CandidateKind::classify(&cand.candidate),
        cand.candidate,
        cand.sdp_mid,
        cand.sdp_mline_index
    );
}

/// Quick getStats snapshot of the nominated pair
pub async fn dump_selected_pair(pc: &RTCPeerConnection, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, report) in stats.reports {
        if let StatsReportType::CandidatePair(pair) = report {
            if pair.nominated {
                info!(
                    "STATS {moment}: {}:{} bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}
