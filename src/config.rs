// Application configuration.
// Debug builds log verbosely; release builds default to info. RUST_LOG overrides both.

use crate::error::ConfigError;
use crate::peer::types::{IceServerKind, ServerConfig};
use once_cell::sync::Lazy;
use std::path::Path;
use std::time::Duration;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "debug,webrtc=info,webrtc_ice=info,webrtc_dtls=info";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "info,webrtc=warn,webrtc_ice=warn,webrtc_dtls=warn";

pub const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Coordinator listen address
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5004";

pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:5004";

pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Used when no ICE server list is configured
pub static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            kind: IceServerKind::Stun,
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            kind: IceServerKind::Stun,
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
});

/// Everything a peer needs to join a room.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub signaling_url: String,
    pub ice_servers: Vec<ServerConfig>,
    /// `None` waits for the peer forever.
    pub negotiation_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.into(),
            ice_servers: DEFAULT_ICE_SERVERS.clone(),
            negotiation_timeout: Some(DEFAULT_NEGOTIATION_TIMEOUT),
        }
    }
}

/// A timeout of zero seconds disables the negotiation deadline.
pub fn negotiation_timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Rejects servers the webrtc stack could never use.
pub fn validate_ice_servers(servers: &[ServerConfig]) -> Result<(), ConfigError> {
    for server in servers {
        if server.url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl(server.id.clone()));
        }
        if server.kind == IceServerKind::Turn
            && (server.username.is_none() || server.credential.is_none())
        {
            return Err(ConfigError::MissingTurnCredentials(server.id.clone()));
        }
    }
    Ok(())
}

pub fn parse_ice_servers(json: &str) -> Result<Vec<ServerConfig>, ConfigError> {
    let servers: Vec<ServerConfig> = serde_json::from_str(json)?;
    validate_ice_servers(&servers)?;
    Ok(servers)
}

/// Reads a JSON array of ICE servers, e.g.
/// `[{"id":"t1","type":"turn","url":"turn.example.org:3478","username":"u","credential":"c"}]`
pub fn load_ice_servers(path: &Path) -> Result<Vec<ServerConfig>, ConfigError> {
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_ice_servers(&json)
}
