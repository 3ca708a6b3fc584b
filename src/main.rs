use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use duocall_lib::config::{
    load_ice_servers, negotiation_timeout_from_secs, validate_ice_servers, ClientConfig,
    DEFAULT_ICE_SERVERS, DEFAULT_LISTEN_ADDR, DEFAULT_SIGNALING_URL,
};
use duocall_lib::peer::ice::probe_ice_server;
use duocall_lib::peer::types::{IceServerKind, RoomId, ServerConfig};
use duocall_lib::room::{server, Coordinator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "duocall", version, about = "Two-party video call rooms")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the room coordinator
    Serve {
        #[arg(long, env = "DUOCALL_LISTEN", default_value = DEFAULT_LISTEN_ADDR)]
        listen: String,
    },
    /// Join a room and negotiate a call with whoever else is in it
    Join {
        #[arg(env = "DUOCALL_ROOM")]
        room: String,
        #[arg(long, env = "DUOCALL_SERVER", default_value = DEFAULT_SIGNALING_URL)]
        server: String,
        /// JSON array of ICE servers; defaults to public STUN servers
        #[arg(long, env = "DUOCALL_ICE_CONFIG")]
        ice_config: Option<PathBuf>,
        /// Seconds to wait for the peer to finish negotiating; 0 waits forever
        #[arg(long, env = "DUOCALL_TIMEOUT", default_value_t = 30)]
        timeout: u64,
    },
    /// Check that a STUN/TURN server produces usable candidates
    ProbeIce {
        #[arg(long, env = "DUOCALL_PROBE_URL")]
        url: String,
        #[arg(long, value_enum, default_value_t = ProbeKind::Stun)]
        kind: ProbeKind,
        #[arg(long, env = "DUOCALL_PROBE_USERNAME")]
        username: Option<String>,
        #[arg(long, env = "DUOCALL_PROBE_CREDENTIAL")]
        credential: Option<String>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ProbeKind {
    Stun,
    Turn,
}

impl From<ProbeKind> for IceServerKind {
    fn from(kind: ProbeKind) -> Self {
        match kind {
            ProbeKind::Stun => IceServerKind::Stun,
            ProbeKind::Turn => IceServerKind::Turn,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    duocall_lib::logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { listen } => {
            let listener = TcpListener::bind(&listen)
                .await
                .with_context(|| format!("failed to bind {listen}"))?;
            server::serve(listener, Arc::new(Coordinator::new())).await?;
        }
        Command::Join {
            room,
            server,
            ice_config,
            timeout,
        } => {
            let room = room.trim();
            if room.is_empty() {
                bail!("room code cannot be empty");
            }
            let ice_servers = match ice_config {
                Some(path) => load_ice_servers(&path)
                    .with_context(|| format!("invalid ICE config {}", path.display()))?,
                None => DEFAULT_ICE_SERVERS.clone(),
            };
            let config = ClientConfig {
                signaling_url: server,
                ice_servers,
                negotiation_timeout: negotiation_timeout_from_secs(timeout),
            };
            duocall_lib::client::run(config, RoomId::from(room))
                .await
                .context("call ended with an error")?;
        }
        Command::ProbeIce {
            url,
            kind,
            username,
            credential,
        } => {
            let server = ServerConfig {
                id: "probe".into(),
                kind: kind.into(),
                url,
                username,
                credential,
            };
            validate_ice_servers(std::slice::from_ref(&server))?;
            let ok = probe_ice_server(&server).await?;
            info!("{} is {}", server.url, if ok { "reachable" } else { "unreachable" });
            if !ok {
                bail!("no usable candidate from {}", server.url);
            }
        }
    }
    Ok(())
}
