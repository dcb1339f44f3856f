use std::{
    fs,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};
use tracing::warn;

/// Where the list of peers comes from.
#[derive(Debug, Clone)]
pub enum PeerDirectory {
    /// A newline-delimited file, re-read on every lookup so edits apply without a restart.
    File(PathBuf),
    Static(Vec<String>),
}

impl PeerDirectory {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn list(&self) -> Vec<String> {
        match self {
            Self::File(path) => match fs::read_to_string(path) {
                Ok(raw) => parse_peers(&raw),
                Err(e) => {
                    warn!(path = %path.display(), "no peers file ({e})");
                    Vec::new()
                }
            },
            Self::Static(peers) => peers.clone(),
        }
    }
}

/// One peer per line. Blank lines and `#` comments are skipped.
pub fn parse_peers(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// `host:port` for a peer entry. Entries without a port get `default_port`.
pub fn peer_addr(peer: &str, default_port: u16) -> String {
    if peer.parse::<SocketAddr>().is_ok() {
        return peer.to_string();
    }
    if let Ok(ip) = peer.parse::<IpAddr>() {
        return SocketAddr::new(ip, default_port).to_string();
    }
    match peer.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => peer.to_string(),
        _ => format!("{peer}:{default_port}"),
    }
}
