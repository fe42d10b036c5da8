//! Resolution of configured peer strings to socket addresses.

use {
    crate::error::{ConsensusNetError, Result},
    log::warn,
    std::{
        collections::HashSet,
        net::{SocketAddr, ToSocketAddrs},
    },
};

/// Turns configured peer strings into socket addresses.
pub trait AddressResolver: Send + Sync {
    /// Resolve every peer, skipping (and logging) the ones that fail.
    /// The result has no duplicates and keeps first-seen order.
    fn resolve(&self, peers: &[String]) -> Vec<SocketAddr>;
}

/// Resolver backed by the system's name lookup.
///
/// A host name maps to one peer, so only the first address the system
/// returns is kept. Dialing every address of a dual-stack host would open
/// two sessions to the same node.
#[derive(Debug, Clone, Copy)]
pub struct SystemResolver {
    default_port: u16,
}

impl SystemResolver {
    pub fn new(default_port: u16) -> Self {
        Self { default_port }
    }

    fn lookup(&self, peer: &str) -> Result<SocketAddr> {
        let failed = |reason: String| ConsensusNetError::Resolve(peer.to_string(), reason);
        let host = peer.trim();
        if host.is_empty() {
            return Err(failed("empty address".to_string()));
        }
        if let Ok(addr) = host.parse::<SocketAddr>() {
            return Ok(addr);
        }
        let addrs = if has_port(host) {
            host.to_socket_addrs()
        } else {
            (host, self.default_port).to_socket_addrs()
        };
        addrs
            .map_err(|err| failed(err.to_string()))?
            .next()
            .ok_or_else(|| failed("no addresses".to_string()))
    }
}

/// `host:port` and `[v6]:port` carry a port; bare hosts and bare IPv6
/// literals do not.
fn has_port(peer: &str) -> bool {
    match peer.rsplit_once(':') {
        Some((host, port)) => {
            port.parse::<u16>().is_ok() && (!host.contains(':') || host.ends_with(']'))
        }
        None => false,
    }
}

impl AddressResolver for SystemResolver {
    fn resolve(&self, peers: &[String]) -> Vec<SocketAddr> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(peers.len());
        for peer in peers {
            match self.lookup(peer) {
                Ok(addr) => {
                    if seen.insert(addr) {
                        resolved.push(addr);
                    }
                }
                Err(err) => warn!("{err}, skipping"),
            }
        }
        resolved
    }
}
